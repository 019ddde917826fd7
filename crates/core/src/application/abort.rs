// Abort Signal

use tokio::sync::watch;

/// Receiving side of an abort request
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    /// Check if abort was requested
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Reason passed to `abort`, if any
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone().filter(|r| !r.is_empty())
    }

    /// Wait for the abort request
    ///
    /// Never resolves if every handle is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|reason| reason.is_some()).await.is_err();
        if closed {
            futures::future::pending::<()>().await;
        }
    }
}

/// Sending side: aborts every signal cloned from it
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: std::sync::Arc<watch::Sender<Option<String>>>,
}

impl AbortHandle {
    /// Request abort; later calls keep the first reason
    pub fn abort(&self, reason: Option<&str>) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.unwrap_or_default().to_string());
            true
        });
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create an abort pair
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(None);
    (
        AbortHandle {
            tx: std::sync::Arc::new(tx),
        },
        AbortSignal { rx },
    )
}
