//! Subscribe Example
//!
//! Submits one job, prints every status change and the final result.
//!
//! # Usage
//!
//! ```bash
//! SUNRA_KEY=... cargo run --example subscribe -- sunra/lcm/text-to-image "a red fox"
//! ```

use std::time::Duration;
use sunra_client::{JobStatus, SubscribeMode, SubscribeOptions, SunraClient};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "sunra/lcm/text-to-image".to_string());
    let prompt = args.next().unwrap_or_else(|| "a lighthouse at dusk".to_string());

    let client = SunraClient::from_env()?;
    println!("Submitting to {}", endpoint);

    let result = client
        .subscribe(
            &endpoint,
            SubscribeOptions::default()
                .with_input(json!({ "prompt": prompt }))
                .with_mode(SubscribeMode::Streaming)
                .with_logs(true)
                .with_timeout(Duration::from_secs(300))
                .on_enqueue(|id| println!("  enqueued: {}", id))
                .on_queue_update(|status| match status {
                    JobStatus::InQueue(s) => println!("  queued (position {})", s.queue_position),
                    JobStatus::InProgress(s) => {
                        for line in &s.logs {
                            println!("  | {}", line.message);
                        }
                    }
                    JobStatus::Completed(_) => println!("  completed"),
                }),
        )
        .await?;

    if let Some(result) = result {
        println!("\n{}", serde_json::to_string_pretty(&result.data)?);
    }
    Ok(())
}
