// Request Dispatcher
//
// Every authenticated call goes through here: credentials are resolved per
// request, proxy mode rewrites the target, and failures come back normalized.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::constants::{header, CONTENT_TYPE_JSON};
use super::error_mapping::{from_response, from_transport};
use super::urls::QueueUrls;
use crate::config::ClientConfig;
use crate::error::{code, Result, SunraError};
use crate::port::{HttpRequest, HttpResponse, HttpTransport, Method, StreamingResponse};

/// Shared request plumbing for one configuration snapshot
#[derive(Clone)]
pub struct RequestDispatcher {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    urls: QueueUrls,
}

impl RequestDispatcher {
    pub fn new(config: Arc<ClientConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        let urls = QueueUrls::new(config.queue_base_url.clone(), config.rest_base_url.clone());
        Self {
            config,
            transport,
            urls,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn urls(&self) -> &QueueUrls {
        &self.urls
    }

    /// Build an authenticated JSON request for `target_url`
    pub fn request(&self, method: Method, target_url: &str, body: Option<&Value>) -> Result<HttpRequest> {
        let proxy = self
            .config
            .proxy_url
            .as_deref()
            .filter(|proxy| !target_url.starts_with(*proxy));

        let mut request = HttpRequest::new(method, proxy.unwrap_or(target_url));
        if let Some(key) = self.config.credentials.resolve() {
            request = request.header(header::AUTHORIZATION, format!("Key {}", key));
        }
        request = request
            .header(header::ACCEPT, CONTENT_TYPE_JSON)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(header::USER_AGENT, self.config.user_agent.as_str());
        if proxy.is_some() {
            request = request.header(header::TARGET_URL, target_url);
        }
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }
        Ok(request)
    }

    /// Send and require a 2xx response
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "Dispatching request");
        let response = self.transport.send(request).await.map_err(from_transport)?;
        if !response.is_success() {
            return Err(from_response(&response));
        }
        Ok(response)
    }

    /// Send and decode the JSON body
    ///
    /// An empty body decodes as `null`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let response = self.send(request).await?;
        let value = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body)?
        };
        serde_json::from_value(value).map_err(|e| {
            let err = if response.body.is_empty() {
                SunraError::protocol(code::EMPTY_BODY, "Response body is empty")
            } else {
                SunraError::from(e)
            };
            match response.header(header::REQUEST_ID) {
                Some(id) => err.with_request_id(id),
                None => err,
            }
        })
    }

    /// Open a streaming request; the status code is left to the caller
    pub async fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        debug!(method = %request.method, url = %request.url, "Opening stream");
        self.transport
            .send_streaming(request)
            .await
            .map_err(from_transport)
    }

    /// Send a request as-is (no credentials, no proxy)
    pub async fn send_unauthenticated(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "Dispatching raw request");
        self.transport.send(request).await.map_err(from_transport)
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::ErrorKind;
    use crate::port::mocks::{MockReply, MockTransport};
    use serde_json::json;

    fn dispatcher(config: ClientConfig, transport: MockTransport) -> RequestDispatcher {
        RequestDispatcher::new(Arc::new(config), Arc::new(transport))
    }

    #[test]
    fn test_request_headers() {
        let d = dispatcher(
            ClientConfig::default().with_credentials(Credentials::from_static("key-1")),
            MockTransport::new(|_| MockReply::empty(200)),
        );
        let req = d
            .request(Method::Post, "https://api.sunra.ai/v1/queue/a/b", Some(&json!({"x": 1})))
            .unwrap();

        assert_eq!(req.url, "https://api.sunra.ai/v1/queue/a/b");
        assert_eq!(req.header_value("authorization"), Some("Key key-1"));
        assert_eq!(req.header_value("accept"), Some("application/json"));
        assert!(req.header_value("user-agent").unwrap().starts_with("sunra-client/"));
        assert!(req.header_value(header::TARGET_URL).is_none());
        assert_eq!(req.body.as_deref(), Some(br#"{"x":1}"#.as_slice()));
    }

    #[test]
    fn test_no_credentials_no_auth_header() {
        let d = dispatcher(
            ClientConfig::default().with_credentials(Credentials::None),
            MockTransport::new(|_| MockReply::empty(200)),
        );
        let req = d.request(Method::Get, "https://api.sunra.ai/v1/queue/requests/r", None).unwrap();
        assert!(req.header_value("authorization").is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_proxy_rewrites_target() {
        let d = dispatcher(
            ClientConfig::default().with_proxy_url("https://my.app/api/sunra/proxy"),
            MockTransport::new(|_| MockReply::empty(200)),
        );

        let req = d.request(Method::Get, "https://api.sunra.ai/v1/queue/requests/r", None).unwrap();
        assert_eq!(req.url, "https://my.app/api/sunra/proxy");
        assert_eq!(
            req.header_value(header::TARGET_URL),
            Some("https://api.sunra.ai/v1/queue/requests/r")
        );

        // already aimed at the proxy
        let req = d.request(Method::Get, "https://my.app/api/sunra/proxy/x", None).unwrap();
        assert_eq!(req.url, "https://my.app/api/sunra/proxy/x");
        assert!(req.header_value(header::TARGET_URL).is_none());
    }

    #[tokio::test]
    async fn test_send_json_maps_failures() {
        let d = dispatcher(
            ClientConfig::default(),
            MockTransport::new(|_| MockReply::json(400, json!({"error": {"code": "BAD", "message": "bad"}}))),
        );
        let req = d.request(Method::Get, "https://api.sunra.ai/v1/x", None).unwrap();
        let err = d.send_json::<Value>(req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, "BAD");
    }

    #[tokio::test]
    async fn test_send_json_empty_body() {
        let d = dispatcher(ClientConfig::default(), MockTransport::new(|_| MockReply::empty(200)));

        let req = d.request(Method::Get, "https://api.sunra.ai/v1/x", None).unwrap();
        assert_eq!(d.send_json::<Value>(req).await.unwrap(), Value::Null);

        let req = d.request(Method::Get, "https://api.sunra.ai/v1/x", None).unwrap();
        let err = d.send_json::<Vec<String>>(req).await.unwrap_err();
        assert_eq!(err.code, code::EMPTY_BODY);
    }
}
