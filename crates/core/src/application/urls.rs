// Queue URL Building
//
// Endpoint ids are `owner/alias[/path]`; legacy `123-alias` ids are rewritten
// to `123/alias`. A full sunra URL passed as an endpoint id is used as-is.

use url::Url;

use crate::error::{code, Result, SunraError};

/// Normalize an endpoint id to `owner/alias[/path]`
pub fn normalize_endpoint_id(id: &str) -> Result<String> {
    let id = id.trim_matches('/');
    if id.is_empty() {
        return Err(SunraError::validation(
            code::INVALID_ENDPOINT_ID,
            "Endpoint id must not be empty",
        ));
    }
    if id.contains('/') {
        return Ok(id.to_string());
    }

    if let Some((owner, alias)) = id.split_once('-') {
        let owner_ok = !owner.is_empty() && owner.chars().all(|c| c.is_ascii_digit());
        let alias_ok =
            !alias.is_empty() && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if owner_ok && alias_ok {
            return Ok(format!("{}/{}", owner, alias));
        }
    }

    Err(SunraError::validation(
        code::INVALID_ENDPOINT_ID,
        format!(
            "Invalid endpoint id: {}. Must be in the format <owner>/<alias>",
            id
        ),
    ))
}

/// Whether `value` is an absolute URL on a sunra host
pub fn is_sunra_url(value: &str) -> bool {
    Url::parse(value)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .map(|host| {
            ["sunra.ai", "sunra.run"]
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
        })
        .unwrap_or(false)
}

/// URL factory bound to one configuration snapshot
#[derive(Debug, Clone)]
pub struct QueueUrls {
    queue_base: String,
    rest_base: String,
}

impl QueueUrls {
    pub fn new(queue_base: impl Into<String>, rest_base: impl Into<String>) -> Self {
        Self {
            queue_base: queue_base.into(),
            rest_base: rest_base.into(),
        }
    }

    /// `POST {queue}/{endpoint}[?webhook=...]`
    pub fn submit(&self, endpoint_id: &str, webhook_url: Option<&str>) -> Result<String> {
        let mut url = self.endpoint(endpoint_id)?;
        if let Some(webhook) = webhook_url {
            url.query_pairs_mut().append_pair("webhook", webhook);
        }
        Ok(url.into())
    }

    /// `GET {queue}/requests/{id}/status?logs=0|1`
    pub fn status(&self, request_id: &str, logs: bool) -> Result<String> {
        let mut url = self.request(request_id, &["status"])?;
        url.query_pairs_mut()
            .append_pair("logs", if logs { "1" } else { "0" });
        Ok(url.into())
    }

    /// `GET {queue}/requests/{id}/status/stream?logs=0|1`
    pub fn status_stream(&self, request_id: &str, logs: bool) -> Result<String> {
        let mut url = self.request(request_id, &["status", "stream"])?;
        url.query_pairs_mut()
            .append_pair("logs", if logs { "1" } else { "0" });
        Ok(url.into())
    }

    /// `GET {queue}/requests/{id}`
    pub fn result(&self, request_id: &str) -> Result<String> {
        Ok(self.request(request_id, &[])?.into())
    }

    /// `PUT {queue}/requests/{id}/cancel`
    pub fn cancel(&self, request_id: &str) -> Result<String> {
        Ok(self.request(request_id, &["cancel"])?.into())
    }

    /// `POST {rest}/storage/upload/initiate`
    pub fn upload_initiate(&self) -> Result<String> {
        let mut url = parse_base(&self.rest_base)?;
        push_segments(&mut url, ["storage", "upload", "initiate"])?;
        Ok(url.into())
    }

    fn endpoint(&self, endpoint_id: &str) -> Result<Url> {
        if is_sunra_url(endpoint_id) {
            return parse_base(endpoint_id);
        }
        let normalized = normalize_endpoint_id(endpoint_id)?;
        let mut url = parse_base(&self.queue_base)?;
        push_segments(&mut url, normalized.split('/').filter(|s| !s.is_empty()))?;
        Ok(url)
    }

    fn request(&self, request_id: &str, suffix: &[&str]) -> Result<Url> {
        if request_id.trim().is_empty() {
            return Err(SunraError::validation(
                code::MISSING_TARGET,
                "Request id must not be empty",
            ));
        }
        let mut url = parse_base(&self.queue_base)?;
        push_segments(
            &mut url,
            ["requests", request_id].into_iter().chain(suffix.iter().copied()),
        )?;
        Ok(url)
    }
}

fn parse_base(base: &str) -> Result<Url> {
    Url::parse(base).map_err(|e| {
        SunraError::validation(code::INVALID_URL, format!("Invalid URL '{}': {}", base, e))
    })
}

fn push_segments<'a>(url: &mut Url, segments: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let display = url.to_string();
    let mut path = url.path_segments_mut().map_err(|_| {
        SunraError::validation(code::INVALID_URL, format!("URL cannot be a base: {}", display))
    })?;
    path.pop_if_empty().extend(segments);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn urls() -> QueueUrls {
        QueueUrls::new("https://api.sunra.ai/v1/queue", "https://api.sunra.ai/v1")
    }

    #[test]
    fn test_normalize_endpoint_id() {
        assert_eq!(normalize_endpoint_id("sunra/lcm").unwrap(), "sunra/lcm");
        assert_eq!(
            normalize_endpoint_id("black-forest-labs/flux/dev").unwrap(),
            "black-forest-labs/flux/dev"
        );
        assert_eq!(normalize_endpoint_id("12345-my-app").unwrap(), "12345/my-app");

        let err = normalize_endpoint_id("just-an-alias").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, code::INVALID_ENDPOINT_ID);
        assert!(normalize_endpoint_id("").is_err());
    }

    #[test]
    fn test_is_sunra_url() {
        assert!(is_sunra_url("https://api.sunra.ai/v1/queue/a/b"));
        assert!(is_sunra_url("https://my-app.sunra.run"));
        assert!(!is_sunra_url("https://notsunra.ai/x"));
        assert!(!is_sunra_url("sunra/lcm"));
    }

    #[test]
    fn test_submit_url_with_webhook() {
        let url = urls()
            .submit("sunra/lcm", Some("https://hooks.example.com/done?x=1"))
            .unwrap();
        assert_eq!(
            url,
            "https://api.sunra.ai/v1/queue/sunra/lcm?webhook=https%3A%2F%2Fhooks.example.com%2Fdone%3Fx%3D1"
        );
        assert_eq!(
            urls().submit("sunra/lcm", None).unwrap(),
            "https://api.sunra.ai/v1/queue/sunra/lcm"
        );
    }

    #[test]
    fn test_submit_url_verbatim_for_sunra_urls() {
        let url = urls()
            .submit("https://staging.sunra.ai/v1/queue/sunra/lcm", None)
            .unwrap();
        assert_eq!(url, "https://staging.sunra.ai/v1/queue/sunra/lcm");
    }

    #[test]
    fn test_request_urls() {
        let u = urls();
        assert_eq!(
            u.status("req-1", true).unwrap(),
            "https://api.sunra.ai/v1/queue/requests/req-1/status?logs=1"
        );
        assert_eq!(
            u.status_stream("req-1", false).unwrap(),
            "https://api.sunra.ai/v1/queue/requests/req-1/status/stream?logs=0"
        );
        assert_eq!(
            u.result("req-1").unwrap(),
            "https://api.sunra.ai/v1/queue/requests/req-1"
        );
        assert_eq!(
            u.cancel("req-1").unwrap(),
            "https://api.sunra.ai/v1/queue/requests/req-1/cancel"
        );
        assert_eq!(
            u.upload_initiate().unwrap(),
            "https://api.sunra.ai/v1/storage/upload/initiate"
        );
    }

    #[test]
    fn test_request_id_is_path_encoded() {
        let url = urls().result("a/b c").unwrap();
        assert_eq!(url, "https://api.sunra.ai/v1/queue/requests/a%2Fb%20c");
    }

    #[test]
    fn test_empty_request_id_rejected() {
        let err = urls().cancel("  ").unwrap_err();
        assert_eq!(err.code, code::MISSING_TARGET);
    }
}
