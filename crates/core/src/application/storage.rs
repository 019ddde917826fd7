// Input Transformer & File Upload
//
// Walks a job input, uploads every file-like value through the two-phase
// storage protocol and substitutes the returned URL:
//   1. POST {rest}/storage/upload/initiate {content_type, file_name} -> {upload_url, file_url}
//   2. PUT the bytes to upload_url with the content type header

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::constants::{header, DEFAULT_CONTENT_TYPE};
use super::dispatch::RequestDispatcher;
use crate::domain::{FileInput, InputValue};
use crate::error::{code, ErrorKind, Result, SunraError};
use crate::port::{HttpRequest, Method, TimeProvider};

#[derive(Debug, Serialize)]
struct InitiateUpload<'a> {
    content_type: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_url: String,
    file_url: String,
}

/// Storage client (upload + input transformation)
#[derive(Clone)]
pub struct StorageClient {
    dispatcher: RequestDispatcher,
    clock: Arc<dyn TimeProvider>,
}

impl StorageClient {
    pub fn new(dispatcher: RequestDispatcher, clock: Arc<dyn TimeProvider>) -> Self {
        Self { dispatcher, clock }
    }

    /// Upload one file and return its public URL
    pub async fn upload(&self, file: FileInput) -> Result<String> {
        let content_type = file
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let file_name = file.file_name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
            format!(
                "{}.{}",
                self.clock.now_millis(),
                extension_for_content_type(&content_type)
            )
        });

        let initiate_url = self.dispatcher.urls().upload_initiate()?;
        let body = serde_json::to_value(InitiateUpload {
            content_type: &content_type,
            file_name: &file_name,
        })?;
        let request = self
            .dispatcher
            .request(Method::Post, &initiate_url, Some(&body))?;
        let target: UploadTarget = self
            .dispatcher
            .send_json(request)
            .await
            .map_err(|e| as_upload_error(e, "Failed to initiate upload"))?;

        debug!(file_name = %file_name, size = file.bytes.len(), "Uploading file");
        let put = HttpRequest::new(Method::Put, &target.upload_url)
            .header(header::CONTENT_TYPE, content_type.as_str())
            .body(file.bytes);
        let response = self
            .dispatcher
            .send_unauthenticated(put)
            .await
            .map_err(|e| as_upload_error(e, "Failed to upload file"))?;
        if !response.is_success() {
            return Err(SunraError::upload(format!(
                "Failed to upload file: HTTP {}",
                response.status
            ))
            .with_details(serde_json::json!({
                "statusCode": response.status,
                "responseBody": response.text(),
            })));
        }

        info!(file_url = %target.file_url, "File uploaded");
        Ok(target.file_url)
    }

    /// Replace every file-like value in `input` by its uploaded URL
    ///
    /// Siblings are transformed concurrently; key and element order is kept.
    pub fn transform_input(&self, input: InputValue) -> BoxFuture<'_, Result<Value>> {
        async move {
            match input {
                InputValue::Null => Ok(Value::Null),
                InputValue::Bool(b) => Ok(Value::Bool(b)),
                InputValue::Number(n) => Ok(Value::Number(n)),
                InputValue::File(file) => self.upload(file).await.map(Value::String),
                InputValue::String(s) => match self.resolve_blob_handle(&s).await? {
                    Some(file) => self.upload(file).await.map(Value::String),
                    None => Ok(Value::String(s)),
                },
                InputValue::Array(items) => {
                    let values =
                        try_join_all(items.into_iter().map(|item| self.transform_input(item)))
                            .await?;
                    Ok(Value::Array(values))
                }
                InputValue::Object(entries) => {
                    let (keys, values): (Vec<String>, Vec<InputValue>) = entries.into_iter().unzip();
                    let values =
                        try_join_all(values.into_iter().map(|value| self.transform_input(value)))
                            .await?;
                    Ok(Value::Object(keys.into_iter().zip(values).collect::<Map<_, _>>()))
                }
            }
        }
        .boxed()
    }

    /// `data:` URIs and `file://` paths become files; other strings pass through
    async fn resolve_blob_handle(&self, value: &str) -> Result<Option<FileInput>> {
        if let Some((meta, payload)) = value.strip_prefix("data:").and_then(split_data_uri) {
            return decode_data_uri(meta, payload).map(Some);
        }
        if let Some(path) = value.strip_prefix("file://") {
            return read_local_file(Path::new(path)).await.map(Some);
        }
        Ok(None)
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient").finish_non_exhaustive()
    }
}

fn as_upload_error(err: SunraError, context: &str) -> SunraError {
    if err.kind == ErrorKind::Upload {
        return err;
    }
    SunraError {
        kind: ErrorKind::Upload,
        code: code::UPLOAD_FAILED.to_string(),
        message: format!("{}: {}", context, err.message),
        ..err
    }
}

/// Split `<mime>[;params][;base64],<payload>` (the `data:` prefix already stripped)
///
/// Returns `None` unless the header is a well-formed media type, so prose that
/// merely starts with `data:` is not mistaken for a file.
fn split_data_uri(rest: &str) -> Option<(&str, &str)> {
    let (meta, payload) = rest.split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts.next().unwrap_or_default();
    if !mime.is_empty() && !is_media_type(mime) {
        return None;
    }
    let params_ok = parts.all(|param| {
        !param.is_empty() && !param.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    });
    params_ok.then_some((meta, payload))
}

fn is_media_type(value: &str) -> bool {
    let is_token = |s: &str| {
        !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$&^_.+-".contains(&b))
    };
    matches!(value.split_once('/'), Some((kind, subtype)) if is_token(kind) && is_token(subtype))
}

fn decode_data_uri(meta: &str, payload: &str) -> Result<FileInput> {
    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let bytes = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| SunraError::upload(format!("Malformed data URI: {}", e)))?
    } else {
        payload.as_bytes().to_vec()
    };

    let mut file = FileInput::new(bytes);
    let mime = mime.split(';').next().unwrap_or_default().trim();
    if !mime.is_empty() {
        file = file.with_content_type(mime);
    }
    Ok(file)
}

async fn read_local_file(path: &Path) -> Result<FileInput> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        SunraError::upload(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let content_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(content_type_for_extension)
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let mut file = FileInput::new(bytes).with_content_type(content_type);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        file = file.with_file_name(name);
    }
    Ok(file)
}

/// File extension for a content type, `bin` when unrecognized
pub fn extension_for_content_type(content_type: &str) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .and_then(|essence| essence.split_once('/'))
        .map(|(_, subtype)| subtype.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let subtype = subtype.strip_prefix("x-").unwrap_or(&subtype);
    let token = subtype.split(['-', '+']).next().unwrap_or_default();

    match token {
        "mpeg" => "mp3".to_string(),
        "jpeg" => "jpg".to_string(),
        "plain" => "txt".to_string(),
        "octet" => "bin".to_string(),
        t if !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()) => t.to_string(),
        _ => "bin".to_string(),
    }
}

fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(content_type)
}
