use std::time::Instant;

use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::{json, Value};

use crate::{ApiError, Result};

/// Outbound call descriptor handed to [`ApiClient::send`](crate::ApiClient::send).
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the client's base URL, query string included.
    pub path: String,
    /// Extra headers merged over the defaults.
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn multipart(mut self, form: UploadForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    /// Adds a header, rejecting names or values that are not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::InvalidRequest(format!("header name '{name}': {err}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|err| ApiError::InvalidRequest(format!("header value for '{name}': {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(UploadForm),
}

impl RequestBody {
    /// JSON rendering used for logging. File bytes are never included.
    pub fn log_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Json(value) => value.clone(),
            Self::Multipart(form) => form.summary(),
        }
    }
}

/// Multipart form that owns its contents so it can be sent more than once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadForm {
    parts: Vec<UploadPart>,
}

#[derive(Clone, Debug, PartialEq)]
struct UploadPart {
    name: String,
    kind: PartKind,
}

#[derive(Clone, Debug, PartialEq)]
enum PartKind {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(UploadPart {
            name: name.into(),
            kind: PartKind::Text(value.into()),
        });
        self
    }

    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts.push(UploadPart {
            name: name.into(),
            kind: PartKind::File {
                file_name: file_name.into(),
                mime: mime.map(str::to_owned),
                bytes: bytes.into(),
            },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn to_form(&self) -> Result<Form> {
        let mut form = Form::new();
        for part in &self.parts {
            form = match &part.kind {
                PartKind::Text(value) => form.text(part.name.clone(), value.clone()),
                PartKind::File {
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime).map_err(|err| {
                            ApiError::InvalidRequest(format!("mime type '{mime}': {err}"))
                        })?;
                    }
                    form.part(part.name.clone(), file)
                }
            };
        }
        Ok(form)
    }

    fn summary(&self) -> Value {
        let parts: Vec<Value> = self
            .parts
            .iter()
            .map(|part| match &part.kind {
                PartKind::Text(value) => json!({ "name": part.name, "value": value }),
                PartKind::File {
                    file_name, bytes, ..
                } => json!({ "name": part.name, "file": file_name, "size": bytes.len() }),
            })
            .collect();
        json!({ "multipart": parts })
    }
}

/// Which client variant a request runs through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Request id stamping, rate limiting, normal timeout.
    Standard,
    /// No request id, no rate limiting, upload timeout.
    Upload,
}

/// Per-attempt bookkeeping threaded alongside a request.
///
/// A retry gets a fresh context from [`RequestContext::for_retry`]; an
/// existing context is never changed after the request is sent.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub kind: RequestKind,
    /// Set once the refresh-and-retry cycle has been used for this call.
    pub retried: bool,
    pub started_at: Instant,
    pub request_id: Option<String>,
    /// Access token the request was authorized with, if any.
    pub sent_token: Option<String>,
}

impl RequestContext {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            retried: false,
            started_at: Instant::now(),
            request_id: None,
            sent_token: None,
        }
    }

    pub fn for_retry(&self) -> Self {
        Self {
            kind: self.kind,
            retried: true,
            started_at: Instant::now(),
            request_id: None,
            sent_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_summary_omits_file_bytes() {
        let form = UploadForm::new()
            .text("title", "CV")
            .file("file", "cv.pdf", Some("application/pdf"), vec![1u8; 2048]);
        let logged = RequestBody::Multipart(form).log_value();
        assert_eq!(
            logged,
            json!({"multipart": [
                {"name": "title", "value": "CV"},
                {"name": "file", "file": "cv.pdf", "size": 2048}
            ]})
        );
    }

    #[test]
    fn invalid_mime_is_rejected_when_building_form() {
        let form = UploadForm::new().file("file", "x.bin", Some("not a mime"), vec![0u8]);
        assert!(matches!(form.to_form(), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn retry_context_is_marked_and_fresh() {
        let mut ctx = RequestContext::new(RequestKind::Standard);
        ctx.request_id = Some("1_abc".to_owned());
        ctx.sent_token = Some("old".to_owned());
        let retry = ctx.for_retry();
        assert!(retry.retried);
        assert!(!ctx.retried);
        assert_eq!(retry.request_id, None);
        assert_eq!(retry.sent_token, None);
        assert_eq!(retry.kind, RequestKind::Standard);
    }

    #[test]
    fn header_builder_rejects_invalid_values() {
        let request = ApiRequest::new(Method::GET, "/jobs").header("X-Trace", "bad\nvalue");
        assert!(matches!(request, Err(ApiError::InvalidRequest(_))));
    }
}
