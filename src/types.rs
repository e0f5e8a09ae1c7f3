use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{ApiError, Result};

/// Completed response after the pipeline has run.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Parsed JSON, a string for non-JSON bodies, `Null` when empty.
    pub body: Value,
    pub duration: Duration,
    /// Set when the pipeline redirected the client instead of surfacing an error.
    pub redirected_to: Option<String>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn redirected_to(&self) -> Option<&str> {
        self.redirected_to.as_deref()
    }

    /// Deserializes the body into `T`, or reports the redirect the pipeline
    /// took instead. A redirected body is never decoded.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Decoded<T>> {
        match &self.redirected_to {
            Some(path) => Ok(Decoded::Redirected(path.clone())),
            None => self.json().map(Decoded::Body),
        }
    }

    /// Deserializes the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.body).map_err(|err| {
            ApiError::Decode(format!(
                "unexpected response body from status {}: {err}",
                self.status
            ))
        })
    }
}

/// Result of [`ApiClient::get_json`](crate::ApiClient::get_json) and
/// [`ApiClient::post_json`](crate::ApiClient::post_json).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded<T> {
    Body(T),
    /// The call hit a pending-approval 403 and the navigator was sent here.
    Redirected(String),
}

impl<T> Decoded<T> {
    pub fn into_body(self) -> Option<T> {
        match self {
            Decoded::Body(body) => Some(body),
            Decoded::Redirected(_) => None,
        }
    }

    pub fn redirected_to(&self) -> Option<&str> {
        match self {
            Decoded::Body(_) => None,
            Decoded::Redirected(path) => Some(path),
        }
    }
}

/// Parses a raw body the way the pipeline reports it.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn parse_body_handles_json_text_and_empty() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  "), Value::Null);
        assert_eq!(parse_body(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn json_decodes_body_or_reports_decode_error() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Job {
            id: u64,
        }

        let response = ApiResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: json!({"id": 7}),
            duration: Duration::ZERO,
            redirected_to: None,
        };
        assert_eq!(response.json::<Job>().expect("must decode"), Job { id: 7 });

        let response = ApiResponse {
            body: json!("oops"),
            ..response
        };
        assert!(matches!(response.json::<Job>(), Err(ApiError::Decode(_))));
    }

    #[test]
    fn decode_reports_redirect_without_touching_body() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Job {
            id: u64,
        }

        let response = ApiResponse {
            status: 403,
            headers: HeaderMap::new(),
            body: json!({"message": "account pending approval"}),
            duration: Duration::ZERO,
            redirected_to: Some("/doctor/dashboard".to_owned()),
        };
        let decoded = response.decode::<Job>().expect("redirect is not an error");
        assert_eq!(decoded, Decoded::Redirected("/doctor/dashboard".to_owned()));
        assert_eq!(decoded.redirected_to(), Some("/doctor/dashboard"));

        let response = ApiResponse {
            status: 200,
            body: json!({"id": 3}),
            redirected_to: None,
            ..response
        };
        let decoded = response.decode::<Job>().expect("must decode");
        assert_eq!(decoded.into_body(), Some(Job { id: 3 }));
    }
}
