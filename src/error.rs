/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Protected request attempted without a stored access token. Never transmitted.
    #[error("not authenticated: no access token available")]
    Unauthenticated,
    /// Protected request attempted with a locally expired access token. Never transmitted.
    #[error("access token expired")]
    TokenExpired,
    /// Client-side throttle tripped for this endpoint. Never transmitted.
    #[error("rate limit exceeded for {endpoint}")]
    RateLimitExceeded { endpoint: String },
    /// Non-success HTTP status with the decoded response body.
    #[error("http error {status}: {body}")]
    Http {
        status: u16,
        body: serde_json::Value,
    },
    /// No response at all: timeout, connect failure or a broken body stream.
    #[error("network error: {0}")]
    Network(reqwest::Error),
    /// The token refresh call failed; stored credentials have been cleared.
    #[error("token refresh failed: {0}")]
    RefreshFailed(Box<ApiError>),
    /// Response body could not be decoded into the requested shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request could not be built (bad header value, URL or multipart part).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// HTTP status carried by this error, looking through a failed refresh.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RefreshFailed(inner) => inner.status(),
            _ => None,
        }
    }

    /// True for errors that mean the user has to sign in again.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::TokenExpired | Self::RefreshFailed(_)
        ) || self.status() == Some(401)
    }

    /// True when the request never got a response.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use serde_json::json;

    #[test]
    fn status_looks_through_refresh_failure() {
        let err = ApiError::RefreshFailed(Box::new(ApiError::Http {
            status: 400,
            body: json!({"message": "invalid refresh token"}),
        }));
        assert_eq!(err.status(), Some(400));
        assert!(err.is_auth_error());
    }

    #[test]
    fn local_rejections_have_no_status() {
        assert_eq!(ApiError::TokenExpired.status(), None);
        assert!(ApiError::Unauthenticated.is_auth_error());
        assert!(!ApiError::RateLimitExceeded {
            endpoint: "/jobs".to_owned()
        }
        .is_auth_error());
    }

    #[test]
    fn plain_401_counts_as_auth_error() {
        let err = ApiError::Http {
            status: 401,
            body: serde_json::Value::Null,
        };
        assert!(err.is_auth_error());
        assert!(!err.is_network());
    }
}
