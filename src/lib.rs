//! `careers-http` is the authenticated async HTTP client for the careers API
//! shared by the doctor and hospital apps.
//!
//! Every call made through [`ApiClient`] goes through the same pipeline:
//! - bearer token injection, except for the public endpoints in [`PublicEndpoints`]
//! - a per-endpoint sliding-window throttle ([`SlidingWindowLimiter`])
//! - one transparent token refresh and retry when a protected call returns 401
//! - failure classification and structured logging through a [`Logger`]
//!
//! Tokens live in a caller-supplied [`CredentialStore`]; the client never
//! persists them itself.

mod client;
mod credentials;
mod endpoints;
mod error;
mod logger;
mod navigator;
mod options;
pub mod pipeline;
mod rate_limit;
mod refresh;
mod request;
mod types;
mod wire;

pub use client::ApiClient;
pub use credentials::{jwt_expiry, CredentialStore, MemoryCredentialStore, TokenPair, UserRole};
pub use endpoints::{PathPattern, PublicEndpoints, DEFAULT_PUBLIC_ENDPOINTS};
pub use error::ApiError;
pub use logger::{ApiLogEntry, Logger, TracingLogger};
pub use navigator::{Navigator, NoopNavigator};
pub use options::ClientOptions;
pub use pipeline::{classify_failure, FailureAction};
pub use rate_limit::SlidingWindowLimiter;
pub use request::{ApiRequest, RequestBody, RequestContext, RequestKind, UploadForm};
pub use types::{ApiResponse, Decoded};

pub type Result<T> = std::result::Result<T, ApiError>;
