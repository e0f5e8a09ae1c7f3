/// Configures timeouts, throttling and auth-flow paths.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Timeout for multipart uploads in milliseconds.
    pub upload_timeout_ms: u64,
    /// Value sent as `X-Client-Version`.
    pub client_version: String,
    /// Requests allowed per endpoint inside one rate-limit window.
    pub rate_limit_max_requests: usize,
    /// Length of the rolling rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Path of the token refresh endpoint.
    pub refresh_path: String,
    /// Where a doctor awaiting approval is sent on a 403.
    pub doctor_dashboard_path: String,
    /// Path templates whose 404s are expected and only traced at debug level.
    ///
    /// Segments starting with `:` match any single segment, e.g. `/jobs/:id`.
    pub quiet_not_found: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            upload_timeout_ms: 60_000,
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            rate_limit_max_requests: 60,
            rate_limit_window_ms: 60_000,
            refresh_path: "/auth/refresh".to_owned(),
            doctor_dashboard_path: "/doctor/dashboard".to_owned(),
            quiet_not_found: vec!["/jobs/:id".to_owned(), "/applications/:id".to_owned()],
        }
    }
}
