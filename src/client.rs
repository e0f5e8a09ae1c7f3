use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    endpoints::PathPattern,
    pipeline::{self, classify_failure, FailureAction},
    rate_limit::SlidingWindowLimiter,
    refresh::{RefreshOutcome, TokenRefresher},
    types::parse_body,
    ApiError, ApiLogEntry, ApiRequest, ApiResponse, ClientOptions, CredentialStore, Decoded,
    Logger, Navigator, NoopNavigator, PublicEndpoints, RequestBody, RequestContext, RequestKind,
    Result, TracingLogger, UploadForm,
};

#[derive(Clone)]
/// Authenticated client for the careers REST API.
///
/// Clones share the rate limiter, the refresh gate and the credential store.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    options: ClientOptions,
    store: Arc<dyn CredentialStore>,
    logger: Arc<dyn Logger>,
    navigator: Arc<dyn Navigator>,
    public: PublicEndpoints,
    quiet_not_found: Vec<PathPattern>,
    limiter: Arc<SlidingWindowLimiter>,
    refresher: Arc<TokenRefresher>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client for `base_url` backed by `store`.
    pub fn new(base_url: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        let http = reqwest::Client::new();
        let base_url = base_url.into();
        let options = ClientOptions::default();
        Self {
            limiter: Arc::new(limiter_for(&options)),
            refresher: Arc::new(refresher_for(&http, &base_url, &options)),
            quiet_not_found: quiet_patterns(&options),
            http,
            base_url,
            options,
            store,
            logger: Arc::new(TracingLogger),
            navigator: Arc::new(NoopNavigator),
            public: PublicEndpoints::default(),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `CAREERS_API_URL`: API base URL (required)
    /// - `CAREERS_CLIENT_VERSION`: value for `X-Client-Version` (optional)
    /// - `CAREERS_TIMEOUT_MS`: request timeout in milliseconds (optional)
    pub fn from_env(store: Arc<dyn CredentialStore>) -> std::result::Result<Self, String> {
        let url = std::env::var("CAREERS_API_URL")
            .map_err(|_| "missing CAREERS_API_URL environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("CAREERS_API_URL is set but empty".to_owned());
        }

        let mut options = ClientOptions::default();
        if let Ok(version) = std::env::var("CAREERS_CLIENT_VERSION") {
            if !version.trim().is_empty() {
                options.client_version = version.trim().to_owned();
            }
        }
        if let Ok(timeout) = std::env::var("CAREERS_TIMEOUT_MS") {
            options.timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| format!("CAREERS_TIMEOUT_MS must be an integer, got '{timeout}'"))?;
        }

        Ok(Self::new(url.trim(), store).with_options(options))
    }

    /// Applies client options. Resets rate-limit state.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.limiter = Arc::new(limiter_for(&opts));
        self.refresher = Arc::new(refresher_for(&self.http, &self.base_url, &opts));
        self.quiet_not_found = quiet_patterns(&opts);
        self.options = opts;
        self
    }

    /// Routes pipeline logs to `logger` instead of [`TracingLogger`].
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the sink for pending-approval redirects.
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Replaces the default public-endpoint allowlist.
    pub fn with_public_endpoints(mut self, public: PublicEndpoints) -> Self {
        self.public = public;
        self
    }

    /// Options currently in effect.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Credential store shared with every clone of this client.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Sends a GET through [`send`](Self::send).
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }

    /// Sends a JSON POST through [`send`](Self::send).
    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::POST, path).json(body))
            .await
    }

    /// Sends a JSON PUT through [`send`](Self::send).
    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::PUT, path).json(body))
            .await
    }

    /// Sends a JSON PATCH through [`send`](Self::send).
    pub async fn patch(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::PATCH, path).json(body))
            .await
    }

    /// Sends a DELETE through [`send`](Self::send).
    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::DELETE, path)).await
    }

    /// GET and deserialize the body.
    ///
    /// A pending-approval 403 yields [`Decoded::Redirected`] rather than a
    /// decode error.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Decoded<T>> {
        self.get(path).await?.decode()
    }

    /// POST and deserialize the body. Redirects are reported as in
    /// [`get_json`](Self::get_json).
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<Decoded<T>> {
        self.post(path, body).await?.decode()
    }

    /// Sends a request through the rate limiter and the auth pipeline.
    ///
    /// Fails with [`ApiError::RateLimitExceeded`] without touching the
    /// network when the endpoint's window is full.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        if !self.limiter.is_allowed(&request.path) {
            self.logger.warn(
                "client-side rate limit exceeded",
                &json!({ "method": request.method.as_str(), "path": request.path }),
            );
            return Err(ApiError::RateLimitExceeded {
                endpoint: request.path,
            });
        }

        self.execute(request, RequestContext::new(RequestKind::Standard))
            .await
    }

    /// Multipart POST with the upload timeout and without rate limiting.
    pub async fn upload(&self, path: &str, form: UploadForm) -> Result<ApiResponse> {
        self.upload_with_method(Method::POST, path, form).await
    }

    pub async fn upload_with_method(
        &self,
        method: Method,
        path: &str,
        form: UploadForm,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(method, path).multipart(form);
        self.execute(request, RequestContext::new(RequestKind::Upload))
            .await
    }

    /// Exchanges the stored refresh token for a new pair.
    ///
    /// Useful after [`ApiError::TokenExpired`]. Any failure clears the store.
    pub async fn refresh_tokens(&self) -> Result<()> {
        let headers = pipeline::base_headers(&self.options, RequestKind::Standard)?;
        match self
            .refresher
            .refresh(self.store.as_ref(), self.logger.as_ref(), None, &headers)
            .await?
        {
            RefreshOutcome::MissingRefreshToken => Err(ApiError::Unauthenticated),
            RefreshOutcome::Refreshed | RefreshOutcome::Reused => Ok(()),
        }
    }

    /// Clears every stored credential.
    pub fn logout(&self) {
        self.store.clear_all();
        self.logger.info("session cleared", &json!({}));
    }

    async fn execute(&self, request: ApiRequest, ctx: RequestContext) -> Result<ApiResponse> {
        let base = pipeline::base_headers(&self.options, ctx.kind)?;
        let mut ctx = ctx;

        // Bounded: a retried context never classifies as RefreshAndRetry.
        loop {
            let outbound = pipeline::prepare_outbound(
                &request,
                ctx,
                &base,
                &self.base_url,
                &self.public,
                self.store.as_ref(),
            )?;
            let sent = outbound.ctx;
            self.logger.api_log(&ApiLogEntry {
                method: request.method.to_string(),
                path: request.path.clone(),
                request_id: sent.request_id.clone(),
                request_body: request.body.log_value(),
                response_body: None,
                duration: Duration::ZERO,
            });

            let response = match self.transmit(&request, outbound.headers, &sent).await {
                Ok(response) => response,
                Err(err @ ApiError::Network(_)) => {
                    self.logger.capture_error(
                        &err,
                        "network error",
                        &self.failure_context(&request, &sent, None),
                    );
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            if response.is_success() {
                self.logger.api_log(&ApiLogEntry {
                    method: request.method.to_string(),
                    path: request.path.clone(),
                    request_id: sent.request_id.clone(),
                    request_body: request.body.log_value(),
                    response_body: Some(response.body.clone()),
                    duration: response.duration,
                });
                return Ok(response);
            }

            let action = classify_failure(
                &request.path,
                Some(response.status),
                &sent,
                &self.public,
                self.store.as_ref(),
                &self.options.doctor_dashboard_path,
            );
            let err = http_error(&response);
            self.log_failure(&request, &sent, &response, &action, &err);

            match action {
                FailureAction::Propagate => return Err(err),
                FailureAction::Logout => {
                    self.store.clear_all();
                    return Err(err);
                }
                FailureAction::Redirect(path) => {
                    self.navigator.redirect(&path);
                    return Ok(ApiResponse {
                        redirected_to: Some(path),
                        ..response
                    });
                }
                FailureAction::RefreshAndRetry => {
                    let headers = pipeline::base_headers(&self.options, RequestKind::Standard)?;
                    let outcome = self
                        .refresher
                        .refresh(
                            self.store.as_ref(),
                            self.logger.as_ref(),
                            sent.sent_token.as_deref(),
                            &headers,
                        )
                        .await?;
                    if outcome == RefreshOutcome::MissingRefreshToken {
                        return Err(err);
                    }
                    ctx = sent.for_retry();
                }
            }
        }
    }

    async fn transmit(
        &self,
        request: &ApiRequest,
        headers: HeaderMap,
        ctx: &RequestContext,
    ) -> Result<ApiResponse> {
        let timeout_ms = match ctx.kind {
            RequestKind::Standard => self.options.timeout_ms,
            RequestKind::Upload => self.options.upload_timeout_ms,
        };
        let url = self.url_for(&request.path)?;

        let builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(Duration::from_millis(timeout_ms));
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        let response = builder.send().await.map_err(ApiError::Network)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(ApiError::Network)?;

        Ok(ApiResponse {
            status,
            headers,
            body: parse_body(&text),
            duration: ctx.started_at.elapsed(),
            redirected_to: None,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let full = join_url(&self.base_url, path);
        Url::parse(&full).map_err(|err| ApiError::InvalidRequest(format!("url '{full}': {err}")))
    }

    /// Only lookups are quiet; a 404 on a write still reaches `capture_error`.
    fn is_quiet_not_found(&self, method: &Method, path: &str) -> bool {
        *method == Method::GET
            && self
                .quiet_not_found
                .iter()
                .any(|pattern| pattern.matches(path))
    }

    fn log_failure(
        &self,
        request: &ApiRequest,
        sent: &RequestContext,
        response: &ApiResponse,
        action: &FailureAction,
        err: &ApiError,
    ) {
        let context = self.failure_context(request, sent, Some(response));
        match (response.status, action) {
            (404, _) if self.is_quiet_not_found(&request.method, &request.path) => {
                self.logger.debug("resource not found", &context);
            }
            (403, FailureAction::Redirect(path)) => {
                self.logger.info(
                    &format!("doctor account pending approval, redirecting to {path}"),
                    &context,
                );
            }
            (403, _) => self.logger.error("authorization failure", &context),
            _ => self.logger.capture_error(err, "api request failed", &context),
        }
    }

    fn failure_context(
        &self,
        request: &ApiRequest,
        sent: &RequestContext,
        response: Option<&ApiResponse>,
    ) -> Value {
        json!({
            "method": request.method.as_str(),
            "path": request.path,
            "requestId": sent.request_id,
            "retried": sent.retried,
            "status": response.map(|r| r.status),
            "responseBody": response.map(|r| &r.body),
            "durationMs": sent.started_at.elapsed().as_millis() as u64,
        })
    }
}

fn http_error(response: &ApiResponse) -> ApiError {
    ApiError::Http {
        status: response.status,
        body: response.body.clone(),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn limiter_for(options: &ClientOptions) -> SlidingWindowLimiter {
    SlidingWindowLimiter::new(
        options.rate_limit_max_requests,
        Duration::from_millis(options.rate_limit_window_ms),
    )
}

fn refresher_for(http: &reqwest::Client, base_url: &str, options: &ClientOptions) -> TokenRefresher {
    TokenRefresher::new(
        http.clone(),
        join_url(base_url, &options.refresh_path),
        Duration::from_millis(options.timeout_ms),
    )
}

fn quiet_patterns(options: &ClientOptions) -> Vec<PathPattern> {
    options
        .quiet_not_found
        .iter()
        .map(|template| PathPattern::parse(template))
        .collect()
}
