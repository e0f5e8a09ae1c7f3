//! Request and response stages of the authenticated pipeline.
//!
//! Outbound, [`prepare_outbound`] turns a request plus its context into the
//! headers to send, or rejects it locally. Inbound, [`classify_failure`]
//! decides what a failed attempt turns into. Side effects (logging, refresh,
//! logout, redirect) are carried out by the client.

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::{
    ApiError, ApiRequest, ClientOptions, CredentialStore, PublicEndpoints, RequestContext,
    RequestKind, Result, UserRole,
};

pub const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");
pub const X_CLIENT_VERSION: HeaderName = HeaderName::from_static("x-client-version");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers every request of `kind` starts from.
///
/// Uploads leave `Content-Type` to the multipart encoder.
pub(crate) fn base_headers(options: &ClientOptions, kind: RequestKind) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if kind == RequestKind::Standard {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    headers.insert(X_REQUESTED_WITH, HeaderValue::from_static("XMLHttpRequest"));
    let version = HeaderValue::from_str(&options.client_version).map_err(|err| {
        ApiError::InvalidRequest(format!(
            "client version '{}': {err}",
            options.client_version
        ))
    })?;
    headers.insert(X_CLIENT_VERSION, version);
    Ok(headers)
}

/// Headers and bookkeeping for one transmission attempt.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub headers: HeaderMap,
    pub ctx: RequestContext,
}

/// Outbound stage: authorizes the request or rejects it without sending.
///
/// The access token is read from the store on every call, so a token
/// rotated between two requests is always picked up. Protected requests to
/// an absolute URL outside `base_url`'s origin are refused.
pub(crate) fn prepare_outbound(
    request: &ApiRequest,
    ctx: RequestContext,
    base: &HeaderMap,
    base_url: &str,
    public: &PublicEndpoints,
    store: &dyn CredentialStore,
) -> Result<Outbound> {
    let mut headers = base.clone();
    for (name, value) in &request.headers {
        headers.insert(name.clone(), value.clone());
    }

    let mut sent_token = None;
    if !public.is_public(&request.path) {
        if !targets_origin(&request.path, base_url) {
            return Err(ApiError::InvalidRequest(format!(
                "refusing to send credentials to foreign origin '{}'",
                request.path
            )));
        }
        let token = store.access_token().ok_or(ApiError::Unauthenticated)?;
        if store.is_access_token_expired() {
            return Err(ApiError::TokenExpired);
        }
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::InvalidRequest("access token is not a valid header value".to_owned()))?;
        headers.insert(header::AUTHORIZATION, value);
        sent_token = Some(token);
    }

    let request_id = match ctx.kind {
        RequestKind::Standard => {
            let id = generate_request_id();
            let value = HeaderValue::from_str(&id)
                .map_err(|err| ApiError::InvalidRequest(format!("request id '{id}': {err}")))?;
            headers.insert(X_REQUEST_ID, value);
            Some(id)
        }
        RequestKind::Upload => None,
    };

    Ok(Outbound {
        headers,
        ctx: RequestContext {
            request_id,
            sent_token,
            started_at: std::time::Instant::now(),
            ..ctx
        },
    })
}

/// Whether `path` resolves to `base_url`'s origin. Relative paths always do.
pub(crate) fn targets_origin(path: &str, base_url: &str) -> bool {
    if !(path.starts_with("http://") || path.starts_with("https://")) {
        return true;
    }
    match (Url::parse(path), Url::parse(base_url)) {
        (Ok(target), Ok(base)) => target.origin() == base.origin(),
        _ => false,
    }
}

/// Builds a `<unix-millis>_<9 base36 chars>` identifier.
pub fn generate_request_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut seed = [0u8; 9];
    if getrandom::getrandom(&mut seed).is_err() {
        // Entropy source unavailable: fall back to clock nanos.
        let nanos = now.subsec_nanos().to_le_bytes();
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = nanos[i % nanos.len()].wrapping_mul(31).wrapping_add(i as u8);
        }
    }
    let suffix: String = seed
        .iter()
        .map(|byte| ALPHABET[usize::from(*byte) % ALPHABET.len()] as char)
        .collect();
    format!("{}_{suffix}", now.as_millis())
}

/// What a failed attempt turns into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureAction {
    /// Surface the error to the caller unchanged.
    Propagate,
    /// Refresh the session once and re-issue the original request.
    RefreshAndRetry,
    /// No refresh token is stored: clear credentials and surface the error.
    Logout,
    /// Send the client to `path` and report the response without an error.
    Redirect(String),
}

/// Inbound error stage.
///
/// `status` is `None` for network-level failures. A context that already
/// went through a refresh never yields [`FailureAction::RefreshAndRetry`]
/// again, so each call sees at most one refresh cycle.
pub fn classify_failure(
    path: &str,
    status: Option<u16>,
    ctx: &RequestContext,
    public: &PublicEndpoints,
    store: &dyn CredentialStore,
    doctor_dashboard_path: &str,
) -> FailureAction {
    match status {
        Some(401) if !ctx.retried => {
            if public.is_public(path) {
                // Rejected credentials on login and friends: nothing to refresh.
                FailureAction::Propagate
            } else if store.refresh_token().is_some() {
                FailureAction::RefreshAndRetry
            } else {
                FailureAction::Logout
            }
        }
        Some(403) => {
            if store.user_role() == Some(UserRole::Doctor) && !store.is_approved() {
                FailureAction::Redirect(doctor_dashboard_path.to_owned())
            } else {
                FailureAction::Propagate
            }
        }
        _ => FailureAction::Propagate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCredentialStore, TokenPair};
    use reqwest::Method;

    const DASHBOARD: &str = "/doctor/dashboard";
    const BASE_URL: &str = "http://127.0.0.1:9/api";

    fn store_with_tokens() -> MemoryCredentialStore {
        MemoryCredentialStore::with_tokens(TokenPair::new("access-1", "refresh-1"))
    }

    fn prepare(
        request: &ApiRequest,
        kind: RequestKind,
        store: &dyn CredentialStore,
    ) -> Result<Outbound> {
        let options = ClientOptions::default();
        let base = base_headers(&options, kind).expect("default headers must build");
        prepare_outbound(
            request,
            RequestContext::new(kind),
            &base,
            BASE_URL,
            &PublicEndpoints::default(),
            store,
        )
    }

    #[test]
    fn protected_request_gets_bearer_and_request_id() {
        let store = store_with_tokens();
        let outbound = prepare(
            &ApiRequest::new(Method::GET, "/jobs"),
            RequestKind::Standard,
            &store,
        )
        .expect("must authorize");

        assert_eq!(outbound.headers[header::AUTHORIZATION], "Bearer access-1");
        assert_eq!(outbound.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(outbound.headers[X_REQUESTED_WITH], "XMLHttpRequest");
        assert!(outbound.headers.contains_key(X_CLIENT_VERSION));
        let id = outbound.ctx.request_id.expect("request id must be stamped");
        assert_eq!(outbound.headers[X_REQUEST_ID], id.as_str());
        assert_eq!(outbound.ctx.sent_token.as_deref(), Some("access-1"));
    }

    #[test]
    fn public_request_skips_token_even_without_credentials() {
        let store = MemoryCredentialStore::new();
        let outbound = prepare(
            &ApiRequest::new(Method::POST, "/auth/login"),
            RequestKind::Standard,
            &store,
        )
        .expect("public endpoints need no token");
        assert!(!outbound.headers.contains_key(header::AUTHORIZATION));
        assert!(outbound.headers.contains_key(X_REQUEST_ID));
        assert_eq!(outbound.ctx.sent_token, None);
    }

    #[test]
    fn absolute_url_keeps_token_only_on_base_origin() {
        let store = store_with_tokens();
        let outbound = prepare(
            &ApiRequest::new(Method::GET, "http://127.0.0.1:9/api/jobs"),
            RequestKind::Standard,
            &store,
        )
        .expect("same origin must authorize");
        assert_eq!(outbound.headers[header::AUTHORIZATION], "Bearer access-1");

        for foreign in [
            "https://127.0.0.1:9/api/jobs",
            "http://evil.test/api/jobs",
            "http://127.0.0.1:10/jobs",
        ] {
            let err = prepare(
                &ApiRequest::new(Method::GET, foreign),
                RequestKind::Standard,
                &store,
            )
            .expect_err("foreign origin must not get the token");
            assert!(matches!(err, ApiError::InvalidRequest(_)), "{foreign}: {err:?}");
        }
    }

    #[test]
    fn targets_origin_treats_relative_paths_as_local() {
        assert!(targets_origin("/jobs", BASE_URL));
        assert!(targets_origin("jobs?page=2", BASE_URL));
        assert!(targets_origin("http://127.0.0.1:9/other", BASE_URL));
        assert!(!targets_origin("http://localhost:9/jobs", BASE_URL));
        assert!(!targets_origin("http://127.0.0.1:9/jobs", "not a url"));
    }

    #[test]
    fn missing_token_is_unauthenticated() {
        let store = MemoryCredentialStore::new();
        let err = prepare(
            &ApiRequest::new(Method::GET, "/jobs"),
            RequestKind::Standard,
            &store,
        )
        .expect_err("must reject");
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    #[test]
    fn expired_token_is_rejected_locally() {
        let store = store_with_tokens();
        store.set_access_expiry(Some(UNIX_EPOCH));
        let err = prepare(
            &ApiRequest::new(Method::GET, "/jobs"),
            RequestKind::Standard,
            &store,
        )
        .expect_err("must reject");
        assert!(matches!(err, ApiError::TokenExpired));
    }

    #[test]
    fn upload_has_no_request_id_or_json_content_type() {
        let store = store_with_tokens();
        let outbound = prepare(
            &ApiRequest::new(Method::POST, "/uploads/cv"),
            RequestKind::Upload,
            &store,
        )
        .expect("must authorize");
        assert!(!outbound.headers.contains_key(X_REQUEST_ID));
        assert!(!outbound.headers.contains_key(header::CONTENT_TYPE));
        assert_eq!(outbound.headers[header::AUTHORIZATION], "Bearer access-1");
        assert_eq!(outbound.ctx.request_id, None);
    }

    #[test]
    fn caller_headers_override_defaults() {
        let store = store_with_tokens();
        let request = ApiRequest::new(Method::GET, "/jobs")
            .header("Accept-Language", "fr")
            .expect("valid header");
        let outbound = prepare(&request, RequestKind::Standard, &store).expect("must authorize");
        assert_eq!(outbound.headers["accept-language"], "fr");
    }

    #[test]
    fn request_ids_have_timestamp_and_suffix() {
        let id = generate_request_id();
        let (millis, suffix) = id.split_once('_').expect("id must contain '_'");
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[test]
    fn first_401_on_protected_path_refreshes() {
        let store = store_with_tokens();
        let ctx = RequestContext::new(RequestKind::Standard);
        let action = classify_failure(
            "/jobs",
            Some(401),
            &ctx,
            &PublicEndpoints::default(),
            &store,
            DASHBOARD,
        );
        assert_eq!(action, FailureAction::RefreshAndRetry);
    }

    #[test]
    fn second_401_after_retry_propagates() {
        let store = store_with_tokens();
        let ctx = RequestContext::new(RequestKind::Standard).for_retry();
        let action = classify_failure(
            "/jobs",
            Some(401),
            &ctx,
            &PublicEndpoints::default(),
            &store,
            DASHBOARD,
        );
        assert_eq!(action, FailureAction::Propagate);
    }

    #[test]
    fn unauthorized_on_public_path_propagates() {
        let store = store_with_tokens();
        let ctx = RequestContext::new(RequestKind::Standard);
        let action = classify_failure(
            "/auth/login",
            Some(401),
            &ctx,
            &PublicEndpoints::default(),
            &store,
            DASHBOARD,
        );
        assert_eq!(action, FailureAction::Propagate);
    }

    #[test]
    fn unauthorized_without_refresh_token_logs_out() {
        let store = MemoryCredentialStore::new();
        store.set_access_token("access-only");
        let ctx = RequestContext::new(RequestKind::Standard);
        let action = classify_failure(
            "/jobs",
            Some(401),
            &ctx,
            &PublicEndpoints::default(),
            &store,
            DASHBOARD,
        );
        assert_eq!(action, FailureAction::Logout);
    }

    #[test]
    fn forbidden_redirects_only_unapproved_doctors() {
        let ctx = RequestContext::new(RequestKind::Standard);
        let public = PublicEndpoints::default();

        let store = store_with_tokens();
        store.set_user(UserRole::Doctor, false);
        assert_eq!(
            classify_failure("/jobs/1/apply", Some(403), &ctx, &public, &store, DASHBOARD),
            FailureAction::Redirect(DASHBOARD.to_owned())
        );

        store.set_user(UserRole::Doctor, true);
        assert_eq!(
            classify_failure("/jobs/1/apply", Some(403), &ctx, &public, &store, DASHBOARD),
            FailureAction::Propagate
        );

        store.set_user(UserRole::Hospital, false);
        assert_eq!(
            classify_failure("/jobs/1/apply", Some(403), &ctx, &public, &store, DASHBOARD),
            FailureAction::Propagate
        );
    }

    #[test]
    fn network_and_other_statuses_propagate() {
        let store = store_with_tokens();
        let ctx = RequestContext::new(RequestKind::Standard);
        let public = PublicEndpoints::default();
        for status in [None, Some(400), Some(404), Some(500)] {
            assert_eq!(
                classify_failure("/jobs", status, &ctx, &public, &store, DASHBOARD),
                FailureAction::Propagate
            );
        }
    }
}
