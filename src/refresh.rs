//! Session refresh against the refresh endpoint, one cycle at a time.
//!
//! Concurrent 401s queue on a single gate. Whoever gets the gate first talks
//! to the server; the rest see that the store already holds a newer access
//! token than the one they were rejected with and reuse it.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::json;
use tokio::sync::Mutex;

use crate::{
    types::parse_body,
    wire::{RefreshRequest, RefreshResponse},
    ApiError, CredentialStore, Logger, Result, TokenPair,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshOutcome {
    /// This call exchanged the refresh token for a new pair.
    Refreshed,
    /// Another call refreshed while this one waited on the gate.
    Reused,
    /// Nothing to refresh with; credentials have been cleared.
    MissingRefreshToken,
}

#[derive(Debug)]
pub(crate) struct TokenRefresher {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    gate: Mutex<()>,
}

impl TokenRefresher {
    pub(crate) fn new(http: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            http,
            url,
            timeout,
            gate: Mutex::new(()),
        }
    }

    /// Runs one refresh cycle.
    ///
    /// `stale_token` is the access token the failed request was sent with;
    /// `None` forces a refresh. On failure the store is cleared before the
    /// error is returned.
    pub(crate) async fn refresh(
        &self,
        store: &dyn CredentialStore,
        logger: &dyn Logger,
        stale_token: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<RefreshOutcome> {
        let _guard = self.gate.lock().await;

        if let (Some(stale), Some(current)) = (stale_token, store.access_token()) {
            if stale != current && !store.is_access_token_expired() {
                return Ok(RefreshOutcome::Reused);
            }
        }

        let Some(refresh_token) = store.refresh_token() else {
            store.clear_all();
            logger.warn("no refresh token stored, session cleared", &json!({}));
            return Ok(RefreshOutcome::MissingRefreshToken);
        };

        match self.request_tokens(&refresh_token, headers).await {
            Ok(tokens) => {
                store.set_tokens(tokens);
                logger.info("access token refreshed", &json!({}));
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err) => {
                store.clear_all();
                let err = ApiError::RefreshFailed(Box::new(err));
                logger.capture_error(&err, "token refresh failed", &json!({ "url": self.url }));
                Err(err)
            }
        }
    }

    async fn request_tokens(&self, refresh_token: &str, headers: &HeaderMap) -> Result<TokenPair> {
        let response = self
            .http
            .post(&self.url)
            .headers(headers.clone())
            .timeout(self.timeout)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(ApiError::Network)?;

        let status = response.status();
        let text = response.text().await.map_err(ApiError::Network)?;
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: parse_body(&text),
            });
        }

        serde_json::from_str::<RefreshResponse>(&text)
            .map(|payload| payload.data)
            .map_err(|err| ApiError::Decode(format!("invalid refresh response: {err}")))
    }
}
