//! Credential storage contract consumed by the client, plus an in-memory store.
//!
//! The client never persists tokens. It reads the current access token on
//! every protected request and writes a fresh pair back after a refresh.

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Access and refresh token, always replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Role of the signed-in account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserRole {
    Doctor,
    Hospital,
    Admin,
    Other(String),
}

impl UserRole {
    pub fn parse(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "doctor" => Self::Doctor,
            "hospital" => Self::Hospital,
            "admin" => Self::Admin,
            _ => Self::Other(role.to_owned()),
        }
    }
}

impl From<&str> for UserRole {
    fn from(role: &str) -> Self {
        Self::parse(role)
    }
}

/// Narrow capability the client needs from credential storage.
///
/// Each call is a single atomic operation; `set_tokens` never exposes a
/// half-updated pair.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn is_access_token_expired(&self) -> bool;
    fn user_role(&self) -> Option<UserRole>;
    fn is_approved(&self) -> bool;
    fn set_tokens(&self, tokens: TokenPair);
    fn clear_all(&self);
}

#[derive(Default)]
struct StoreState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_expires_at: Option<SystemTime>,
    role: Option<UserRole>,
    approved: bool,
}

/// Process-local [`CredentialStore`].
///
/// Access-token expiry is read from the JWT `exp` claim when tokens are set;
/// opaque tokens never expire locally unless [`set_access_expiry`] is used.
///
/// [`set_access_expiry`]: MemoryCredentialStore::set_access_expiry
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<StoreState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        let store = Self::new();
        store.set_tokens(tokens);
        store
    }

    /// Overrides the expiry derived from the access token.
    pub fn set_access_expiry(&self, expires_at: Option<SystemTime>) {
        self.write().access_expires_at = expires_at;
    }

    /// Stores an access token on its own, dropping any refresh token.
    pub fn set_access_token(&self, access_token: impl Into<String>) {
        let access_token = access_token.into();
        let expires_at = jwt_expiry(&access_token);
        let mut state = self.write();
        state.access_token = Some(access_token);
        state.refresh_token = None;
        state.access_expires_at = expires_at;
    }

    pub fn set_user(&self, role: UserRole, approved: bool) {
        let mut state = self.write();
        state.role = Some(role);
        state.approved = approved;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("MemoryCredentialStore")
            .field("has_access_token", &state.access_token.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("access_expires_at", &state.access_expires_at)
            .field("role", &state.role)
            .field("approved", &state.approved)
            .finish()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    fn is_access_token_expired(&self) -> bool {
        self.read()
            .access_expires_at
            .is_some_and(|expires_at| SystemTime::now() >= expires_at)
    }

    fn user_role(&self) -> Option<UserRole> {
        self.read().role.clone()
    }

    fn is_approved(&self) -> bool {
        self.read().approved
    }

    fn set_tokens(&self, tokens: TokenPair) {
        let expires_at = jwt_expiry(&tokens.access_token);
        let mut state = self.write();
        state.access_token = Some(tokens.access_token);
        state.refresh_token = Some(tokens.refresh_token);
        state.access_expires_at = expires_at;
    }

    fn clear_all(&self) {
        *self.write() = StoreState::default();
    }
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: Option<u64>,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
///
/// Returns `None` for anything that is not a three-part token with a JSON
/// payload carrying a numeric `exp`.
pub fn jwt_expiry(token: &str) -> Option<SystemTime> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpClaim = serde_json::from_slice(&bytes).ok()?;
    claim
        .exp
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}
