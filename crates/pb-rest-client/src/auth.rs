//! Authentication state consumed by the transport

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the `Authorization` value injected into outgoing requests.
///
/// Only a currently valid token should be returned; the transport sends it
/// verbatim unless the caller already set `Authorization`.
pub trait AuthProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    /// Keep the token and auth record returned by an auth call.
    /// Read-only providers ignore it.
    fn save(&self, _token: String, _record: Option<Value>) {}

    fn clear(&self) {}
}

/// In-memory auth state: the current token and the auth record it belongs to
#[derive(Debug, Default)]
pub struct AuthStore {
    state: RwLock<AuthState>,
}

#[derive(Debug, Default, Clone)]
struct AuthState {
    token: Option<String>,
    model: Option<Value>,
}

impl AuthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given token
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.save(token, None);
        store
    }

    /// Replace the stored token and auth record
    pub fn save(&self, token: impl Into<String>, model: Option<Value>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.token = Some(token.into());
        state.model = model;
    }

    /// Forget the token and auth record
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = AuthState::default();
    }

    /// The stored token, valid or not
    pub fn raw_token(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).token.clone()
    }

    /// The stored auth record
    pub fn model(&self) -> Option<Value> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).model.clone()
    }

    /// Whether a non-empty, unexpired token is stored
    pub fn is_valid(&self) -> bool {
        self.raw_token().is_some_and(|token| token_is_valid(&token, unix_now()))
    }
}

impl AuthProvider for AuthStore {
    fn token(&self) -> Option<String> {
        self.raw_token().filter(|token| token_is_valid(token, unix_now()))
    }

    fn save(&self, token: String, record: Option<Value>) {
        AuthStore::save(self, token, record)
    }

    fn clear(&self) {
        AuthStore::clear(self)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Opaque tokens are valid when non-empty; JWTs additionally need an `exp`
/// claim in the future when one is present.
fn token_is_valid(token: &str, now: i64) -> bool {
    if token.trim().is_empty() {
        return false;
    }
    match jwt_expiry(token) {
        Some(exp) => exp > now,
        None => true,
    }
}

fn jwt_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    match &claims["exp"] {
        Value::Number(exp) => exp.as_i64().or_else(|| exp.as_f64().map(|exp| exp as i64)),
        _ => None,
    }
}
