//! Admin authentication.
//!
//! A successful login yields a bearer token `{expiry_unix}.{mac}`, where
//! `mac` is the hex BLAKE3 keyed hash of `admin:{expiry_unix}` under a key
//! derived from `ADMIN_PASSWORD`. Tokens are stateless: changing the
//! password invalidates every token issued under the old one.

use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tourbook_shared::constants::{ADMIN_TOKEN_TTL_DAYS, KDF_CONTEXT_ADMIN_TOKEN};
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AdminAuth {
    key: Option<[u8; 32]>,
}

impl AdminAuth {
    pub fn new(password: Option<&str>) -> Self {
        Self {
            key: password.map(derive_key),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        bool::from(derive_key(candidate).ct_eq(key))
    }

    /// Issue a token valid for [`ADMIN_TOKEN_TTL_DAYS`] from `now`.
    pub fn issue(&self, now: DateTime<Utc>) -> Option<String> {
        let key = self.key.as_ref()?;
        let expiry = (now + Duration::days(ADMIN_TOKEN_TTL_DAYS)).timestamp();
        Some(format!("{expiry}.{}", mac(key, expiry)))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        let Some((expiry, tag)) = token.split_once('.') else {
            return false;
        };
        let Ok(expiry) = expiry.parse::<i64>() else {
            return false;
        };
        if expiry <= now.timestamp() {
            return false;
        }
        let expected = mac(key, expiry);
        tag.len() == expected.len() && bool::from(tag.as_bytes().ct_eq(expected.as_bytes()))
    }
}

fn derive_key(password: &str) -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT_ADMIN_TOKEN, password.as_bytes())
}

fn mac(key: &[u8; 32], expiry: i64) -> String {
    let hash = blake3::keyed_hash(key, format!("admin:{expiry}").as_bytes());
    hex::encode(hash.as_bytes())
}

// ─── Extractors ───

/// Proof that the request carried a valid admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession;

impl<S> FromRequestParts<S> for AdminSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        if bearer_is_valid(parts, &state) {
            Ok(AdminSession)
        } else {
            Err(ServerError::Unauthorized)
        }
    }
}

/// Admin-ness of an optional caller; public endpoints use it to reveal drafts.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAdmin(pub bool);

impl<S> FromRequestParts<S> for MaybeAdmin
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(MaybeAdmin(bearer_is_valid(parts, &state)))
    }
}

fn bearer_is_valid(parts: &Parts, state: &AppState) -> bool {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| state.auth.verify(token.trim(), Utc::now()))
}

// ─── Login ───

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    if !state.auth.is_configured() {
        return Err(ServerError::Failed("ADMIN_PASSWORD is not set on server".to_string()));
    }
    if req.password.is_empty() || !state.auth.check_password(&req.password) {
        warn!("Admin login rejected");
        return Err(ServerError::BadCredentials);
    }

    let token = state
        .auth
        .issue(Utc::now())
        .ok_or_else(|| ServerError::Internal("admin key missing after check".to_string()))?;
    info!("Admin logged in");
    Ok(Json(LoginResponse { token }))
}
