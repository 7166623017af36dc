//! Session tokens and request guards.
//!
//! Users exchange their access token for a signed session (HS256 JWT).
//! Admin routes additionally accept the static `X-Admin-Key` header.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::store::UserStore;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub adm: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Identity attached to authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// `None` when the caller authenticated with the admin key.
    pub user_id: Option<Uuid>,
    pub is_admin: bool,
}

impl Session {
    /// The user behind a session; admin-key callers have none.
    pub fn user(&self) -> Result<Uuid, AppError> {
        self.user_id.ok_or(AppError::Forbidden)
    }
}

pub fn issue_session(
    secret: &str,
    user_id: Uuid,
    is_admin: bool,
    ttl_hours: i64,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        adm: is_admin,
        iat: now.timestamp(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn verify_session(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("rejected session token: {}", e);
        AppError::Unauthorized
    })
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// Resolve the caller of an admin route. Missing or bad credentials are
/// 401; a valid session without admin rights is 403. Sessions are checked
/// against the current user row, so a demoted or deleted admin loses
/// access at once.
pub async fn admin_session(
    users: &dyn UserStore,
    config: &Config,
    headers: &HeaderMap,
) -> Result<Session, AppError> {
    if let Some(provided) = headers.get("x-admin-key").and_then(|v| v.to_str().ok()) {
        return match config.admin_key() {
            Some(expected) if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) => {
                Ok(Session {
                    user_id: None,
                    is_admin: true,
                })
            }
            _ => {
                tracing::warn!("admin API: invalid key (provided: '{}')", mask(provided));
                Err(AppError::Unauthorized)
            }
        };
    }

    let token = bearer(headers).ok_or_else(|| {
        tracing::warn!("admin API: missing credentials");
        AppError::Unauthorized
    })?;
    let claims = verify_session(&config.session_secret, token)?;
    if !claims.adm {
        tracing::warn!(user_id = %claims.sub, "admin API: session lacks admin rights");
        return Err(AppError::Forbidden);
    }

    let user = users.get_user(claims.sub).await?.ok_or_else(|| {
        tracing::warn!(user_id = %claims.sub, "admin API: session user no longer exists");
        AppError::Unauthorized
    })?;
    if !user.is_admin {
        tracing::warn!(user_id = %user.id, "admin API: admin rights revoked since login");
        return Err(AppError::Forbidden);
    }
    Ok(Session {
        user_id: Some(user.id),
        is_admin: true,
    })
}

pub fn user_session(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let token = bearer(headers).ok_or(AppError::Unauthorized)?;
    let claims = verify_session(&state.config.session_secret, token)?;
    Ok(Session {
        user_id: Some(claims.sub),
        is_admin: claims.adm,
    })
}

/// Middleware: admin key or admin session required. The resolved
/// `Session` is stored in request extensions.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = admin_session(&state.db, &state.config, req.headers()).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Middleware: any valid user session required.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = user_session(&state, req.headers())?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
