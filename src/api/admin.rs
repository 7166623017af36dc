use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Session;
use crate::errors::AppError;
use crate::import::{self, Extraction, ImportRecord, ReconcileSummary};
use crate::models::token::{Token, TokenStatus};
use crate::models::user::{User, UserSummary, UserUpdate};
use crate::AppState;

pub const MAX_GENERATE: usize = 500;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct TokenListParams {
    pub status: Option<TokenStatus>,
}

#[derive(Deserialize)]
pub struct GenerateTokensRequest {
    pub count: usize,
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: TokenStatus,
}

#[derive(Deserialize)]
pub struct ConfirmImportRequest {
    pub records: Vec<ImportRecord>,
}

#[derive(Serialize)]
pub struct ConfirmImportResponse {
    pub results: ReconcileSummary,
}

// ── Users ────────────────────────────────────────────────────

/// GET /api/admin/users: all users with their access token
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    Ok(Json(state.db.list_users().await?))
}

/// PATCH /api/admin/users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<User>, AppError> {
    if session.user_id == Some(id) && update.is_admin == Some(false) {
        return Err(AppError::BadRequest("cannot remove your own admin rights".into()));
    }
    let user = state
        .db
        .update_user(id, &update)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    tracing::info!(user_id = %id, "admin updated user");
    Ok(Json(user))
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if session.user_id == Some(id) {
        return Err(AppError::BadRequest("cannot delete your own account".into()));
    }
    if state.db.delete_user(id).await? {
        tracing::info!(user_id = %id, "admin deleted user");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("user"))
    }
}

// ── Tokens ───────────────────────────────────────────────────

/// GET /api/admin/tokens?status=ACTIVE
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenListParams>,
) -> Result<Json<Vec<Token>>, AppError> {
    Ok(Json(state.db.list_tokens(params.status).await?))
}

/// POST /api/admin/tokens: issue a batch of UNUSED tokens
pub async fn generate_tokens(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateTokensRequest>,
) -> Result<(StatusCode, Json<Vec<Token>>), AppError> {
    if payload.count == 0 || payload.count > MAX_GENERATE {
        return Err(AppError::BadRequest(format!(
            "count must be between 1 and {}",
            MAX_GENERATE
        )));
    }
    let tokens = state.db.generate_tokens(payload.count).await?;
    tracing::info!(count = tokens.len(), "generated access tokens");
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// PUT /api/admin/tokens/:id/status
pub async fn set_token_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<Json<Token>, AppError> {
    let token = state
        .db
        .set_token_status(id, payload.status)
        .await?
        .ok_or(AppError::NotFound("token"))?;
    tracing::info!(token_id = %id, status = %payload.status, "admin changed token status");
    Ok(Json(token))
}

// ── CSV import ───────────────────────────────────────────────

/// POST /api/admin/import/preview: classify an uploaded export (multipart
/// field `file`). Nothing is written.
pub async fn import_preview(mut multipart: Multipart) -> Result<Json<Extraction>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("failed to read upload: {}", e)))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload.ok_or_else(|| AppError::BadRequest("no file uploaded".into()))?;
    let extraction = import::extract(&bytes)?;
    Ok(Json(extraction))
}

/// POST /api/admin/import/confirm: apply previewed records.
///
/// Records are trusted as sent: eligibility is not re-derived here.
pub async fn import_confirm(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmImportRequest>,
) -> Result<Json<ConfirmImportResponse>, AppError> {
    let results = import::reconcile(&state.db, &payload.records).await;
    Ok(Json(ConfirmImportResponse { results }))
}
