use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{issue_session, Session};
use crate::chat::{self, ConsultationDetail, Exchange, StartedConsultation};
use crate::errors::AppError;
use crate::models::consultation::{Category, Consultation};
use crate::models::user::{NewUser, Registration, User};
use crate::store::{ChatStore, UserStore};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub token: String,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session: String,
    pub user: User,
}

#[derive(Deserialize)]
pub struct CreateConsultationRequest {
    #[serde(default)]
    pub category: Category,
    pub message: String,
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn session_for(state: &AppState, user: User) -> Result<Json<SessionResponse>, AppError> {
    let session = issue_session(
        &state.config.session_secret,
        user.id,
        user.is_admin,
        state.config.session_ttl_hours,
    )?;
    Ok(Json(SessionResponse { session, user }))
}

// ── Auth ─────────────────────────────────────────────────────

/// POST /api/auth/register: claim an access token and create an account
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let token = payload.token.trim();
    let name = payload.name.trim();
    if token.is_empty() || name.is_empty() {
        return Err(AppError::BadRequest("token and name are required".into()));
    }

    let new_user = NewUser {
        name: name.to_string(),
        email: non_blank(payload.email),
        phone_number: non_blank(payload.phone_number),
    };
    let registration = state.db.register_with_token(token, &new_user).await?;
    if !matches!(registration, Registration::Created(_)) {
        tracing::warn!(outcome = ?registration, "register: rejected");
    }
    let user = registration.into_user()?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, session_for(&state, user)?))
}

/// POST /api/auth/login: exchange an ACTIVE access token for a session
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let token = payload.token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    let user = state
        .db
        .find_login(token)
        .await?
        .ok_or(AppError::Unauthorized)?;
    session_for(&state, user)
}

/// GET /api/me: the signed-in user
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<User>, AppError> {
    let user = state
        .db
        .get_user(session.user()?)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(user))
}

// ── Consultations ────────────────────────────────────────────

/// GET /api/consultations: the caller's consultation history
pub async fn list_consultations(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<Consultation>>, AppError> {
    Ok(Json(state.db.list_consultations(session.user()?).await?))
}

/// POST /api/consultations: open a consultation with its first message
pub async fn create_consultation(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateConsultationRequest>,
) -> Result<(StatusCode, Json<StartedConsultation>), AppError> {
    let started = chat::start_consultation(
        &state.db,
        state.llm.as_ref(),
        &state.config.system_prompt,
        session.user()?,
        payload.category,
        &payload.message,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// GET /api/consultations/:id: one consultation with its transcript
pub async fn get_consultation(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConsultationDetail>, AppError> {
    Ok(Json(chat::consultation_detail(&state.db, session.user()?, id).await?))
}

/// DELETE /api/consultations/:id
pub async fn delete_consultation(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.db.delete_consultation(id, session.user()?).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("consultation"))
    }
}

/// POST /api/consultations/:id/messages: send a message, get the reply
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<Json<Exchange>, AppError> {
    let exchange = chat::send_message(
        &state.db,
        state.llm.as_ref(),
        &state.config.system_prompt,
        session.user()?,
        id,
        &payload.content,
    )
    .await?;
    Ok(Json(exchange))
}
