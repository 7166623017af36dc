use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin, require_user};
use crate::AppState;

pub mod admin;
pub mod handlers;

/// Build the HTTP API. `/healthz` and `/api/auth/*` are public; the
/// consultation routes need a user session, `/api/admin/*` admin rights.
pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login));

    let user = Router::new()
        .route("/me", get(handlers::me))
        .route(
            "/consultations",
            get(handlers::list_consultations).post(handlers::create_consultation),
        )
        .route(
            "/consultations/:id",
            get(handlers::get_consultation).delete(handlers::delete_consultation),
        )
        .route("/consultations/:id/messages", post(handlers::post_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let admin = Router::new()
        .route("/users", get(admin::list_users))
        .route(
            "/users/:id",
            axum::routing::patch(admin::update_user).delete(admin::delete_user),
        )
        .route(
            "/tokens",
            get(admin::list_tokens).post(admin::generate_tokens),
        )
        .route("/tokens/:id/status", put(admin::set_token_status))
        .route("/import/preview", post(admin::import_preview))
        .route("/import/confirm", post(admin::import_confirm))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api = Router::new()
        .merge(public)
        .merge(user)
        .nest("/admin", admin)
        .fallback(fallback_404);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
