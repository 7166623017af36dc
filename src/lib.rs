//! Trouble Lab, a dispute consultation service.
//!
//! Library crate shared by the `troublelab` binary and the integration
//! tests in `tests/`.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod errors;
pub mod import;
pub mod llm;
pub mod models;
pub mod store;

use llm::ChatCompletion;
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub llm: Arc<dyn ChatCompletion>,
    pub config: config::Config,
}
