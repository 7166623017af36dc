pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::consultation::{Category, ChatMessage, Consultation, Role};
use crate::models::token::{TokenStatus, TokenWithUser};
use crate::models::user::User;

/// Account lookups used by the request guards.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
}

/// Token and user operations needed by import reconciliation.
/// Implementations: PgStore (PostgreSQL), MemoryStore (tests).
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Look up a token by its credential value, with the assigned user's
    /// phone number.
    async fn find_token_by_value(&self, value: &str) -> anyhow::Result<Option<TokenWithUser>>;

    async fn create_token(&self, value: &str, status: TokenStatus) -> anyhow::Result<Uuid>;

    async fn update_token_status(&self, id: Uuid, status: TokenStatus) -> anyhow::Result<()>;

    /// Set the phone number only if the stored one is NULL or blank.
    /// Returns whether a row changed.
    async fn set_user_phone_if_empty(&self, user_id: Uuid, phone: &str) -> anyhow::Result<bool>;
}

/// Consultation transcript storage, always scoped to the owning user.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Status of the access token assigned to the user. An ACTIVE token
    /// wins when several are assigned.
    async fn user_token_status(&self, user_id: Uuid) -> anyhow::Result<Option<TokenStatus>>;

    async fn create_consultation(
        &self,
        user_id: Uuid,
        category: Category,
        title: &str,
    ) -> anyhow::Result<Consultation>;

    async fn get_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Consultation>>;

    /// Most recently active first.
    async fn list_consultations(&self, user_id: Uuid) -> anyhow::Result<Vec<Consultation>>;

    async fn delete_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool>;

    /// Append a turn and bump the consultation's `updated_at`.
    async fn append_message(
        &self,
        consultation_id: Uuid,
        role: Role,
        content: &str,
    ) -> anyhow::Result<ChatMessage>;

    /// Transcript in timestamp order.
    async fn list_messages(&self, consultation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>>;
}
