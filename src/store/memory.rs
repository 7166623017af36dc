//! In-memory store used by tests. Mirrors the PostgreSQL semantics of the
//! import and chat traits, including the conditional phone update.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ChatStore, ImportStore, UserStore};
use crate::models::consultation::{Category, ChatMessage, Consultation, Role};
use crate::models::token::{Token, TokenStatus, TokenWithUser};
use crate::models::user::{phone_is_empty, User};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    tokens: Vec<Token>,
    consultations: Vec<Consultation>,
    messages: Vec<ChatMessage>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, name: &str, phone: Option<&str>) -> Uuid {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: None,
            phone_number: phone.map(String::from),
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.state.lock().await.users.insert(id, user);
        id
    }

    pub async fn seed_token(&self, value: &str, status: TokenStatus) -> Uuid {
        let now = Utc::now();
        let token = Token {
            id: Uuid::new_v4(),
            token_value: value.to_string(),
            status,
            assigned_user_id: None,
            created_at: now,
            updated_at: now,
        };
        let id = token.id;
        self.state.lock().await.tokens.push(token);
        id
    }

    pub async fn assign_token(&self, value: &str, user_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(t) = state.tokens.iter_mut().find(|t| t.token_value == value) {
            t.assigned_user_id = Some(user_id);
        }
    }

    pub async fn set_token_status(&self, value: &str, status: TokenStatus) {
        let mut state = self.state.lock().await;
        if let Some(t) = state.tokens.iter_mut().find(|t| t.token_value == value) {
            t.status = status;
            t.updated_at = Utc::now();
        }
    }

    pub async fn token(&self, value: &str) -> Option<Token> {
        let state = self.state.lock().await;
        state.tokens.iter().find(|t| t.token_value == value).cloned()
    }

    pub async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }

    pub async fn set_admin(&self, user_id: Uuid, is_admin: bool) {
        if let Some(u) = self.state.lock().await.users.get_mut(&user_id) {
            u.is_admin = is_admin;
            u.updated_at = Utc::now();
        }
    }

    pub async fn remove_user(&self, user_id: Uuid) {
        let mut state = self.state.lock().await;
        state.users.remove(&user_id);
        for t in state.tokens.iter_mut().filter(|t| t.assigned_user_id == Some(user_id)) {
            t.assigned_user_id = None;
        }
    }

    pub async fn user_phone(&self, user_id: Uuid) -> Option<String> {
        let state = self.state.lock().await;
        state.users.get(&user_id).and_then(|u| u.phone_number.clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn find_token_by_value(&self, value: &str) -> anyhow::Result<Option<TokenWithUser>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .iter()
            .find(|t| t.token_value == value)
            .map(|t| TokenWithUser {
                id: t.id,
                status: t.status,
                assigned_user_id: t.assigned_user_id,
                user_phone_number: t
                    .assigned_user_id
                    .and_then(|uid| state.users.get(&uid))
                    .and_then(|u| u.phone_number.clone()),
            }))
    }

    async fn create_token(&self, value: &str, status: TokenStatus) -> anyhow::Result<Uuid> {
        let mut state = self.state.lock().await;
        if state.tokens.iter().any(|t| t.token_value == value) {
            anyhow::bail!("duplicate token value");
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        state.tokens.push(Token {
            id,
            token_value: value.to_string(),
            status,
            assigned_user_id: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_token_status(&self, id: Uuid, status: TokenStatus) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let token = state
            .tokens
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("token {} not found", id))?;
        token.status = status;
        token.updated_at = Utc::now();
        Ok(())
    }

    async fn set_user_phone_if_empty(&self, user_id: Uuid, phone: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(u) if phone_is_empty(u.phone_number.as_deref()) => {
                u.phone_number = Some(phone.to_string());
                u.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn user_token_status(&self, user_id: Uuid) -> anyhow::Result<Option<TokenStatus>> {
        let state = self.state.lock().await;
        let statuses: Vec<TokenStatus> = state
            .tokens
            .iter()
            .filter(|t| t.assigned_user_id == Some(user_id))
            .map(|t| t.status)
            .collect();
        if statuses.contains(&TokenStatus::Active) {
            return Ok(Some(TokenStatus::Active));
        }
        Ok(statuses.last().copied())
    }

    async fn create_consultation(
        &self,
        user_id: Uuid,
        category: Category,
        title: &str,
    ) -> anyhow::Result<Consultation> {
        let now = Utc::now();
        let consultation = Consultation {
            id: Uuid::new_v4(),
            user_id,
            category,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.consultations.push(consultation.clone());
        Ok(consultation)
    }

    async fn get_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Consultation>> {
        let state = self.state.lock().await;
        Ok(state
            .consultations
            .iter()
            .find(|c| c.id == id && c.user_id == user_id)
            .cloned())
    }

    async fn list_consultations(&self, user_id: Uuid) -> anyhow::Result<Vec<Consultation>> {
        let state = self.state.lock().await;
        let mut list: Vec<Consultation> = state
            .consultations
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn delete_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.consultations.len();
        state
            .consultations
            .retain(|c| !(c.id == id && c.user_id == user_id));
        let deleted = state.consultations.len() < before;
        if deleted {
            state.messages.retain(|m| m.consultation_id != id);
        }
        Ok(deleted)
    }

    async fn append_message(
        &self,
        consultation_id: Uuid,
        role: Role,
        content: &str,
    ) -> anyhow::Result<ChatMessage> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let consultation = state
            .consultations
            .iter_mut()
            .find(|c| c.id == consultation_id)
            .ok_or_else(|| anyhow::anyhow!("consultation {} not found", consultation_id))?;
        consultation.updated_at = now;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            consultation_id,
            role,
            content: content.to_string(),
            created_at: now,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, consultation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
        let state = self.state.lock().await;
        // insertion order is timestamp order, and stays stable on ties
        Ok(state
            .messages
            .iter()
            .filter(|m| m.consultation_id == consultation_id)
            .cloned()
            .collect())
    }
}
