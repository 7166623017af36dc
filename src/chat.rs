//! Consultation flow: persist the user's turn, ask the advisor, persist the
//! reply.

use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm::ChatCompletion;
use crate::models::consultation::{Category, ChatMessage, ChatTurn, Consultation, Role};
use crate::models::token::TokenStatus;
use crate::store::ChatStore;

pub const MAX_MESSAGE_CHARS: usize = 4000;
const TITLE_CHARS: usize = 40;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub user_message: ChatMessage,
    pub reply: ChatMessage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedConsultation {
    pub consultation: Consultation,
    #[serde(flatten)]
    pub exchange: Exchange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationDetail {
    pub consultation: Consultation,
    pub messages: Vec<ChatMessage>,
}

fn validate_content(content: &str) -> Result<&str, AppError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("message is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::BadRequest(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(content)
}

fn title_from(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    let mut title: String = first_line.chars().take(TITLE_CHARS).collect();
    if first_line.chars().count() > TITLE_CHARS {
        title.push('…');
    }
    title
}

async fn ensure_access(store: &dyn ChatStore, user_id: Uuid) -> Result<(), AppError> {
    match store.user_token_status(user_id).await? {
        Some(TokenStatus::Active) => Ok(()),
        status => {
            tracing::info!(%user_id, ?status, "chat refused: access token not active");
            Err(AppError::Forbidden)
        }
    }
}

/// System prompt followed by the stored transcript, oldest first.
fn build_turns(system_prompt: &str, category: Category, history: &[ChatMessage]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    turns.push(ChatTurn::new(
        Role::System,
        format!("{}\n相談カテゴリ: {}", system_prompt, category.label()),
    ));
    turns.extend(history.iter().map(ChatTurn::from));
    turns
}

pub async fn send_message(
    store: &dyn ChatStore,
    llm: &dyn ChatCompletion,
    system_prompt: &str,
    user_id: Uuid,
    consultation_id: Uuid,
    content: &str,
) -> Result<Exchange, AppError> {
    let content = validate_content(content)?;
    ensure_access(store, user_id).await?;

    let consultation = store
        .get_consultation(consultation_id, user_id)
        .await?
        .ok_or(AppError::NotFound("consultation"))?;

    let user_message = store
        .append_message(consultation.id, Role::User, content)
        .await?;

    let history = store.list_messages(consultation.id).await?;
    let turns = build_turns(system_prompt, consultation.category, &history);
    let reply_text = llm.complete(&turns).await?;

    let reply = store
        .append_message(consultation.id, Role::Assistant, &reply_text)
        .await?;

    tracing::info!(
        consultation_id = %consultation.id,
        turns = history.len() + 1,
        "advisor replied"
    );
    Ok(Exchange {
        user_message,
        reply,
    })
}

pub async fn start_consultation(
    store: &dyn ChatStore,
    llm: &dyn ChatCompletion,
    system_prompt: &str,
    user_id: Uuid,
    category: Category,
    first_message: &str,
) -> Result<StartedConsultation, AppError> {
    let content = validate_content(first_message)?;
    ensure_access(store, user_id).await?;

    let consultation = store
        .create_consultation(user_id, category, &title_from(content))
        .await?;
    let exchange = send_message(store, llm, system_prompt, user_id, consultation.id, content).await?;

    // re-read so updated_at reflects the exchange
    let consultation = store
        .get_consultation(consultation.id, user_id)
        .await?
        .unwrap_or(consultation);
    Ok(StartedConsultation {
        consultation,
        exchange,
    })
}

pub async fn consultation_detail(
    store: &dyn ChatStore,
    user_id: Uuid,
    consultation_id: Uuid,
) -> Result<ConsultationDetail, AppError> {
    let consultation = store
        .get_consultation(consultation_id, user_id)
        .await?
        .ok_or(AppError::NotFound("consultation"))?;
    let messages = store.list_messages(consultation.id).await?;
    Ok(ConsultationDetail {
        consultation,
        messages,
    })
}
