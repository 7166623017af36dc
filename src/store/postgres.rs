use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ChatStore, ImportStore, UserStore};
use crate::models::consultation::{Category, ChatMessage, Consultation, Role};
use crate::models::token::{generate_token_value, Token, TokenStatus, TokenWithUser};
use crate::models::user::{NewUser, Registration, User, UserSummary, UserUpdate};

const USER_COLUMNS: &str = "id, name, email, phone_number, is_admin, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, token_value, status, assigned_user_id, created_at, updated_at";
const CONSULTATION_COLUMNS: &str = "id, user_id, category, title, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Build a pool that connects on first use.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn list_users(&self) -> anyhow::Result<Vec<UserSummary>> {
        let rows = sqlx::query_as::<_, UserSummary>(
            r#"SELECT * FROM (
                   SELECT DISTINCT ON (u.id)
                          u.id, u.name, u.email, u.phone_number, u.is_admin,
                          t.token_value, t.status AS token_status, u.created_at
                   FROM users u
                   LEFT JOIN tokens t ON t.assigned_user_id = u.id
                   ORDER BY u.id, (t.status = 'ACTIVE') DESC NULLS LAST, t.updated_at DESC
               ) s
               ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_user(&self, id: Uuid, update: &UserUpdate) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users
               SET name = COALESCE($2, name),
                   phone_number = COALESCE($3, phone_number),
                   is_admin = COALESCE($4, is_admin),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {}"#,
            USER_COLUMNS
        ))
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.phone_number.as_deref())
        .bind(update.is_admin)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_user(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create a user and bind the given access token to them. The token
    /// must exist, be unassigned and not revoked; the email must be unused.
    pub async fn register_with_token(
        &self,
        token_value: &str,
        user: &NewUser,
    ) -> anyhow::Result<Registration> {
        let mut tx = self.pool.begin().await?;

        let token = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE token_value = $1 FOR UPDATE",
            TOKEN_COLUMNS
        ))
        .bind(token_value)
        .fetch_optional(&mut *tx)
        .await?;

        let token = match token {
            Some(t) if t.status != TokenStatus::Revoked && t.assigned_user_id.is_none() => t,
            _ => return Ok(Registration::TokenUnavailable),
        };

        let inserted = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, phone_number) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(user.email.as_deref())
        .bind(user.phone_number.as_deref())
        .fetch_one(&mut *tx)
        .await;
        let created = match inserted {
            Ok(created) => created,
            // rolled back when `tx` drops
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Ok(Registration::EmailTaken)
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query(
            "UPDATE tokens SET assigned_user_id = $2, status = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(token.id)
        .bind(created.id)
        .bind(TokenStatus::Active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Registration::Created(created))
    }

    /// The user owning an ACTIVE access token.
    pub async fn find_login(&self, token_value: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"SELECT u.id, u.name, u.email, u.phone_number, u.is_admin, u.created_at, u.updated_at
               FROM tokens t
               JOIN users u ON u.id = t.assigned_user_id
               WHERE t.token_value = $1 AND t.status = $2"#,
        )
        .bind(token_value)
        .bind(TokenStatus::Active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Token Operations --

    /// Issue `count` new UNUSED tokens in one transaction.
    pub async fn generate_tokens(&self, count: usize) -> anyhow::Result<Vec<Token>> {
        let mut tx = self.pool.begin().await?;
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            let token = sqlx::query_as::<_, Token>(&format!(
                "INSERT INTO tokens (token_value, status) VALUES ($1, $2) RETURNING {}",
                TOKEN_COLUMNS
            ))
            .bind(generate_token_value())
            .bind(TokenStatus::Unused)
            .fetch_one(&mut *tx)
            .await?;
            tokens.push(token);
        }
        tx.commit().await?;
        Ok(tokens)
    }

    pub async fn list_tokens(&self, status: Option<TokenStatus>) -> anyhow::Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE ($1::varchar IS NULL OR status = $1) ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_token_status(&self, id: Uuid, status: TokenStatus) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, Token>(&format!(
            "UPDATE tokens SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_token_status_by_value(
        &self,
        value: &str,
        status: TokenStatus,
    ) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, Token>(&format!(
            "UPDATE tokens SET status = $2, updated_at = NOW() WHERE token_value = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(value)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl ImportStore for PgStore {
    async fn find_token_by_value(&self, value: &str) -> anyhow::Result<Option<TokenWithUser>> {
        let row = sqlx::query_as::<_, TokenWithUser>(
            r#"SELECT t.id, t.status, t.assigned_user_id, u.phone_number AS user_phone_number
               FROM tokens t
               LEFT JOIN users u ON u.id = t.assigned_user_id
               WHERE t.token_value = $1"#,
        )
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_token(&self, value: &str, status: TokenStatus) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO tokens (token_value, status) VALUES ($1, $2) RETURNING id",
        )
        .bind(value)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_token_status(&self, id: Uuid, status: TokenStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE tokens SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_phone_if_empty(&self, user_id: Uuid, phone: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE users SET phone_number = $2, updated_at = NOW()
               WHERE id = $1 AND (phone_number IS NULL OR btrim(phone_number) = '')"#,
        )
        .bind(user_id)
        .bind(phone)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn user_token_status(&self, user_id: Uuid) -> anyhow::Result<Option<TokenStatus>> {
        let status = sqlx::query_scalar::<_, TokenStatus>(
            r#"SELECT status FROM tokens
               WHERE assigned_user_id = $1
               ORDER BY (status = 'ACTIVE') DESC, updated_at DESC
               LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    async fn create_consultation(
        &self,
        user_id: Uuid,
        category: Category,
        title: &str,
    ) -> anyhow::Result<Consultation> {
        let row = sqlx::query_as::<_, Consultation>(&format!(
            "INSERT INTO consultations (user_id, category, title) VALUES ($1, $2, $3) RETURNING {}",
            CONSULTATION_COLUMNS
        ))
        .bind(user_id)
        .bind(category)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Consultation>> {
        let row = sqlx::query_as::<_, Consultation>(&format!(
            "SELECT {} FROM consultations WHERE id = $1 AND user_id = $2",
            CONSULTATION_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_consultations(&self, user_id: Uuid) -> anyhow::Result<Vec<Consultation>> {
        let rows = sqlx::query_as::<_, Consultation>(&format!(
            "SELECT {} FROM consultations WHERE user_id = $1 ORDER BY updated_at DESC",
            CONSULTATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_consultation(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM consultations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        consultation_id: Uuid,
        role: Role,
        content: &str,
    ) -> anyhow::Result<ChatMessage> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, ChatMessage>(
            r#"INSERT INTO messages (consultation_id, role, content)
               VALUES ($1, $2, $3)
               RETURNING id, consultation_id, role, content, created_at"#,
        )
        .bind(consultation_id)
        .bind(role)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE consultations SET updated_at = NOW() WHERE id = $1")
            .bind(consultation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(&self, consultation_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            r#"SELECT id, consultation_id, role, content, created_at
               FROM messages
               WHERE consultation_id = $1
               ORDER BY created_at ASC, seq ASC"#,
        )
        .bind(consultation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
