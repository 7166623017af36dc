use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::TokenStatus;
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin listing row: a user with the access token assigned to them, if any.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_admin: bool,
    pub token_value: Option<String>,
    pub token_status: Option<TokenStatus>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// Outcome of claiming an access token for a new account.
#[derive(Debug, Clone)]
pub enum Registration {
    Created(User),
    /// Unknown, revoked or already assigned token.
    TokenUnavailable,
    EmailTaken,
}

impl Registration {
    pub fn into_user(self) -> Result<User, AppError> {
        match self {
            Registration::Created(user) => Ok(user),
            Registration::TokenUnavailable => Err(AppError::BadRequest(
                "access token is invalid or already in use".into(),
            )),
            Registration::EmailTaken => {
                Err(AppError::BadRequest("email already registered".into()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub is_admin: Option<bool>,
}

/// True when a stored phone number counts as unset.
pub fn phone_is_empty(phone: Option<&str>) -> bool {
    phone.map(str::trim).unwrap_or("").is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_registration_outcomes() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: "山田".into(),
            email: Some("yamada@example.com".into()),
            phone_number: None,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(Registration::Created(user.clone()).into_user().unwrap().id, user.id);

        match Registration::EmailTaken.into_user() {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "email already registered"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            Registration::TokenUnavailable.into_user(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_phone_is_empty() {
        assert!(phone_is_empty(None));
        assert!(phone_is_empty(Some("  ")));
        assert!(!phone_is_empty(Some("09012345678")));
    }
}
