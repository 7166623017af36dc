use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an access token: UNUSED -> ACTIVE -> REVOKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum TokenStatus {
    Unused,
    Active,
    Revoked,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Unused => "UNUSED",
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Revoked => "REVOKED",
        }
    }

    /// Maps the contract status column of the legacy spreadsheet.
    /// Unknown or empty values map to `Unused`.
    pub fn from_legacy(raw: &str) -> Self {
        match raw {
            "承認" | "契約" => TokenStatus::Active,
            "退会" | "解約" => TokenStatus::Revoked,
            _ => TokenStatus::Unused,
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNUSED" => Ok(TokenStatus::Unused),
            "ACTIVE" => Ok(TokenStatus::Active),
            "REVOKED" => Ok(TokenStatus::Revoked),
            other => Err(format!("invalid status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: Uuid,
    pub token_value: String,
    pub status: TokenStatus,
    pub assigned_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token joined with the phone number of its assigned user, as needed by
/// import reconciliation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenWithUser {
    pub id: Uuid,
    pub status: TokenStatus,
    pub assigned_user_id: Option<Uuid>,
    pub user_phone_number: Option<String>,
}

/// Generate a fresh credential: 16 uppercase hex characters from the OS RNG.
pub fn generate_token_value() -> String {
    let mut random_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut random_bytes);
    hex::encode_upper(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_status_mapping() {
        assert_eq!(TokenStatus::from_legacy("承認"), TokenStatus::Active);
        assert_eq!(TokenStatus::from_legacy("契約"), TokenStatus::Active);
        assert_eq!(TokenStatus::from_legacy("退会"), TokenStatus::Revoked);
        assert_eq!(TokenStatus::from_legacy("解約"), TokenStatus::Revoked);
        assert_eq!(TokenStatus::from_legacy(""), TokenStatus::Unused);
        assert_eq!(TokenStatus::from_legacy("保留"), TokenStatus::Unused);
        // no normalization: surrounding whitespace is the caller's job
        assert_eq!(TokenStatus::from_legacy(" 承認"), TokenStatus::Unused);
    }

    #[test]
    fn test_from_str_rejects_lowercase() {
        assert_eq!("ACTIVE".parse::<TokenStatus>(), Ok(TokenStatus::Active));
        assert!("active".parse::<TokenStatus>().is_err());
        assert_eq!(
            "BOGUS".parse::<TokenStatus>().unwrap_err(),
            "invalid status: BOGUS"
        );
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(TokenStatus::Revoked).unwrap(), "REVOKED");
    }

    #[test]
    fn test_generated_values_are_hex_and_distinct() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }
}
