//! Import reconciliation: brings persisted token and user state in line
//! with a batch of classified import records.
//!
//! Records are processed one at a time with no transaction around the
//! batch. A failing record is counted and reported; the rest carry on.
//! Running the same batch twice is a fixed point.

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::token::TokenStatus;
use crate::models::user::phone_is_empty;
use crate::store::ImportStore;

/// One record of a confirm batch. Absent or null fields read as empty so
/// a malformed record fails on its own instead of rejecting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub auth_key: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// One of ACTIVE, REVOKED, UNUSED. Parsed per record so a bad value
    /// fails only its own record.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub auth_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub phone_updated: usize,
    pub errors: Vec<RecordError>,
}

enum Action {
    Created,
    Updated,
    Unchanged,
}

struct Outcome {
    action: Action,
    phone_updated: bool,
}

pub async fn reconcile(store: &dyn ImportStore, records: &[ImportRecord]) -> ReconcileSummary {
    let mut summary = ReconcileSummary {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        match apply_record(store, record).await {
            Ok(outcome) => {
                summary.success += 1;
                match outcome.action {
                    Action::Created => summary.created += 1,
                    Action::Updated => summary.updated += 1,
                    Action::Unchanged => summary.skipped += 1,
                }
                if outcome.phone_updated {
                    summary.phone_updated += 1;
                }
            }
            Err(e) => {
                tracing::warn!(auth_key = %record.auth_key, "import record failed: {:#}", e);
                summary.failed += 1;
                summary.errors.push(RecordError {
                    auth_key: record.auth_key.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    tracing::info!(
        total = summary.total,
        success = summary.success,
        failed = summary.failed,
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        phone_updated = summary.phone_updated,
        "import reconciliation finished"
    );
    summary
}

async fn apply_record(store: &dyn ImportStore, record: &ImportRecord) -> anyhow::Result<Outcome> {
    let key = record.auth_key.as_str();
    if key.is_empty() {
        anyhow::bail!("empty key");
    }
    let status: TokenStatus = record.status.parse().map_err(anyhow::Error::msg)?;

    let Some(existing) = store.find_token_by_value(key).await? else {
        store.create_token(key, status).await?;
        return Ok(Outcome {
            action: Action::Created,
            phone_updated: false,
        });
    };

    let action = if existing.status != status {
        store.update_token_status(existing.id, status).await?;
        Action::Updated
    } else {
        Action::Unchanged
    };

    let phone = record.phone_number.as_deref().map(str::trim).unwrap_or("");
    let mut phone_updated = false;
    if let Some(user_id) = existing.assigned_user_id {
        if !phone.is_empty() && phone_is_empty(existing.user_phone_number.as_deref()) {
            phone_updated = store.set_user_phone_if_empty(user_id, phone).await?;
        }
    }

    Ok(Outcome {
        action,
        phone_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn record(key: &str, phone: Option<&str>, status: &str) -> ImportRecord {
        ImportRecord {
            auth_key: key.to_string(),
            phone_number: phone.map(String::from),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_new_key_creates_token() {
        let store = MemoryStore::new();
        let batch = [record("ABC123", Some("09012345678"), "ACTIVE")];

        let summary = reconcile(&store, &batch).await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 0);

        let token = store.token("ABC123").await.unwrap();
        assert_eq!(token.status, TokenStatus::Active);
        assert_eq!(token.assigned_user_id, None);
    }

    #[tokio::test]
    async fn test_second_run_is_a_fixed_point() {
        let store = MemoryStore::new();
        let batch = [record("ABC123", Some("09012345678"), "ACTIVE")];

        reconcile(&store, &batch).await;
        let second = reconcile(&store, &batch).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.success, 1);
        assert_eq!(second.failed, 0);
        assert_eq!(second.phone_updated, 0);
    }

    #[tokio::test]
    async fn test_status_change_updates_token() {
        let store = MemoryStore::new();
        store.seed_token("K1", TokenStatus::Active).await;

        let summary = reconcile(&store, &[record("K1", None, "REVOKED")]).await;
        assert_eq!(summary.updated, 1);
        assert_eq!(store.token("K1").await.unwrap().status, TokenStatus::Revoked);
    }

    #[tokio::test]
    async fn test_phone_filled_once_and_never_overwritten() {
        let store = MemoryStore::new();
        let user = store.seed_user("山田", None).await;
        store.seed_token("K1", TokenStatus::Active).await;
        store.assign_token("K1", user).await;

        let first = reconcile(&store, &[record("K1", Some("09011112222"), "ACTIVE")]).await;
        assert_eq!(first.phone_updated, 1);
        assert_eq!(first.skipped, 1);
        assert_eq!(store.user_phone(user).await.as_deref(), Some("09011112222"));

        let second = reconcile(&store, &[record("K1", Some("08099998888"), "ACTIVE")]).await;
        assert_eq!(second.phone_updated, 0);
        assert_eq!(store.user_phone(user).await.as_deref(), Some("09011112222"));
    }

    #[tokio::test]
    async fn test_blank_phone_counts_as_unset() {
        let store = MemoryStore::new();
        let user = store.seed_user("佐藤", Some("")).await;
        store.seed_token("K2", TokenStatus::Unused).await;
        store.assign_token("K2", user).await;

        let summary = reconcile(&store, &[record("K2", Some("0312345678"), "ACTIVE")]).await;
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.phone_updated, 1);
    }

    #[tokio::test]
    async fn test_phone_ignored_without_assigned_user() {
        let store = MemoryStore::new();
        store.seed_token("K3", TokenStatus::Active).await;

        let summary = reconcile(&store, &[record("K3", Some("0312345678"), "ACTIVE")]).await;
        assert_eq!(summary.phone_updated, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_empty_key_and_bad_status_fail_individually() {
        let store = MemoryStore::new();
        let batch = [
            record("", Some("09000000000"), "ACTIVE"),
            record("K4", None, "active"),
            record("K5", None, "UNUSED"),
        ];

        let summary = reconcile(&store, &batch).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(
            summary.errors,
            vec![
                RecordError {
                    auth_key: String::new(),
                    error: "empty key".into()
                },
                RecordError {
                    auth_key: "K4".into(),
                    error: "invalid status: active".into()
                },
            ]
        );
        assert!(store.token("K4").await.is_none());
    }

    #[test]
    fn test_summary_wire_format() {
        let json = serde_json::to_value(ReconcileSummary {
            phone_updated: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["phoneUpdated"], 2);
        assert!(json["errors"].as_array().unwrap().is_empty());
    }
}
