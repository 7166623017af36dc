//! End-to-end tests for the legacy contract import: Shift-JIS upload bytes
//! are classified and the eligible rows reconciled against the in-memory
//! store. No database or network needed.

use async_trait::async_trait;
use uuid::Uuid;

use troublelab::import::{self, ImportRecord};
use troublelab::models::token::{TokenStatus, TokenWithUser};
use troublelab::store::memory::MemoryStore;
use troublelab::store::ImportStore;

fn sjis(text: &str) -> Vec<u8> {
    let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(text);
    assert!(!had_errors, "test fixture must be representable in Shift-JIS");
    bytes.into_owned()
}

const EXPORT: &str = "\
顧客ID,商品名,認証キー,電話番号,ステータス
C001,トラブル解決ラボ,ABC123,09012345678,承認
C002,別サービス,XYZ999,09000000000,承認
C003,トラブル解決ラボ,,08011112222,退会
C004,トラブル解決ラボ,DEF456,,契約
,トラブル解決ラボ,,07000000000,承認
";

mod extraction_tests {
    use super::*;

    #[test]
    fn test_shift_jis_export_is_classified() {
        let extraction = import::extract(&sjis(EXPORT)).unwrap();
        assert_eq!(extraction.stats.total, 5);
        assert_eq!(extraction.stats.eligible, 3);
        assert_eq!(extraction.stats.skipped, 2);

        let first = &extraction.extracted_data[0];
        assert_eq!(first.row_number, 2);
        assert_eq!(first.status_mapped, TokenStatus::Active);
        assert!(first.is_eligible);
        assert_eq!(first.skip_reason, None);

        let other = &extraction.extracted_data[1];
        assert!(!other.is_eligible);
        assert!(other.skip_reason.as_deref().unwrap().contains("別サービス"));

        // customer id stands in for a missing auth key
        let fallback = &extraction.extracted_data[2];
        assert!(fallback.is_eligible);
        assert_eq!(fallback.key_to_use, "C003");
        assert_eq!(fallback.status_mapped, TokenStatus::Revoked);

        let keyless = &extraction.extracted_data[4];
        assert_eq!(keyless.skip_reason.as_deref(), Some("missing key"));
    }

    #[test]
    fn test_preview_json_shape() {
        let extraction = import::extract(&sjis(EXPORT)).unwrap();
        let json = serde_json::to_value(&extraction).unwrap();
        assert_eq!(json["stats"]["total"], 5);
        assert_eq!(json["stats"]["filtered"], 3);
        assert_eq!(json["stats"]["skipped"], 2);
        assert_eq!(json["extractedData"][0]["statusMapped"], "ACTIVE");
        assert_eq!(json["extractedData"][0]["isEligible"], true);
        assert!(json["extractedData"][0].get("skipReason").is_none());
    }

    #[test]
    fn test_malformed_row_does_not_hide_the_rest() {
        let text = "\
商品名,認証キー,ステータス
トラブル解決ラボ,K1,承認
トラブル解決ラボ,K2,承認,余分な列
トラブル解決ラボ,K3,解約
";
        let extraction = import::extract(&sjis(text)).unwrap();
        assert_eq!(extraction.stats.total, 3);
        assert_eq!(extraction.stats.eligible, 2);

        let bad = &extraction.extracted_data[1];
        assert_eq!(bad.row_number, 3);
        assert!(bad.skip_reason.as_deref().unwrap().starts_with("error: "));
        assert_eq!(extraction.extracted_data[2].key_to_use, "K3");
    }

    #[test]
    fn test_utf8_export_without_bom_is_classified() {
        let extraction = import::extract(EXPORT.as_bytes()).unwrap();
        assert_eq!(extraction.stats.total, 5);
        assert_eq!(extraction.stats.eligible, 3);
        assert_eq!(extraction.stats.skipped, 2);

        let first = &extraction.extracted_data[0];
        assert!(first.is_eligible);
        assert_eq!(first.product_name, "トラブル解決ラボ");
        assert_eq!(first.status_mapped, TokenStatus::Active);
        assert_eq!(
            extraction.eligible_records(),
            import::extract(&sjis(EXPORT)).unwrap().eligible_records()
        );
    }

    #[test]
    fn test_eligible_records_feed_reconciliation() {
        let extraction = import::extract(&sjis(EXPORT)).unwrap();
        let records = extraction.eligible_records();
        let keys: Vec<&str> = records.iter().map(|r| r.auth_key.as_str()).collect();
        assert_eq!(keys, ["ABC123", "C003", "DEF456"]);
        assert_eq!(records[0].status, "ACTIVE");
        assert_eq!(records[2].phone_number, None);
    }
}

mod reconciliation_tests {
    use super::*;

    #[tokio::test]
    async fn test_import_then_reimport_is_a_fixed_point() {
        let store = MemoryStore::new();
        let records = import::extract(&sjis(EXPORT)).unwrap().eligible_records();

        let first = import::reconcile(&store, &records).await;
        assert_eq!(first.total, 3);
        assert_eq!(first.created, 3);
        assert_eq!(first.success, 3);
        assert_eq!(first.failed, 0);
        assert_eq!(store.token_count().await, 3);

        let second = import::reconcile(&store, &records).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(second.phone_updated, 0);
        assert_eq!(second.success, 3);
        assert_eq!(store.token_count().await, 3);
    }

    #[tokio::test]
    async fn test_cancellation_in_a_later_export_revokes_the_token() {
        let store = MemoryStore::new();
        let user = store.seed_user("佐藤", None).await;
        store.seed_token("ABC123", TokenStatus::Active).await;
        store.assign_token("ABC123", user).await;

        let later = "\
商品名,認証キー,電話番号,ステータス
トラブル解決ラボ,ABC123,09012345678,解約
";
        let records = import::extract(&sjis(later)).unwrap().eligible_records();
        let summary = import::reconcile(&store, &records).await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.phone_updated, 1);
        assert_eq!(store.token("ABC123").await.unwrap().status, TokenStatus::Revoked);
        assert_eq!(store.user_phone(user).await.as_deref(), Some("09012345678"));
    }

    #[tokio::test]
    async fn test_existing_phone_is_never_overwritten() {
        let store = MemoryStore::new();
        let user = store.seed_user("鈴木", Some("08099998888")).await;
        store.seed_token("ABC123", TokenStatus::Active).await;
        store.assign_token("ABC123", user).await;

        let records = import::extract(&sjis(EXPORT)).unwrap().eligible_records();
        let summary = import::reconcile(&store, &records).await;

        assert_eq!(summary.phone_updated, 0);
        assert_eq!(store.user_phone(user).await.as_deref(), Some("08099998888"));
    }

    /// Store that fails every write for one token value.
    struct FlakyStore {
        inner: MemoryStore,
        broken_key: &'static str,
    }

    #[async_trait]
    impl ImportStore for FlakyStore {
        async fn find_token_by_value(&self, value: &str) -> anyhow::Result<Option<TokenWithUser>> {
            self.inner.find_token_by_value(value).await
        }

        async fn create_token(&self, value: &str, status: TokenStatus) -> anyhow::Result<Uuid> {
            if value == self.broken_key {
                anyhow::bail!("connection reset");
            }
            self.inner.create_token(value, status).await
        }

        async fn update_token_status(&self, id: Uuid, status: TokenStatus) -> anyhow::Result<()> {
            self.inner.update_token_status(id, status).await
        }

        async fn set_user_phone_if_empty(&self, user_id: Uuid, phone: &str) -> anyhow::Result<bool> {
            self.inner.set_user_phone_if_empty(user_id, phone).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_to_its_record() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            broken_key: "C003",
        };
        let mut records = import::extract(&sjis(EXPORT)).unwrap().eligible_records();
        records.push(ImportRecord {
            auth_key: String::new(),
            phone_number: None,
            status: "ACTIVE".into(),
        });

        let summary = import::reconcile(&store, &records).await;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.created, 2);

        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].auth_key, "C003");
        assert!(summary.errors[0].error.contains("connection reset"));
        assert_eq!(summary.errors[1].error, "empty key");

        assert!(store.inner.token("ABC123").await.is_some());
        assert!(store.inner.token("DEF456").await.is_some());
        assert!(store.inner.token("C003").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_confirm_records_fail_individually() {
        let body = serde_json::json!([
            { "authKey": "GOOD1", "status": "ACTIVE" },
            { "authKey": null, "status": "ACTIVE" },
            { "authKey": "NOSTATUS" },
            { "authKey": "NULLSTATUS", "status": null, "phoneNumber": null }
        ]);
        let records: Vec<ImportRecord> = serde_json::from_value(body).unwrap();
        assert_eq!(records[1].auth_key, "");
        assert_eq!(records[2].status, "");

        let store = MemoryStore::new();
        let summary = import::reconcile(&store, &records).await;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 3);

        let errors: Vec<(&str, &str)> = summary
            .errors
            .iter()
            .map(|e| (e.auth_key.as_str(), e.error.as_str()))
            .collect();
        assert_eq!(
            errors,
            [
                ("", "empty key"),
                ("NOSTATUS", "invalid status: "),
                ("NULLSTATUS", "invalid status: "),
            ]
        );
        assert_eq!(store.token_count().await, 1);
    }

    #[tokio::test]
    async fn test_confirm_payload_is_trusted_as_sent() {
        // The confirm body is camelCase JSON; statuses are not re-derived.
        let body = serde_json::json!({
            "records": [
                { "authKey": "XYZ999", "phoneNumber": "09000000000", "status": "ACTIVE" },
                { "authKey": "BAD", "status": "PAUSED" }
            ]
        });
        let records: Vec<ImportRecord> =
            serde_json::from_value(body["records"].clone()).unwrap();

        let store = MemoryStore::new();
        let summary = import::reconcile(&store, &records).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].error, "invalid status: PAUSED");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["phoneUpdated"], 0);
        assert_eq!(json["errors"][0]["authKey"], "BAD");
    }
}
