//! Classification of legacy contract exports.
//!
//! Pure transform: decode, parse and classify every row. Nothing here
//! touches storage, so a preview can be rebuilt any number of times.

use anyhow::Context;
use serde::Serialize;

use super::decode::decode_legacy_csv;
use super::reconcile::ImportRecord;
use crate::models::token::TokenStatus;

/// Product whose contracts grant access to the service.
pub const TARGET_PRODUCT: &str = "トラブル解決ラボ";

const COL_PRODUCT: &str = "商品名";
const COL_AUTH_KEY: &str = "認証キー";
const COL_CUSTOMER_ID: &str = "顧客ID";
const COL_PHONE: &str = "電話番号";
const COL_STATUS: &str = "ステータス";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub row_number: usize,
    pub product_name: String,
    pub auth_key_raw: String,
    pub customer_id: String,
    pub phone_number: String,
    pub status_raw: String,
    pub status_mapped: TokenStatus,
    pub key_to_use: String,
    pub is_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ImportRow {
    fn failed(row_number: usize, message: &str) -> Self {
        Self {
            row_number,
            product_name: String::new(),
            auth_key_raw: String::new(),
            customer_id: String::new(),
            phone_number: String::new(),
            status_raw: String::new(),
            status_mapped: TokenStatus::Unused,
            key_to_use: String::new(),
            is_eligible: false,
            skip_reason: Some(format!("error: {}", message)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub total: usize,
    #[serde(rename = "filtered")]
    pub eligible: usize,
    pub skipped: usize,
}

/// Preview of an uploaded export: every row in file order plus counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub stats: ExtractionStats,
    pub extracted_data: Vec<ImportRow>,
}

impl Extraction {
    fn from_rows(rows: Vec<ImportRow>) -> Self {
        let eligible = rows.iter().filter(|r| r.is_eligible).count();
        Self {
            stats: ExtractionStats {
                total: rows.len(),
                eligible,
                skipped: rows.len() - eligible,
            },
            extracted_data: rows,
        }
    }

    /// Eligible rows as reconciliation input.
    pub fn eligible_records(&self) -> Vec<ImportRecord> {
        self.extracted_data
            .iter()
            .filter(|r| r.is_eligible)
            .map(|r| ImportRecord {
                auth_key: r.key_to_use.clone(),
                phone_number: Some(r.phone_number.clone()).filter(|p| !p.is_empty()),
                status: r.status_mapped.as_str().to_string(),
            })
            .collect()
    }
}

/// Column positions resolved from the header row. Missing columns read as
/// empty strings.
struct Columns {
    product: Option<usize>,
    auth_key: Option<usize>,
    customer_id: Option<usize>,
    phone: Option<usize>,
    status: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Self {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
        };
        Self {
            product: find(COL_PRODUCT),
            auth_key: find(COL_AUTH_KEY),
            customer_id: find(COL_CUSTOMER_ID),
            phone: find(COL_PHONE),
            status: find(COL_STATUS),
        }
    }
}

fn field(record: &csv::StringRecord, index: Option<usize>) -> String {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

/// Decode and classify a raw upload.
pub fn extract(bytes: &[u8]) -> anyhow::Result<Extraction> {
    extract_text(&decode_legacy_csv(bytes))
}

/// Classify already-decoded CSV text.
pub fn extract_text(text: &str) -> anyhow::Result<Extraction> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers().context("failed to read csv header")?.clone();
    let columns = Columns::locate(&headers);
    if columns.auth_key.is_none() && columns.customer_id.is_none() {
        tracing::warn!("csv header has neither auth key nor customer id column");
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row_number = index + 2;
        let row = match record {
            Ok(record) => classify(row_number, &columns, &record),
            Err(e) => {
                tracing::debug!(row_number, error = %e, "skipping malformed csv row");
                ImportRow::failed(row_number, &e.to_string())
            }
        };
        rows.push(row);
    }

    let extraction = Extraction::from_rows(rows);
    tracing::info!(
        total = extraction.stats.total,
        eligible = extraction.stats.eligible,
        skipped = extraction.stats.skipped,
        "classified legacy csv"
    );
    Ok(extraction)
}

fn classify(row_number: usize, columns: &Columns, record: &csv::StringRecord) -> ImportRow {
    let product_name = field(record, columns.product);
    let auth_key_raw = field(record, columns.auth_key);
    let customer_id = field(record, columns.customer_id);
    let phone_number = field(record, columns.phone);
    let status_raw = field(record, columns.status);

    let key_to_use = if auth_key_raw.is_empty() {
        customer_id.clone()
    } else {
        auth_key_raw.clone()
    };
    let status_mapped = TokenStatus::from_legacy(&status_raw);
    let is_eligible = product_name == TARGET_PRODUCT && !key_to_use.is_empty();

    let skip_reason = if is_eligible {
        None
    } else if key_to_use.is_empty() {
        Some("missing key".to_string())
    } else {
        Some(format!("wrong product name: \"{}\"", product_name))
    };

    ImportRow {
        row_number,
        product_name,
        auth_key_raw,
        customer_id,
        phone_number,
        status_raw,
        status_mapped,
        key_to_use,
        is_eligible,
        skip_reason,
    }
}
