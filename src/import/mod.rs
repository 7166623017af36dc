//! Bulk import of legacy contract exports.
//!
//! `extract` builds a side-effect free preview of an upload; `reconcile`
//! applies the eligible rows to the token and user tables.

pub mod decode;
pub mod extract;
pub mod reconcile;

pub use decode::decode_legacy_csv;
pub use extract::{extract, Extraction, ExtractionStats, ImportRow, TARGET_PRODUCT};
pub use reconcile::{reconcile, ImportRecord, ReconcileSummary, RecordError};
