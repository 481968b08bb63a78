//! Stock count models and scan resolution

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::VariantKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockCountStatus {
    Draft,
    InProgress,
    Applied,
    Cancelled,
}

impl StockCountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockCountStatus::Draft => "draft",
            StockCountStatus::InProgress => "in_progress",
            StockCountStatus::Applied => "applied",
            StockCountStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(StockCountStatus::Draft),
            "in_progress" => Some(StockCountStatus::InProgress),
            "applied" => Some(StockCountStatus::Applied),
            "cancelled" => Some(StockCountStatus::Cancelled),
            _ => None,
        }
    }

    /// Applied and cancelled counts lock all lines.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StockCountStatus::Applied | StockCountStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub status: StockCountStatus,
    pub code: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One counted (product, variant) pair within a count.
///
/// `expected_on_hand` is snapshotted from the live ledger on first touch;
/// apply re-reads it to absorb drift between scan and apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCountLine {
    pub id: Uuid,
    pub stock_count_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub expected_on_hand: i64,
    pub counted_qty: i64,
    pub delta_qty: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCountWithLines {
    #[serde(flatten)]
    pub count: StockCount,
    pub lines: Vec<StockCountLine>,
}

pub fn count_delta(counted_qty: i64, expected_on_hand: i64) -> i64 {
    counted_qty - expected_on_hand
}

/// How a scan or manual edit changes a line's counted quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountUpdate {
    /// Add to the current counted quantity (a scan defaults to +1).
    Increment(i64),
    /// Set the counted quantity outright.
    Set(i64),
}

impl CountUpdate {
    pub fn apply(&self, current: i64) -> i64 {
        match self {
            CountUpdate::Increment(delta) => current + delta,
            CountUpdate::Set(value) => *value,
        }
    }
}

/// Human-readable count code: date prefix plus a short random suffix.
pub fn build_count_code(date: NaiveDate, suffix: &str) -> String {
    format!("SC-{}-{}", date.format("%Y%m%d"), suffix.to_uppercase())
}

/// Where a scan value matched in the catalog, in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    ProductBarcode,
    VariantBarcode,
    ProductSku,
    VariantSku,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub source: ScanSource,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("scanned value matched nothing")]
    NotFound,
    #[error("scanned value is ambiguous across {0} matches")]
    Ambiguous(usize),
}

/// Pick the single catalog match for a scanned value.
///
/// Barcodes outrank SKUs; within the best-ranked source the match must be
/// unique, otherwise the scan is ambiguous and the operator has to pick
/// manually.
pub fn resolve_scan(matches: Vec<ScanMatch>) -> Result<ScanMatch, ScanError> {
    let best = matches.iter().map(|m| m.source).min().ok_or(ScanError::NotFound)?;
    let mut at_best: Vec<ScanMatch> = matches.into_iter().filter(|m| m.source == best).collect();
    match at_best.len() {
        1 => Ok(at_best.remove(0)),
        n => Err(ScanError::Ambiguous(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_lock_lines() {
        assert!(StockCountStatus::Applied.is_terminal());
        assert!(StockCountStatus::Cancelled.is_terminal());
        assert!(!StockCountStatus::Draft.is_terminal());
        assert!(!StockCountStatus::InProgress.is_terminal());
    }

    #[test]
    fn count_update_increments_and_sets() {
        assert_eq!(CountUpdate::Increment(1).apply(46), 47);
        assert_eq!(CountUpdate::Increment(-2).apply(10), 8);
        assert_eq!(CountUpdate::Set(47).apply(3), 47);
    }

    #[test]
    fn count_code_has_date_prefix() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(build_count_code(date, "a1b2"), "SC-20240305-A1B2");
    }

    #[test]
    fn scan_prefers_barcode_over_sku() {
        let product = Uuid::new_v4();
        let matches = vec![
            ScanMatch {
                product_id: product,
                variant_key: VariantKey::base(),
                source: ScanSource::ProductSku,
            },
            ScanMatch {
                product_id: product,
                variant_key: VariantKey::variant(Uuid::new_v4()),
                source: ScanSource::VariantBarcode,
            },
        ];
        let hit = resolve_scan(matches).unwrap();
        assert_eq!(hit.source, ScanSource::VariantBarcode);
    }

    #[test]
    fn scan_ambiguous_across_variants_fails() {
        let product = Uuid::new_v4();
        let matches = vec![
            ScanMatch {
                product_id: product,
                variant_key: VariantKey::variant(Uuid::new_v4()),
                source: ScanSource::VariantSku,
            },
            ScanMatch {
                product_id: product,
                variant_key: VariantKey::variant(Uuid::new_v4()),
                source: ScanSource::VariantSku,
            },
        ];
        assert_eq!(resolve_scan(matches), Err(ScanError::Ambiguous(2)));
    }

    #[test]
    fn scan_with_no_matches_is_not_found() {
        assert_eq!(resolve_scan(vec![]), Err(ScanError::NotFound));
    }
}
