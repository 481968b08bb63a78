//! Stock count workflow tests
//!
//! Variance computation, scan-update semantics, scan disambiguation and
//! count-code allocation.

use chrono::NaiveDate;
use proptest::prelude::*;
use uuid::Uuid;

use retail_ops_backend::error::AppError;
use shared::{
    build_count_code, count_delta, resolve_scan, CountUpdate, ScanError, ScanMatch, ScanSource,
    StockCountStatus, VariantKey,
};

fn scan_match(product_id: Uuid, variant: Option<Uuid>, source: ScanSource) -> ScanMatch {
    ScanMatch {
        product_id,
        variant_key: VariantKey::from_option(variant),
        source,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Concrete scenario: 50 expected, three short after counting.
    #[test]
    fn three_short_yields_minus_three() {
        let expected_on_hand = 50i64;
        let mut counted = 0i64;
        for _ in 0..47 {
            counted = CountUpdate::Increment(1).apply(counted);
        }
        assert_eq!(counted, 47);
        assert_eq!(count_delta(counted, expected_on_hand), -3);
    }

    #[test]
    fn set_mode_overrides_previous_scans() {
        let counted = CountUpdate::Increment(1).apply(12);
        assert_eq!(counted, 13);
        let counted = CountUpdate::Set(47).apply(counted);
        assert_eq!(counted, 47);
    }

    #[test]
    fn matching_count_means_zero_delta() {
        assert_eq!(count_delta(50, 50), 0);
    }

    #[test]
    fn surplus_yields_positive_delta() {
        assert_eq!(count_delta(55, 50), 5);
    }

    #[test]
    fn count_statuses_round_trip() {
        for status in [
            StockCountStatus::Draft,
            StockCountStatus::InProgress,
            StockCountStatus::Applied,
            StockCountStatus::Cancelled,
        ] {
            assert_eq!(StockCountStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(StockCountStatus::from_str("open"), None);
    }

    #[test]
    fn terminal_count_statuses_lock_lines() {
        assert!(StockCountStatus::Applied.is_terminal());
        assert!(StockCountStatus::Cancelled.is_terminal());
        assert!(!StockCountStatus::InProgress.is_terminal());
    }

    #[test]
    fn count_code_is_date_prefixed_and_uppercased() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 30).unwrap();
        assert_eq!(build_count_code(date, "7f3a"), "SC-20241130-7F3A");
    }

    #[test]
    fn barcode_match_beats_sku_match() {
        let barcode_product = Uuid::new_v4();
        let sku_product = Uuid::new_v4();
        let hit = resolve_scan(vec![
            scan_match(sku_product, None, ScanSource::ProductSku),
            scan_match(barcode_product, None, ScanSource::ProductBarcode),
        ])
        .unwrap();
        assert_eq!(hit.product_id, barcode_product);
    }

    #[test]
    fn product_barcode_beats_variant_barcode() {
        let product = Uuid::new_v4();
        let hit = resolve_scan(vec![
            scan_match(product, Some(Uuid::new_v4()), ScanSource::VariantBarcode),
            scan_match(product, None, ScanSource::ProductBarcode),
        ])
        .unwrap();
        assert!(hit.variant_key.is_base());
    }

    #[test]
    fn same_sku_on_two_active_variants_is_ambiguous() {
        let err = resolve_scan(vec![
            scan_match(Uuid::new_v4(), Some(Uuid::new_v4()), ScanSource::VariantSku),
            scan_match(Uuid::new_v4(), Some(Uuid::new_v4()), ScanSource::VariantSku),
        ])
        .unwrap_err();
        assert_eq!(err, ScanError::Ambiguous(2));
        assert_eq!(AppError::from(err).code(), "SCAN_AMBIGUOUS");
    }

    #[test]
    fn unmatched_scan_is_not_found() {
        let err = resolve_scan(vec![]).unwrap_err();
        assert_eq!(err, ScanError::NotFound);
        assert_eq!(AppError::from(err).code(), "NOT_FOUND");
    }

    #[test]
    fn ambiguity_below_the_best_rank_does_not_matter() {
        // Two SKU matches are irrelevant when a single barcode match exists.
        let product = Uuid::new_v4();
        let hit = resolve_scan(vec![
            scan_match(product, None, ScanSource::ProductBarcode),
            scan_match(Uuid::new_v4(), Some(Uuid::new_v4()), ScanSource::VariantSku),
            scan_match(Uuid::new_v4(), Some(Uuid::new_v4()), ScanSource::VariantSku),
        ])
        .unwrap();
        assert_eq!(hit.product_id, product);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Scanning n times with +1 counts to n, and the variance is always
    /// counted minus expected.
    #[test]
    fn increments_accumulate_and_delta_is_exact(n in 0i64..200, expected in 0i64..200) {
        let mut counted = 0i64;
        for _ in 0..n {
            counted = CountUpdate::Increment(1).apply(counted);
        }
        prop_assert_eq!(counted, n);
        prop_assert_eq!(count_delta(counted, expected), n - expected);
    }

    /// Set always wins over any prior increments.
    #[test]
    fn set_is_idempotent_over_history(history in prop::collection::vec(-5i64..5, 0..20), target in 0i64..500) {
        let mut counted = 0i64;
        for delta in history {
            counted = CountUpdate::Increment(delta).apply(counted);
        }
        prop_assert_eq!(CountUpdate::Set(target).apply(counted), target);
    }

    /// Count codes always carry the expected shape.
    #[test]
    fn count_codes_have_the_expected_shape(y in 2020i32..2100, m in 1u32..13, d in 1u32..29, suffix in "[a-f0-9]{4}") {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let code = build_count_code(date, &suffix);
        prop_assert!(code.starts_with("SC-"));
        prop_assert_eq!(code.len(), "SC-".len() + 8 + 1 + 4);
        prop_assert_eq!(code.clone(), code.to_uppercase());
    }
}
