//! Unit resolver tests
//!
//! Covers pack multiplier resolution, per-mode pack gating, unit mismatch
//! rejection and whole-number enforcement.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use shared::{resolve_base_quantity, OperationMode, ProductPack, ResolveError};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn pack_for(product_id: Uuid, multiplier: i64) -> ProductPack {
    ProductPack {
        id: Uuid::new_v4(),
        product_id,
        organization_id: Uuid::new_v4(),
        name: "case".to_string(),
        multiplier,
        allow_in_purchasing: true,
        allow_in_receiving: true,
        is_active: true,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn plain_quantity_passes_through() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let qty = resolve_base_quantity(
            product,
            base_unit,
            dec("40"),
            None,
            None,
            OperationMode::Inventory,
        )
        .unwrap();
        assert_eq!(qty, 40);
    }

    #[test]
    fn pack_multiplies_into_base_units() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let pack = pack_for(product, 12);
        let qty = resolve_base_quantity(
            product,
            base_unit,
            dec("3"),
            None,
            Some(&pack),
            OperationMode::Purchasing,
        )
        .unwrap();
        assert_eq!(qty, 36);
    }

    #[test]
    fn fractional_pack_count_resolving_to_whole_units_is_fine() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let pack = pack_for(product, 12);
        // 2.5 cases of 12 = 30 units
        let qty = resolve_base_quantity(
            product,
            base_unit,
            dec("2.5"),
            None,
            Some(&pack),
            OperationMode::Receiving,
        )
        .unwrap();
        assert_eq!(qty, 30);
    }

    #[test]
    fn fractional_result_is_rejected() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let pack = pack_for(product, 12);
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("0.25"),
                None,
                Some(&pack),
                OperationMode::Receiving,
            ),
            Err(ResolveError::InvalidQuantity)
        );
    }

    #[test]
    fn fractional_bare_quantity_is_rejected() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("1.5"),
                None,
                None,
                OperationMode::Inventory,
            ),
            Err(ResolveError::InvalidQuantity)
        );
    }

    #[test]
    fn pack_of_another_product_is_rejected() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let pack = pack_for(Uuid::new_v4(), 6);
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("1"),
                None,
                Some(&pack),
                OperationMode::Purchasing,
            ),
            Err(ResolveError::PackMismatch)
        );
    }

    #[test]
    fn pack_disabled_for_purchasing_fails_only_there() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let mut pack = pack_for(product, 6);
        pack.allow_in_purchasing = false;

        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("1"),
                None,
                Some(&pack),
                OperationMode::Purchasing,
            ),
            Err(ResolveError::PackNotAllowed("purchasing"))
        );
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("1"),
                None,
                Some(&pack),
                OperationMode::Receiving,
            ),
            Ok(6)
        );
    }

    #[test]
    fn inventory_mode_accepts_any_pack_of_the_product() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let mut pack = pack_for(product, 6);
        pack.allow_in_purchasing = false;
        pack.allow_in_receiving = false;

        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("2"),
                None,
                Some(&pack),
                OperationMode::Inventory,
            ),
            Ok(12)
        );
    }

    #[test]
    fn non_base_unit_is_a_mismatch() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("5"),
                Some(Uuid::new_v4()),
                None,
                OperationMode::Purchasing,
            ),
            Err(ResolveError::UnitMismatch)
        );
    }

    #[test]
    fn explicit_base_unit_is_accepted() {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(
                product,
                base_unit,
                dec("5"),
                Some(base_unit),
                None,
                OperationMode::Purchasing,
            ),
            Ok(5)
        );
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Whole pack counts always resolve to count * multiplier.
    #[test]
    fn whole_pack_counts_always_resolve(count in 1i64..10_000, multiplier in 1i64..10_000) {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let pack = pack_for(product, multiplier);
        let qty = resolve_base_quantity(
            product,
            base_unit,
            Decimal::from(count),
            None,
            Some(&pack),
            OperationMode::Receiving,
        ).unwrap();
        prop_assert_eq!(qty, count * multiplier);
    }

    /// Whole bare quantities round-trip unchanged, any sign.
    #[test]
    fn whole_bare_quantities_round_trip(qty in -1_000_000i64..1_000_000) {
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        let resolved = resolve_base_quantity(
            product,
            base_unit,
            Decimal::from(qty),
            None,
            None,
            OperationMode::Inventory,
        ).unwrap();
        prop_assert_eq!(resolved, qty);
    }

    /// A quantity with a genuine fractional part never resolves bare.
    #[test]
    fn fractional_bare_quantities_never_resolve(whole in 0i64..1000, frac in 1i64..100) {
        let value = Decimal::from(whole) + Decimal::new(frac, 2);
        let product = Uuid::new_v4();
        let base_unit = Uuid::new_v4();
        prop_assert_eq!(
            resolve_base_quantity(product, base_unit, value, None, None, OperationMode::Inventory),
            Err(ResolveError::InvalidQuantity)
        );
    }
}
