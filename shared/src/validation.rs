//! Pure validation and resolution logic for ledger quantities
//!
//! The backend services load catalog and policy rows, then delegate the
//! actual decisions to these functions so they stay testable without a
//! database.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ProductPack;
use crate::types::OperationMode;

/// Minimum accepted idempotency key length.
pub const MIN_IDEMPOTENCY_KEY_LEN: usize = 16;

pub fn validate_idempotency_key(key: &str) -> Result<(), &'static str> {
    if key.trim().len() < MIN_IDEMPOTENCY_KEY_LEN {
        return Err("idempotency key is too short");
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("pack belongs to a different product")]
    PackMismatch,
    #[error("pack is not allowed for {0} operations")]
    PackNotAllowed(&'static str),
    #[error("unit does not match the product's base unit")]
    UnitMismatch,
    #[error("quantity does not resolve to a whole base-unit amount")]
    InvalidQuantity,
}

/// Convert a caller-supplied quantity into base units.
///
/// With a pack: the pack must belong to `product_id` and be enabled for the
/// operation mode; the quantity is multiplied by the pack's integer
/// multiplier. With a `unit_id` differing from the base unit the resolution
/// fails (multi-unit conversion beyond packs is unsupported). The result
/// must be a whole number representable as i64.
pub fn resolve_base_quantity(
    product_id: Uuid,
    base_unit_id: Uuid,
    qty: Decimal,
    unit_id: Option<Uuid>,
    pack: Option<&ProductPack>,
    mode: OperationMode,
) -> Result<i64, ResolveError> {
    if let Some(unit_id) = unit_id {
        if unit_id != base_unit_id {
            return Err(ResolveError::UnitMismatch);
        }
    }

    let resolved = match pack {
        Some(pack) => {
            if pack.product_id != product_id {
                return Err(ResolveError::PackMismatch);
            }
            let allowed = match mode {
                OperationMode::Purchasing => pack.allow_in_purchasing,
                OperationMode::Receiving => pack.allow_in_receiving,
                // Packs carry no inventory flag; any active pack of the
                // product may express an inventory quantity.
                OperationMode::Inventory => true,
            };
            if !allowed {
                return Err(ResolveError::PackNotAllowed(mode.as_str()));
            }
            qty * Decimal::from(pack.multiplier)
        }
        None => qty,
    };

    decimal_to_base_units(resolved)
}

fn decimal_to_base_units(value: Decimal) -> Result<i64, ResolveError> {
    let normalized = value.normalize();
    if normalized.fract() != Decimal::ZERO {
        return Err(ResolveError::InvalidQuantity);
    }
    normalized.to_i64().ok_or(ResolveError::InvalidQuantity)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient stock: would leave {next_on_hand}")]
pub struct InsufficientStock {
    pub next_on_hand: i64,
}

/// The negative-stock guard shared by snapshots and lots.
pub fn check_stock_level(next_on_hand: i64, allow_negative: bool) -> Result<(), InsufficientStock> {
    if next_on_hand < 0 && !allow_negative {
        return Err(InsufficientStock { next_on_hand });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn pack(product_id: Uuid, multiplier: i64, purchasing: bool, receiving: bool) -> ProductPack {
        ProductPack {
            id: Uuid::new_v4(),
            product_id,
            organization_id: Uuid::new_v4(),
            name: "case".to_string(),
            multiplier,
            allow_in_purchasing: purchasing,
            allow_in_receiving: receiving,
            is_active: true,
        }
    }

    #[test]
    fn resolves_plain_base_quantity() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let qty =
            resolve_base_quantity(product, unit, dec("40"), None, None, OperationMode::Inventory)
                .unwrap();
        assert_eq!(qty, 40);
    }

    #[test]
    fn resolves_pack_multiplier() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let p = pack(product, 12, true, true);
        let qty = resolve_base_quantity(
            product,
            unit,
            dec("2.5"),
            None,
            Some(&p),
            OperationMode::Receiving,
        )
        .unwrap();
        assert_eq!(qty, 30);
    }

    #[test]
    fn rejects_pack_of_other_product() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let p = pack(Uuid::new_v4(), 12, true, true);
        assert_eq!(
            resolve_base_quantity(
                product,
                unit,
                dec("1"),
                None,
                Some(&p),
                OperationMode::Receiving
            ),
            Err(ResolveError::PackMismatch)
        );
    }

    #[test]
    fn rejects_pack_disabled_for_mode() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let p = pack(product, 6, true, false);
        assert_eq!(
            resolve_base_quantity(
                product,
                unit,
                dec("1"),
                None,
                Some(&p),
                OperationMode::Receiving
            ),
            Err(ResolveError::PackNotAllowed("receiving"))
        );
        // Same pack is fine for purchasing.
        assert!(resolve_base_quantity(
            product,
            unit,
            dec("1"),
            None,
            Some(&p),
            OperationMode::Purchasing
        )
        .is_ok());
    }

    #[test]
    fn rejects_foreign_unit() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(
                product,
                unit,
                dec("1"),
                Some(Uuid::new_v4()),
                None,
                OperationMode::Inventory
            ),
            Err(ResolveError::UnitMismatch)
        );
    }

    #[test]
    fn base_unit_id_itself_is_accepted() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(
                product,
                unit,
                dec("7"),
                Some(unit),
                None,
                OperationMode::Inventory
            ),
            Ok(7)
        );
    }

    #[test]
    fn rejects_fractional_result() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let p = pack(product, 12, true, true);
        assert_eq!(
            resolve_base_quantity(
                product,
                unit,
                dec("0.3"),
                None,
                Some(&p),
                OperationMode::Purchasing
            ),
            Err(ResolveError::InvalidQuantity)
        );
    }

    #[test]
    fn negative_quantities_resolve_for_adjustments() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        assert_eq!(
            resolve_base_quantity(product, unit, dec("-3"), None, None, OperationMode::Inventory),
            Ok(-3)
        );
    }

    #[test]
    fn stock_level_guard_respects_policy() {
        assert!(check_stock_level(0, false).is_ok());
        assert!(check_stock_level(5, false).is_ok());
        assert_eq!(
            check_stock_level(-1, false),
            Err(InsufficientStock { next_on_hand: -1 })
        );
        assert!(check_stock_level(-1, true).is_ok());
    }

    #[test]
    fn idempotency_key_minimum_length() {
        assert!(validate_idempotency_key("0123456789abcdef").is_ok());
        assert!(validate_idempotency_key("short").is_err());
        assert!(validate_idempotency_key("                    ").is_err());
    }
}
