//! Ledger models: snapshots, movements, lots and cost basis

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MovementReference, VariantKey};

/// Types of stock movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receive,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receive => "receive",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receive" => Some(MovementType::Receive),
            "adjustment" => Some(MovementType::Adjustment),
            "transfer_in" => Some(MovementType::TransferIn),
            "transfer_out" => Some(MovementType::TransferOut),
            _ => None,
        }
    }
}

/// Current-state counters for one (store, product, variant) triple.
///
/// The snapshot is a materialized cache of the movement log; `recompute`
/// rebuilds it from the log when drift is suspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub on_hand: i64,
    pub on_order: i64,
    /// Denormalized copy of the store policy, refreshed on every touch.
    pub allow_negative_stock: bool,
    pub updated_at: DateTime<Utc>,
}

/// One immutable ledger entry recording a quantity change and its cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub movement_type: MovementType,
    pub qty_delta: i64,
    #[serde(flatten)]
    pub reference: Option<MovementReference>,
    pub lot_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Expiry-lot sub-balance of a snapshot. `expiry_date = None` is itself a
/// valid lot key ("no expiry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLot {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub expiry_date: Option<NaiveDate>,
    pub on_hand_qty: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Weighted-average cost basis per (product, variant), updated only by
/// receipts that carry a unit cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCost {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: VariantKey,
    pub avg_unit_cost: Decimal,
    pub qty_basis: i64,
    pub updated_at: DateTime<Utc>,
}

/// Moving-average cost after receiving `qty_received` units at `unit_cost`.
///
/// A non-positive combined quantity basis falls back to the incoming unit
/// cost (a receipt into empty or negative stock re-bases the average).
pub fn moving_average(
    old_avg: Decimal,
    old_qty: i64,
    unit_cost: Decimal,
    qty_received: i64,
) -> Decimal {
    let new_qty = old_qty + qty_received;
    if old_qty <= 0 || new_qty <= 0 {
        return unit_cost;
    }
    let total = old_avg * Decimal::from(old_qty) + unit_cost * Decimal::from(qty_received);
    total / Decimal::from(new_qty)
}
