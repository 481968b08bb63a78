//! Catalog models: products, variants, packs and units of measure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of measure. Every ledger quantity is stored in the product's base
/// unit; other units exist for display and for pack definitions only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    pub base_unit_id: Uuid,
    /// On-hand at or below this level triggers a low-stock event.
    pub low_stock_threshold: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub organization_id: Uuid,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub name: String,
    pub is_active: bool,
}

/// A purchasable/receivable pack of a product: a named integer multiple of
/// the base unit (e.g. "case of 12").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPack {
    pub id: Uuid,
    pub product_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub multiplier: i64,
    pub allow_in_purchasing: bool,
    pub allow_in_receiving: bool,
    pub is_active: bool,
}
