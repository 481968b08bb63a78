//! Common types used across the platform

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator addressing one row within a product's snapshot, lot and
/// cost tables: either the bare product ("BASE") or a specific variant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantKey(String);

impl VariantKey {
    pub const BASE: &'static str = "BASE";

    pub fn base() -> Self {
        Self(Self::BASE.to_string())
    }

    pub fn variant(variant_id: Uuid) -> Self {
        Self(variant_id.to_string())
    }

    /// Build from an optional variant id, as the API surfaces it.
    pub fn from_option(variant_id: Option<Uuid>) -> Self {
        match variant_id {
            Some(id) => Self::variant(id),
            None => Self::base(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.0 == Self::BASE
    }

    /// The variant id, if this key addresses a variant row.
    pub fn variant_id(&self) -> Option<Uuid> {
        if self.is_base() {
            None
        } else {
            Uuid::parse_str(&self.0).ok()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VariantKey {
    fn default() -> Self {
        Self::base()
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VariantKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Operation mode a quantity is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Purchasing,
    Receiving,
    Inventory,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Purchasing => "purchasing",
            OperationMode::Receiving => "receiving",
            OperationMode::Inventory => "inventory",
        }
    }
}

/// What a stock movement points back at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    PurchaseOrder,
    StockCount,
    Transfer,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::PurchaseOrder => "purchase_order",
            ReferenceType::StockCount => "stock_count",
            ReferenceType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase_order" => Some(ReferenceType::PurchaseOrder),
            "stock_count" => Some(ReferenceType::StockCount),
            "transfer" => Some(ReferenceType::Transfer),
            _ => None,
        }
    }
}

/// Reference carried by a movement (e.g. the purchase order or stock count
/// that caused it, or the shared id linking two transfer legs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
}

impl MovementReference {
    pub fn new(reference_type: ReferenceType, reference_id: Uuid) -> Self {
        Self {
            reference_type,
            reference_id,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_key_base_roundtrip() {
        let key = VariantKey::from_option(None);
        assert!(key.is_base());
        assert_eq!(key.as_str(), "BASE");
        assert_eq!(key.variant_id(), None);
    }

    #[test]
    fn variant_key_wraps_variant_id() {
        let id = Uuid::new_v4();
        let key = VariantKey::from_option(Some(id));
        assert!(!key.is_base());
        assert_eq!(key.variant_id(), Some(id));
    }

    #[test]
    fn pagination_offset_is_zero_based() {
        let p = Pagination {
            page: 3,
            per_page: 20,
        };
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }
}
