//! Store and supplier models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical or logical store holding stock.
///
/// `allow_negative_stock` and `track_expiry_lots` are the two policy flags
/// the ledger consults on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub allow_negative_stock: bool,
    pub track_expiry_lots: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A supplier purchase orders are raised against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
