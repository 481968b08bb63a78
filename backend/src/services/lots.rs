//! Stock lot tracking
//!
//! Secondary ledger for stores that track expiry lots. Every mirrored
//! movement is tied to exactly one lot; there is no cross-lot allocation,
//! so consumption-side adjustments must name the expiry (or the explicit
//! no-expiry lot) they operate against.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{check_stock_level, StockLot, VariantKey};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::ledger::StorePolicy;

/// Lot service for expiry-aware stores
#[derive(Clone)]
pub struct LotService {
    db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct LotRow {
    id: Uuid,
    organization_id: Uuid,
    store_id: Uuid,
    product_id: Uuid,
    variant_key: String,
    expiry_date: Option<NaiveDate>,
    on_hand_qty: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LotRow> for StockLot {
    fn from(row: LotRow) -> Self {
        StockLot {
            id: row.id,
            organization_id: row.organization_id,
            store_id: row.store_id,
            product_id: row.product_id,
            variant_key: VariantKey::from(row.variant_key),
            expiry_date: row.expiry_date,
            on_hand_qty: row.on_hand_qty,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl LotService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Lots for one (store, product), soonest expiry first.
    pub async fn list_lots(
        &self,
        user: &AuthUser,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: Option<VariantKey>,
    ) -> AppResult<Vec<StockLot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT id, organization_id, store_id, product_id, variant_key,
                   expiry_date, on_hand_qty, created_at, updated_at
            FROM stock_lots
            WHERE organization_id = $1 AND store_id = $2 AND product_id = $3
              AND ($4::TEXT IS NULL OR variant_key = $4)
            ORDER BY expiry_date ASC NULLS LAST, created_at ASC
            "#,
        )
        .bind(user.organization_id)
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.map(|k| k.as_str().to_string()))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockLot::from).collect())
    }

    /// Mirror an on-hand delta into the matching lot balance.
    ///
    /// Returns the lot id that absorbed the delta, or `None` when the store
    /// does not track expiry lots. A lot is only ever created by a positive
    /// delta; decrements must match an existing lot.
    pub async fn apply_lot_adjustment(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        policy: &StorePolicy,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: &VariantKey,
        qty_delta: i64,
        expiry_date: Option<NaiveDate>,
    ) -> AppResult<Option<Uuid>> {
        if !policy.track_expiry_lots || qty_delta == 0 {
            return Ok(None);
        }

        let existing: Option<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT id, on_hand_qty FROM stock_lots
            WHERE store_id = $1 AND product_id = $2 AND variant_key = $3
              AND expiry_date IS NOT DISTINCT FROM $4
            FOR UPDATE
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .bind(expiry_date)
        .fetch_optional(&mut **tx)
        .await?;

        match existing {
            Some((lot_id, on_hand_qty)) => {
                let next = on_hand_qty + qty_delta;
                check_stock_level(next, policy.allow_negative_stock)?;
                sqlx::query(
                    "UPDATE stock_lots SET on_hand_qty = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(next)
                .bind(lot_id)
                .execute(&mut **tx)
                .await?;
                Ok(Some(lot_id))
            }
            None => {
                if qty_delta < 0 {
                    return Err(AppError::NotFound("Stock lot".to_string()));
                }
                let lot_id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO stock_lots (
                        organization_id, store_id, product_id, variant_key,
                        expiry_date, on_hand_qty
                    )
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(organization_id)
                .bind(store_id)
                .bind(product_id)
                .bind(variant_key.as_str())
                .bind(expiry_date)
                .bind(qty_delta)
                .fetch_one(&mut **tx)
                .await?;
                Ok(Some(lot_id))
            }
        }
    }
}
