//! Stock ledger service
//!
//! Single owner of snapshot and movement writes. Every mutation locks the
//! snapshot row for its (store, product, variant) triple for the full
//! read-modify-write, so concurrent movements on the same triple serialize
//! strictly and unrelated triples never contend. The purchasing and
//! stock-count workflows call through the primitives here instead of
//! touching snapshot or movement rows themselves.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use shared::{
    check_stock_level, moving_average, InventorySnapshot, MovementReference, MovementType,
    OperationMode, Pagination, ReferenceType, StockMovement, VariantKey,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::events::{EventPublisher, EVENT_LOW_STOCK, EVENT_MOVEMENT_APPLIED};
use crate::services::lots::LotService;
use crate::services::units::{ProductInfo, UnitService};
use crate::services::{audit, idempotency};

pub const ROUTE_ADJUST: &str = "inventory.adjust";
pub const ROUTE_RECEIVE: &str = "inventory.receive";
pub const ROUTE_TRANSFER: &str = "inventory.transfer";

/// Stock ledger service
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
    events: EventPublisher,
}

/// Store policy flags consulted on every ledger touch.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    pub allow_negative_stock: bool,
    pub track_expiry_lots: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SnapshotRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: String,
    pub on_hand: i64,
    pub on_order: i64,
    pub allow_negative_stock: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<SnapshotRow> for InventorySnapshot {
    fn from(row: SnapshotRow) -> Self {
        InventorySnapshot {
            id: row.id,
            organization_id: row.organization_id,
            store_id: row.store_id,
            product_id: row.product_id,
            variant_key: VariantKey::from(row.variant_key),
            on_hand: row.on_hand,
            on_order: row.on_order,
            allow_negative_stock: row.allow_negative_stock,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: Uuid,
    organization_id: Uuid,
    store_id: Uuid,
    product_id: Uuid,
    variant_key: String,
    movement_type: String,
    qty_delta: i64,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    lot_id: Option<Uuid>,
    note: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

fn movement_from_row(row: MovementRow) -> AppResult<StockMovement> {
    let movement_type = MovementType::from_str(&row.movement_type)
        .ok_or_else(|| AppError::Internal(format!("unknown movement type {}", row.movement_type)))?;
    let reference = match (row.reference_type.as_deref(), row.reference_id) {
        (Some(t), Some(id)) => ReferenceType::from_str(t).map(|t| MovementReference::new(t, id)),
        _ => None,
    };
    Ok(StockMovement {
        id: row.id,
        organization_id: row.organization_id,
        store_id: row.store_id,
        product_id: row.product_id,
        variant_key: VariantKey::from(row.variant_key),
        movement_type,
        qty_delta: row.qty_delta,
        reference,
        lot_id: row.lot_id,
        note: row.note,
        created_by: row.created_by,
        created_at: row.created_at,
    })
}

/// Arguments for one movement application.
pub(crate) struct MovementArgs<'a> {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_key: &'a VariantKey,
    pub movement_type: MovementType,
    pub qty_delta: i64,
    pub reference: Option<MovementReference>,
    pub note: Option<&'a str>,
}

/// A movement applied inside an open transaction.
pub(crate) struct AppliedMovement {
    pub snapshot: InventorySnapshot,
    pub movement_id: Uuid,
    pub prev_on_hand: i64,
}

/// Input for a stock adjustment
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockInput {
    #[validate(length(min = 16, message = "idempotency key must be at least 16 characters"))]
    pub idempotency_key: String,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Input for receiving stock outside a purchase order
#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveStockInput {
    #[validate(length(min = 16, message = "idempotency key must be at least 16 characters"))]
    pub idempotency_key: String,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Input for a store-to-store transfer
#[derive(Debug, Deserialize, Validate)]
pub struct TransferStockInput {
    #[validate(length(min = 16, message = "idempotency key must be at least 16 characters"))]
    pub idempotency_key: String,
    pub from_store_id: Uuid,
    pub to_store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Result of a single-movement mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementOutcome {
    pub snapshot: InventorySnapshot,
    pub movement_id: Uuid,
    pub lot_id: Option<Uuid>,
}

/// Result of a transfer: two movements under one shared reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer_id: Uuid,
    pub outgoing: MovementOutcome,
    pub incoming: MovementOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecomputeOutcome {
    pub store_id: Uuid,
    pub snapshots_recomputed: u64,
}

impl LedgerService {
    pub fn new(db: PgPool, events: EventPublisher) -> Self {
        Self { db, events }
    }

    /// Apply a manual stock adjustment. Idempotency-guarded.
    pub async fn adjust(&self, user: &AuthUser, input: AdjustStockInput) -> AppResult<MovementOutcome> {
        input.validate()?;
        let units = UnitService::new(self.db.clone());
        let product = units
            .load_product(user.organization_id, input.product_id)
            .await?;
        if let Some(variant_id) = input.variant_id {
            units
                .ensure_variant(user.organization_id, input.product_id, variant_id)
                .await?;
        }
        let qty_delta = units
            .resolve_quantity(
                user.organization_id,
                &product,
                input.quantity,
                input.unit_id,
                input.pack_id,
                OperationMode::Inventory,
            )
            .await?;
        if qty_delta == 0 {
            return Err(AppError::validation("quantity", "adjustment delta cannot be zero"));
        }
        let variant_key = VariantKey::from_option(input.variant_id);

        let mut tx = self.db.begin().await?;
        if let Some(prev) = idempotency::fetch_recorded::<MovementOutcome>(
            &mut tx,
            user.user_id,
            ROUTE_ADJUST,
            &input.idempotency_key,
        )
        .await?
        {
            tx.commit().await?;
            return Ok(prev);
        }

        let policy = Self::store_policy(&mut tx, user.organization_id, input.store_id).await?;
        let applied = Self::apply_movement(
            &mut tx,
            user.organization_id,
            Some(user.user_id),
            &policy,
            &MovementArgs {
                store_id: input.store_id,
                product_id: input.product_id,
                variant_key: &variant_key,
                movement_type: MovementType::Adjustment,
                qty_delta,
                reference: None,
                note: input.note.as_deref(),
            },
        )
        .await?;

        let lot_id = LotService::apply_lot_adjustment(
            &mut tx,
            user.organization_id,
            &policy,
            input.store_id,
            input.product_id,
            &variant_key,
            qty_delta,
            input.expiry_date,
        )
        .await?;
        if let Some(lot_id) = lot_id {
            Self::set_movement_lot(&mut tx, applied.movement_id, lot_id).await?;
        }

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "inventory.adjust",
            "inventory_snapshot",
            applied.snapshot.id,
            Some(serde_json::json!({ "on_hand": applied.prev_on_hand })),
            Some(serde_json::json!({ "on_hand": applied.snapshot.on_hand })),
            Some(&input.idempotency_key),
        )
        .await?;

        let outcome = MovementOutcome {
            snapshot: applied.snapshot,
            movement_id: applied.movement_id,
            lot_id,
        };
        idempotency::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            ROUTE_ADJUST,
            &input.idempotency_key,
            &outcome,
        )
        .await?;
        tx.commit().await?;

        self.publish_movement(&outcome, MovementType::Adjustment);
        self.check_low_stock(&product, &outcome.snapshot);
        Ok(outcome)
    }

    /// Receive stock, optionally updating the weighted-average cost basis.
    /// Idempotency-guarded.
    pub async fn receive(
        &self,
        user: &AuthUser,
        input: ReceiveStockInput,
    ) -> AppResult<MovementOutcome> {
        input.validate()?;
        let units = UnitService::new(self.db.clone());
        let product = units
            .load_product(user.organization_id, input.product_id)
            .await?;
        if let Some(variant_id) = input.variant_id {
            units
                .ensure_variant(user.organization_id, input.product_id, variant_id)
                .await?;
        }
        let qty_delta = units
            .resolve_quantity(
                user.organization_id,
                &product,
                input.quantity,
                input.unit_id,
                input.pack_id,
                OperationMode::Receiving,
            )
            .await?;
        if qty_delta <= 0 {
            return Err(AppError::validation("quantity", "receive quantity must be positive"));
        }
        let variant_key = VariantKey::from_option(input.variant_id);

        let mut tx = self.db.begin().await?;
        if let Some(prev) = idempotency::fetch_recorded::<MovementOutcome>(
            &mut tx,
            user.user_id,
            ROUTE_RECEIVE,
            &input.idempotency_key,
        )
        .await?
        {
            tx.commit().await?;
            return Ok(prev);
        }

        let policy = Self::store_policy(&mut tx, user.organization_id, input.store_id).await?;
        let applied = Self::apply_movement(
            &mut tx,
            user.organization_id,
            Some(user.user_id),
            &policy,
            &MovementArgs {
                store_id: input.store_id,
                product_id: input.product_id,
                variant_key: &variant_key,
                movement_type: MovementType::Receive,
                qty_delta,
                reference: None,
                note: input.note.as_deref(),
            },
        )
        .await?;

        let lot_id = LotService::apply_lot_adjustment(
            &mut tx,
            user.organization_id,
            &policy,
            input.store_id,
            input.product_id,
            &variant_key,
            qty_delta,
            input.expiry_date,
        )
        .await?;
        if let Some(lot_id) = lot_id {
            Self::set_movement_lot(&mut tx, applied.movement_id, lot_id).await?;
        }

        if let Some(unit_cost) = input.unit_cost {
            Self::update_cost_basis(
                &mut tx,
                user.organization_id,
                input.product_id,
                &variant_key,
                qty_delta,
                unit_cost,
            )
            .await?;
        }

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "inventory.receive",
            "inventory_snapshot",
            applied.snapshot.id,
            Some(serde_json::json!({ "on_hand": applied.prev_on_hand })),
            Some(serde_json::json!({ "on_hand": applied.snapshot.on_hand })),
            Some(&input.idempotency_key),
        )
        .await?;

        let outcome = MovementOutcome {
            snapshot: applied.snapshot,
            movement_id: applied.movement_id,
            lot_id,
        };
        idempotency::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            ROUTE_RECEIVE,
            &input.idempotency_key,
            &outcome,
        )
        .await?;
        tx.commit().await?;

        self.publish_movement(&outcome, MovementType::Receive);
        self.check_low_stock(&product, &outcome.snapshot);
        Ok(outcome)
    }

    /// Move stock between two stores of the same organization. Both legs
    /// commit together or not at all. Idempotency-guarded.
    pub async fn transfer(
        &self,
        user: &AuthUser,
        input: TransferStockInput,
    ) -> AppResult<TransferOutcome> {
        input.validate()?;
        if input.from_store_id == input.to_store_id {
            return Err(AppError::validation(
                "to_store_id",
                "source and destination stores must differ",
            ));
        }
        let units = UnitService::new(self.db.clone());
        let product = units
            .load_product(user.organization_id, input.product_id)
            .await?;
        if let Some(variant_id) = input.variant_id {
            units
                .ensure_variant(user.organization_id, input.product_id, variant_id)
                .await?;
        }
        let qty = units
            .resolve_quantity(
                user.organization_id,
                &product,
                input.quantity,
                input.unit_id,
                input.pack_id,
                OperationMode::Inventory,
            )
            .await?;
        if qty <= 0 {
            return Err(AppError::validation("quantity", "transfer quantity must be positive"));
        }
        let variant_key = VariantKey::from_option(input.variant_id);

        let mut tx = self.db.begin().await?;
        if let Some(prev) = idempotency::fetch_recorded::<TransferOutcome>(
            &mut tx,
            user.user_id,
            ROUTE_TRANSFER,
            &input.idempotency_key,
        )
        .await?
        {
            tx.commit().await?;
            return Ok(prev);
        }

        // Both store rows must resolve before either leg is applied.
        let from_policy =
            Self::store_policy(&mut tx, user.organization_id, input.from_store_id).await?;
        let to_policy = Self::store_policy(&mut tx, user.organization_id, input.to_store_id).await?;

        let transfer_id = Uuid::new_v4();
        let reference = MovementReference::new(ReferenceType::Transfer, transfer_id);

        let out_applied = Self::apply_movement(
            &mut tx,
            user.organization_id,
            Some(user.user_id),
            &from_policy,
            &MovementArgs {
                store_id: input.from_store_id,
                product_id: input.product_id,
                variant_key: &variant_key,
                movement_type: MovementType::TransferOut,
                qty_delta: -qty,
                reference: Some(reference),
                note: input.note.as_deref(),
            },
        )
        .await?;
        let in_applied = Self::apply_movement(
            &mut tx,
            user.organization_id,
            Some(user.user_id),
            &to_policy,
            &MovementArgs {
                store_id: input.to_store_id,
                product_id: input.product_id,
                variant_key: &variant_key,
                movement_type: MovementType::TransferIn,
                qty_delta: qty,
                reference: Some(reference),
                note: input.note.as_deref(),
            },
        )
        .await?;

        let out_lot = LotService::apply_lot_adjustment(
            &mut tx,
            user.organization_id,
            &from_policy,
            input.from_store_id,
            input.product_id,
            &variant_key,
            -qty,
            input.expiry_date,
        )
        .await?;
        if let Some(lot_id) = out_lot {
            Self::set_movement_lot(&mut tx, out_applied.movement_id, lot_id).await?;
        }
        let in_lot = LotService::apply_lot_adjustment(
            &mut tx,
            user.organization_id,
            &to_policy,
            input.to_store_id,
            input.product_id,
            &variant_key,
            qty,
            input.expiry_date,
        )
        .await?;
        if let Some(lot_id) = in_lot {
            Self::set_movement_lot(&mut tx, in_applied.movement_id, lot_id).await?;
        }

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "inventory.transfer",
            "stock_transfer",
            transfer_id,
            Some(serde_json::json!({
                "from_on_hand": out_applied.prev_on_hand,
                "to_on_hand": in_applied.prev_on_hand,
            })),
            Some(serde_json::json!({
                "from_on_hand": out_applied.snapshot.on_hand,
                "to_on_hand": in_applied.snapshot.on_hand,
            })),
            Some(&input.idempotency_key),
        )
        .await?;

        let outcome = TransferOutcome {
            transfer_id,
            outgoing: MovementOutcome {
                snapshot: out_applied.snapshot,
                movement_id: out_applied.movement_id,
                lot_id: out_lot,
            },
            incoming: MovementOutcome {
                snapshot: in_applied.snapshot,
                movement_id: in_applied.movement_id,
                lot_id: in_lot,
            },
        };
        idempotency::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            ROUTE_TRANSFER,
            &input.idempotency_key,
            &outcome,
        )
        .await?;
        tx.commit().await?;

        self.publish_movement(&outcome.outgoing, MovementType::TransferOut);
        self.publish_movement(&outcome.incoming, MovementType::TransferIn);
        self.check_low_stock(&product, &outcome.outgoing.snapshot);
        Ok(outcome)
    }

    /// Rebuild every snapshot in a store from the movement history plus
    /// open purchase-order remainders. Used for drift correction.
    pub async fn recompute(&self, user: &AuthUser, store_id: Uuid) -> AppResult<RecomputeOutcome> {
        let mut tx = self.db.begin().await?;
        let policy = Self::store_policy(&mut tx, user.organization_id, store_id).await?;

        let keys: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT product_id, variant_key FROM stock_movements
            WHERE organization_id = $1 AND store_id = $2
            UNION
            SELECT product_id, variant_key FROM inventory_snapshots
            WHERE organization_id = $1 AND store_id = $2
            "#,
        )
        .bind(user.organization_id)
        .bind(store_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut recomputed = 0u64;
        for (product_id, variant_key) in keys {
            let variant_key = VariantKey::from(variant_key);
            let row =
                Self::lock_snapshot(&mut tx, user.organization_id, &policy, store_id, product_id, &variant_key)
                    .await?;

            let on_hand: i64 = sqlx::query_scalar(
                r#"
                SELECT COALESCE(SUM(qty_delta), 0)::BIGINT FROM stock_movements
                WHERE store_id = $1 AND product_id = $2 AND variant_key = $3
                "#,
            )
            .bind(store_id)
            .bind(product_id)
            .bind(variant_key.as_str())
            .fetch_one(&mut *tx)
            .await?;

            let on_order: i64 = sqlx::query_scalar(
                r#"
                SELECT COALESCE(SUM(GREATEST(l.qty_ordered - l.qty_received, 0)), 0)::BIGINT
                FROM purchase_order_lines l
                JOIN purchase_orders o ON o.id = l.purchase_order_id
                WHERE o.store_id = $1 AND l.product_id = $2 AND l.variant_key = $3
                  AND o.status IN ('submitted', 'approved', 'partially_received')
                "#,
            )
            .bind(store_id)
            .bind(product_id)
            .bind(variant_key.as_str())
            .fetch_one(&mut *tx)
            .await?;

            check_stock_level(on_hand, policy.allow_negative_stock)?;

            sqlx::query(
                r#"
                UPDATE inventory_snapshots
                SET on_hand = $1, on_order = $2, allow_negative_stock = $3, updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(on_hand)
            .bind(on_order)
            .bind(policy.allow_negative_stock)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
            recomputed += 1;
        }

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "inventory.recompute",
            "store",
            store_id,
            None,
            Some(serde_json::json!({ "snapshots_recomputed": recomputed })),
            None,
        )
        .await?;
        tx.commit().await?;

        Ok(RecomputeOutcome {
            store_id,
            snapshots_recomputed: recomputed,
        })
    }

    /// Current snapshot for one (store, product, variant) triple.
    pub async fn get_snapshot(
        &self,
        user: &AuthUser,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: &VariantKey,
    ) -> AppResult<InventorySnapshot> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, organization_id, store_id, product_id, variant_key,
                   on_hand, on_order, allow_negative_stock, updated_at
            FROM inventory_snapshots
            WHERE organization_id = $1 AND store_id = $2 AND product_id = $3 AND variant_key = $4
            "#,
        )
        .bind(user.organization_id)
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inventory snapshot".to_string()))?;

        Ok(row.into())
    }

    /// Movement history for one (store, product) pair, newest first.
    pub async fn list_movements(
        &self,
        user: &AuthUser,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: Option<VariantKey>,
        pagination: Pagination,
    ) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, organization_id, store_id, product_id, variant_key, movement_type,
                   qty_delta, reference_type, reference_id, lot_id, note, created_by, created_at
            FROM stock_movements
            WHERE organization_id = $1 AND store_id = $2 AND product_id = $3
              AND ($4::TEXT IS NULL OR variant_key = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(user.organization_id)
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.map(|k| k.as_str().to_string()))
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(movement_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Primitives shared with the purchasing and stock-count workflows
    // ------------------------------------------------------------------

    /// Policy flags for a store, validating org membership.
    pub(crate) async fn store_policy(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        store_id: Uuid,
    ) -> AppResult<StorePolicy> {
        let row: Option<(bool, bool)> = sqlx::query_as(
            "SELECT allow_negative_stock, track_expiry_lots FROM stores WHERE id = $1 AND organization_id = $2",
        )
        .bind(store_id)
        .bind(organization_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|(allow_negative_stock, track_expiry_lots)| StorePolicy {
            allow_negative_stock,
            track_expiry_lots,
        })
        .ok_or_else(|| AppError::NotFound("Store".to_string()))
    }

    /// Lock the snapshot row for a triple, creating it on first touch.
    ///
    /// Unique-constraint races on the insert are benign: someone else
    /// created the row first and the SELECT below locks it.
    pub(crate) async fn lock_snapshot(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        policy: &StorePolicy,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: &VariantKey,
    ) -> AppResult<SnapshotRow> {
        sqlx::query(
            r#"
            INSERT INTO inventory_snapshots (
                organization_id, store_id, product_id, variant_key, allow_negative_stock
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (store_id, product_id, variant_key) DO NOTHING
            "#,
        )
        .bind(organization_id)
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .bind(policy.allow_negative_stock)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, organization_id, store_id, product_id, variant_key,
                   on_hand, on_order, allow_negative_stock, updated_at
            FROM inventory_snapshots
            WHERE store_id = $1 AND product_id = $2 AND variant_key = $3
            FOR UPDATE
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Apply one movement: lock, guard, update snapshot, append the log row.
    pub(crate) async fn apply_movement(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        actor: Option<Uuid>,
        policy: &StorePolicy,
        args: &MovementArgs<'_>,
    ) -> AppResult<AppliedMovement> {
        let row = Self::lock_snapshot(
            tx,
            organization_id,
            policy,
            args.store_id,
            args.product_id,
            args.variant_key,
        )
        .await?;

        let next_on_hand = row.on_hand + args.qty_delta;
        check_stock_level(next_on_hand, policy.allow_negative_stock)?;

        let updated = sqlx::query_as::<_, SnapshotRow>(
            r#"
            UPDATE inventory_snapshots
            SET on_hand = $1, allow_negative_stock = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, organization_id, store_id, product_id, variant_key,
                      on_hand, on_order, allow_negative_stock, updated_at
            "#,
        )
        .bind(next_on_hand)
        .bind(policy.allow_negative_stock)
        .bind(row.id)
        .fetch_one(&mut **tx)
        .await?;

        let movement_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO stock_movements (
                organization_id, store_id, product_id, variant_key, movement_type,
                qty_delta, reference_type, reference_id, note, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(organization_id)
        .bind(args.store_id)
        .bind(args.product_id)
        .bind(args.variant_key.as_str())
        .bind(args.movement_type.as_str())
        .bind(args.qty_delta)
        .bind(args.reference.map(|r| r.reference_type.as_str()))
        .bind(args.reference.map(|r| r.reference_id))
        .bind(args.note)
        .bind(actor)
        .fetch_one(&mut **tx)
        .await?;

        Ok(AppliedMovement {
            snapshot: updated.into(),
            movement_id,
            prev_on_hand: row.on_hand,
        })
    }

    /// Shift a snapshot's on-order counter. On-order never drops below zero.
    pub(crate) async fn adjust_on_order(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        policy: &StorePolicy,
        store_id: Uuid,
        product_id: Uuid,
        variant_key: &VariantKey,
        delta: i64,
    ) -> AppResult<()> {
        let row =
            Self::lock_snapshot(tx, organization_id, policy, store_id, product_id, variant_key)
                .await?;
        let next_on_order = (row.on_order + delta).max(0);

        sqlx::query(
            r#"
            UPDATE inventory_snapshots
            SET on_order = $1, allow_negative_stock = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(next_on_order)
        .bind(policy.allow_negative_stock)
        .bind(row.id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Fold a costed receipt into the weighted-average cost basis.
    pub(crate) async fn update_cost_basis(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        product_id: Uuid,
        variant_key: &VariantKey,
        qty_received: i64,
        unit_cost: Decimal,
    ) -> AppResult<Decimal> {
        let existing: Option<(Decimal, i64)> = sqlx::query_as(
            r#"
            SELECT avg_unit_cost, qty_basis FROM product_costs
            WHERE organization_id = $1 AND product_id = $2 AND variant_key = $3
            FOR UPDATE
            "#,
        )
        .bind(organization_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let (new_avg, new_basis) = match existing {
            Some((avg, basis)) => (
                moving_average(avg, basis, unit_cost, qty_received),
                basis.max(0) + qty_received,
            ),
            None => (unit_cost, qty_received),
        };

        sqlx::query(
            r#"
            INSERT INTO product_costs (organization_id, product_id, variant_key, avg_unit_cost, qty_basis)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (organization_id, product_id, variant_key)
            DO UPDATE SET avg_unit_cost = EXCLUDED.avg_unit_cost,
                          qty_basis = EXCLUDED.qty_basis,
                          updated_at = NOW()
            "#,
        )
        .bind(organization_id)
        .bind(product_id)
        .bind(variant_key.as_str())
        .bind(new_avg)
        .bind(new_basis)
        .execute(&mut **tx)
        .await?;

        Ok(new_avg)
    }

    /// Backfill the lot reference on a just-created movement. Movements are
    /// never updated otherwise.
    pub(crate) async fn set_movement_lot(
        tx: &mut Transaction<'_, Postgres>,
        movement_id: Uuid,
        lot_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query("UPDATE stock_movements SET lot_id = $1 WHERE id = $2")
            .bind(lot_id)
            .bind(movement_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub(crate) fn publish_movement(&self, outcome: &MovementOutcome, movement_type: MovementType) {
        self.events.publish(
            EVENT_MOVEMENT_APPLIED,
            serde_json::json!({
                "movement_id": outcome.movement_id,
                "movement_type": movement_type.as_str(),
                "store_id": outcome.snapshot.store_id,
                "product_id": outcome.snapshot.product_id,
                "variant_key": outcome.snapshot.variant_key.as_str(),
                "on_hand": outcome.snapshot.on_hand,
                "on_order": outcome.snapshot.on_order,
            }),
        );
    }

    pub(crate) fn check_low_stock(&self, product: &ProductInfo, snapshot: &InventorySnapshot) {
        let Some(threshold) = product.low_stock_threshold else {
            return;
        };
        if snapshot.on_hand <= threshold {
            self.events.publish(
                EVENT_LOW_STOCK,
                serde_json::json!({
                    "store_id": snapshot.store_id,
                    "product_id": snapshot.product_id,
                    "variant_key": snapshot.variant_key.as_str(),
                    "on_hand": snapshot.on_hand,
                    "threshold": threshold,
                }),
            );
        }
    }
}
