//! Purchase order workflow
//!
//! Orchestrates the draft -> submitted -> approved -> received lifecycle
//! and drives the ledger as a side effect of transitions: submit raises
//! on-order counters, receive applies movements and lowers them, cancel
//! reverses whatever submit raised. All snapshot writes go through the
//! ledger primitives.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use shared::{
    plan_receipt, status_after_receipt, MovementReference, MovementType, OperationMode,
    Pagination, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus, PurchaseOrderWithLines,
    ReferenceType, VariantKey,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::events::{EventPublisher, EVENT_PO_STATUS_CHANGED};
use crate::services::ledger::{LedgerService, MovementArgs, MovementOutcome};
use crate::services::limits::{self, LimitKind};
use crate::services::lots::LotService;
use crate::services::units::{ProductInfo, UnitService};
use crate::services::{audit, idempotency};

pub const ROUTE_PO_RECEIVE: &str = "purchase_orders.receive";

/// Purchase order service
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: PgPool,
    events: EventPublisher,
    ledger: LedgerService,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    organization_id: Uuid,
    store_id: Uuid,
    supplier_id: Uuid,
    status: String,
    note: Option<String>,
    created_by: Option<Uuid>,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> AppResult<PurchaseOrder> {
        let status = PurchaseOrderStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("unknown order status {}", self.status)))?;
        Ok(PurchaseOrder {
            id: self.id,
            organization_id: self.organization_id,
            store_id: self.store_id,
            supplier_id: self.supplier_id,
            status,
            note: self.note,
            created_by: self.created_by,
            submitted_at: self.submitted_at,
            approved_at: self.approved_at,
            received_at: self.received_at,
            cancelled_at: self.cancelled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: Uuid,
    purchase_order_id: Uuid,
    product_id: Uuid,
    variant_key: String,
    qty_ordered: i64,
    qty_received: i64,
    unit_cost: Option<Decimal>,
}

impl From<LineRow> for PurchaseOrderLine {
    fn from(row: LineRow) -> Self {
        PurchaseOrderLine {
            id: row.id,
            purchase_order_id: row.purchase_order_id,
            product_id: row.product_id,
            variant_key: VariantKey::from(row.variant_key),
            qty_ordered: row.qty_ordered,
            qty_received: row.qty_received,
            unit_cost: row.unit_cost,
        }
    }
}

const ORDER_COLUMNS: &str = "id, organization_id, store_id, supplier_id, status, note, created_by, \
     submitted_at, approved_at, received_at, cancelled_at, created_at, updated_at";

/// Input for creating a purchase order
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePurchaseOrderInput {
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    /// Submit immediately after creation.
    #[serde(default)]
    pub submit: bool,
    #[serde(default)]
    pub lines: Vec<OrderLineInput>,
}

/// One requested order line
#[derive(Debug, Deserialize)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
}

/// Input for updating a draft line
#[derive(Debug, Deserialize)]
pub struct UpdateOrderLineInput {
    pub quantity: Option<Decimal>,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
}

/// Input for receiving against an order
#[derive(Debug, Deserialize, Validate)]
pub struct ReceivePurchaseOrderInput {
    #[validate(length(min = 16, message = "idempotency key must be at least 16 characters"))]
    pub idempotency_key: String,
    /// Permit receiving beyond the ordered quantity.
    #[serde(default)]
    pub allow_over_receive: bool,
    /// Explicit per-line quantities; empty means "receive all remaining".
    #[serde(default)]
    pub lines: Vec<ReceiveLineInput>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveLineInput {
    pub line_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub pack_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PurchaseOrderService {
    pub fn new(db: PgPool, events: EventPublisher) -> Self {
        let ledger = LedgerService::new(db.clone(), events.clone());
        Self { db, events, ledger }
    }

    /// Create an order in draft, optionally submitting immediately.
    pub async fn create(
        &self,
        user: &AuthUser,
        input: CreatePurchaseOrderInput,
    ) -> AppResult<PurchaseOrderWithLines> {
        input.validate()?;

        // Duplicate (product, variant) pairs fail before anything persists.
        for (i, line) in input.lines.iter().enumerate() {
            let dup = input.lines[..i]
                .iter()
                .any(|l| l.product_id == line.product_id && l.variant_id == line.variant_id);
            if dup {
                return Err(AppError::Conflict(format!(
                    "duplicate order line for product {}",
                    line.product_id
                )));
            }
        }

        let units = UnitService::new(self.db.clone());
        let mut resolved: Vec<(Uuid, VariantKey, i64, Option<Decimal>)> = Vec::new();
        for line in &input.lines {
            let product = units.load_product(user.organization_id, line.product_id).await?;
            if let Some(variant_id) = line.variant_id {
                units
                    .ensure_variant(user.organization_id, line.product_id, variant_id)
                    .await?;
            }
            let qty = units
                .resolve_quantity(
                    user.organization_id,
                    &product,
                    line.quantity,
                    line.unit_id,
                    line.pack_id,
                    OperationMode::Purchasing,
                )
                .await?;
            if qty <= 0 {
                return Err(AppError::validation("quantity", "ordered quantity must be positive"));
            }
            resolved.push((
                line.product_id,
                VariantKey::from_option(line.variant_id),
                qty,
                line.unit_cost,
            ));
        }

        let mut tx = self.db.begin().await?;
        limits::assert_within_limits(&mut tx, user.organization_id, LimitKind::PurchaseOrders)
            .await?;

        // Store and supplier must belong to the caller's organization.
        LedgerService::store_policy(&mut tx, user.organization_id, input.store_id).await?;
        let supplier_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM suppliers WHERE id = $1 AND organization_id = $2)",
        )
        .bind(input.supplier_id)
        .bind(user.organization_id)
        .fetch_one(&mut *tx)
        .await?;
        if !supplier_exists {
            return Err(AppError::NotFound("Supplier".to_string()));
        }

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO purchase_orders (organization_id, store_id, supplier_id, status, note, created_by)
            VALUES ($1, $2, $3, 'draft', $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#,
        ))
        .bind(user.organization_id)
        .bind(input.store_id)
        .bind(input.supplier_id)
        .bind(&input.note)
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;
        let order_id = order_row.id;

        for (product_id, variant_key, qty, unit_cost) in &resolved {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_lines (
                    purchase_order_id, organization_id, product_id, variant_key, qty_ordered, unit_cost
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(user.organization_id)
            .bind(product_id)
            .bind(variant_key.as_str())
            .bind(qty)
            .bind(unit_cost)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_insert_error(e, "purchase order line"))?;
        }

        let order = if input.submit {
            Self::submit_in_tx(&mut tx, user, order_id).await?
        } else {
            order_row.into_order()?
        };
        let lines = Self::load_lines(&mut tx, order_id).await?;

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.create",
            "purchase_order",
            order_id,
            None,
            Some(serde_json::json!({ "status": order.status.as_str(), "lines": lines.len() })),
            None,
        )
        .await?;
        tx.commit().await?;

        if order.status == PurchaseOrderStatus::Submitted {
            self.publish_status(&order, None);
        }
        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Submit a draft order, raising on-order counters for every line.
    pub async fn submit(&self, user: &AuthUser, order_id: Uuid) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;
        let order = Self::submit_in_tx(&mut tx, user, order_id).await?;
        let lines = Self::load_lines(&mut tx, order_id).await?;
        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.submit",
            "purchase_order",
            order_id,
            Some(serde_json::json!({ "status": PurchaseOrderStatus::Draft.as_str() })),
            Some(serde_json::json!({ "status": order.status.as_str() })),
            None,
        )
        .await?;
        tx.commit().await?;

        self.publish_status(&order, Some(PurchaseOrderStatus::Draft));
        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Approve a submitted order.
    pub async fn approve(&self, user: &AuthUser, order_id: Uuid) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;
        let row = Self::lock_order(&mut tx, user.organization_id, order_id).await?;
        let current = row.into_order()?.status;
        Self::ensure_transition(current, PurchaseOrderStatus::Approved)?;

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE purchase_orders
            SET status = 'approved', approved_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#,
        ))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;
        let order = order_row.into_order()?;
        let lines = Self::load_lines(&mut tx, order_id).await?;

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.approve",
            "purchase_order",
            order_id,
            Some(serde_json::json!({ "status": current.as_str() })),
            Some(serde_json::json!({ "status": order.status.as_str() })),
            None,
        )
        .await?;
        tx.commit().await?;

        self.publish_status(&order, Some(current));
        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Receive goods against an approved order. Idempotency-guarded; calling
    /// receive on an already-received order is a no-op returning the
    /// current state.
    pub async fn receive(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        input: ReceivePurchaseOrderInput,
    ) -> AppResult<PurchaseOrderWithLines> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        if let Some(prev) = idempotency::fetch_recorded::<PurchaseOrderWithLines>(
            &mut tx,
            user.user_id,
            ROUTE_PO_RECEIVE,
            &input.idempotency_key,
        )
        .await?
        {
            tx.commit().await?;
            return Ok(prev);
        }

        let row = Self::lock_order(&mut tx, user.organization_id, order_id).await?;
        let order = row.into_order()?;
        let current = order.status;

        if current == PurchaseOrderStatus::Received {
            let lines = Self::load_lines(&mut tx, order_id).await?;
            tx.commit().await?;
            return Ok(PurchaseOrderWithLines { order, lines });
        }
        if !matches!(
            current,
            PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(AppError::InvalidStateTransition(format!(
                "{} -> received",
                current.as_str()
            )));
        }

        let lines = Self::load_lines(&mut tx, order_id).await?;

        // Resolve explicit per-line quantities into base units.
        let units = UnitService::new(self.db.clone());
        let mut products: Vec<(Uuid, ProductInfo)> = Vec::new();
        let mut requested: Vec<(Uuid, i64)> = Vec::new();
        for req in &input.lines {
            let line = lines
                .iter()
                .find(|l| l.id == req.line_id)
                .ok_or_else(|| AppError::NotFound(format!("Purchase order line {}", req.line_id)))?;
            let product = Self::product_info(
                &units,
                &mut products,
                user.organization_id,
                line.product_id,
            )
            .await?;
            let qty = units
                .resolve_quantity(
                    user.organization_id,
                    &product,
                    req.quantity,
                    req.unit_id,
                    req.pack_id,
                    OperationMode::Receiving,
                )
                .await?;
            requested.push((req.line_id, qty));
        }

        let plan = plan_receipt(&lines, &requested, input.allow_over_receive)?;
        let policy = LedgerService::store_policy(&mut tx, user.organization_id, order.store_id).await?;
        let reference = MovementReference::new(ReferenceType::PurchaseOrder, order_id);

        let mut applied: Vec<(MovementOutcome, ProductInfo)> = Vec::new();
        for item in &plan {
            let product = Self::product_info(
                &units,
                &mut products,
                user.organization_id,
                item.product_id,
            )
            .await?;

            let movement = LedgerService::apply_movement(
                &mut tx,
                user.organization_id,
                Some(user.user_id),
                &policy,
                &MovementArgs {
                    store_id: order.store_id,
                    product_id: item.product_id,
                    variant_key: &item.variant_key,
                    movement_type: MovementType::Receive,
                    qty_delta: item.receive_qty,
                    reference: Some(reference),
                    note: input.note.as_deref(),
                },
            )
            .await?;

            let request = input.lines.iter().find(|r| r.line_id == item.line_id);
            let lot_id = LotService::apply_lot_adjustment(
                &mut tx,
                user.organization_id,
                &policy,
                order.store_id,
                item.product_id,
                &item.variant_key,
                item.receive_qty,
                request.and_then(|r| r.expiry_date),
            )
            .await?;
            if let Some(lot_id) = lot_id {
                LedgerService::set_movement_lot(&mut tx, movement.movement_id, lot_id).await?;
            }

            LedgerService::adjust_on_order(
                &mut tx,
                user.organization_id,
                &policy,
                order.store_id,
                item.product_id,
                &item.variant_key,
                -item.on_order_decrement,
            )
            .await?;

            let line = lines
                .iter()
                .find(|l| l.id == item.line_id)
                .ok_or_else(|| AppError::Internal("planned line disappeared".to_string()))?;
            let unit_cost = request.and_then(|r| r.unit_cost).or(line.unit_cost);
            if let Some(unit_cost) = unit_cost {
                LedgerService::update_cost_basis(
                    &mut tx,
                    user.organization_id,
                    item.product_id,
                    &item.variant_key,
                    item.receive_qty,
                    unit_cost,
                )
                .await?;
            }

            sqlx::query("UPDATE purchase_order_lines SET qty_received = $1 WHERE id = $2")
                .bind(item.new_received_total)
                .bind(item.line_id)
                .execute(&mut *tx)
                .await?;

            applied.push((
                MovementOutcome {
                    snapshot: movement.snapshot,
                    movement_id: movement.movement_id,
                    lot_id,
                },
                product,
            ));
        }

        let updated_lines = Self::load_lines(&mut tx, order_id).await?;
        let final_status = status_after_receipt(&updated_lines);
        let order = if final_status != current {
            let received_at_set = final_status == PurchaseOrderStatus::Received;
            sqlx::query_as::<_, OrderRow>(&format!(
                r#"
                UPDATE purchase_orders
                SET status = $1,
                    received_at = CASE WHEN $2 THEN NOW() ELSE received_at END,
                    updated_at = NOW()
                WHERE id = $3
                RETURNING {ORDER_COLUMNS}
                "#,
            ))
            .bind(final_status.as_str())
            .bind(received_at_set)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?
            .into_order()?
        } else {
            order
        };

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.receive",
            "purchase_order",
            order_id,
            Some(serde_json::json!({ "status": current.as_str() })),
            Some(serde_json::json!({
                "status": order.status.as_str(),
                "lines_received": plan.len(),
            })),
            Some(&input.idempotency_key),
        )
        .await?;

        let outcome = PurchaseOrderWithLines {
            order,
            lines: updated_lines,
        };
        idempotency::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            ROUTE_PO_RECEIVE,
            &input.idempotency_key,
            &outcome,
        )
        .await?;
        tx.commit().await?;

        for (movement, product) in &applied {
            self.ledger.publish_movement(movement, MovementType::Receive);
            self.ledger.check_low_stock(product, &movement.snapshot);
        }
        if outcome.order.status != current {
            self.publish_status(&outcome.order, Some(current));
        }
        Ok(outcome)
    }

    /// Cancel a draft or submitted order, reversing any on-order effects.
    pub async fn cancel(&self, user: &AuthUser, order_id: Uuid) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;
        let row = Self::lock_order(&mut tx, user.organization_id, order_id).await?;
        let order = row.into_order()?;
        let current = order.status;
        Self::ensure_transition(current, PurchaseOrderStatus::Cancelled)?;

        let lines = Self::load_lines(&mut tx, order_id).await?;
        if current.holds_on_order() {
            let policy =
                LedgerService::store_policy(&mut tx, user.organization_id, order.store_id).await?;
            for line in &lines {
                LedgerService::adjust_on_order(
                    &mut tx,
                    user.organization_id,
                    &policy,
                    order.store_id,
                    line.product_id,
                    &line.variant_key,
                    -line.qty_remaining(),
                )
                .await?;
            }
        }

        let order = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE purchase_orders
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#,
        ))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.cancel",
            "purchase_order",
            order_id,
            Some(serde_json::json!({ "status": current.as_str() })),
            Some(serde_json::json!({ "status": order.status.as_str() })),
            None,
        )
        .await?;
        tx.commit().await?;

        self.publish_status(&order, Some(current));
        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Add a line to a draft order.
    pub async fn add_line(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        input: OrderLineInput,
    ) -> AppResult<PurchaseOrderWithLines> {
        let units = UnitService::new(self.db.clone());
        let product = units.load_product(user.organization_id, input.product_id).await?;
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
                OperationMode::Purchasing,
            )
            .await?;
        if qty <= 0 {
            return Err(AppError::validation("quantity", "ordered quantity must be positive"));
        }
        let variant_key = VariantKey::from_option(input.variant_id);

        let mut tx = self.db.begin().await?;
        let order = Self::lock_order(&mut tx, user.organization_id, order_id)
            .await?
            .into_order()?;
        Self::ensure_draft(&order)?;

        sqlx::query(
            r#"
            INSERT INTO purchase_order_lines (
                purchase_order_id, organization_id, product_id, variant_key, qty_ordered, unit_cost
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id)
        .bind(user.organization_id)
        .bind(input.product_id)
        .bind(variant_key.as_str())
        .bind(qty)
        .bind(input.unit_cost)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_insert_error(e, "purchase order line"))?;

        let lines = Self::load_lines(&mut tx, order_id).await?;
        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.add_line",
            "purchase_order",
            order_id,
            None,
            Some(serde_json::json!({ "product_id": input.product_id, "qty_ordered": qty })),
            None,
        )
        .await?;
        tx.commit().await?;

        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Update a line on a draft order.
    pub async fn update_line(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        line_id: Uuid,
        input: UpdateOrderLineInput,
    ) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;
        let order = Self::lock_order(&mut tx, user.organization_id, order_id)
            .await?
            .into_order()?;
        Self::ensure_draft(&order)?;

        let lines = Self::load_lines(&mut tx, order_id).await?;
        let line = lines
            .iter()
            .find(|l| l.id == line_id)
            .ok_or_else(|| AppError::NotFound("Purchase order line".to_string()))?;

        let qty_ordered = match input.quantity {
            Some(quantity) => {
                let units = UnitService::new(self.db.clone());
                let product = units.load_product(user.organization_id, line.product_id).await?;
                let qty = units
                    .resolve_quantity(
                        user.organization_id,
                        &product,
                        quantity,
                        input.unit_id,
                        input.pack_id,
                        OperationMode::Purchasing,
                    )
                    .await?;
                if qty <= 0 {
                    return Err(AppError::validation(
                        "quantity",
                        "ordered quantity must be positive",
                    ));
                }
                qty
            }
            None => line.qty_ordered,
        };
        let unit_cost = input.unit_cost.or(line.unit_cost);

        sqlx::query("UPDATE purchase_order_lines SET qty_ordered = $1, unit_cost = $2 WHERE id = $3")
            .bind(qty_ordered)
            .bind(unit_cost)
            .bind(line_id)
            .execute(&mut *tx)
            .await?;

        let lines = Self::load_lines(&mut tx, order_id).await?;
        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.update_line",
            "purchase_order",
            order_id,
            None,
            Some(serde_json::json!({ "line_id": line_id, "qty_ordered": qty_ordered })),
            None,
        )
        .await?;
        tx.commit().await?;

        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Remove a line from a draft order.
    pub async fn remove_line(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        line_id: Uuid,
    ) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;
        let order = Self::lock_order(&mut tx, user.organization_id, order_id)
            .await?
            .into_order()?;
        Self::ensure_draft(&order)?;

        let result =
            sqlx::query("DELETE FROM purchase_order_lines WHERE id = $1 AND purchase_order_id = $2")
                .bind(line_id)
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Purchase order line".to_string()));
        }

        let lines = Self::load_lines(&mut tx, order_id).await?;
        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "purchase_order.remove_line",
            "purchase_order",
            order_id,
            Some(serde_json::json!({ "line_id": line_id })),
            None,
            None,
        )
        .await?;
        tx.commit().await?;

        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// One order with its lines.
    pub async fn get(&self, user: &AuthUser, order_id: Uuid) -> AppResult<PurchaseOrderWithLines> {
        let order = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE id = $1 AND organization_id = $2",
        ))
        .bind(order_id)
        .bind(user.organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?
        .into_order()?;

        let rows = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT id, purchase_order_id, product_id, variant_key, qty_ordered, qty_received, unit_cost
            FROM purchase_order_lines
            WHERE purchase_order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(PurchaseOrderWithLines {
            order,
            lines: rows.into_iter().map(PurchaseOrderLine::from).collect(),
        })
    }

    /// Orders for the organization, newest first, optionally by status.
    pub async fn list(&self, user: &AuthUser, query: ListOrdersQuery) -> AppResult<Vec<PurchaseOrder>> {
        if let Some(status) = &query.status {
            if PurchaseOrderStatus::from_str(status).is_none() {
                return Err(AppError::validation("status", "unknown purchase order status"));
            }
        }
        let pagination = Pagination {
            page: query.page.unwrap_or(1),
            per_page: query.per_page.unwrap_or(50),
        };

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM purchase_orders
            WHERE organization_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        ))
        .bind(user.organization_id)
        .bind(&query.status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn lock_order(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<OrderRow> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE id = $1 AND organization_id = $2 FOR UPDATE",
        ))
        .bind(order_id)
        .bind(organization_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))
    }

    async fn load_lines(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> AppResult<Vec<PurchaseOrderLine>> {
        let rows = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT id, purchase_order_id, product_id, variant_key, qty_ordered, qty_received, unit_cost
            FROM purchase_order_lines
            WHERE purchase_order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(PurchaseOrderLine::from).collect())
    }

    async fn submit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user: &AuthUser,
        order_id: Uuid,
    ) -> AppResult<PurchaseOrder> {
        let order = Self::lock_order(tx, user.organization_id, order_id)
            .await?
            .into_order()?;
        Self::ensure_transition(order.status, PurchaseOrderStatus::Submitted)?;

        let lines = Self::load_lines(tx, order_id).await?;
        if lines.is_empty() {
            return Err(AppError::validation(
                "lines",
                "cannot submit a purchase order without lines",
            ));
        }

        let policy = LedgerService::store_policy(tx, user.organization_id, order.store_id).await?;
        for line in &lines {
            LedgerService::adjust_on_order(
                tx,
                user.organization_id,
                &policy,
                order.store_id,
                line.product_id,
                &line.variant_key,
                line.qty_ordered,
            )
            .await?;
        }

        sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE purchase_orders
            SET status = 'submitted', submitted_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#,
        ))
        .bind(order_id)
        .fetch_one(&mut **tx)
        .await?
        .into_order()
    }

    async fn product_info(
        units: &UnitService,
        cache: &mut Vec<(Uuid, ProductInfo)>,
        organization_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<ProductInfo> {
        if let Some((_, info)) = cache.iter().find(|(id, _)| *id == product_id) {
            return Ok(info.clone());
        }
        let info = units.load_product(organization_id, product_id).await?;
        cache.push((product_id, info.clone()));
        Ok(info)
    }

    fn ensure_transition(
        current: PurchaseOrderStatus,
        next: PurchaseOrderStatus,
    ) -> AppResult<()> {
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "{} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }

    fn ensure_draft(order: &PurchaseOrder) -> AppResult<()> {
        if order.status != PurchaseOrderStatus::Draft {
            return Err(AppError::Conflict(
                "purchase order lines are mutable only while the order is draft".to_string(),
            ));
        }
        Ok(())
    }

    fn publish_status(&self, order: &PurchaseOrder, previous: Option<PurchaseOrderStatus>) {
        self.events.publish(
            EVENT_PO_STATUS_CHANGED,
            serde_json::json!({
                "purchase_order_id": order.id,
                "store_id": order.store_id,
                "supplier_id": order.supplier_id,
                "previous_status": previous.map(|s| s.as_str()),
                "status": order.status.as_str(),
            }),
        );
    }
}
