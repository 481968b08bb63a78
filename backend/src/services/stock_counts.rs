//! Stock count workflow
//!
//! Scan-driven counting sessions. Lines snapshot the expected on-hand when
//! first touched; apply re-reads the live ledger so drift between scan and
//! apply is absorbed, then emits one adjustment per nonzero variance
//! through the ledger primitives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use shared::{
    build_count_code, count_delta, resolve_scan, CountUpdate, MovementReference, MovementType,
    Pagination, ReferenceType, ScanMatch, ScanSource, StockCount, StockCountLine,
    StockCountStatus, StockCountWithLines, VariantKey,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::events::{EventPublisher, EVENT_STOCK_COUNT_APPLIED};
use crate::services::ledger::{LedgerService, MovementArgs, MovementOutcome};
use crate::services::limits::{self, LimitKind};
use crate::services::units::{ProductInfo, UnitService};
use crate::services::{audit, idempotency};

pub const ROUTE_COUNT_APPLY: &str = "stock_counts.apply";

/// Attempts at allocating a unique count code before giving up.
const CODE_ALLOCATION_ATTEMPTS: usize = 5;

/// Stock count service
#[derive(Clone)]
pub struct StockCountService {
    db: PgPool,
    events: EventPublisher,
    ledger: LedgerService,
}

#[derive(Debug, sqlx::FromRow)]
struct CountRow {
    id: Uuid,
    organization_id: Uuid,
    store_id: Uuid,
    status: String,
    code: String,
    notes: Option<String>,
    created_by: Option<Uuid>,
    applied_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CountRow {
    fn into_count(self) -> AppResult<StockCount> {
        let status = StockCountStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("unknown count status {}", self.status)))?;
        Ok(StockCount {
            id: self.id,
            organization_id: self.organization_id,
            store_id: self.store_id,
            status,
            code: self.code,
            notes: self.notes,
            created_by: self.created_by,
            applied_at: self.applied_at,
            cancelled_at: self.cancelled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CountLineRow {
    id: Uuid,
    stock_count_id: Uuid,
    product_id: Uuid,
    variant_key: String,
    expected_on_hand: i64,
    counted_qty: i64,
    delta_qty: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CountLineRow> for StockCountLine {
    fn from(row: CountLineRow) -> Self {
        StockCountLine {
            id: row.id,
            stock_count_id: row.stock_count_id,
            product_id: row.product_id,
            variant_key: VariantKey::from(row.variant_key),
            expected_on_hand: row.expected_on_hand,
            counted_qty: row.counted_qty,
            delta_qty: row.delta_qty,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const COUNT_COLUMNS: &str = "id, organization_id, store_id, status, code, notes, created_by, \
     applied_at, cancelled_at, created_at, updated_at";

const COUNT_LINE_COLUMNS: &str = "id, stock_count_id, product_id, variant_key, expected_on_hand, \
     counted_qty, delta_qty, created_at, updated_at";

/// Input for creating a stock count
#[derive(Debug, Deserialize, Validate)]
pub struct CreateStockCountInput {
    pub store_id: Uuid,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Input for a scan
#[derive(Debug, Deserialize, Validate)]
pub struct ScanInput {
    #[validate(length(min = 1, max = 100))]
    pub scanned_value: String,
    /// "increment" (default) or "set".
    pub mode: Option<String>,
    pub quantity: Option<i64>,
}

impl ScanInput {
    fn count_update(&self) -> AppResult<CountUpdate> {
        match self.mode.as_deref() {
            None | Some("increment") => Ok(CountUpdate::Increment(self.quantity.unwrap_or(1))),
            Some("set") => {
                let quantity = self.quantity.ok_or_else(|| {
                    AppError::validation("quantity", "set mode requires a quantity")
                })?;
                Ok(CountUpdate::Set(quantity))
            }
            Some(other) => Err(AppError::validation(
                "mode",
                format!("unknown scan mode {other}"),
            )),
        }
    }
}

/// Input for a manual line edit
#[derive(Debug, Deserialize)]
pub struct UpdateCountLineInput {
    pub counted_qty: i64,
}

/// Input for applying a count
#[derive(Debug, Deserialize, Validate)]
pub struct ApplyStockCountInput {
    #[validate(length(min = 16, message = "idempotency key must be at least 16 characters"))]
    pub idempotency_key: String,
}

/// Result of a scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub count: StockCount,
    pub line: StockCountLine,
}

/// Result of applying a count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyStockCountOutcome {
    pub count: StockCount,
    pub lines: Vec<StockCountLine>,
    /// Movement ids of the variance adjustments that were emitted.
    pub movement_ids: Vec<Uuid>,
}

impl StockCountService {
    pub fn new(db: PgPool, events: EventPublisher) -> Self {
        let ledger = LedgerService::new(db.clone(), events.clone());
        Self { db, events, ledger }
    }

    /// Open a new count in draft with a fresh human-readable code.
    pub async fn create(
        &self,
        user: &AuthUser,
        input: CreateStockCountInput,
    ) -> AppResult<StockCount> {
        input.validate()?;

        for _ in 0..CODE_ALLOCATION_ATTEMPTS {
            let suffix = Uuid::new_v4().simple().to_string();
            let code = build_count_code(Utc::now().date_naive(), &suffix[..4]);

            let mut tx = self.db.begin().await?;
            limits::assert_within_limits(&mut tx, user.organization_id, LimitKind::StockCounts)
                .await?;
            LedgerService::store_policy(&mut tx, user.organization_id, input.store_id).await?;

            let inserted = sqlx::query_as::<_, CountRow>(&format!(
                r#"
                INSERT INTO stock_counts (organization_id, store_id, status, code, notes, created_by)
                VALUES ($1, $2, 'draft', $3, $4, $5)
                RETURNING {COUNT_COLUMNS}
                "#,
            ))
            .bind(user.organization_id)
            .bind(input.store_id)
            .bind(&code)
            .bind(&input.notes)
            .bind(user.user_id)
            .fetch_one(&mut *tx)
            .await;

            let row = match inserted {
                Ok(row) => row,
                Err(e) if is_unique_violation(&e) => {
                    // Code collision; roll back and try a new suffix.
                    tx.rollback().await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let count = row.into_count()?;
            audit::record(
                &mut tx,
                user.organization_id,
                user.user_id,
                "stock_count.create",
                "stock_count",
                count.id,
                None,
                Some(serde_json::json!({ "code": count.code, "store_id": count.store_id })),
                None,
            )
            .await?;
            tx.commit().await?;
            return Ok(count);
        }

        Err(AppError::Conflict(
            "could not allocate a unique stock count code".to_string(),
        ))
    }

    /// Resolve a scanned value and add or update the matching line.
    pub async fn scan(
        &self,
        user: &AuthUser,
        count_id: Uuid,
        input: ScanInput,
    ) -> AppResult<ScanOutcome> {
        input.validate()?;
        let update = input.count_update()?;

        let mut tx = self.db.begin().await?;
        let mut count = Self::lock_count(&mut tx, user.organization_id, count_id)
            .await?
            .into_count()?;
        Self::ensure_open(&count)?;

        let hit = self
            .resolve_scanned_value(user.organization_id, &input.scanned_value)
            .await?;

        let existing = sqlx::query_as::<_, CountLineRow>(&format!(
            r#"
            SELECT {COUNT_LINE_COLUMNS} FROM stock_count_lines
            WHERE stock_count_id = $1 AND product_id = $2 AND variant_key = $3
            FOR UPDATE
            "#,
        ))
        .bind(count_id)
        .bind(hit.product_id)
        .bind(hit.variant_key.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let line = match existing {
            Some(row) => {
                let counted_qty = update.apply(row.counted_qty);
                let delta_qty = count_delta(counted_qty, row.expected_on_hand);
                sqlx::query_as::<_, CountLineRow>(&format!(
                    r#"
                    UPDATE stock_count_lines
                    SET counted_qty = $1, delta_qty = $2, updated_at = NOW()
                    WHERE id = $3
                    RETURNING {COUNT_LINE_COLUMNS}
                    "#,
                ))
                .bind(counted_qty)
                .bind(delta_qty)
                .bind(row.id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                // First touch of this pair: snapshot the live on-hand.
                let expected_on_hand: Option<i64> = sqlx::query_scalar(
                    r#"
                    SELECT on_hand FROM inventory_snapshots
                    WHERE organization_id = $1 AND store_id = $2
                      AND product_id = $3 AND variant_key = $4
                    "#,
                )
                .bind(user.organization_id)
                .bind(count.store_id)
                .bind(hit.product_id)
                .bind(hit.variant_key.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                let expected_on_hand = expected_on_hand.unwrap_or(0);
                let counted_qty = update.apply(0);
                let delta_qty = count_delta(counted_qty, expected_on_hand);

                sqlx::query_as::<_, CountLineRow>(&format!(
                    r#"
                    INSERT INTO stock_count_lines (
                        stock_count_id, organization_id, product_id, variant_key,
                        expected_on_hand, counted_qty, delta_qty
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING {COUNT_LINE_COLUMNS}
                    "#,
                ))
                .bind(count_id)
                .bind(user.organization_id)
                .bind(hit.product_id)
                .bind(hit.variant_key.as_str())
                .bind(expected_on_hand)
                .bind(counted_qty)
                .bind(delta_qty)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        // First line moves the count out of draft.
        if count.status == StockCountStatus::Draft {
            sqlx::query(
                "UPDATE stock_counts SET status = 'in_progress', updated_at = NOW() WHERE id = $1",
            )
            .bind(count_id)
            .execute(&mut *tx)
            .await?;
            count.status = StockCountStatus::InProgress;
        }
        tx.commit().await?;

        Ok(ScanOutcome {
            count,
            line: line.into(),
        })
    }

    /// Manually set a line's counted quantity.
    pub async fn update_line(
        &self,
        user: &AuthUser,
        count_id: Uuid,
        line_id: Uuid,
        input: UpdateCountLineInput,
    ) -> AppResult<StockCountLine> {
        let mut tx = self.db.begin().await?;
        let count = Self::lock_count(&mut tx, user.organization_id, count_id)
            .await?
            .into_count()?;
        Self::ensure_open(&count)?;

        let row = sqlx::query_as::<_, CountLineRow>(&format!(
            r#"
            UPDATE stock_count_lines
            SET counted_qty = $1, delta_qty = $1 - expected_on_hand, updated_at = NOW()
            WHERE id = $2 AND stock_count_id = $3
            RETURNING {COUNT_LINE_COLUMNS}
            "#,
        ))
        .bind(input.counted_qty)
        .bind(line_id)
        .bind(count_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock count line".to_string()))?;

        tx.commit().await?;
        Ok(row.into())
    }

    /// Remove a line from an open count.
    pub async fn remove_line(
        &self,
        user: &AuthUser,
        count_id: Uuid,
        line_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let count = Self::lock_count(&mut tx, user.organization_id, count_id)
            .await?
            .into_count()?;
        Self::ensure_open(&count)?;

        let result =
            sqlx::query("DELETE FROM stock_count_lines WHERE id = $1 AND stock_count_id = $2")
                .bind(line_id)
                .bind(count_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Stock count line".to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Apply the count: re-read live on-hand per line, emit one adjustment
    /// per nonzero variance, mark the count applied. Idempotency-guarded;
    /// re-applying an applied count is a no-op.
    pub async fn apply(
        &self,
        user: &AuthUser,
        count_id: Uuid,
        input: ApplyStockCountInput,
    ) -> AppResult<ApplyStockCountOutcome> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        if let Some(prev) = idempotency::fetch_recorded::<ApplyStockCountOutcome>(
            &mut tx,
            user.user_id,
            ROUTE_COUNT_APPLY,
            &input.idempotency_key,
        )
        .await?
        {
            tx.commit().await?;
            return Ok(prev);
        }

        let count = Self::lock_count(&mut tx, user.organization_id, count_id)
            .await?
            .into_count()?;

        if count.status == StockCountStatus::Applied {
            let lines = Self::load_lines(&mut tx, count_id).await?;
            tx.commit().await?;
            return Ok(ApplyStockCountOutcome {
                count,
                lines,
                movement_ids: Vec::new(),
            });
        }
        if count.status == StockCountStatus::Cancelled {
            return Err(AppError::InvalidStateTransition("cancelled -> applied".to_string()));
        }

        let policy =
            LedgerService::store_policy(&mut tx, user.organization_id, count.store_id).await?;
        let lines = Self::load_lines(&mut tx, count_id).await?;
        let reference = MovementReference::new(ReferenceType::StockCount, count_id);
        let units = UnitService::new(self.db.clone());

        let mut movement_ids = Vec::new();
        let mut applied: Vec<(MovementOutcome, ProductInfo)> = Vec::new();
        for line in &lines {
            // Freshness check: the expected value is re-read under the
            // snapshot lock so drift since the scan is absorbed.
            let locked = LedgerService::lock_snapshot(
                &mut tx,
                user.organization_id,
                &policy,
                count.store_id,
                line.product_id,
                &line.variant_key,
            )
            .await?;
            let expected_live = locked.on_hand;
            let delta_qty = count_delta(line.counted_qty, expected_live);

            sqlx::query(
                r#"
                UPDATE stock_count_lines
                SET expected_on_hand = $1, delta_qty = $2, updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(expected_live)
            .bind(delta_qty)
            .bind(line.id)
            .execute(&mut *tx)
            .await?;

            if delta_qty == 0 {
                continue;
            }

            let movement = LedgerService::apply_movement(
                &mut tx,
                user.organization_id,
                Some(user.user_id),
                &policy,
                &MovementArgs {
                    store_id: count.store_id,
                    product_id: line.product_id,
                    variant_key: &line.variant_key,
                    movement_type: MovementType::Adjustment,
                    qty_delta: delta_qty,
                    reference: Some(reference),
                    note: None,
                },
            )
            .await?;

            audit::record(
                &mut tx,
                user.organization_id,
                user.user_id,
                "stock_count.adjust",
                "inventory_snapshot",
                movement.snapshot.id,
                Some(serde_json::json!({ "on_hand": expected_live })),
                Some(serde_json::json!({ "on_hand": movement.snapshot.on_hand })),
                Some(&input.idempotency_key),
            )
            .await?;

            let product = units
                .load_product(user.organization_id, line.product_id)
                .await?;
            movement_ids.push(movement.movement_id);
            applied.push((
                MovementOutcome {
                    snapshot: movement.snapshot,
                    movement_id: movement.movement_id,
                    lot_id: None,
                },
                product,
            ));
        }

        let count = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            UPDATE stock_counts
            SET status = 'applied', applied_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {COUNT_COLUMNS}
            "#,
        ))
        .bind(count_id)
        .fetch_one(&mut *tx)
        .await?
        .into_count()?;

        let lines = Self::load_lines(&mut tx, count_id).await?;
        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "stock_count.apply",
            "stock_count",
            count_id,
            None,
            Some(serde_json::json!({
                "code": count.code,
                "adjustments": movement_ids.len(),
            })),
            Some(&input.idempotency_key),
        )
        .await?;

        let outcome = ApplyStockCountOutcome {
            count,
            lines,
            movement_ids,
        };
        idempotency::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            ROUTE_COUNT_APPLY,
            &input.idempotency_key,
            &outcome,
        )
        .await?;
        tx.commit().await?;

        for (movement, product) in &applied {
            self.ledger
                .publish_movement(movement, MovementType::Adjustment);
            self.ledger.check_low_stock(product, &movement.snapshot);
        }
        self.events.publish(
            EVENT_STOCK_COUNT_APPLIED,
            serde_json::json!({
                "stock_count_id": outcome.count.id,
                "store_id": outcome.count.store_id,
                "code": outcome.count.code,
                "adjustments": outcome.movement_ids.len(),
            }),
        );
        Ok(outcome)
    }

    /// Cancel an open count. Counts never touch on-order, so there is
    /// nothing to reverse.
    pub async fn cancel(&self, user: &AuthUser, count_id: Uuid) -> AppResult<StockCount> {
        let mut tx = self.db.begin().await?;
        let count = Self::lock_count(&mut tx, user.organization_id, count_id)
            .await?
            .into_count()?;
        if count.status.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "{} -> cancelled",
                count.status.as_str()
            )));
        }

        let count = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            UPDATE stock_counts
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {COUNT_COLUMNS}
            "#,
        ))
        .bind(count_id)
        .fetch_one(&mut *tx)
        .await?
        .into_count()?;

        audit::record(
            &mut tx,
            user.organization_id,
            user.user_id,
            "stock_count.cancel",
            "stock_count",
            count_id,
            None,
            Some(serde_json::json!({ "code": count.code })),
            None,
        )
        .await?;
        tx.commit().await?;
        Ok(count)
    }

    /// One count with its lines.
    pub async fn get(&self, user: &AuthUser, count_id: Uuid) -> AppResult<StockCountWithLines> {
        let count = sqlx::query_as::<_, CountRow>(&format!(
            "SELECT {COUNT_COLUMNS} FROM stock_counts WHERE id = $1 AND organization_id = $2",
        ))
        .bind(count_id)
        .bind(user.organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock count".to_string()))?
        .into_count()?;

        let rows = sqlx::query_as::<_, CountLineRow>(&format!(
            r#"
            SELECT {COUNT_LINE_COLUMNS} FROM stock_count_lines
            WHERE stock_count_id = $1
            ORDER BY created_at ASC
            "#,
        ))
        .bind(count_id)
        .fetch_all(&self.db)
        .await?;

        Ok(StockCountWithLines {
            count,
            lines: rows.into_iter().map(StockCountLine::from).collect(),
        })
    }

    /// Counts for the organization, newest first.
    pub async fn list(
        &self,
        user: &AuthUser,
        pagination: Pagination,
    ) -> AppResult<Vec<StockCount>> {
        let rows = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            SELECT {COUNT_COLUMNS} FROM stock_counts
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(user.organization_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(CountRow::into_count).collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn lock_count(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        count_id: Uuid,
    ) -> AppResult<CountRow> {
        sqlx::query_as::<_, CountRow>(&format!(
            "SELECT {COUNT_COLUMNS} FROM stock_counts WHERE id = $1 AND organization_id = $2 FOR UPDATE",
        ))
        .bind(count_id)
        .bind(organization_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock count".to_string()))
    }

    async fn load_lines(
        tx: &mut Transaction<'_, Postgres>,
        count_id: Uuid,
    ) -> AppResult<Vec<StockCountLine>> {
        let rows = sqlx::query_as::<_, CountLineRow>(&format!(
            r#"
            SELECT {COUNT_LINE_COLUMNS} FROM stock_count_lines
            WHERE stock_count_id = $1
            ORDER BY created_at ASC
            "#,
        ))
        .bind(count_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(StockCountLine::from).collect())
    }

    fn ensure_open(count: &StockCount) -> AppResult<()> {
        if count.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "stock count {} is {}",
                count.code,
                count.status.as_str()
            )));
        }
        Ok(())
    }

    /// Resolve a scanned value against barcodes first, then SKUs.
    async fn resolve_scanned_value(
        &self,
        organization_id: Uuid,
        scanned_value: &str,
    ) -> AppResult<ScanMatch> {
        let mut matches = Vec::new();

        let product_barcodes: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM products WHERE organization_id = $1 AND is_active = TRUE AND barcode = $2",
        )
        .bind(organization_id)
        .bind(scanned_value)
        .fetch_all(&self.db)
        .await?;
        matches.extend(product_barcodes.into_iter().map(|(id,)| ScanMatch {
            product_id: id,
            variant_key: VariantKey::base(),
            source: ScanSource::ProductBarcode,
        }));

        let variant_barcodes: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT product_id, id FROM product_variants
            WHERE organization_id = $1 AND is_active = TRUE AND barcode = $2
            "#,
        )
        .bind(organization_id)
        .bind(scanned_value)
        .fetch_all(&self.db)
        .await?;
        matches.extend(
            variant_barcodes
                .into_iter()
                .map(|(product_id, variant_id)| ScanMatch {
                    product_id,
                    variant_key: VariantKey::variant(variant_id),
                    source: ScanSource::VariantBarcode,
                }),
        );

        let product_skus: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM products WHERE organization_id = $1 AND is_active = TRUE AND sku = $2",
        )
        .bind(organization_id)
        .bind(scanned_value)
        .fetch_all(&self.db)
        .await?;
        matches.extend(product_skus.into_iter().map(|(id,)| ScanMatch {
            product_id: id,
            variant_key: VariantKey::base(),
            source: ScanSource::ProductSku,
        }));

        let variant_skus: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT product_id, id FROM product_variants
            WHERE organization_id = $1 AND is_active = TRUE AND sku = $2
            "#,
        )
        .bind(organization_id)
        .bind(scanned_value)
        .fetch_all(&self.db)
        .await?;
        matches.extend(
            variant_skus
                .into_iter()
                .map(|(product_id, variant_id)| ScanMatch {
                    product_id,
                    variant_key: VariantKey::variant(variant_id),
                    source: ScanSource::VariantSku,
                }),
        );

        Ok(resolve_scan(matches)?)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
