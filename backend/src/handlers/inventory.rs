//! HTTP handlers for the stock ledger endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::{InventorySnapshot, Pagination, StockLot, StockMovement, VariantKey};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ledger::{
    AdjustStockInput, LedgerService, MovementOutcome, ReceiveStockInput, RecomputeOutcome,
    TransferOutcome, TransferStockInput,
};
use crate::services::lots::LotService;
use crate::AppState;

/// Query selecting a variant row; absent means the base product.
#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    pub variant_key: Option<String>,
}

impl VariantQuery {
    fn key(&self) -> VariantKey {
        self.variant_key
            .clone()
            .map(VariantKey::from)
            .unwrap_or_default()
    }

    fn key_opt(&self) -> Option<VariantKey> {
        self.variant_key.clone().map(VariantKey::from)
    }
}

#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub variant_key: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Apply a manual stock adjustment
pub async fn adjust_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<AdjustStockInput>,
) -> AppResult<Json<MovementOutcome>> {
    let service = LedgerService::new(state.db, state.events);
    let outcome = service.adjust(&current_user.0, input).await?;
    Ok(Json(outcome))
}

/// Receive stock outside a purchase order
pub async fn receive_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiveStockInput>,
) -> AppResult<Json<MovementOutcome>> {
    let service = LedgerService::new(state.db, state.events);
    let outcome = service.receive(&current_user.0, input).await?;
    Ok(Json(outcome))
}

/// Transfer stock between stores
pub async fn transfer_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<TransferStockInput>,
) -> AppResult<Json<TransferOutcome>> {
    let service = LedgerService::new(state.db, state.events);
    let outcome = service.transfer(&current_user.0, input).await?;
    Ok(Json(outcome))
}

/// Rebuild a store's snapshots from the movement history
pub async fn recompute_store(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(store_id): Path<Uuid>,
) -> AppResult<Json<RecomputeOutcome>> {
    let service = LedgerService::new(state.db, state.events);
    let outcome = service.recompute(&current_user.0, store_id).await?;
    Ok(Json(outcome))
}

/// Current snapshot for one (store, product, variant) triple
pub async fn get_snapshot(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VariantQuery>,
) -> AppResult<Json<InventorySnapshot>> {
    let service = LedgerService::new(state.db, state.events);
    let snapshot = service
        .get_snapshot(&current_user.0, store_id, product_id, &query.key())
        .await?;
    Ok(Json(snapshot))
}

/// Movement history for one (store, product) pair
pub async fn list_movements(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<MovementsQuery>,
) -> AppResult<Json<Vec<StockMovement>>> {
    let service = LedgerService::new(state.db, state.events);
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(50),
    };
    let movements = service
        .list_movements(
            &current_user.0,
            store_id,
            product_id,
            query.variant_key.map(VariantKey::from),
            pagination,
        )
        .await?;
    Ok(Json(movements))
}

/// Expiry lots for one (store, product) pair
pub async fn list_lots(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VariantQuery>,
) -> AppResult<Json<Vec<StockLot>>> {
    let service = LotService::new(state.db);
    let lots = service
        .list_lots(&current_user.0, store_id, product_id, query.key_opt())
        .await?;
    Ok(Json(lots))
}
