//! HTTP handlers for stock count endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::{Pagination, StockCount, StockCountLine, StockCountWithLines};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::stock_counts::{
    ApplyStockCountInput, ApplyStockCountOutcome, CreateStockCountInput, ScanInput, ScanOutcome,
    StockCountService, UpdateCountLineInput,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CountListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Create a stock count
pub async fn create_stock_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateStockCountInput>,
) -> AppResult<Json<StockCount>> {
    let service = StockCountService::new(state.db, state.events);
    let count = service.create(&current_user.0, input).await?;
    Ok(Json(count))
}

/// List stock counts
pub async fn list_stock_counts(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<CountListQuery>,
) -> AppResult<Json<Vec<StockCount>>> {
    let service = StockCountService::new(state.db, state.events);
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(50),
    };
    let counts = service.list(&current_user.0, pagination).await?;
    Ok(Json(counts))
}

/// Get a stock count with its lines
pub async fn get_stock_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<StockCountWithLines>> {
    let service = StockCountService::new(state.db, state.events);
    let count = service.get(&current_user.0, count_id).await?;
    Ok(Json(count))
}

/// Scan a value into a stock count
pub async fn scan_stock_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
    Json(input): Json<ScanInput>,
) -> AppResult<Json<ScanOutcome>> {
    let service = StockCountService::new(state.db, state.events);
    let outcome = service.scan(&current_user.0, count_id, input).await?;
    Ok(Json(outcome))
}

/// Manually set a line's counted quantity
pub async fn update_stock_count_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((count_id, line_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateCountLineInput>,
) -> AppResult<Json<StockCountLine>> {
    let service = StockCountService::new(state.db, state.events);
    let line = service
        .update_line(&current_user.0, count_id, line_id, input)
        .await?;
    Ok(Json(line))
}

/// Remove a line from a stock count
pub async fn remove_stock_count_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((count_id, line_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<()>> {
    let service = StockCountService::new(state.db, state.events);
    service
        .remove_line(&current_user.0, count_id, line_id)
        .await?;
    Ok(Json(()))
}

/// Apply a stock count's variances to the ledger
pub async fn apply_stock_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
    Json(input): Json<ApplyStockCountInput>,
) -> AppResult<Json<ApplyStockCountOutcome>> {
    let service = StockCountService::new(state.db, state.events);
    let outcome = service.apply(&current_user.0, count_id, input).await?;
    Ok(Json(outcome))
}

/// Cancel a stock count
pub async fn cancel_stock_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<StockCount>> {
    let service = StockCountService::new(state.db, state.events);
    let count = service.cancel(&current_user.0, count_id).await?;
    Ok(Json(count))
}
