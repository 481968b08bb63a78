//! HTTP handlers for purchase order endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use shared::{PurchaseOrder, PurchaseOrderWithLines};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::purchase_orders::{
    CreatePurchaseOrderInput, ListOrdersQuery, OrderLineInput, PurchaseOrderService,
    ReceivePurchaseOrderInput, UpdateOrderLineInput,
};
use crate::AppState;

/// Create a purchase order
pub async fn create_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreatePurchaseOrderInput>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.create(&current_user.0, input).await?;
    Ok(Json(order))
}

/// List purchase orders
pub async fn list_purchase_orders(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<Json<Vec<PurchaseOrder>>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let orders = service.list(&current_user.0, query).await?;
    Ok(Json(orders))
}

/// Get a purchase order with its lines
pub async fn get_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.get(&current_user.0, order_id).await?;
    Ok(Json(order))
}

/// Submit a draft purchase order
pub async fn submit_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.submit(&current_user.0, order_id).await?;
    Ok(Json(order))
}

/// Approve a submitted purchase order
pub async fn approve_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.approve(&current_user.0, order_id).await?;
    Ok(Json(order))
}

/// Receive goods against a purchase order
pub async fn receive_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<ReceivePurchaseOrderInput>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.receive(&current_user.0, order_id, input).await?;
    Ok(Json(order))
}

/// Cancel a draft or submitted purchase order
pub async fn cancel_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.cancel(&current_user.0, order_id).await?;
    Ok(Json(order))
}

/// Add a line to a draft purchase order
pub async fn add_purchase_order_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<OrderLineInput>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service.add_line(&current_user.0, order_id, input).await?;
    Ok(Json(order))
}

/// Update a line on a draft purchase order
pub async fn update_purchase_order_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((order_id, line_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateOrderLineInput>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service
        .update_line(&current_user.0, order_id, line_id, input)
        .await?;
    Ok(Json(order))
}

/// Remove a line from a draft purchase order
pub async fn remove_purchase_order_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((order_id, line_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<PurchaseOrderWithLines>> {
    let service = PurchaseOrderService::new(state.db, state.events);
    let order = service
        .remove_line(&current_user.0, order_id, line_id)
        .await?;
    Ok(Json(order))
}
