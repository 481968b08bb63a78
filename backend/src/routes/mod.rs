//! Route definitions for the Retail Operations Platform

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - stock ledger
        .nest("/inventory", inventory_routes())
        // Protected routes - purchasing
        .nest("/purchase-orders", purchase_order_routes())
        // Protected routes - stock counts
        .nest("/stock-counts", stock_count_routes())
}

/// Stock ledger routes (protected)
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/adjust", post(handlers::adjust_stock))
        .route("/receive", post(handlers::receive_stock))
        .route("/transfer", post(handlers::transfer_stock))
        .route("/recompute/:store_id", post(handlers::recompute_store))
        .route("/:store_id/:product_id", get(handlers::get_snapshot))
        .route(
            "/:store_id/:product_id/movements",
            get(handlers::list_movements),
        )
        .route("/:store_id/:product_id/lots", get(handlers::list_lots))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Purchase order routes (protected)
fn purchase_order_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_purchase_orders).post(handlers::create_purchase_order),
        )
        .route("/:order_id", get(handlers::get_purchase_order))
        .route("/:order_id/submit", post(handlers::submit_purchase_order))
        .route("/:order_id/approve", post(handlers::approve_purchase_order))
        .route("/:order_id/receive", post(handlers::receive_purchase_order))
        .route("/:order_id/cancel", post(handlers::cancel_purchase_order))
        .route("/:order_id/lines", post(handlers::add_purchase_order_line))
        .route(
            "/:order_id/lines/:line_id",
            put(handlers::update_purchase_order_line)
                .delete(handlers::remove_purchase_order_line),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Stock count routes (protected)
fn stock_count_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_stock_counts).post(handlers::create_stock_count),
        )
        .route("/:count_id", get(handlers::get_stock_count))
        .route("/:count_id/scan", post(handlers::scan_stock_count))
        .route(
            "/:count_id/lines/:line_id",
            put(handlers::update_stock_count_line).delete(handlers::remove_stock_count_line),
        )
        .route("/:count_id/apply", post(handlers::apply_stock_count))
        .route("/:count_id/cancel", post(handlers::cancel_stock_count))
        .route_layer(middleware::from_fn(auth_middleware))
}
