//! Retail Operations Platform - Backend
//!
//! Multi-tenant retail operations backend: the transactional stock ledger
//! and the purchasing and stock-count workflows built on top of it.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

pub use config::Config;

use services::events::EventPublisher;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub events: EventPublisher,
}
