//! HTTP handlers for the Retail Operations Platform

pub mod health;
pub mod inventory;
pub mod purchase_orders;
pub mod stock_counts;

pub use health::*;
pub use inventory::*;
pub use purchase_orders::*;
pub use stock_counts::*;
