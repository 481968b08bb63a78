//! Shared types and models for the Retail Operations Platform
//!
//! This crate contains the domain types shared between the backend and any
//! future clients of the platform: catalog and ledger models, workflow
//! status enums, and the pure domain logic (unit resolution, receipt
//! planning, cost averaging) the backend services delegate to.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
