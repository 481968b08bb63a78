//! Business logic services for the Retail Operations Platform

pub mod audit;
pub mod events;
pub mod idempotency;
pub mod ledger;
pub mod limits;
pub mod lots;
pub mod purchase_orders;
pub mod stock_counts;
pub mod units;

pub use events::EventPublisher;
pub use ledger::LedgerService;
pub use lots::LotService;
pub use purchase_orders::PurchaseOrderService;
pub use stock_counts::StockCountService;
pub use units::UnitService;
