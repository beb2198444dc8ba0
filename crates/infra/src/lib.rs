//! Infrastructure layer: stores, services, audit and configuration.
//!
//! ```text
//! StocktakingService ─┐
//! ReconciliationEngine ┼─ InventoryStore::in_transaction ─ StoreTx (memory | postgres)
//! StockLedger ────────┘
//!         │ after commit
//!         └─ AuditSink ─ EventBus
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod reconciliation;
pub mod stocktaking;
pub mod store;

pub use audit::{AuditSink, BusAuditSink, InMemoryAuditSink, NoopAuditSink};
pub use config::{DatabaseConfig, LoggingConfig, StockroomConfig};
pub use error::{ServiceError, StoreError};
pub use ledger::StockLedger;
pub use reconciliation::ReconciliationEngine;
pub use stocktaking::StocktakingService;
pub use store::{InMemoryStore, InventoryStore, PostgresStore, StoreTx};

/// Initialize logging from the loaded configuration.
pub fn init_logging(config: &StockroomConfig) {
    stockroom_observability::init_with(&config.logging);
}

#[cfg(test)]
mod integration_tests;
