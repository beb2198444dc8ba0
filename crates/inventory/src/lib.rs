//! Inventory domain module: stock ledger rules and stocktaking.
//!
//! This crate contains business rules for inventory, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). The infra crate
//! loads records, calls into these rules inside a store transaction and
//! persists the outcome.

pub mod audit;
pub mod catalog;
pub mod movement;
pub mod reconciliation;
pub mod stocktaking;

pub use audit::{SessionCancelled, SessionCompleted, SessionStarted, StocktakingEvent};
pub use catalog::{CatalogItem, Location};
pub use movement::{
    Direction, MovementMeta, MovementType, StockBalance, StockKey, StockMovement, ensure_issue_covered,
};
pub use reconciliation::{
    CompletionSummary, PlannedAdjustment, ReconciliationPlan, SessionProgress, plan_reconciliation,
};
pub use stocktaking::{
    LineKey, StocktakingLine, StocktakingScope, StocktakingSession, StocktakingStatus, build_lines,
};
