//! Relational store boundary.
//!
//! Services never talk to a database directly: they run a closure inside
//! [`InventoryStore::in_transaction`] and use the [`StoreTx`] handed to them.
//! Everything the closure writes is committed when it returns `Ok` and rolled
//! back when it returns `Err`.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use stockroom_core::{CategoryId, ItemId, LocationId, StocktakingId, TenantId};
use stockroom_inventory::{
    CatalogItem, LineKey, Location, StockBalance, StockKey, StockMovement, StocktakingLine, StocktakingSession,
    StocktakingStatus,
};

use crate::error::StoreError;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Operations available inside one store transaction.
///
/// Every read is tenant-scoped: a record that belongs to another tenant is
/// reported as absent.
pub trait StoreTx {
    fn item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Option<CatalogItem>, StoreError>;

    fn location(&mut self, tenant_id: TenantId, location_id: LocationId) -> Result<Option<Location>, StoreError>;

    fn category_exists(&mut self, tenant_id: TenantId, category_id: CategoryId) -> Result<bool, StoreError>;

    /// Active items, optionally restricted to one category, ordered by name.
    fn active_items(
        &mut self,
        tenant_id: TenantId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<CatalogItem>, StoreError>;

    fn balance(&mut self, key: StockKey) -> Result<Option<StockBalance>, StoreError>;

    /// Balances of the tenant, optionally restricted to one location.
    fn balances(
        &mut self,
        tenant_id: TenantId,
        location_id: Option<LocationId>,
    ) -> Result<Vec<StockBalance>, StoreError>;

    fn balances_for_item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Vec<StockBalance>, StoreError>;

    /// Add `delta` to the balance, creating it at zero first if absent.
    fn add_to_balance(&mut self, key: StockKey, delta: i64) -> Result<StockBalance, StoreError>;

    fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Movements for one key in insertion order.
    fn movements(&mut self, key: StockKey) -> Result<Vec<StockMovement>, StoreError>;

    fn insert_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError>;

    fn update_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError>;

    fn session(
        &mut self,
        tenant_id: TenantId,
        session_id: StocktakingId,
    ) -> Result<Option<StocktakingSession>, StoreError>;

    /// Sessions of the tenant, newest first.
    fn sessions(
        &mut self,
        tenant_id: TenantId,
        status: Option<StocktakingStatus>,
    ) -> Result<Vec<StocktakingSession>, StoreError>;

    /// Fails with `Constraint` on a duplicate (session, item, location).
    fn insert_lines(&mut self, lines: &[StocktakingLine]) -> Result<(), StoreError>;

    fn lines(&mut self, session_id: StocktakingId) -> Result<Vec<StocktakingLine>, StoreError>;

    fn line(&mut self, session_id: StocktakingId, key: LineKey) -> Result<Option<StocktakingLine>, StoreError>;

    fn update_line(&mut self, line: &StocktakingLine) -> Result<(), StoreError>;
}

/// Transactional relational store.
pub trait InventoryStore: Send + Sync {
    /// Run `work` in one transaction: commit on `Ok`, roll back on `Err`.
    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore,
{
    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).in_transaction(work)
    }
}
