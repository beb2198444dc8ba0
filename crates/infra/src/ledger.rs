//! Stock ledger: append-only movements plus the running balance per key.

use chrono::NaiveDate;
use tracing::{debug, instrument};

use stockroom_core::{DomainError, ItemId, MovementId, TenantId, UserId};
use stockroom_inventory::{MovementMeta, StockBalance, StockKey, StockMovement, ensure_issue_covered};

use crate::error::ServiceError;
use crate::store::{InventoryStore, StoreTx};

/// Apply a signed delta inside an open transaction.
///
/// Inserts the movement and adds the delta to the balance (created at zero if
/// absent). The item and the location must belong to the key's tenant.
pub fn apply_delta_in(
    tx: &mut dyn StoreTx,
    key: StockKey,
    signed_delta: i64,
    meta: MovementMeta,
) -> Result<StockMovement, ServiceError> {
    let movement = StockMovement::record(MovementId::new(), key, signed_delta, meta)?;

    if tx.item(key.tenant_id, key.item_id)?.is_none() {
        return Err(DomainError::not_found(format!("item {}", key.item_id)).into());
    }
    if tx.location(key.tenant_id, key.location_id)?.is_none() {
        return Err(DomainError::not_found(format!("location {}", key.location_id)).into());
    }

    tx.insert_movement(&movement)?;
    let balance = tx.add_to_balance(key, signed_delta)?;

    debug!(
        item_id = %key.item_id,
        location_id = %key.location_id,
        movement_type = movement.movement_type.as_str(),
        delta = signed_delta,
        balance = balance.quantity,
        "ledger movement applied"
    );
    Ok(movement)
}

/// Ledger service. Each write is its own transaction.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
}

impl<S> StockLedger<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self, meta), fields(tenant_id = %key.tenant_id), err)]
    pub fn apply_delta(
        &self,
        key: StockKey,
        signed_delta: i64,
        meta: MovementMeta,
    ) -> Result<StockMovement, ServiceError> {
        self.store
            .in_transaction(|tx| apply_delta_in(tx, key, signed_delta, meta))
    }

    /// Goods in.
    #[instrument(skip(self), fields(tenant_id = %key.tenant_id), err)]
    pub fn receive(
        &self,
        key: StockKey,
        quantity: i64,
        occurred_on: NaiveDate,
        recorded_by: UserId,
    ) -> Result<StockMovement, ServiceError> {
        self.apply_delta(key, quantity, MovementMeta::receipt(occurred_on, recorded_by))
    }

    /// Goods out. Fails with `InsufficientStock` rather than going negative.
    #[instrument(skip(self), fields(tenant_id = %key.tenant_id), err)]
    pub fn issue(
        &self,
        key: StockKey,
        quantity: i64,
        occurred_on: NaiveDate,
        recorded_by: UserId,
    ) -> Result<StockMovement, ServiceError> {
        if quantity <= 0 {
            return Err(DomainError::validation("issued quantity must be positive").into());
        }

        self.store.in_transaction(|tx| {
            let available = tx.balance(key)?.map(|b| b.quantity).unwrap_or(0);
            ensure_issue_covered(available, quantity)?;
            apply_delta_in(tx, key, -quantity, MovementMeta::issue(occurred_on, recorded_by))
        })
    }

    /// Current quantity; zero when nothing was ever booked.
    pub fn balance(&self, key: StockKey) -> Result<i64, ServiceError> {
        self.store
            .in_transaction(|tx| Ok(tx.balance(key)?.map(|b| b.quantity).unwrap_or(0)))
    }

    pub fn balances_for_item(&self, tenant_id: TenantId, item_id: ItemId) -> Result<Vec<StockBalance>, ServiceError> {
        self.store
            .in_transaction(|tx| Ok(tx.balances_for_item(tenant_id, item_id)?))
    }

    /// Movements for one key in the order they were booked.
    pub fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, ServiceError> {
        self.store.in_transaction(|tx| Ok(tx.movements(key)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockroom_core::LocationId;
    use stockroom_inventory::{CatalogItem, Direction, Location, MovementType};

    use crate::store::InMemoryStore;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn setup() -> (StockLedger<Arc<InMemoryStore>>, StockKey) {
        let store = Arc::new(InMemoryStore::new());
        let tenant_id = TenantId::new();
        let location = Location {
            id: LocationId::new(),
            tenant_id,
            name: "Main".to_string(),
        };
        let item = CatalogItem {
            id: ItemId::new(),
            tenant_id,
            name: "Bolt".to_string(),
            category_id: None,
            active: true,
            home_location_id: None,
        };
        let key = StockKey::new(tenant_id, item.id, location.id);
        store.add_location(location);
        store.add_item(item);
        (StockLedger::new(store), key)
    }

    #[test]
    fn receive_then_issue() {
        let (ledger, key) = setup();
        let user = UserId::new();

        ledger.receive(key, 10, day(), user).unwrap();
        let out = ledger.issue(key, 4, day(), user).unwrap();

        assert_eq!(out.movement_type, MovementType::Issue);
        assert_eq!(out.direction, Direction::Outbound);
        assert_eq!(out.quantity, 4);
        assert_eq!(ledger.balance(key).unwrap(), 6);
        assert_eq!(ledger.movements(key).unwrap().len(), 2);
    }

    #[test]
    fn issue_beyond_balance_is_rejected_without_writes() {
        let (ledger, key) = setup();
        ledger.receive(key, 2, day(), UserId::new()).unwrap();

        let err = ledger.issue(key, 3, day(), UserId::new()).unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientStock { available: 2, requested: 3 })
        ));
        assert_eq!(ledger.balance(key).unwrap(), 2);
        assert_eq!(ledger.movements(key).unwrap().len(), 1);
    }

    #[test]
    fn adjustment_may_go_negative() {
        let (ledger, key) = setup();
        ledger
            .apply_delta(key, -5, MovementMeta::adjustment(day(), UserId::new()))
            .unwrap();
        assert_eq!(ledger.balance(key).unwrap(), -5);
    }

    #[test]
    fn zero_delta_is_a_validation_error() {
        let (ledger, key) = setup();
        let err = ledger
            .apply_delta(key, 0, MovementMeta::adjustment(day(), UserId::new()))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
        assert!(ledger.movements(key).unwrap().is_empty());
    }

    #[test]
    fn foreign_item_or_location_is_not_found() {
        let (ledger, key) = setup();
        let user = UserId::new();

        let other_tenant = StockKey::new(TenantId::new(), key.item_id, key.location_id);
        assert!(ledger.receive(other_tenant, 1, day(), user).unwrap_err().is_not_found());

        let unknown_location = StockKey::new(key.tenant_id, key.item_id, LocationId::new());
        assert!(ledger.receive(unknown_location, 1, day(), user).unwrap_err().is_not_found());

        assert_eq!(ledger.balance(key).unwrap(), 0);
    }

    #[test]
    fn unknown_balance_reads_as_zero() {
        let (ledger, key) = setup();
        assert_eq!(ledger.balance(key).unwrap(), 0);
        assert!(ledger.balances_for_item(key.tenant_id, key.item_id).unwrap().is_empty());
    }
}
