use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use stockroom_core::{CategoryId, ItemId, LocationId, StocktakingId, TenantId};
use stockroom_inventory::{
    CatalogItem, LineKey, Location, StockBalance, StockKey, StockMovement, StocktakingLine, StocktakingSession,
    StocktakingStatus,
};

use tracing::warn;

use super::{InventoryStore, StoreTx};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<(TenantId, ItemId), CatalogItem>,
    locations: HashMap<(TenantId, LocationId), Location>,
    categories: HashSet<(TenantId, CategoryId)>,
    balances: BTreeMap<StockKey, StockBalance>,
    movements: Vec<StockMovement>,
    sessions: HashMap<StocktakingId, StocktakingSession>,
    lines: HashMap<StocktakingId, Vec<StocktakingLine>>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Transactions are serialized by a mutex and write
/// straight into the live state while recording an undo log; a failing
/// closure replays the log backwards, so it leaves nothing behind. A
/// transaction costs what it touches, never a copy of the whole store.
///
/// Supports fault injection: [`InMemoryStore::fail_nth_movement_write`] makes
/// the N-th movement insert of a later transaction fail.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    movement_fault: Mutex<Option<usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed catalog data (owned by the CRUD screens in production).
    pub fn add_item(&self, item: CatalogItem) {
        match self.state.lock() {
            Ok(mut state) => {
                state.items.insert((item.tenant_id, item.id), item);
            }
            Err(_) => warn!("add_item: store lock poisoned; seed dropped"),
        }
    }

    pub fn add_location(&self, location: Location) {
        match self.state.lock() {
            Ok(mut state) => {
                state.locations.insert((location.tenant_id, location.id), location);
            }
            Err(_) => warn!("add_location: store lock poisoned; seed dropped"),
        }
    }

    pub fn add_category(&self, tenant_id: TenantId, category_id: CategoryId) {
        match self.state.lock() {
            Ok(mut state) => {
                state.categories.insert((tenant_id, category_id));
            }
            Err(_) => warn!("add_category: store lock poisoned; seed dropped"),
        }
    }

    /// Fail the `n`-th (1-based) movement insert of the next transaction that
    /// writes that many movements. Fires once.
    pub fn fail_nth_movement_write(&self, n: usize) {
        match self.movement_fault.lock() {
            Ok(mut fault) => *fault = Some(n),
            Err(_) => warn!("fault lock poisoned; movement fault not armed"),
        }
    }

    /// Snapshot of every movement, for assertions.
    pub fn all_movements(&self) -> Vec<StockMovement> {
        self.state.lock().map(|s| s.movements.clone()).unwrap_or_default()
    }

    /// Snapshot of every balance, for assertions.
    pub fn all_balances(&self) -> Vec<StockBalance> {
        self.state
            .lock()
            .map(|s| s.balances.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl InventoryStore for InMemoryStore {
    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut live = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let fail_at = self.movement_fault.lock().map(|f| *f).unwrap_or(None);

        let mut tx = MemoryTx {
            state: &mut *live,
            undo: Vec::new(),
            fail_at,
            movement_writes: 0,
            fault_fired: false,
        };

        let result = work(&mut tx);

        if tx.fault_fired {
            if let Ok(mut fault) = self.movement_fault.lock() {
                *fault = None;
            }
        }

        if result.is_err() {
            tx.rollback();
        }
        result
    }
}

/// Inverse of one write made inside a transaction.
enum Undo {
    Balance(StockKey, Option<StockBalance>),
    Movement,
    SessionInserted(StocktakingId),
    SessionUpdated(StocktakingSession),
    LineInserted(StocktakingId),
    LineUpdated(StocktakingId, usize, StocktakingLine),
}

struct MemoryTx<'a> {
    state: &'a mut MemoryState,
    undo: Vec<Undo>,
    fail_at: Option<usize>,
    movement_writes: usize,
    fault_fired: bool,
}

impl MemoryTx<'_> {
    fn rollback(&mut self) {
        let state = &mut *self.state;
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Balance(key, Some(previous)) => {
                    state.balances.insert(key, previous);
                }
                Undo::Balance(key, None) => {
                    state.balances.remove(&key);
                }
                Undo::Movement => {
                    state.movements.pop();
                }
                Undo::SessionInserted(id) => {
                    state.sessions.remove(&id);
                }
                Undo::SessionUpdated(previous) => {
                    state.sessions.insert(previous.id, previous);
                }
                Undo::LineInserted(session_id) => {
                    if let Some(lines) = state.lines.get_mut(&session_id) {
                        lines.pop();
                        if lines.is_empty() {
                            state.lines.remove(&session_id);
                        }
                    }
                }
                Undo::LineUpdated(session_id, index, previous) => {
                    if let Some(slot) = state.lines.get_mut(&session_id).and_then(|l| l.get_mut(index)) {
                        *slot = previous;
                    }
                }
            }
        }
    }
}

impl StoreTx for MemoryTx<'_> {
    fn item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        Ok(self.state.items.get(&(tenant_id, item_id)).cloned())
    }

    fn location(&mut self, tenant_id: TenantId, location_id: LocationId) -> Result<Option<Location>, StoreError> {
        Ok(self.state.locations.get(&(tenant_id, location_id)).cloned())
    }

    fn category_exists(&mut self, tenant_id: TenantId, category_id: CategoryId) -> Result<bool, StoreError> {
        Ok(self.state.categories.contains(&(tenant_id, category_id)))
    }

    fn active_items(
        &mut self,
        tenant_id: TenantId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let mut items: Vec<CatalogItem> = self
            .state
            .items
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.active && i.matches_category(category_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    fn balance(&mut self, key: StockKey) -> Result<Option<StockBalance>, StoreError> {
        Ok(self.state.balances.get(&key).cloned())
    }

    fn balances(
        &mut self,
        tenant_id: TenantId,
        location_id: Option<LocationId>,
    ) -> Result<Vec<StockBalance>, StoreError> {
        Ok(self
            .state
            .balances
            .values()
            .filter(|b| b.tenant_id == tenant_id && location_id.is_none_or(|l| b.location_id == l))
            .cloned()
            .collect())
    }

    fn balances_for_item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Vec<StockBalance>, StoreError> {
        Ok(self
            .state
            .balances
            .values()
            .filter(|b| b.tenant_id == tenant_id && b.item_id == item_id)
            .cloned()
            .collect())
    }

    fn add_to_balance(&mut self, key: StockKey, delta: i64) -> Result<StockBalance, StoreError> {
        let previous = self.state.balances.get(&key).cloned();
        let quantity = previous
            .as_ref()
            .map_or(0, |b| b.quantity)
            .checked_add(delta)
            .ok_or_else(|| StoreError::Constraint(format!("balance of item {} out of range", key.item_id)))?;

        let balance = StockBalance {
            quantity,
            ..StockBalance::zero(key)
        };
        self.state.balances.insert(key, balance.clone());
        self.undo.push(Undo::Balance(key, previous));
        Ok(balance)
    }

    fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.movement_writes += 1;
        if self.fail_at == Some(self.movement_writes) {
            self.fault_fired = true;
            return Err(StoreError::Fault(format!(
                "movement write #{} rejected",
                self.movement_writes
            )));
        }
        if movement.quantity <= 0 {
            return Err(StoreError::Constraint("movement quantity must be positive".to_string()));
        }
        self.state.movements.push(movement.clone());
        self.undo.push(Undo::Movement);
        Ok(())
    }

    fn movements(&mut self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .state
            .movements
            .iter()
            .filter(|m| m.key() == key)
            .cloned()
            .collect())
    }

    fn insert_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError> {
        if self.state.sessions.contains_key(&session.id) {
            return Err(StoreError::Constraint(format!("stocktaking session {} already exists", session.id)));
        }
        self.state.sessions.insert(session.id, session.clone());
        self.undo.push(Undo::SessionInserted(session.id));
        Ok(())
    }

    fn update_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError> {
        match self.state.sessions.get_mut(&session.id) {
            Some(existing) if existing.tenant_id == session.tenant_id => {
                let previous = std::mem::replace(existing, session.clone());
                self.undo.push(Undo::SessionUpdated(previous));
                Ok(())
            }
            _ => Err(StoreError::Constraint(format!("stocktaking session {} does not exist", session.id))),
        }
    }

    fn session(
        &mut self,
        tenant_id: TenantId,
        session_id: StocktakingId,
    ) -> Result<Option<StocktakingSession>, StoreError> {
        Ok(self
            .state
            .sessions
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    fn sessions(
        &mut self,
        tenant_id: TenantId,
        status: Option<StocktakingStatus>,
    ) -> Result<Vec<StocktakingSession>, StoreError> {
        let mut sessions: Vec<StocktakingSession> = self
            .state
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && status.is_none_or(|st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    fn insert_lines(&mut self, lines: &[StocktakingLine]) -> Result<(), StoreError> {
        for line in lines {
            let duplicate = self
                .state
                .lines
                .get(&line.session_id)
                .is_some_and(|existing| existing.iter().any(|l| l.key() == line.key()));
            if duplicate {
                return Err(StoreError::Constraint(format!(
                    "duplicate stocktaking line for item {} in session {}",
                    line.item_id, line.session_id
                )));
            }
            self.state.lines.entry(line.session_id).or_default().push(line.clone());
            self.undo.push(Undo::LineInserted(line.session_id));
        }
        Ok(())
    }

    fn lines(&mut self, session_id: StocktakingId) -> Result<Vec<StocktakingLine>, StoreError> {
        Ok(self.state.lines.get(&session_id).cloned().unwrap_or_default())
    }

    fn line(&mut self, session_id: StocktakingId, key: LineKey) -> Result<Option<StocktakingLine>, StoreError> {
        Ok(self
            .state
            .lines
            .get(&session_id)
            .and_then(|lines| lines.iter().find(|l| l.key() == key))
            .cloned())
    }

    fn update_line(&mut self, line: &StocktakingLine) -> Result<(), StoreError> {
        let lines = self.state.lines.get_mut(&line.session_id);
        let (index, slot) = lines
            .and_then(|lines| lines.iter_mut().enumerate().find(|(_, l)| l.key() == line.key()))
            .ok_or_else(|| StoreError::Constraint(format!("stocktaking line for item {} does not exist", line.item_id)))?;
        let previous = std::mem::replace(slot, line.clone());
        self.undo.push(Undo::LineUpdated(line.session_id, index, previous));
        Ok(())
    }
}
