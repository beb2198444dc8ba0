//! Stocktaking session workflow: start, count, cancel, and read-side queries.
//!
//! Completion lives in [`crate::reconciliation::ReconciliationEngine`].

use std::sync::Arc;

use tracing::{debug, info, instrument};

use stockroom_core::{Clock, DomainError, ItemId, LocationId, StocktakingId, SystemClock, TenantId, UserId};
use stockroom_inventory::{
    LineKey, SessionProgress, StocktakingEvent, StocktakingLine, StocktakingScope, StocktakingSession,
    StocktakingStatus, build_lines,
};

use crate::audit::AuditSink;
use crate::error::ServiceError;
use crate::store::{InventoryStore, StoreTx};

/// Load a session of the tenant or fail with `NotFound`.
pub(crate) fn load_session(
    tx: &mut dyn StoreTx,
    tenant_id: TenantId,
    session_id: StocktakingId,
) -> Result<StocktakingSession, ServiceError> {
    let session = tx
        .session(tenant_id, session_id)?
        .ok_or_else(|| DomainError::not_found(format!("stocktaking session {session_id}")))?;
    session.ensure_tenant(tenant_id)?;
    Ok(session)
}

/// Session lifecycle service.
pub struct StocktakingService<S> {
    store: S,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl<S> StocktakingService<S>
where
    S: InventoryStore,
{
    pub fn new(store: S, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_clock(store, audit, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { store, audit, clock }
    }

    /// Snapshot expected quantities for the scope and open a session.
    ///
    /// Fails with `EmptyScope` (and persists nothing) when no line qualifies.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, operator_id = %operator_id), err)]
    pub fn start(
        &self,
        tenant_id: TenantId,
        operator_id: UserId,
        scope: StocktakingScope,
    ) -> Result<StocktakingId, ServiceError> {
        let now = self.clock.now();

        let (session, line_count) = self.store.in_transaction(|tx| {
            if let Some(location_id) = scope.location_id {
                if tx.location(tenant_id, location_id)?.is_none() {
                    return Err(DomainError::not_found(format!("location {location_id}")).into());
                }
            }
            if let Some(category_id) = scope.category_id {
                if !tx.category_exists(tenant_id, category_id)? {
                    return Err(DomainError::not_found(format!("category {category_id}")).into());
                }
            }

            let mut items = tx.active_items(tenant_id, scope.category_id)?;
            if scope.location_id.is_none() {
                for item in &mut items {
                    if let Some(home) = item.home_location_id {
                        if tx.location(tenant_id, home)?.is_none() {
                            debug!(item_id = %item.id, location_id = %home, "home location unknown; ignored");
                            item.home_location_id = None;
                        }
                    }
                }
            }
            let balances = tx.balances(tenant_id, scope.location_id)?;

            let session = StocktakingSession::start(StocktakingId::new(), tenant_id, scope, operator_id, now);
            let lines = build_lines(session.id, &scope, &items, &balances)?;

            tx.insert_session(&session)?;
            tx.insert_lines(&lines)?;
            Ok::<_, ServiceError>((session, lines.len()))
        })?;

        info!(session_id = %session.id, line_count, "stocktaking session started");
        self.audit.record(StocktakingEvent::started(&session, line_count));
        Ok(session.id)
    }

    /// Enter or overwrite the count of one line. Never touches the ledger.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, note), fields(tenant_id = %tenant_id, session_id = %session_id, item_id = %item_id), err)]
    pub fn record_count(
        &self,
        tenant_id: TenantId,
        session_id: StocktakingId,
        item_id: ItemId,
        location_id: Option<LocationId>,
        counted_quantity: i64,
        note: Option<String>,
        operator_id: UserId,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now();

        self.store.in_transaction(|tx| {
            let session = load_session(tx, tenant_id, session_id)?;
            session.ensure_in_progress()?;

            let key = LineKey { item_id, location_id };
            let mut line = tx
                .line(session_id, key)?
                .ok_or_else(|| DomainError::not_found(format!("stocktaking line for item {item_id}")))?;

            line.record_count(counted_quantity, note, operator_id, now)?;
            tx.update_line(&line)?;
            Ok(())
        })
    }

    /// Abandon a session. Never has a ledger effect.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id), err)]
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        session_id: StocktakingId,
        operator_id: UserId,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now();

        let session = self.store.in_transaction(|tx| {
            let mut session = load_session(tx, tenant_id, session_id)?;
            session.cancel(operator_id, now)?;
            tx.update_session(&session)?;
            Ok::<_, ServiceError>(session)
        })?;

        info!("stocktaking session cancelled");
        self.audit.record(StocktakingEvent::cancelled(&session, operator_id, now));
        Ok(())
    }

    pub fn get_session(
        &self,
        tenant_id: TenantId,
        session_id: StocktakingId,
    ) -> Result<StocktakingSession, ServiceError> {
        self.store
            .in_transaction(|tx| load_session(tx, tenant_id, session_id))
    }

    pub fn lines(&self, tenant_id: TenantId, session_id: StocktakingId) -> Result<Vec<StocktakingLine>, ServiceError> {
        self.store.in_transaction(|tx| {
            load_session(tx, tenant_id, session_id)?;
            Ok(tx.lines(session_id)?)
        })
    }

    /// Sessions of the tenant, newest first.
    pub fn list_sessions(
        &self,
        tenant_id: TenantId,
        status: Option<StocktakingStatus>,
    ) -> Result<Vec<StocktakingSession>, ServiceError> {
        self.store
            .in_transaction(|tx| Ok(tx.sessions(tenant_id, status)?))
    }

    /// Counted vs. uncounted lines and what completion would write now.
    pub fn progress(&self, tenant_id: TenantId, session_id: StocktakingId) -> Result<SessionProgress, ServiceError> {
        let lines = self.lines(tenant_id, session_id)?;
        Ok(SessionProgress::of(&lines))
    }
}
