//! Session completion: apply counted differences to the ledger.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use stockroom_core::{Clock, StocktakingId, SystemClock, TenantId, UserId};
use stockroom_inventory::{
    CompletionSummary, MovementMeta, StockKey, StocktakingEvent, plan_reconciliation,
};

use crate::audit::AuditSink;
use crate::error::ServiceError;
use crate::ledger::apply_delta_in;
use crate::stocktaking::load_session;
use crate::store::InventoryStore;

/// Completes sessions.
///
/// Adjustments and the status change commit together or not at all; the
/// session stays in progress when any ledger write fails.
pub struct ReconciliationEngine<S> {
    store: S,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl<S> ReconciliationEngine<S>
where
    S: InventoryStore,
{
    pub fn new(store: S, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_clock(store, audit, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { store, audit, clock }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id), err)]
    pub fn complete(
        &self,
        tenant_id: TenantId,
        session_id: StocktakingId,
        operator_id: UserId,
    ) -> Result<CompletionSummary, ServiceError> {
        let now = self.clock.now();

        let (session, summary) = self.store.in_transaction(|tx| {
            let mut session = load_session(tx, tenant_id, session_id)?;
            session.ensure_in_progress()?;

            let lines = tx.lines(session_id)?;
            let plan = plan_reconciliation(&lines);

            if plan.lines_skipped_unresolved > 0 {
                warn!(
                    lines = plan.lines_skipped_unresolved,
                    "counted lines without a resolved location were not adjusted"
                );
            }

            for adjustment in &plan.adjustments {
                let key = StockKey::new(tenant_id, adjustment.item_id, adjustment.location_id);
                let meta = MovementMeta::stocktaking_adjustment(session_id, now.date_naive(), operator_id);
                apply_delta_in(tx, key, adjustment.difference, meta)?;
            }

            session.complete(operator_id, now)?;
            tx.update_session(&session)?;
            Ok::<_, ServiceError>((session, plan.summary()))
        })?;

        info!(
            lines_adjusted = summary.lines_adjusted,
            total_absolute_difference = summary.total_absolute_difference,
            lines_skipped_uncounted = summary.lines_skipped_uncounted,
            "stocktaking session completed"
        );
        self.audit
            .record(StocktakingEvent::completed(&session, operator_id, summary, now));
        Ok(summary)
    }
}
