//! Audit trail for stocktaking transitions.
//!
//! Audit is emitted after the store transaction committed and is
//! fire-and-forget: a sink failure is logged and never undoes the operation.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use stockroom_events::{Event, EventBus, TenantScoped};
use stockroom_inventory::StocktakingEvent;

/// Receives one event per session state transition.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: StocktakingEvent);
}

impl<A> AuditSink for Arc<A>
where
    A: AuditSink + ?Sized,
{
    fn record(&self, event: StocktakingEvent) {
        (**self).record(event)
    }
}

/// Publishes audit events on an [`EventBus`].
#[derive(Debug)]
pub struct BusAuditSink<B> {
    bus: B,
}

impl<B> BusAuditSink<B>
where
    B: EventBus<StocktakingEvent>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> AuditSink for BusAuditSink<B>
where
    B: EventBus<StocktakingEvent>,
{
    fn record(&self, event: StocktakingEvent) {
        let event_type = event.event_type();
        let session_id = event.session_id();
        let tenant_id = event.tenant_id();

        match self.bus.publish(event) {
            Ok(()) => debug!(%tenant_id, %session_id, event_type, "audit event published"),
            Err(e) => warn!(%tenant_id, %session_id, event_type, error = ?e, "audit publish failed"),
        }
    }
}

/// Keeps every event in memory. For tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<StocktakingEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<StocktakingEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: StocktakingEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(_) => warn!(session_id = %event.session_id(), "audit sink lock poisoned; event dropped"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: StocktakingEvent) {}
}
