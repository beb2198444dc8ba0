use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{LocationId, StocktakingId, TenantId, UserId};
use stockroom_events::{Event, TenantScoped};

use crate::reconciliation::CompletionSummary;
use crate::stocktaking::StocktakingSession;

/// Audit: a session was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub tenant_id: TenantId,
    pub session_id: StocktakingId,
    pub operator_id: UserId,
    pub location_id: Option<LocationId>,
    pub line_count: usize,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

/// Audit: a session was completed and reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCompleted {
    pub tenant_id: TenantId,
    pub session_id: StocktakingId,
    pub operator_id: UserId,
    pub result: CompletionSummary,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

/// Audit: a session was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCancelled {
    pub tenant_id: TenantId,
    pub session_id: StocktakingId,
    pub operator_id: UserId,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

/// One audit event per session state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StocktakingEvent {
    Started(SessionStarted),
    Completed(SessionCompleted),
    Cancelled(SessionCancelled),
}

impl StocktakingEvent {
    pub fn started(session: &StocktakingSession, line_count: usize) -> Self {
        let place = match session.location_id {
            Some(location_id) => format!("location {location_id}"),
            None => "all locations".to_string(),
        };
        StocktakingEvent::Started(SessionStarted {
            tenant_id: session.tenant_id,
            session_id: session.id,
            operator_id: session.started_by,
            location_id: session.location_id,
            line_count,
            summary: format!("Stocktaking {} started for {place} with {line_count} lines", session.id),
            occurred_at: session.started_at,
        })
    }

    pub fn completed(
        session: &StocktakingSession,
        operator_id: UserId,
        result: CompletionSummary,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        StocktakingEvent::Completed(SessionCompleted {
            tenant_id: session.tenant_id,
            session_id: session.id,
            operator_id,
            result,
            summary: format!(
                "Stocktaking {} completed: {} lines adjusted (total difference {}), {} uncounted",
                session.id, result.lines_adjusted, result.total_absolute_difference, result.lines_skipped_uncounted
            ),
            occurred_at,
        })
    }

    pub fn cancelled(session: &StocktakingSession, operator_id: UserId, occurred_at: DateTime<Utc>) -> Self {
        StocktakingEvent::Cancelled(SessionCancelled {
            tenant_id: session.tenant_id,
            session_id: session.id,
            operator_id,
            summary: format!("Stocktaking {} cancelled", session.id),
            occurred_at,
        })
    }

    pub fn session_id(&self) -> StocktakingId {
        match self {
            StocktakingEvent::Started(e) => e.session_id,
            StocktakingEvent::Completed(e) => e.session_id,
            StocktakingEvent::Cancelled(e) => e.session_id,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            StocktakingEvent::Started(e) => &e.summary,
            StocktakingEvent::Completed(e) => &e.summary,
            StocktakingEvent::Cancelled(e) => &e.summary,
        }
    }
}

impl Event for StocktakingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StocktakingEvent::Started(_) => "stocktaking_start",
            StocktakingEvent::Completed(_) => "stocktaking_complete",
            StocktakingEvent::Cancelled(_) => "stocktaking_cancel",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StocktakingEvent::Started(e) => e.occurred_at,
            StocktakingEvent::Completed(e) => e.occurred_at,
            StocktakingEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl TenantScoped for StocktakingEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            StocktakingEvent::Started(e) => e.tenant_id,
            StocktakingEvent::Completed(e) => e.tenant_id,
            StocktakingEvent::Cancelled(e) => e.tenant_id,
        }
    }
}
