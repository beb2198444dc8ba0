use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ItemId, LocationId, MovementId, StocktakingId, TenantId, UserId};

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Receipt,
    Issue,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Issue => "issue",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "receipt" => Ok(MovementType::Receipt),
            "issue" => Ok(MovementType::Issue),
            "adjustment" => Ok(MovementType::Adjustment),
            other => Err(DomainError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

/// Which way stock moved. Quantities are stored unsigned; the direction carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn of(signed_delta: i64) -> Self {
        if signed_delta < 0 {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(DomainError::validation(format!("unknown movement direction '{other}'"))),
        }
    }
}

/// Caller-supplied metadata for a ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMeta {
    pub movement_type: MovementType,
    pub occurred_on: NaiveDate,
    pub recorded_by: UserId,
    pub note: Option<String>,
    pub session_id: Option<StocktakingId>,
}

impl MovementMeta {
    pub fn new(movement_type: MovementType, occurred_on: NaiveDate, recorded_by: UserId) -> Self {
        Self {
            movement_type,
            occurred_on,
            recorded_by,
            note: None,
            session_id: None,
        }
    }

    pub fn receipt(occurred_on: NaiveDate, recorded_by: UserId) -> Self {
        Self::new(MovementType::Receipt, occurred_on, recorded_by)
    }

    pub fn issue(occurred_on: NaiveDate, recorded_by: UserId) -> Self {
        Self::new(MovementType::Issue, occurred_on, recorded_by)
    }

    pub fn adjustment(occurred_on: NaiveDate, recorded_by: UserId) -> Self {
        Self::new(MovementType::Adjustment, occurred_on, recorded_by)
    }

    /// Adjustment produced by completing a stocktaking session.
    pub fn stocktaking_adjustment(session_id: StocktakingId, occurred_on: NaiveDate, recorded_by: UserId) -> Self {
        Self::adjustment(occurred_on, recorded_by)
            .with_note(format!("stocktaking {session_id}"))
            .for_session(session_id)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn for_session(mut self, session_id: StocktakingId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub movement_type: MovementType,
    pub direction: Direction,
    /// Always positive.
    pub quantity: i64,
    pub occurred_on: NaiveDate,
    pub recorded_by: UserId,
    pub note: Option<String>,
    pub session_id: Option<StocktakingId>,
}

impl StockMovement {
    /// Validate a signed delta against its metadata and build the ledger row.
    pub fn record(
        id: MovementId,
        key: StockKey,
        signed_delta: i64,
        meta: MovementMeta,
    ) -> DomainResult<Self> {
        if signed_delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        let quantity = signed_delta
            .checked_abs()
            .ok_or_else(|| DomainError::validation("delta out of range"))?;

        let direction = Direction::of(signed_delta);
        match (meta.movement_type, direction) {
            (MovementType::Receipt, Direction::Outbound) => {
                return Err(DomainError::validation("receipt must increase stock"));
            }
            (MovementType::Issue, Direction::Inbound) => {
                return Err(DomainError::validation("issue must decrease stock"));
            }
            _ => {}
        }

        Ok(Self {
            id,
            tenant_id: key.tenant_id,
            item_id: key.item_id,
            location_id: key.location_id,
            movement_type: meta.movement_type,
            direction,
            quantity,
            occurred_on: meta.occurred_on,
            recorded_by: meta.recorded_by,
            note: meta.note,
            session_id: meta.session_id,
        })
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            tenant_id: self.tenant_id,
            item_id: self.item_id,
            location_id: self.location_id,
        }
    }

    pub fn signed_delta(&self) -> i64 {
        match self.direction {
            Direction::Inbound => self.quantity,
            Direction::Outbound => -self.quantity,
        }
    }
}

/// Balance key: one stock level per tenant, item and location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(tenant_id: TenantId, item_id: ItemId, location_id: LocationId) -> Self {
        Self {
            tenant_id,
            item_id,
            location_id,
        }
    }
}

/// Current stock level (pieces) for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: i64,
}

impl StockBalance {
    pub fn zero(key: StockKey) -> Self {
        Self {
            tenant_id: key.tenant_id,
            item_id: key.item_id,
            location_id: key.location_id,
            quantity: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.tenant_id, self.item_id, self.location_id)
    }

    pub fn apply(&mut self, movement: &StockMovement) {
        self.quantity += movement.signed_delta();
    }
}

/// Issue policy: stock never goes negative through an issue.
///
/// Adjustments bypass this check; a count is the physical truth.
pub fn ensure_issue_covered(available: i64, requested: i64) -> DomainResult<()> {
    if available < requested {
        return Err(DomainError::InsufficientStock { available, requested });
    }
    Ok(())
}
