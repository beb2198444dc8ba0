//! Stocktaking sessions and their count lines.
//!
//! A session is a snapshot of expected quantities taken at start. Operators
//! overwrite counts on its lines while it is in progress; completion and
//! cancellation are terminal.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    CategoryId, DomainError, DomainResult, ItemId, LocationId, StocktakingId, TenantId, UserId,
};

use crate::catalog::CatalogItem;
use crate::movement::StockBalance;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StocktakingStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl StocktakingStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            StocktakingStatus::InProgress => false,
            StocktakingStatus::Completed | StocktakingStatus::Cancelled => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StocktakingStatus::InProgress => "in_progress",
            StocktakingStatus::Completed => "completed",
            StocktakingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "in_progress" => Ok(StocktakingStatus::InProgress),
            "completed" => Ok(StocktakingStatus::Completed),
            "cancelled" => Ok(StocktakingStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown stocktaking status '{other}'"))),
        }
    }
}

impl core::fmt::Display for StocktakingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which items enter a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StocktakingScope {
    /// `None` counts all locations of the tenant.
    pub location_id: Option<LocationId>,
    pub category_id: Option<CategoryId>,
    pub include_zero_stock: bool,
}

impl StocktakingScope {
    pub fn all_locations() -> Self {
        Self::default()
    }

    pub fn at_location(location_id: LocationId) -> Self {
        Self {
            location_id: Some(location_id),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn including_zero_stock(mut self, include: bool) -> Self {
        self.include_zero_stock = include;
        self
    }
}

/// A stocktaking session header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StocktakingSession {
    pub id: StocktakingId,
    pub tenant_id: TenantId,
    pub location_id: Option<LocationId>,
    pub category_id: Option<CategoryId>,
    pub include_zero_stock: bool,
    pub status: StocktakingStatus,
    pub started_by: UserId,
    pub started_at: DateTime<Utc>,
    pub completed_by: Option<UserId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StocktakingSession {
    pub fn start(
        id: StocktakingId,
        tenant_id: TenantId,
        scope: StocktakingScope,
        started_by: UserId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            location_id: scope.location_id,
            category_id: scope.category_id,
            include_zero_stock: scope.include_zero_stock,
            status: StocktakingStatus::InProgress,
            started_by,
            started_at,
            completed_by: None,
            completed_at: None,
            cancelled_by: None,
            cancelled_at: None,
        }
    }

    pub fn scope(&self) -> StocktakingScope {
        StocktakingScope {
            location_id: self.location_id,
            category_id: self.category_id,
            include_zero_stock: self.include_zero_stock,
        }
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("stocktaking session {}", self.id)));
        }
        Ok(())
    }

    pub fn ensure_in_progress(&self) -> DomainResult<()> {
        match self.status {
            StocktakingStatus::InProgress => Ok(()),
            StocktakingStatus::Completed | StocktakingStatus::Cancelled => Err(DomainError::invalid_state(
                format!("stocktaking session {} is {}", self.id, self.status),
            )),
        }
    }

    pub fn complete(&mut self, by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StocktakingStatus::Completed)?;
        self.completed_by = Some(by);
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn cancel(&mut self, by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StocktakingStatus::Cancelled)?;
        self.cancelled_by = Some(by);
        self.cancelled_at = Some(at);
        Ok(())
    }

    fn transition(&mut self, to: StocktakingStatus) -> DomainResult<()> {
        match (self.status, to) {
            (StocktakingStatus::InProgress, StocktakingStatus::Completed)
            | (StocktakingStatus::InProgress, StocktakingStatus::Cancelled) => {
                self.status = to;
                Ok(())
            }
            (StocktakingStatus::InProgress, StocktakingStatus::InProgress) => Err(
                DomainError::invalid_state(format!("stocktaking session {} is already in_progress", self.id)),
            ),
            (StocktakingStatus::Completed, _) | (StocktakingStatus::Cancelled, _) => Err(
                DomainError::invalid_state(format!("stocktaking session {} is {}", self.id, self.status)),
            ),
        }
    }
}

/// Line identity within a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub item_id: ItemId,
    pub location_id: Option<LocationId>,
}

/// One (item, location) row of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StocktakingLine {
    pub session_id: StocktakingId,
    pub item_id: ItemId,
    /// Absent when an all-locations session could not resolve where the item lives.
    pub location_id: Option<LocationId>,
    pub expected_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub note: Option<String>,
    pub counted_by: Option<UserId>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl StocktakingLine {
    pub fn new(
        session_id: StocktakingId,
        item_id: ItemId,
        location_id: Option<LocationId>,
        expected_quantity: i64,
    ) -> Self {
        Self {
            session_id,
            item_id,
            location_id,
            expected_quantity,
            counted_quantity: None,
            note: None,
            counted_by: None,
            counted_at: None,
        }
    }

    pub fn key(&self) -> LineKey {
        LineKey {
            item_id: self.item_id,
            location_id: self.location_id,
        }
    }

    pub fn is_counted(&self) -> bool {
        self.counted_quantity.is_some()
    }

    /// counted − expected; `None` until a count was entered.
    ///
    /// `record_count` rejects counts whose difference does not fit in an `i64`.
    pub fn difference(&self) -> Option<i64> {
        self.counted_quantity
            .and_then(|counted| counted.checked_sub(self.expected_quantity))
    }

    /// Overwrite the count. Last write wins.
    pub fn record_count(
        &mut self,
        counted_quantity: i64,
        note: Option<String>,
        counted_by: UserId,
        counted_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if counted_quantity < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        counted_quantity
            .checked_sub(self.expected_quantity)
            .and_then(i64::checked_abs)
            .ok_or_else(|| DomainError::validation("counted quantity out of range"))?;
        self.counted_quantity = Some(counted_quantity);
        self.note = note;
        self.counted_by = Some(counted_by);
        self.counted_at = Some(counted_at);
        Ok(())
    }
}

/// Build the line set for a new session from the tenant's catalog and balances.
///
/// `items` may contain inactive or out-of-category items; they are filtered here.
/// For a location-scoped session `balances` is read only at that location; for
/// an all-locations session the item's balances are summed and the line gets
/// the location the item is stocked at (or its home location, or none).
pub fn build_lines(
    session_id: StocktakingId,
    scope: &StocktakingScope,
    items: &[CatalogItem],
    balances: &[StockBalance],
) -> DomainResult<Vec<StocktakingLine>> {
    let mut by_item: HashMap<ItemId, Vec<&StockBalance>> = HashMap::new();
    for balance in balances {
        by_item.entry(balance.item_id).or_default().push(balance);
    }

    let mut lines = Vec::new();
    for item in items.iter().filter(|i| i.active && i.matches_category(scope.category_id)) {
        let item_balances = by_item.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);

        let line = match scope.location_id {
            Some(location_id) => {
                let expected = sum_quantities(item_balances.iter().copied().filter(|b| b.location_id == location_id))?;
                StocktakingLine::new(session_id, item.id, Some(location_id), expected)
            }
            None => {
                let expected = sum_quantities(item_balances.iter().copied())?;
                let location = resolve_location(item, item_balances);
                StocktakingLine::new(session_id, item.id, location, expected)
            }
        };

        if line.expected_quantity == 0 && !scope.include_zero_stock {
            continue;
        }
        lines.push(line);
    }

    if lines.is_empty() {
        return Err(DomainError::EmptyScope);
    }
    Ok(lines)
}

fn sum_quantities<'a>(mut balances: impl Iterator<Item = &'a StockBalance>) -> DomainResult<i64> {
    balances.try_fold(0i64, |total, b| {
        total
            .checked_add(b.quantity)
            .ok_or_else(|| DomainError::validation(format!("expected quantity of item {} out of range", b.item_id)))
    })
}

fn resolve_location(item: &CatalogItem, balances: &[&StockBalance]) -> Option<LocationId> {
    let stocked: BTreeSet<LocationId> = balances
        .iter()
        .filter(|b| b.quantity != 0)
        .map(|b| b.location_id)
        .collect();

    match stocked.len() {
        1 => stocked.into_iter().next(),
        _ => item.home_location_id,
    }
}
