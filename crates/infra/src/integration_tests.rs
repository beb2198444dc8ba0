//! Integration tests for the stocktaking workflow.
//!
//! Tests: start → record_count → complete/cancel → ledger, against the
//! in-memory store.
//!
//! Verifies:
//! - Completion writes exactly the non-zero, counted, resolved differences
//! - A failing ledger write rolls back the whole completion
//! - Cancel and uncounted lines never move stock, for any counts
//! - Out-of-range counts are rejected without poisoning the store
//! - Tenant isolation is preserved
//! - Audit failures never undo a committed transition

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;

    use stockroom_core::{DomainError, FixedClock, ItemId, LocationId, TenantId, UserId};
    use stockroom_events::{EventBus, InMemoryEventBus, Subscription, for_tenant};
    use stockroom_inventory::{
        CatalogItem, Direction, Location, MovementMeta, MovementType, StockKey, StocktakingEvent,
        StocktakingScope, StocktakingStatus,
    };

    use crate::audit::{AuditSink, BusAuditSink, InMemoryAuditSink};
    use crate::error::{ServiceError, StoreError};
    use crate::ledger::StockLedger;
    use crate::reconciliation::ReconciliationEngine;
    use crate::stocktaking::StocktakingService;
    use crate::store::InMemoryStore;

    type Store = Arc<InMemoryStore>;

    struct World {
        store: Store,
        audit: Arc<InMemoryAuditSink>,
        ledger: StockLedger<Store>,
        sessions: StocktakingService<Store>,
        engine: ReconciliationEngine<Store>,
        tenant_id: TenantId,
        operator: UserId,
    }

    impl World {
        fn new() -> Self {
            let audit = Arc::new(InMemoryAuditSink::new());
            Self::with_audit(audit.clone(), audit)
        }

        fn with_audit(audit: Arc<InMemoryAuditSink>, sink: Arc<dyn AuditSink>) -> Self {
            let store: Store = Arc::new(InMemoryStore::new());
            let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap()));
            Self {
                ledger: StockLedger::new(store.clone()),
                sessions: StocktakingService::with_clock(store.clone(), sink.clone(), clock.clone()),
                engine: ReconciliationEngine::with_clock(store.clone(), sink, clock),
                store,
                audit,
                tenant_id: TenantId::new(),
                operator: UserId::new(),
            }
        }

        fn location(&self, name: &str) -> LocationId {
            let id = LocationId::new();
            self.store.add_location(Location {
                id,
                tenant_id: self.tenant_id,
                name: name.to_string(),
            });
            id
        }

        fn item(&self, name: &str) -> ItemId {
            self.item_with_home(name, None)
        }

        fn item_with_home(&self, name: &str, home_location_id: Option<LocationId>) -> ItemId {
            let id = ItemId::new();
            self.store.add_item(CatalogItem {
                id,
                tenant_id: self.tenant_id,
                name: name.to_string(),
                category_id: None,
                active: true,
                home_location_id,
            });
            id
        }

        fn key(&self, item_id: ItemId, location_id: LocationId) -> StockKey {
            StockKey::new(self.tenant_id, item_id, location_id)
        }

        fn receive(&self, item_id: ItemId, location_id: LocationId, quantity: i64) {
            self.ledger
                .receive(self.key(item_id, location_id), quantity, day(), self.operator)
                .unwrap();
        }

        fn balance(&self, item_id: ItemId, location_id: LocationId) -> i64 {
            self.ledger.balance(self.key(item_id, location_id)).unwrap()
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn shrinkage_at_one_location_is_adjusted() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        let b = w.item("B");
        w.receive(a, main, 10);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();

        let lines = w.sessions.lines(w.tenant_id, session_id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].item_id, a);
        assert!(lines.iter().all(|l| l.item_id != b));

        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 7, None, w.operator)
            .unwrap();
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(summary.lines_adjusted, 1);
        assert_eq!(summary.total_absolute_difference, 3);
        assert_eq!(summary.lines_skipped_uncounted, 0);
        assert_eq!(w.balance(a, main), 7);

        let movements = w.ledger.movements(w.key(a, main)).unwrap();
        let adjustment = movements.last().unwrap();
        assert_eq!(adjustment.movement_type, MovementType::Adjustment);
        assert_eq!(adjustment.direction, Direction::Outbound);
        assert_eq!(adjustment.quantity, 3);
        assert_eq!(adjustment.session_id, Some(session_id));
        assert_eq!(adjustment.note, Some(format!("stocktaking {session_id}")));

        let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
        assert_eq!(session.status, StocktakingStatus::Completed);
        assert_eq!(session.completed_by, Some(w.operator));
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn uncounted_line_is_never_treated_as_zero() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);
        let movements_before = w.store.all_movements().len();

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(summary.lines_adjusted, 0);
        assert_eq!(summary.lines_skipped_uncounted, 1);
        assert_eq!(w.balance(a, main), 10);
        assert_eq!(w.store.all_movements().len(), movements_before);
    }

    #[test]
    fn matching_count_writes_nothing() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 10, None, w.operator)
            .unwrap();
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(summary.lines_adjusted, 0);
        assert_eq!(summary.total_absolute_difference, 0);
        assert_eq!(w.ledger.movements(w.key(a, main)).unwrap().len(), 1);
    }

    #[test]
    fn recount_uses_only_the_latest_value() -> anyhow::Result<()> {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))?;
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 4, None, w.operator)?;
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 12, Some("found a box".into()), w.operator)?;

        let summary = w.engine.complete(w.tenant_id, session_id, w.operator)?;
        assert_eq!(summary.total_absolute_difference, 2);
        assert_eq!(w.balance(a, main), 12);
        Ok(())
    }

    #[test]
    fn failed_ledger_write_rolls_back_completion() {
        let w = World::new();
        let main = w.location("Main");
        let items: Vec<_> = (0..3).map(|i| w.item(&format!("item-{i}"))).collect();
        for item in &items {
            w.receive(*item, main, 10);
        }

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        for (i, item) in items.iter().enumerate() {
            w.sessions
                .record_count(w.tenant_id, session_id, *item, Some(main), i as i64, None, w.operator)
                .unwrap();
        }

        let balances_before = w.store.all_balances();
        let movements_before = w.store.all_movements().len();
        w.store.fail_nth_movement_write(2);

        let err = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Fault(_))));

        let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
        assert_eq!(session.status, StocktakingStatus::InProgress);
        assert_eq!(session.completed_at, None);
        assert_eq!(w.store.all_balances(), balances_before);
        assert_eq!(w.store.all_movements().len(), movements_before);
        assert!(
            !w.audit
                .all()
                .iter()
                .any(|e| matches!(e, StocktakingEvent::Completed(_)))
        );

        // The fault fired once; a retry goes through.
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();
        assert_eq!(summary.lines_adjusted, 3);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(w.balance(*item, main), i as i64);
        }
    }

    #[test]
    fn cancel_never_moves_stock() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 1, None, w.operator)
            .unwrap();
        let balances_before = w.store.all_balances();

        w.sessions.cancel(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(w.store.all_balances(), balances_before);
        let err = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(w.balance(a, main), 10);
    }

    #[test]
    fn count_overflowing_a_negative_balance_is_rejected() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.ledger
            .apply_delta(w.key(a, main), -1, MovementMeta::adjustment(day(), w.operator))
            .unwrap();

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        let err = w
            .sessions
            .record_count(w.tenant_id, session_id, a, Some(main), i64::MAX, None, w.operator)
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        // The store is still usable and the line still uncounted.
        assert_eq!(w.balance(a, main), -1);
        let lines = w.sessions.lines(w.tenant_id, session_id).unwrap();
        assert_eq!(lines[0].counted_quantity, None);

        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 3, None, w.operator)
            .unwrap();
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();
        assert_eq!(summary.total_absolute_difference, 4);
        assert_eq!(w.balance(a, main), 3);
    }

    #[test]
    fn unknown_home_location_is_skipped_not_fatal() {
        let w = World::new();
        w.location("Main");
        let ghost = w.item_with_home("Ghost", Some(LocationId::new()));

        let session_id = w
            .sessions
            .start(
                w.tenant_id,
                w.operator,
                StocktakingScope::all_locations().including_zero_stock(true),
            )
            .unwrap();
        let lines = w.sessions.lines(w.tenant_id, session_id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].location_id, None);

        w.sessions
            .record_count(w.tenant_id, session_id, ghost, None, 3, None, w.operator)
            .unwrap();
        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(summary.lines_adjusted, 0);
        assert_eq!(summary.lines_skipped_unresolved, 1);
        assert!(w.store.all_movements().is_empty());
        let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
        assert_eq!(session.status, StocktakingStatus::Completed);
    }

    #[test]
    fn completed_session_cannot_complete_or_cancel_again() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 2);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 3, None, w.operator)
            .unwrap();
        w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert!(w.engine.complete(w.tenant_id, session_id, w.operator).unwrap_err().is_invalid_state());
        assert!(w.sessions.cancel(w.tenant_id, session_id, w.operator).unwrap_err().is_invalid_state());
        assert_eq!(w.balance(a, main), 3);
    }

    #[test]
    fn all_locations_session_resolves_or_skips() {
        let w = World::new();
        let main = w.location("Main");
        let van = w.location("Van");
        let single = w.item("Single");
        let spread = w.item("Spread");
        let homed = w.item_with_home("Homed", Some(main));
        w.receive(single, van, 3);
        w.receive(spread, main, 5);
        w.receive(spread, van, 2);
        w.receive(homed, main, 1);
        w.receive(homed, van, 1);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::all_locations())
            .unwrap();

        w.sessions
            .record_count(w.tenant_id, session_id, single, Some(van), 1, None, w.operator)
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, spread, None, 9, None, w.operator)
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, homed, Some(main), 4, None, w.operator)
            .unwrap();

        let summary = w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();
        assert_eq!(summary.lines_adjusted, 2);
        assert_eq!(summary.lines_skipped_unresolved, 1);
        assert_eq!(summary.total_absolute_difference, 4);

        assert_eq!(w.balance(single, van), 1);
        assert_eq!(w.balance(spread, main), 5);
        assert_eq!(w.balance(spread, van), 2);
        assert_eq!(w.balance(homed, main), 3);
        assert_eq!(w.balance(homed, van), 1);
    }

    #[test]
    fn other_tenant_cannot_see_or_touch_a_session() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);
        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();

        let intruder = TenantId::new();
        assert!(w.sessions.get_session(intruder, session_id).unwrap_err().is_not_found());
        assert!(w.sessions.lines(intruder, session_id).unwrap_err().is_not_found());
        assert!(
            w.sessions
                .record_count(intruder, session_id, a, Some(main), 0, None, w.operator)
                .unwrap_err()
                .is_not_found()
        );
        assert!(w.sessions.cancel(intruder, session_id, w.operator).unwrap_err().is_not_found());
        assert!(w.engine.complete(intruder, session_id, w.operator).unwrap_err().is_not_found());
        assert!(w.sessions.list_sessions(intruder, None).unwrap().is_empty());

        let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
        assert_eq!(session.status, StocktakingStatus::InProgress);
        assert_eq!(w.balance(a, main), 10);
    }

    #[test]
    fn empty_scope_leaves_no_session() {
        let w = World::new();
        let main = w.location("Main");
        w.item("Nothing on hand");

        let err = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::EmptyScope)));
        assert!(w.sessions.list_sessions(w.tenant_id, None).unwrap().is_empty());
    }

    #[test]
    fn audit_trail_has_one_event_per_transition() {
        let w = World::new();
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);

        let completed = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, completed, a, Some(main), 9, None, w.operator)
            .unwrap();
        w.engine.complete(w.tenant_id, completed, w.operator).unwrap();

        let cancelled = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions.cancel(w.tenant_id, cancelled, w.operator).unwrap();

        let kinds: Vec<_> = w
            .audit
            .all()
            .iter()
            .map(|e| (stockroom_events::Event::event_type(e), e.session_id()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("stocktaking_start", completed),
                ("stocktaking_complete", completed),
                ("stocktaking_start", cancelled),
                ("stocktaking_cancel", cancelled),
            ]
        );
    }

    struct BrokenBus;

    impl EventBus<StocktakingEvent> for BrokenBus {
        type Error = String;

        fn publish(&self, _message: StocktakingEvent) -> Result<(), Self::Error> {
            Err("audit backend unavailable".to_string())
        }

        fn subscribe(&self) -> Subscription<StocktakingEvent> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn audit_failure_does_not_roll_back() {
        let w = World::with_audit(Arc::new(InMemoryAuditSink::new()), Arc::new(BusAuditSink::new(BrokenBus)));
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 10);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions
            .record_count(w.tenant_id, session_id, a, Some(main), 6, None, w.operator)
            .unwrap();
        w.engine.complete(w.tenant_id, session_id, w.operator).unwrap();

        assert_eq!(w.balance(a, main), 6);
        let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
        assert_eq!(session.status, StocktakingStatus::Completed);
    }

    #[test]
    fn bus_subscribers_receive_audit_events() {
        let bus = Arc::new(InMemoryEventBus::<StocktakingEvent>::new());
        let sub = bus.subscribe();
        let w = World::with_audit(Arc::new(InMemoryAuditSink::new()), Arc::new(BusAuditSink::new(bus.clone())));
        let main = w.location("Main");
        let a = w.item("A");
        w.receive(a, main, 1);

        let session_id = w
            .sessions
            .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
            .unwrap();
        w.sessions.cancel(w.tenant_id, session_id, w.operator).unwrap();

        let received: Vec<_> = for_tenant(w.tenant_id, sub.drain()).collect();
        assert_eq!(received.len(), 2);
        assert_eq!(for_tenant(TenantId::new(), received.clone()).count(), 0);
        assert!(received.iter().all(|e| e.session_id() == session_id));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Issue(i64),
        Adjust(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Receive),
            (1i64..50).prop_map(Op::Issue),
            (-50i64..50)
                .prop_filter("non-zero", |d| *d != 0)
                .prop_map(Op::Adjust),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of receipts, issues and adjustments the
        /// balance equals the sum of the signed deltas of the stored movements,
        /// and rejected issues leave no movement behind.
        #[test]
        fn balance_replays_from_movements(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let w = World::new();
            let main = w.location("Main");
            let a = w.item("A");
            let key = w.key(a, main);

            for op in &ops {
                let before = w.ledger.balance(key).unwrap();
                match op {
                    Op::Receive(q) => {
                        w.ledger.receive(key, *q, day(), w.operator).unwrap();
                    }
                    Op::Issue(q) => match w.ledger.issue(key, *q, day(), w.operator) {
                        Ok(_) => prop_assert!(before >= *q),
                        Err(e) => {
                            let is_insufficient = matches!(e.domain(), Some(DomainError::InsufficientStock { .. }));
                            prop_assert!(is_insufficient);
                            prop_assert_eq!(w.ledger.balance(key).unwrap(), before);
                        }
                    },
                    Op::Adjust(d) => {
                        w.ledger
                            .apply_delta(key, *d, MovementMeta::adjustment(day(), w.operator))
                            .unwrap();
                    }
                }
            }

            let replayed: i64 = w
                .ledger
                .movements(key)
                .unwrap()
                .iter()
                .map(|m| m.signed_delta())
                .sum();
            prop_assert_eq!(w.ledger.balance(key).unwrap(), replayed);
        }

        /// Property: cancelling a session leaves every balance and movement as
        /// it was, whatever was counted before.
        #[test]
        fn cancel_leaves_stock_untouched(
            stock in prop::collection::vec((1i64..100, prop::option::of(0i64..200)), 1..8)
        ) {
            let w = World::new();
            let main = w.location("Main");
            let items: Vec<_> = stock
                .iter()
                .enumerate()
                .map(|(i, (on_hand, _))| {
                    let item = w.item(&format!("item-{i}"));
                    w.receive(item, main, *on_hand);
                    item
                })
                .collect();

            let session_id = w
                .sessions
                .start(w.tenant_id, w.operator, StocktakingScope::at_location(main))
                .unwrap();
            for (item, (_, counted)) in items.iter().zip(&stock) {
                if let Some(counted) = counted {
                    w.sessions
                        .record_count(w.tenant_id, session_id, *item, Some(main), *counted, None, w.operator)
                        .unwrap();
                }
            }

            let balances_before = w.store.all_balances();
            let movements_before = w.store.all_movements();
            w.sessions.cancel(w.tenant_id, session_id, w.operator).unwrap();

            prop_assert_eq!(w.store.all_balances(), balances_before);
            prop_assert_eq!(w.store.all_movements(), movements_before);
            let session = w.sessions.get_session(w.tenant_id, session_id).unwrap();
            prop_assert_eq!(session.status, StocktakingStatus::Cancelled);
        }
    }
}
