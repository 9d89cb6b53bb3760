use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use grocerylog::{
    catalog::CatalogDraft,
    core::session::Session,
    ledger::TripFilter,
    persist::{memory::MemoryDocumentStore, Collection},
    reconcile::complete_trip,
    trip::{ExtraItemInput, PlannedItemInput, Reconciliation},
    types::Money,
};

const STORES: [&str; 3] = ["Safeway", "Costco", "Trader Joe's"];

#[derive(Debug, Clone)]
enum Line {
    AsPlanned,
    Bought { qty: u8, cents: u16 },
    Skipped,
}

#[derive(Debug, Clone)]
struct TripPlan {
    store: usize,
    minutes_ago: u32,
    list: Vec<(u16, u8, Line)>,
    extras: Vec<(u8, u16)>,
}

fn line_strategy() -> impl Strategy<Value = Line> {
    prop_oneof![
        Just(Line::AsPlanned),
        (0u8..6, 0u16..2_000).prop_map(|(qty, cents)| Line::Bought { qty, cents }),
        Just(Line::Skipped),
    ]
}

fn trip_strategy() -> impl Strategy<Value = TripPlan> {
    (
        0usize..STORES.len(),
        0u32..(60 * 24 * 60),
        prop::collection::vec((1u16..3_000, 1u8..5, line_strategy()), 0..6),
        prop::collection::vec((1u8..4, 0u16..1_500), 0..4),
    )
        .prop_map(|(store, minutes_ago, list, extras)| TripPlan {
            store,
            minutes_ago,
            list,
            extras,
        })
        .prop_filter("a trip records something", |p| {
            !p.list.is_empty() || !p.extras.is_empty()
        })
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

/// Stocks the store catalog and list for `plan`, then completes the trip.
fn run_trip(session: &mut Session, backend: &mut MemoryDocumentStore, n: usize, plan: &TripPlan) {
    let store = STORES[plan.store];
    let mut items = Vec::new();
    for (i, (cents, qty, line)) in plan.list.iter().enumerate() {
        let item = session
            .add_catalog_item(
                store,
                CatalogDraft::new(format!("Item {n}-{i}"), Money::from_cents(i64::from(*cents))),
            )
            .expect("add item");
        session
            .add_to_list(store, &item.id, Some(u32::from(*qty)))
            .expect("add to list");
        match line {
            Line::AsPlanned => {}
            Line::Bought { qty, cents } => items.push(PlannedItemInput::purchased(
                item.id.clone(),
                i64::from(*qty),
                Money::from_cents(i64::from(*cents)),
            )),
            Line::Skipped => items.push(PlannedItemInput::skipped(item.id.clone(), "gone")),
        }
    }
    let extras = plan
        .extras
        .iter()
        .enumerate()
        .map(|(i, (qty, cents))| {
            ExtraItemInput::new(
                format!("Extra {n}-{i}"),
                i64::from(*qty),
                Money::from_cents(i64::from(*cents)),
            )
        })
        .collect();
    let rec = Reconciliation {
        items,
        extras,
        notes: String::new(),
    };
    let when = now() - Duration::minutes(i64::from(plan.minutes_ago));
    complete_trip(session, backend, store, &rec, when).expect("complete trip");
}

proptest! {
    #[test]
    fn totals_add_up_for_every_recorded_trip(plans in prop::collection::vec(trip_strategy(), 1..12)) {
        let mut session = Session::new(90);
        let mut backend = MemoryDocumentStore::new();
        for (n, plan) in plans.iter().enumerate() {
            run_trip(&mut session, &mut backend, n, plan);
        }

        prop_assert_eq!(session.ledger().len(), plans.len());
        prop_assert_eq!(backend.count(Collection::Trips), plans.len());
        for record in session.ledger().iter() {
            let planned: Money = record.planned_items.iter().map(|i| i.spent()).sum();
            let extras: Money = record.extra_items.iter().map(|i| i.spent()).sum();
            prop_assert_eq!(record.totals.planned_total, planned);
            prop_assert_eq!(record.totals.extra_total, extras);
            prop_assert_eq!(record.totals.trip_total, planned + extras);
            prop_assert!(record.totals_consistent());
            for item in record.planned_items.iter().filter(|i| !i.purchased) {
                prop_assert_eq!(item.actual_qty, 0);
            }
        }
        for store in STORES {
            prop_assert!(session.list(store).is_empty());
        }
    }

    #[test]
    fn queries_are_newest_first_and_cleanup_respects_the_window(
        plans in prop::collection::vec(trip_strategy(), 1..12),
        retention in 1u32..45,
    ) {
        let mut session = Session::new(retention);
        let mut backend = MemoryDocumentStore::new();
        for (n, plan) in plans.iter().enumerate() {
            run_trip(&mut session, &mut backend, n, plan);
        }

        let window_start = session.ledger().window_start(now());
        let all = session.query_trips(TripFilter::all(), now()).to_vec();
        for pair in all.windows(2) {
            prop_assert!(pair[0].date >= pair[1].date);
        }
        prop_assert!(all.iter().all(|r| r.date >= window_start));

        for store in STORES {
            let by_store = session.query_trips(TripFilter::all().store(store), now()).to_vec();
            let expected: Vec<_> = all.iter().filter(|r| r.store == store).cloned().collect();
            prop_assert_eq!(by_store, expected);
        }

        let before = session.ledger().len();
        let removed = session.cleanup_history(&mut backend, now()).expect("cleanup");
        prop_assert_eq!(session.ledger().len() + removed.len(), before);
        prop_assert!(session.ledger().iter().all(|r| r.date >= window_start));
        prop_assert_eq!(session.ledger().len(), all.len());
        prop_assert_eq!(backend.count(Collection::Trips), session.ledger().len());
        for id in &removed {
            prop_assert!(session.get_trip(id).is_err());
        }
    }
}
