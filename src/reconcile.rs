//! Turns an active list plus user-supplied actuals into a [`TripRecord`].
//!
//! [`plan_trip`] validates and stages everything on a copy of the catalog
//! without touching the session. [`complete_trip`] writes the resulting
//! batch and only then applies it to memory.

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    catalog::CatalogItem,
    core::session::Session,
    errors::{Error, Result, ValidationError, Warning},
    persist::{Collection, Document, DocumentStore, Write},
    trip::{
        trip_id_for, ExtraItem, ExtraItemInput, PlannedItem, PlannedItemInput, PriceCorrection,
        Reconciliation, TripRecord, TripStatus, TripTotals,
    },
    types::{clean_display_name, ItemId, Money, Qty, TripId},
};

/// Result of a successful trip completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripOutcome {
    /// The stored trip.
    pub record: TripRecord,
    /// Duplicate-name warnings for extras added to the catalog.
    pub warnings: Vec<Warning>,
}

/// Everything a trip changes, staged but not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripCommit {
    /// The new history record.
    pub record: TripRecord,
    /// Catalog items created or repriced, in final state.
    pub catalog_updates: Vec<CatalogItem>,
    /// Duplicate-name warnings.
    pub warnings: Vec<Warning>,
}

impl TripCommit {
    /// The atomic batch: catalog puts, the trip record, the list removal.
    pub fn writes(&self) -> Vec<Write> {
        let mut writes: Vec<Write> = self
            .catalog_updates
            .iter()
            .cloned()
            .map(Write::put_catalog_item)
            .collect();
        writes.push(Write::Put(Document::Trip(self.record.clone())));
        writes.push(Write::Delete {
            collection: Collection::ActiveLists,
            key: self.record.store.clone(),
        });
        writes
    }

    /// Drops the staged catalog updates.
    pub fn into_outcome(self) -> TripOutcome {
        TripOutcome {
            record: self.record,
            warnings: self.warnings,
        }
    }
}

/// Validates `rec` against `store`'s active list and stages the trip.
///
/// The session is not modified.
pub fn plan_trip(
    session: &Session,
    store: &str,
    rec: &Reconciliation,
    now: DateTime<Utc>,
) -> std::result::Result<TripCommit, ValidationError> {
    let entries = session.lists().entries(store);
    if entries.is_empty() && rec.extras.is_empty() {
        return Err(ValidationError::NothingToRecord {
            store: store.to_string(),
        });
    }

    let mut inputs: HashMap<&str, &PlannedItemInput> = HashMap::new();
    for (i, input) in rec.items.iter().enumerate() {
        let id = input.catalog_item_id.as_str();
        if !entries.iter().any(|e| e.catalog_item_id == id) {
            return Err(ValidationError::NotOnList {
                store: store.to_string(),
                item_id: id.to_string(),
            });
        }
        if inputs.insert(id, input).is_some() {
            return Err(ValidationError::DuplicateInput {
                item_id: id.to_string(),
            });
        }
        validate_planned_input(session, store, i, input)?;
    }
    for (i, extra) in rec.extras.iter().enumerate() {
        validate_extra(i, extra)?;
    }

    let mut staged = session.catalog().clone();
    let mut touched: Vec<ItemId> = Vec::new();
    let mut corrections = Vec::new();
    let mut planned = Vec::with_capacity(entries.len());

    for entry in entries {
        let catalog_price = staged
            .get(store, &entry.catalog_item_id)
            .map(|item| item.price)
            .unwrap_or(entry.price);

        let Some(input) = inputs.get(entry.catalog_item_id.as_str()) else {
            planned.push(PlannedItem {
                catalog_item_id: entry.catalog_item_id.clone(),
                name: entry.name.clone(),
                category: entry.category.clone(),
                planned_qty: entry.qty,
                actual_qty: entry.qty,
                catalog_price,
                actual_price: catalog_price,
                purchased: true,
                skip_reason: None,
            });
            continue;
        };

        let actual_price = input.actual_price.unwrap_or(catalog_price);
        if !input.purchased {
            planned.push(PlannedItem {
                catalog_item_id: entry.catalog_item_id.clone(),
                name: entry.name.clone(),
                category: entry.category.clone(),
                planned_qty: entry.qty,
                actual_qty: 0,
                catalog_price,
                actual_price,
                purchased: false,
                skip_reason: input
                    .skip_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            });
            continue;
        }

        let actual_qty = match input.actual_qty {
            Some(q) => q as Qty,
            None => entry.qty,
        };
        if actual_price != catalog_price {
            let catalog_updated = input.update_catalog_price;
            if catalog_updated {
                let item = staged.set_price(store, &entry.catalog_item_id, actual_price)?;
                if !touched.contains(&item.id) {
                    touched.push(item.id);
                }
            }
            corrections.push(PriceCorrection {
                item_id: entry.catalog_item_id.clone(),
                old_price: catalog_price,
                new_price: actual_price,
                catalog_updated,
            });
        }
        planned.push(PlannedItem {
            catalog_item_id: entry.catalog_item_id.clone(),
            name: entry.name.clone(),
            category: entry.category.clone(),
            planned_qty: entry.qty,
            actual_qty,
            catalog_price,
            actual_price,
            purchased: true,
            skip_reason: None,
        });
    }

    let mut warnings = Vec::new();
    let mut extras = Vec::with_capacity(rec.extras.len());
    for input in &rec.extras {
        let name = clean_display_name(&input.name);
        let mut extra = ExtraItem {
            name: name.clone(),
            category: String::new(),
            qty: input.qty as Qty,
            price: input.price,
            added_to_catalog: false,
            catalog_item_id: None,
        };
        if input.add_to_catalog {
            let (item, existing) = staged.insert_extra(store, &name, &input.category, input.price);
            if let Some(existing_item_id) = existing {
                warnings.push(Warning::Duplicate {
                    store: store.to_string(),
                    name: item.name.clone(),
                    existing_item_id,
                    new_item_id: item.id.clone(),
                });
            }
            extra.category = item.category.clone();
            extra.added_to_catalog = true;
            extra.catalog_item_id = Some(item.id.clone());
            touched.push(item.id);
        } else {
            extra.category = category_label(&input.category);
        }
        extras.push(extra);
    }

    let catalog_updates = touched
        .iter()
        .filter_map(|id| staged.get(store, id).cloned())
        .collect();

    check_amounts(&planned, &extras)?;
    let totals = TripTotals::compute(&planned, &extras);
    let record = TripRecord {
        id: unique_trip_id(session, store, now),
        store: store.to_string(),
        date: now,
        status: TripStatus::Completed,
        planned_items: planned,
        extra_items: extras,
        totals,
        notes: rec.notes.trim().to_string(),
        price_corrections: corrections,
    };

    Ok(TripCommit {
        record,
        catalog_updates,
        warnings,
    })
}

/// Completes the trip for `store`: validates, writes one atomic batch
/// (pending session edits included) to `backend`, then updates the session.
///
/// On any error the session and the backend are unchanged.
#[instrument(level = "info", skip(session, backend, rec), fields(items = rec.items.len(), extras = rec.extras.len()))]
pub fn complete_trip(
    session: &mut Session,
    backend: &mut dyn DocumentStore,
    store: &str,
    rec: &Reconciliation,
    now: DateTime<Utc>,
) -> Result<TripOutcome> {
    let commit = plan_trip(session, store, rec, now).map_err(|err| {
        debug!(%err, "reconciliation rejected");
        Error::from(err)
    })?;

    let mut batch = session.pending_writes().to_vec();
    batch.extend(commit.writes());
    if let Err(err) = backend.write(&batch) {
        warn!(%err, trip_id = %commit.record.id, "trip batch failed");
        return Err(Error::TripNotSaved(err));
    }

    session.drain_pending_writes();
    session.apply_commit(&commit);
    info!(
        trip_id = %commit.record.id,
        total = %commit.record.totals.trip_total,
        warnings = commit.warnings.len(),
        "trip completed"
    );
    Ok(commit.into_outcome())
}

fn validate_planned_input(
    session: &Session,
    store: &str,
    index: usize,
    input: &PlannedItemInput,
) -> std::result::Result<(), ValidationError> {
    if let Some(qty) = input.actual_qty {
        check_qty(&format!("items[{index}].actual_qty"), qty, 0)?;
    }
    if let Some(price) = input.actual_price {
        check_price(&format!("items[{index}].actual_price"), price)?;
    }
    if input.update_catalog_price
        && session
            .catalog()
            .get(store, &input.catalog_item_id)
            .is_none()
    {
        return Err(ValidationError::UnknownCatalogItem {
            store: store.to_string(),
            item_id: input.catalog_item_id.clone(),
        });
    }
    Ok(())
}

/// Rejects a trip whose line or grand totals do not fit in [`Money`].
fn check_amounts(planned: &[PlannedItem], extras: &[ExtraItem]) -> std::result::Result<(), ValidationError> {
    let too_large = |field: String| ValidationError::AmountTooLarge { field };
    let mut total = Money::ZERO;
    for item in planned.iter().filter(|p| p.purchased) {
        let line = item
            .actual_price
            .checked_times(item.actual_qty)
            .ok_or_else(|| too_large(format!("item {}", item.catalog_item_id)))?;
        total = total
            .checked_add(line)
            .ok_or_else(|| too_large("trip_total".to_string()))?;
    }
    for (i, extra) in extras.iter().enumerate() {
        let line = extra
            .price
            .checked_times(extra.qty)
            .ok_or_else(|| too_large(format!("extras[{i}]")))?;
        total = total
            .checked_add(line)
            .ok_or_else(|| too_large("trip_total".to_string()))?;
    }
    Ok(())
}

fn validate_extra(index: usize, input: &ExtraItemInput) -> std::result::Result<(), ValidationError> {
    if clean_display_name(&input.name).is_empty() {
        return Err(ValidationError::MissingField {
            field: format!("extras[{index}].name"),
        });
    }
    check_qty(&format!("extras[{index}].qty"), input.qty, 1)?;
    check_price(&format!("extras[{index}].price"), input.price)
}

fn check_qty(field: &str, qty: i64, min: i64) -> std::result::Result<(), ValidationError> {
    if qty < 0 {
        return Err(ValidationError::NegativeQuantity {
            field: field.to_string(),
            value: qty,
        });
    }
    if qty < min {
        return Err(ValidationError::QuantityTooSmall {
            field: field.to_string(),
            value: qty,
        });
    }
    if qty > i64::from(Qty::MAX) {
        return Err(ValidationError::QuantityTooLarge {
            field: field.to_string(),
            value: qty,
        });
    }
    Ok(())
}

fn check_price(field: &str, price: Money) -> std::result::Result<(), ValidationError> {
    if price.is_negative() {
        return Err(ValidationError::NegativePrice {
            field: field.to_string(),
            value: price,
        });
    }
    Ok(())
}

fn category_label(category: &str) -> String {
    let category = clean_display_name(category);
    if category.is_empty() {
        crate::types::DEFAULT_CATEGORY.to_string()
    } else {
        category
    }
}

fn unique_trip_id(session: &Session, store: &str, now: DateTime<Utc>) -> TripId {
    let base = trip_id_for(store, now);
    if !session.ledger().contains(&base) {
        return base;
    }
    (2u32..)
        .map(|k| format!("{base}-{k}"))
        .find(|id| !session.ledger().contains(id))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::catalog::CatalogDraft;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 18, 0, 0).unwrap()
    }

    fn session_with_list() -> Session {
        let mut session = Session::new(30);
        session
            .add_catalog_item("Safeway", CatalogDraft::new("Milk", Money::from_cents(349)))
            .unwrap();
        session
            .add_catalog_item("Safeway", CatalogDraft::new("Eggs", Money::from_cents(499)))
            .unwrap();
        session.add_to_list("Safeway", "sa-1", Some(1)).unwrap();
        session.add_to_list("Safeway", "sa-2", Some(2)).unwrap();
        session
    }

    #[test]
    fn lines_without_input_are_bought_as_planned() {
        let session = session_with_list();
        let commit = plan_trip(&session, "Safeway", &Reconciliation::default(), now()).unwrap();
        assert_eq!(commit.record.totals.planned_total, Money::from_cents(349 + 998));
        assert!(commit.record.price_corrections.is_empty());
        assert!(commit.catalog_updates.is_empty());
        assert_eq!(commit.record.id, "safeway-20261019T180000000");
    }

    #[test]
    fn price_difference_is_recorded_and_optionally_applied() {
        let session = session_with_list();
        let rec = Reconciliation {
            items: vec![
                PlannedItemInput::purchased("sa-1", 1, Money::from_cents(379)).update_catalog(),
                PlannedItemInput::purchased("sa-2", 2, Money::from_cents(459)),
            ],
            ..Reconciliation::default()
        };
        let commit = plan_trip(&session, "Safeway", &rec, now()).unwrap();
        let corrections = &commit.record.price_corrections;
        assert_eq!(corrections.len(), 2);
        assert!(corrections[0].catalog_updated);
        assert!(!corrections[1].catalog_updated);
        assert_eq!(commit.catalog_updates.len(), 1);
        assert_eq!(commit.catalog_updates[0].price, Money::from_cents(379));
        // planning never touches the session
        assert_eq!(
            session.catalog().get("Safeway", "sa-1").unwrap().price,
            Money::from_cents(349)
        );
    }

    #[test]
    fn planned_line_may_be_bought_at_zero() {
        let session = session_with_list();
        let rec = Reconciliation {
            items: vec![PlannedItemInput::purchased("sa-2", 0, Money::from_cents(499))],
            ..Reconciliation::default()
        };
        let commit = plan_trip(&session, "Safeway", &rec, now()).unwrap();
        let eggs = &commit.record.planned_items[1];
        assert!(eggs.purchased);
        assert_eq!(eggs.actual_qty, 0);
        assert_eq!(eggs.spent(), Money::ZERO);
        assert_eq!(commit.record.totals.trip_total, Money::from_cents(349));
    }

    #[test]
    fn inputs_are_validated_before_staging() {
        let session = session_with_list();
        let dup = Reconciliation {
            items: vec![
                PlannedItemInput::skipped("sa-1", "gone"),
                PlannedItemInput::skipped("sa-1", "gone"),
            ],
            ..Reconciliation::default()
        };
        assert_eq!(
            plan_trip(&session, "Safeway", &dup, now()).unwrap_err(),
            ValidationError::DuplicateInput {
                item_id: "sa-1".into()
            }
        );

        let neg = Reconciliation {
            extras: vec![ExtraItemInput::new("Gum", -1, Money::from_cents(100))],
            ..Reconciliation::default()
        };
        assert_eq!(
            plan_trip(&session, "Safeway", &neg, now()).unwrap_err(),
            ValidationError::NegativeQuantity {
                field: "extras[0].qty".into(),
                value: -1
            }
        );

        let none_bought = Reconciliation {
            extras: vec![ExtraItemInput::new("Gum", 0, Money::from_cents(100))],
            ..Reconciliation::default()
        };
        assert_eq!(
            plan_trip(&session, "Safeway", &none_bought, now()).unwrap_err(),
            ValidationError::QuantityTooSmall {
                field: "extras[0].qty".into(),
                value: 0
            }
        );

        let unnamed = Reconciliation {
            extras: vec![ExtraItemInput::new("  ", 1, Money::from_cents(100))],
            ..Reconciliation::default()
        };
        assert_eq!(
            plan_trip(&session, "Safeway", &unnamed, now()).unwrap_err(),
            ValidationError::MissingField {
                field: "extras[0].name".into()
            }
        );
    }

    #[test]
    fn colliding_trip_id_gets_suffix() {
        let mut session = session_with_list();
        let mut backend = crate::persist::memory::MemoryDocumentStore::new();
        complete_trip(&mut session, &mut backend, "Safeway", &Reconciliation::default(), now())
            .unwrap();
        session.add_to_list("Safeway", "sa-1", None).unwrap();
        let second =
            complete_trip(&mut session, &mut backend, "Safeway", &Reconciliation::default(), now())
                .unwrap();
        assert_eq!(second.record.id, "safeway-20261019T180000000-2");
    }
}
