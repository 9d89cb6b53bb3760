//! Trip records and the reconciliation payload that produces them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{store_slug, ItemId, Money, Qty, StoreName, TripId};

/// Lifecycle state of a trip. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Reconciled and recorded.
    Completed,
}

/// Planned line as it turned out in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedItem {
    /// Catalog item the line was planned from.
    pub catalog_item_id: ItemId,
    /// Name snapshot.
    pub name: String,
    /// Category snapshot.
    pub category: String,
    /// Quantity on the active list.
    pub planned_qty: Qty,
    /// Quantity actually bought; 0 when skipped.
    pub actual_qty: Qty,
    /// Catalog price at reconciliation time.
    pub catalog_price: Money,
    /// Unit price actually paid.
    pub actual_price: Money,
    /// Whether the line was bought.
    pub purchased: bool,
    /// Why the line was skipped, if it was.
    pub skip_reason: Option<String>,
}

impl PlannedItem {
    /// Amount counted towards the planned total.
    pub fn spent(&self) -> Money {
        if self.purchased {
            self.actual_price.times(self.actual_qty)
        } else {
            Money::ZERO
        }
    }
}

/// Item bought without being on the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraItem {
    /// Display name.
    pub name: String,
    /// Category label.
    pub category: String,
    /// Quantity bought.
    pub qty: Qty,
    /// Unit price paid.
    pub price: Money,
    /// Whether a catalog item was created for it.
    pub added_to_catalog: bool,
    /// Id of the created catalog item.
    pub catalog_item_id: Option<ItemId>,
}

impl ExtraItem {
    /// Line total.
    pub fn spent(&self) -> Money {
        self.price.times(self.qty)
    }
}

/// A paid price that differed from the catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCorrection {
    /// Catalog item concerned.
    pub item_id: ItemId,
    /// Catalog price before the trip.
    pub old_price: Money,
    /// Price paid.
    pub new_price: Money,
    /// Whether the catalog was overwritten with `new_price`.
    pub catalog_updated: bool,
}

/// Derived trip totals. Only [`TripTotals::compute`] builds these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TripTotals {
    /// Sum over purchased planned lines.
    pub planned_total: Money,
    /// Sum over extra lines.
    pub extra_total: Money,
    /// `planned_total + extra_total`.
    pub trip_total: Money,
}

impl TripTotals {
    /// Sums the planned and extra lines.
    pub fn compute(planned: &[PlannedItem], extras: &[ExtraItem]) -> Self {
        let planned_total: Money = planned.iter().map(PlannedItem::spent).sum();
        let extra_total: Money = extras.iter().map(ExtraItem::spent).sum();
        Self {
            planned_total,
            extra_total,
            trip_total: planned_total + extra_total,
        }
    }
}

/// Immutable record of one completed shopping trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRecord {
    /// Trip id, see [`trip_id_for`].
    pub id: TripId,
    /// Store shopped at.
    pub store: StoreName,
    /// Completion time.
    pub date: DateTime<Utc>,
    /// Lifecycle state.
    pub status: TripStatus,
    /// Active-list lines in list order.
    pub planned_items: Vec<PlannedItem>,
    /// Unplanned purchases in input order.
    pub extra_items: Vec<ExtraItem>,
    /// Derived totals.
    pub totals: TripTotals,
    /// Free text.
    pub notes: String,
    /// Price differences found while reconciling.
    pub price_corrections: Vec<PriceCorrection>,
}

impl TripRecord {
    /// Recomputes totals from the lines and compares with the stored ones.
    pub fn totals_consistent(&self) -> bool {
        TripTotals::compute(&self.planned_items, &self.extra_items) == self.totals
    }
}

/// Base trip id for `store` completed at `date`:
/// `<store-slug>-<YYYYMMDDTHHMMSS><millis>`.
pub fn trip_id_for(store: &str, date: DateTime<Utc>) -> TripId {
    format!("{}-{}", store_slug(store), date.format("%Y%m%dT%H%M%S%3f"))
}

/// What actually happened to one active-list line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedItemInput {
    /// Active-list line being reconciled.
    pub catalog_item_id: ItemId,
    /// Whether it was bought.
    pub purchased: bool,
    /// Quantity bought; defaults to the planned quantity.
    #[serde(default)]
    pub actual_qty: Option<i64>,
    /// Unit price paid; defaults to the catalog price.
    #[serde(default)]
    pub actual_price: Option<Money>,
    /// Why it was not bought.
    #[serde(default)]
    pub skip_reason: Option<String>,
    /// Overwrite the catalog price with `actual_price` when they differ.
    #[serde(default)]
    pub update_catalog_price: bool,
}

impl PlannedItemInput {
    /// Bought as planned at the given price.
    pub fn purchased(item_id: impl Into<ItemId>, qty: i64, price: Money) -> Self {
        Self {
            catalog_item_id: item_id.into(),
            purchased: true,
            actual_qty: Some(qty),
            actual_price: Some(price),
            skip_reason: None,
            update_catalog_price: false,
        }
    }

    /// Not bought.
    pub fn skipped(item_id: impl Into<ItemId>, reason: impl Into<String>) -> Self {
        Self {
            catalog_item_id: item_id.into(),
            purchased: false,
            actual_qty: None,
            actual_price: None,
            skip_reason: Some(reason.into()),
            update_catalog_price: false,
        }
    }

    /// Requests a catalog price overwrite.
    pub fn update_catalog(mut self) -> Self {
        self.update_catalog_price = true;
        self
    }
}

/// An unplanned purchase as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraItemInput {
    /// Display name; required.
    pub name: String,
    /// Category; empty means the default category.
    #[serde(default)]
    pub category: String,
    /// Quantity bought.
    pub qty: i64,
    /// Unit price paid.
    pub price: Money,
    /// Create a catalog item for it.
    #[serde(default)]
    pub add_to_catalog: bool,
}

impl ExtraItemInput {
    /// Extra line that is not added to the catalog.
    pub fn new(name: impl Into<String>, qty: i64, price: Money) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            qty,
            price,
            add_to_catalog: false,
        }
    }

    /// Sets the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Marks the item for insertion into the catalog.
    pub fn add_to_catalog(mut self) -> Self {
        self.add_to_catalog = true;
        self
    }
}

/// User-supplied actuals for one trip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Per-line outcomes. Lines without an entry count as bought as planned.
    #[serde(default)]
    pub items: Vec<PlannedItemInput>,
    /// Unplanned purchases.
    #[serde(default)]
    pub extras: Vec<ExtraItemInput>,
    /// Free text stored on the record.
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn trip_id_uses_slug_and_millis() {
        let date = Utc.with_ymd_and_hms(2026, 10, 19, 14, 30, 5).unwrap();
        assert_eq!(trip_id_for("Trader Joe's", date), "trader-joes-20261019T143005000");
    }

    #[test]
    fn skipped_lines_do_not_count() {
        let planned = vec![PlannedItem {
            catalog_item_id: "tr-1".into(),
            name: "Bananas".into(),
            category: "Produce".into(),
            planned_qty: 2,
            actual_qty: 0,
            catalog_price: Money::from_cents(99),
            actual_price: Money::from_cents(99),
            purchased: false,
            skip_reason: Some("out of stock".into()),
        }];
        let extras = vec![ExtraItem {
            name: "Chocolate".into(),
            category: "Snacks".into(),
            qty: 2,
            price: Money::from_cents(249),
            added_to_catalog: false,
            catalog_item_id: None,
        }];
        let totals = TripTotals::compute(&planned, &extras);
        assert_eq!(totals.planned_total, Money::ZERO);
        assert_eq!(totals.extra_total, Money::from_cents(498));
        assert_eq!(totals.trip_total, Money::from_cents(498));
    }

    #[test]
    fn reconciliation_payload_parses_with_defaults() {
        let payload = r#"{
            "items": [{"catalog_item_id": "tr-1", "purchased": false, "skip_reason": "out of stock"}],
            "extras": [{"name": "Chocolate", "qty": 2, "price": 249, "add_to_catalog": true}]
        }"#;
        let rec: Reconciliation = serde_json::from_str(payload).unwrap();
        assert_eq!(rec.items[0].actual_qty, None);
        assert!(!rec.items[0].update_catalog_price);
        assert_eq!(rec.extras[0].price, Money::from_cents(249));
        assert!(rec.notes.is_empty());
    }
}
