//! In-progress shopping lists, one per store.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::CatalogItem,
    errors::ValidationError,
    types::{ItemId, Money, Qty, StoreName},
};

/// One planned line on an active list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveListEntry {
    /// Catalog item this line was created from.
    pub catalog_item_id: ItemId,
    /// Item name at add time.
    pub name: String,
    /// Item category at add time.
    pub category: String,
    /// Unit label at add time.
    pub unit: String,
    /// Planned quantity, at least 1.
    pub qty: Qty,
    /// Unit price snapshot taken when the item was added.
    pub price: Money,
}

impl ActiveListEntry {
    /// Planned cost of this line.
    pub fn line_total(&self) -> Money {
        self.price.times(self.qty)
    }
}

/// The active list of one store, in the order items were added.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveList {
    /// Owning store.
    pub store: StoreName,
    /// Planned lines.
    pub entries: Vec<ActiveListEntry>,
}

impl ActiveList {
    /// Empty list for `store`.
    pub fn new(store: impl Into<StoreName>) -> Self {
        Self {
            store: store.into(),
            entries: Vec::new(),
        }
    }

    /// True when nothing is planned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Line for `item_id`, if planned.
    pub fn get(&self, item_id: &str) -> Option<&ActiveListEntry> {
        self.entries.iter().find(|e| e.catalog_item_id == item_id)
    }

    /// Planned cost of the whole list.
    pub fn total(&self) -> Money {
        self.entries.iter().map(ActiveListEntry::line_total).sum()
    }
}

/// Active lists of all stores.
#[derive(Debug, Clone, Default)]
pub struct ActiveLists {
    lists: HashMap<StoreName, ActiveList>,
}

impl ActiveLists {
    /// No lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the manager from persisted lists. Empty lists are dropped.
    pub fn from_lists(lists: impl IntoIterator<Item = ActiveList>) -> Self {
        let mut out = Self::new();
        for list in lists {
            out.replace(list);
        }
        out
    }

    /// List of `store`, if it has one.
    pub fn get(&self, store: &str) -> Option<&ActiveList> {
        self.lists.get(store)
    }

    /// Lines of `store`'s list; empty when the store has no list.
    pub fn entries(&self, store: &str) -> &[ActiveListEntry] {
        self.lists
            .get(store)
            .map(|list| list.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Owned copy of `store`'s list, empty when absent.
    pub fn snapshot(&self, store: &str) -> ActiveList {
        self.lists
            .get(store)
            .cloned()
            .unwrap_or_else(|| ActiveList::new(store))
    }

    /// Planned cost of `store`'s list, zero when it has none.
    pub fn total(&self, store: &str) -> Money {
        self.lists.get(store).map(ActiveList::total).unwrap_or_default()
    }

    /// Non-empty lists sorted by store name.
    pub fn all(&self) -> Vec<&ActiveList> {
        let mut lists: Vec<&ActiveList> = self.lists.values().collect();
        lists.sort_by(|a, b| a.store.cmp(&b.store));
        lists
    }

    /// Adds `qty` of `item`; an item already on the list has its quantity
    /// increased instead.
    pub fn add(&mut self, item: &CatalogItem, qty: Qty) -> Result<ActiveListEntry, ValidationError> {
        ensure_positive("qty", qty)?;
        let list = self
            .lists
            .entry(item.store.clone())
            .or_insert_with(|| ActiveList::new(item.store.clone()));

        if let Some(entry) = list
            .entries
            .iter_mut()
            .find(|e| e.catalog_item_id == item.id)
        {
            entry.qty = entry.qty.saturating_add(qty);
            return Ok(entry.clone());
        }

        let entry = ActiveListEntry {
            catalog_item_id: item.id.clone(),
            name: item.name.clone(),
            category: item.category.clone(),
            unit: item.unit.clone(),
            qty,
            price: item.price,
        };
        list.entries.push(entry.clone());
        Ok(entry)
    }

    /// Sets the quantity of a planned line. `qty` must be at least 1.
    pub fn set_quantity(
        &mut self,
        store: &str,
        item_id: &str,
        qty: Qty,
    ) -> Result<ActiveListEntry, ValidationError> {
        ensure_positive("qty", qty)?;
        let entry = self
            .lists
            .get_mut(store)
            .and_then(|list| list.entries.iter_mut().find(|e| e.catalog_item_id == item_id))
            .ok_or_else(|| not_on_list(store, item_id))?;
        entry.qty = qty;
        Ok(entry.clone())
    }

    /// Removes one line and returns it.
    pub fn remove(&mut self, store: &str, item_id: &str) -> Result<ActiveListEntry, ValidationError> {
        let list = self
            .lists
            .get_mut(store)
            .ok_or_else(|| not_on_list(store, item_id))?;
        let pos = list
            .entries
            .iter()
            .position(|e| e.catalog_item_id == item_id)
            .ok_or_else(|| not_on_list(store, item_id))?;
        let removed = list.entries.remove(pos);
        if list.is_empty() {
            self.lists.remove(store);
        }
        Ok(removed)
    }

    /// Empties `store`'s list and returns the removed lines.
    pub fn clear(&mut self, store: &str) -> Vec<ActiveListEntry> {
        self.lists
            .remove(store)
            .map(|list| list.entries)
            .unwrap_or_default()
    }

    /// Replaces a store's list wholesale.
    pub fn replace(&mut self, list: ActiveList) {
        if list.is_empty() {
            self.lists.remove(&list.store);
        } else {
            self.lists.insert(list.store.clone(), list);
        }
    }

    /// Copies name, category, unit and price of an edited catalog item onto
    /// its list line. Returns true when a line was updated.
    pub fn sync_item(&mut self, item: &CatalogItem) -> bool {
        let Some(entry) = self
            .lists
            .get_mut(&item.store)
            .and_then(|list| list.entries.iter_mut().find(|e| e.catalog_item_id == item.id))
        else {
            return false;
        };
        entry.name = item.name.clone();
        entry.category = item.category.clone();
        entry.unit = item.unit.clone();
        entry.price = item.price;
        true
    }
}

fn ensure_positive(field: &str, qty: Qty) -> Result<(), ValidationError> {
    if qty == 0 {
        return Err(ValidationError::QuantityTooSmall {
            field: field.to_string(),
            value: 0,
        });
    }
    Ok(())
}

fn not_on_list(store: &str, item_id: &str) -> ValidationError {
    ValidationError::NotOnList {
        store: store.to_string(),
        item_id: item_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, cents: i64) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            store: "Safeway".to_string(),
            name: name.to_string(),
            category: "Produce".to_string(),
            price: Money::from_cents(cents),
            unit: "each".to_string(),
            default_qty: 1,
        }
    }

    #[test]
    fn adding_twice_accumulates_quantity() {
        let mut lists = ActiveLists::new();
        let apples = item("sa-1", "Apples", 50);
        lists.add(&apples, 2).unwrap();
        let entry = lists.add(&apples, 3).unwrap();
        assert_eq!(entry.qty, 5);
        assert_eq!(lists.entries("Safeway").len(), 1);
        assert_eq!(lists.total("Safeway"), Money::from_cents(250));
    }

    #[test]
    fn quantity_must_be_positive() {
        let mut lists = ActiveLists::new();
        let apples = item("sa-1", "Apples", 50);
        assert!(lists.add(&apples, 0).is_err());
        lists.add(&apples, 1).unwrap();
        assert!(lists.set_quantity("Safeway", "sa-1", 0).is_err());
        assert!(lists.set_quantity("Safeway", "sa-9", 2).is_err());
        assert_eq!(lists.set_quantity("Safeway", "sa-1", 4).unwrap().qty, 4);
    }

    #[test]
    fn removing_last_line_drops_the_list() {
        let mut lists = ActiveLists::new();
        lists.add(&item("sa-1", "Apples", 50), 1).unwrap();
        lists.remove("Safeway", "sa-1").unwrap();
        assert!(lists.get("Safeway").is_none());
        assert!(lists.remove("Safeway", "sa-1").is_err());
    }

    #[test]
    fn sync_item_refreshes_snapshot() {
        let mut lists = ActiveLists::new();
        let mut apples = item("sa-1", "Apples", 50);
        lists.add(&apples, 1).unwrap();
        apples.price = Money::from_cents(65);
        assert!(lists.sync_item(&apples));
        assert_eq!(lists.entries("Safeway")[0].price, Money::from_cents(65));
        assert!(!lists.sync_item(&item("sa-2", "Pears", 10)));
    }
}
