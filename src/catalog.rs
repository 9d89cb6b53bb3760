//! Per-store item catalog: item records, drafts, sparse patches and the
//! in-memory catalog owned by a session.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    errors::ValidationError,
    types::{
        clean_display_name, item_id_prefix, normalize_name, ItemId, Money, Qty, StoreName,
        DEFAULT_CATEGORY, DEFAULT_UNIT,
    },
};

/// Purchasable item with its current price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Identifier, unique within `store`.
    pub id: ItemId,
    /// Owning store.
    pub store: StoreName,
    /// Display name.
    pub name: String,
    /// Aisle/category label.
    pub category: String,
    /// Current unit price.
    pub price: Money,
    /// Unit label such as `each` or `lb`.
    pub unit: String,
    /// Quantity proposed when the item is added to a list.
    pub default_qty: Qty,
}

/// Insert payload used to create a new [`CatalogItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDraft {
    /// Display name.
    pub name: String,
    /// Category label; empty means [`DEFAULT_CATEGORY`].
    pub category: String,
    /// Unit price.
    pub price: Money,
    /// Unit label; empty means [`DEFAULT_UNIT`].
    pub unit: String,
    /// Default list quantity.
    pub default_qty: Qty,
}

impl CatalogDraft {
    /// Draft with default category, unit and quantity.
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            price,
            unit: String::new(),
            default_qty: 1,
        }
    }

    /// Sets the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the unit label.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Sparse patch where each `Some` field overwrites the item value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogPatch {
    /// Optional replacement name.
    pub name: Option<String>,
    /// Optional replacement category.
    pub category: Option<String>,
    /// Optional replacement price.
    pub price: Option<Money>,
    /// Optional replacement unit.
    pub unit: Option<String>,
}

impl CatalogPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `item`.
    pub fn apply_to(&self, item: &mut CatalogItem) {
        if let Some(v) = &self.name {
            item.name = clean_display_name(v);
        }
        if let Some(v) = &self.category {
            item.category = category_or_default(v);
        }
        if let Some(v) = self.price {
            item.price = v;
        }
        if let Some(v) = &self.unit {
            item.unit = unit_or_default(v);
        }
    }
}

/// All stores' catalogs. Items keep insertion order per store.
///
/// Generated ids are never reissued: the highest suffix seen per store is
/// kept after its item is removed.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    stores: HashMap<StoreName, Vec<CatalogItem>>,
    issued: HashMap<StoreName, u64>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from persisted items, keeping their order.
    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let mut catalog = Self::new();
        for item in items {
            catalog.put(item);
        }
        catalog
    }

    /// Known store names, sorted.
    pub fn stores(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Items of `store` sorted by name, then id.
    pub fn items(&self, store: &str) -> Vec<&CatalogItem> {
        let mut items: Vec<&CatalogItem> = self.raw_items(store).iter().collect();
        items.sort_by(|a, b| {
            normalize_name(&a.name)
                .cmp(&normalize_name(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    /// Items of `store` in `category`, sorted like [`Catalog::items`].
    pub fn items_in_category(&self, store: &str, category: &str) -> Vec<&CatalogItem> {
        self.items(store)
            .into_iter()
            .filter(|item| item.category == category)
            .collect()
    }

    /// Sorted unique categories of `store`, always including the default one.
    pub fn categories(&self, store: &str) -> Vec<String> {
        let mut categories: Vec<String> = self
            .raw_items(store)
            .iter()
            .map(|item| item.category.clone())
            .chain(std::iter::once(DEFAULT_CATEGORY.to_string()))
            .collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }

    /// Item `item_id` of `store`.
    pub fn get(&self, store: &str, item_id: &str) -> Option<&CatalogItem> {
        self.raw_items(store).iter().find(|item| item.id == item_id)
    }

    /// Finds an item by normalized name.
    pub fn find_by_name(&self, store: &str, name: &str) -> Option<&CatalogItem> {
        let wanted = normalize_name(name);
        self.raw_items(store)
            .iter()
            .find(|item| normalize_name(&item.name) == wanted)
    }

    /// Every item across all stores, grouped by sorted store name.
    pub fn all_items(&self) -> Vec<&CatalogItem> {
        self.stores()
            .into_iter()
            .flat_map(|store| self.raw_items(store).iter())
            .collect()
    }

    /// Item count across all stores.
    pub fn len(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }

    /// True when no store has items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next free id for `store`: `<prefix>-<highest suffix ever seen + 1>`.
    pub fn next_item_id(&self, store: &str) -> ItemId {
        let last = self.issued.get(store).copied().unwrap_or(0);
        format!("{}-{}", item_id_prefix(store), last + 1)
    }

    /// Marks `item_id` as used in `store` so it is never generated again.
    ///
    /// Ids referenced by lists or trip history are reserved this way when a
    /// session is loaded, even if their catalog item is gone.
    pub fn reserve_id(&mut self, store: &str, item_id: &str) {
        let Some(suffix) = id_suffix(store, item_id) else {
            return;
        };
        let slot = self.issued.entry(store.to_string()).or_insert(0);
        if suffix > *slot {
            *slot = suffix;
        }
    }

    /// User-initiated insert. A duplicate normalized name is rejected.
    pub fn add_item(
        &mut self,
        store: &str,
        draft: CatalogDraft,
    ) -> Result<CatalogItem, ValidationError> {
        let name = clean_display_name(&draft.name);
        if name.is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }
        if draft.price.is_negative() {
            return Err(ValidationError::NegativePrice {
                field: "price".to_string(),
                value: draft.price,
            });
        }
        if draft.default_qty == 0 {
            return Err(ValidationError::QuantityTooSmall {
                field: "default_qty".to_string(),
                value: 0,
            });
        }
        if let Some(existing) = self.find_by_name(store, &name) {
            return Err(ValidationError::DuplicateCatalogName {
                store: store.to_string(),
                name,
                existing_id: existing.id.clone(),
            });
        }

        let item = CatalogItem {
            id: self.next_item_id(store),
            store: store.to_string(),
            name,
            category: category_or_default(&draft.category),
            price: draft.price,
            unit: unit_or_default(&draft.unit),
            default_qty: draft.default_qty,
        };
        self.put(item.clone());
        Ok(item)
    }

    /// Trip-initiated insert. Always inserts; returns the id of an existing
    /// item with the same normalized name, if any, so the caller can warn.
    pub fn insert_extra(
        &mut self,
        store: &str,
        name: &str,
        category: &str,
        price: Money,
    ) -> (CatalogItem, Option<ItemId>) {
        let existing = self.find_by_name(store, name).map(|item| item.id.clone());
        let item = CatalogItem {
            id: self.next_item_id(store),
            store: store.to_string(),
            name: clean_display_name(name),
            category: category_or_default(category),
            price,
            unit: DEFAULT_UNIT.to_string(),
            default_qty: 1,
        };
        self.put(item.clone());
        (item, existing)
    }

    /// Applies a sparse patch and returns the updated item.
    pub fn update_item(
        &mut self,
        store: &str,
        item_id: &str,
        patch: &CatalogPatch,
    ) -> Result<CatalogItem, ValidationError> {
        if let Some(name) = &patch.name {
            if clean_display_name(name).is_empty() {
                return Err(ValidationError::MissingField {
                    field: "name".to_string(),
                });
            }
        }
        if let Some(price) = patch.price {
            if price.is_negative() {
                return Err(ValidationError::NegativePrice {
                    field: "price".to_string(),
                    value: price,
                });
            }
        }

        let item = self
            .get_mut(store, item_id)
            .ok_or_else(|| unknown_item(store, item_id))?;
        patch.apply_to(item);
        Ok(item.clone())
    }

    /// Overwrites the price of an item (last write wins).
    pub fn set_price(
        &mut self,
        store: &str,
        item_id: &str,
        price: Money,
    ) -> Result<CatalogItem, ValidationError> {
        self.update_item(
            store,
            item_id,
            &CatalogPatch {
                price: Some(price),
                ..CatalogPatch::default()
            },
        )
    }

    /// Removes an item. Its id stays reserved.
    pub fn remove_item(&mut self, store: &str, item_id: &str) -> Result<CatalogItem, ValidationError> {
        let items = self
            .stores
            .get_mut(store)
            .ok_or_else(|| unknown_item(store, item_id))?;
        let pos = items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| unknown_item(store, item_id))?;
        Ok(items.remove(pos))
    }

    /// Inserts or replaces an item by `(store, id)`.
    pub fn put(&mut self, item: CatalogItem) {
        self.reserve_id(&item.store, &item.id);
        let items = self.stores.entry(item.store.clone()).or_default();
        if let Some(slot) = items.iter_mut().find(|existing| existing.id == item.id) {
            *slot = item;
        } else {
            items.push(item);
        }
    }

    fn get_mut(&mut self, store: &str, item_id: &str) -> Option<&mut CatalogItem> {
        self.stores
            .get_mut(store)?
            .iter_mut()
            .find(|item| item.id == item_id)
    }

    fn raw_items(&self, store: &str) -> &[CatalogItem] {
        self.stores.get(store).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Numeric suffix of a generated id belonging to `store`.
fn id_suffix(store: &str, item_id: &str) -> Option<u64> {
    let (prefix, n) = item_id.rsplit_once('-')?;
    if prefix == item_id_prefix(store) {
        n.parse().ok()
    } else {
        None
    }
}

fn unknown_item(store: &str, item_id: &str) -> ValidationError {
    ValidationError::UnknownCatalogItem {
        store: store.to_string(),
        item_id: item_id.to_string(),
    }
}

fn category_or_default(category: &str) -> String {
    let category = clean_display_name(category);
    if category.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        category
    }
}

fn unit_or_default(unit: &str) -> String {
    let unit = unit.trim();
    if unit.is_empty() {
        DEFAULT_UNIT.to_string()
    } else {
        unit.to_string()
    }
}
