//! Shared primitive IDs, quantities and the exact currency type.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};

/// Catalog item identifier, unique within one store (for example `tr-12`).
pub type ItemId = String;
/// Trip identifier derived from the store and completion time.
pub type TripId = String;
/// Store display name, used as the catalog and active-list key.
pub type StoreName = String;
/// Planned or purchased quantity.
pub type Qty = u32;

/// Category assigned when none is given.
pub const DEFAULT_CATEGORY: &str = "Miscellaneous";
/// Unit label assigned when none is given.
pub const DEFAULT_UNIT: &str = "each";

/// Currency amount in cents.
///
/// Arithmetic is exact, so trip totals never drift from the sum of their
/// lines. Serialized as a bare integer number of cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero cents.
    pub const ZERO: Self = Self(0);

    /// Builds an amount from a number of cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Converts decimal dollars, rounding half away from zero to the cent.
    ///
    /// Returns `None` for NaN or infinite input.
    pub fn from_dollars(dollars: f64) -> Option<Self> {
        if !dollars.is_finite() {
            return None;
        }
        Some(Self((dollars * 100.0).round() as i64))
    }

    /// Raw number of cents.
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// True for amounts below zero.
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// True for exactly zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Line total for `qty` units at this unit price.
    pub fn times(self, qty: Qty) -> Self {
        Self(self.0.saturating_mul(i64::from(qty)))
    }

    /// Line total, or `None` when it does not fit.
    pub fn checked_times(self, qty: Qty) -> Option<Self> {
        self.0.checked_mul(i64::from(qty)).map(Self)
    }

    /// Sum, or `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Divides by `n`, rounding half away from zero. Zero divisor yields zero.
    pub fn div_round(self, n: u64) -> Self {
        if n == 0 {
            return Self::ZERO;
        }
        let n = n as i128;
        let value = self.0 as i128;
        let rounded = if value >= 0 {
            (2 * value + n) / (2 * n)
        } else {
            -((2 * -value + n) / (2 * n))
        };
        Self(rounded as i64)
    }

    /// Share of `total` in percent, rounded to two decimals.
    ///
    /// A zero total yields `0.0` rather than dividing by zero.
    pub fn percent_of(self, total: Self) -> f64 {
        if total.is_zero() {
            return 0.0;
        }
        let ratio = self.0 as f64 / total.0 as f64;
        (ratio * 10_000.0).round() / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Normalizes an item name for duplicate detection: trimmed, inner
/// whitespace collapsed, lowercased.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trims a display name and collapses inner whitespace, keeping case.
pub fn clean_display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, dash-separated form of a store name used inside trip ids.
pub fn store_slug(store: &str) -> String {
    let mut slug = String::with_capacity(store.len());
    for ch in store.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("store");
    }
    slug
}

/// Per-store prefix for generated catalog ids: the first two characters of
/// the lowercased store name, spaces dropped.
pub fn item_id_prefix(store: &str) -> String {
    let prefix: String = store
        .chars()
        .take(2)
        .flat_map(char::to_lowercase)
        .filter(|c| !c.is_whitespace())
        .collect();
    if prefix.is_empty() {
        "it".to_string()
    } else {
        prefix
    }
}
