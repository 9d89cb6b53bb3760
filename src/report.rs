//! Read-only reports over trip history: monthly and whole-history
//! summaries and budget status.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use hashbrown::HashMap;
use serde::Serialize;

use crate::{
    errors::ValidationError,
    ledger::HistoryLedger,
    trip::TripRecord,
    types::{normalize_name, Money},
};

/// Number of entries in the top-items tables.
pub const TOP_ITEMS_LIMIT: usize = 10;

/// Spend and trip count for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSubtotal {
    /// Store name.
    pub store: String,
    /// Amount spent.
    pub total: Money,
    /// Trips counted.
    pub trip_count: usize,
}

/// Quantity bought of one item across trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemTally {
    /// Name as first seen.
    pub name: String,
    /// Units bought.
    pub qty: u64,
    /// Amount spent.
    pub spent: Money,
}

/// Spending for one calendar month (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    /// Calendar year.
    pub year: i32,
    /// Month, 1 to 12.
    pub month: u32,
    /// Store filter, if one was applied.
    pub store: Option<String>,
    /// Trips in the month.
    pub trip_count: usize,
    /// Amount spent.
    pub total: Money,
    /// Total over trip count, to the nearest cent; zero with no trips.
    pub average_per_trip: Money,
    /// Spent on planned lines.
    pub planned_total: Money,
    /// Spent on extras.
    pub extra_total: Money,
    /// Share of the total spent on planned lines, 0 when nothing was spent.
    pub planned_percent: f64,
    /// Share of the total spent on extras.
    pub extra_percent: f64,
    /// Sorted by store name.
    pub per_store: Vec<StoreSubtotal>,
    /// Highest quantity first.
    pub top_items: Vec<ItemTally>,
}

impl MonthlySummary {
    /// Plain-text rendering. Identical input gives identical bytes.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MonthlySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.store.as_deref().unwrap_or("all stores");
        writeln!(f, "Grocery summary {:04}-{:02} ({scope})", self.year, self.month)?;
        writeln!(f, "Trips: {}", self.trip_count)?;
        writeln!(f, "Total spent: {}", self.total)?;
        writeln!(f, "Average per trip: {}", self.average_per_trip)?;
        writeln!(
            f,
            "Planned: {} ({:.2}%)",
            self.planned_total, self.planned_percent
        )?;
        writeln!(f, "Extras: {} ({:.2}%)", self.extra_total, self.extra_percent)?;
        if !self.per_store.is_empty() {
            writeln!(f)?;
            writeln!(f, "By store:")?;
            for s in &self.per_store {
                writeln!(f, "  {}: {} over {} {}", s.store, s.total, s.trip_count, trips_word(s.trip_count))?;
            }
        }
        write_top_items(f, &self.top_items)
    }
}

/// Totals over every trip held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    /// Trips stored.
    pub trip_count: usize,
    /// Amount spent.
    pub total_spent: Money,
    /// Units bought, planned and extra.
    pub items_bought: u64,
    /// Total over trip count, to the nearest cent.
    pub average_per_trip: Money,
    /// Sorted by store name.
    pub per_store: Vec<StoreSubtotal>,
    /// Highest quantity first.
    pub top_items: Vec<ItemTally>,
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "History: {} {}", self.trip_count, trips_word(self.trip_count))?;
        writeln!(f, "Total spent: {}", self.total_spent)?;
        writeln!(f, "Items bought: {}", self.items_bought)?;
        writeln!(f, "Average per trip: {}", self.average_per_trip)?;
        for s in &self.per_store {
            writeln!(f, "  {}: {}", s.store, s.total)?;
        }
        write_top_items(f, &self.top_items)
    }
}

/// How close spending is to a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    /// Below 80%.
    OnTrack,
    /// 80% up to 100%.
    Approaching,
    /// 100% or more.
    Over,
}

/// Spending measured against a budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    /// Amount spent.
    pub spent: Money,
    /// Budget amount.
    pub budget: Money,
    /// Negative when over budget.
    pub remaining: Money,
    /// Spent as a percentage of the budget.
    pub percent: f64,
    /// Level derived from `percent`.
    pub level: BudgetLevel,
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            BudgetLevel::OnTrack => "on track",
            BudgetLevel::Approaching => "approaching",
            BudgetLevel::Over => "over budget",
        };
        write!(
            f,
            "{} of {} ({:.2}%, {level}), {} left",
            self.spent, self.budget, self.percent, self.remaining
        )
    }
}

/// Classifies `spent` against `budget`. A zero budget reports 0%.
pub fn budget_status(spent: Money, budget: Money) -> BudgetStatus {
    let percent = spent.percent_of(budget);
    let level = if percent < 80.0 {
        BudgetLevel::OnTrack
    } else if percent < 100.0 {
        BudgetLevel::Approaching
    } else {
        BudgetLevel::Over
    };
    BudgetStatus {
        spent,
        budget,
        remaining: budget - spent,
        percent,
        level,
    }
}

/// First instant of the month and of the month after it.
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>), ValidationError> {
    let invalid = || ValidationError::InvalidMonth { year, month };
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = start.checked_add_months(Months::new(1)).ok_or_else(invalid)?;
    Ok((
        start.and_time(NaiveTime::MIN).and_utc(),
        end.and_time(NaiveTime::MIN).and_utc(),
    ))
}

/// Summarizes trips dated in `year`-`month`, optionally for one store.
///
/// Every record held by the ledger is considered; the retention window is
/// only applied by cleanup.
pub fn monthly_summary(
    ledger: &HistoryLedger,
    year: i32,
    month: u32,
    store: Option<&str>,
) -> Result<MonthlySummary, ValidationError> {
    let (start, end) = month_bounds(year, month)?;
    let trips: Vec<&TripRecord> = ledger
        .iter()
        .filter(|r| r.date >= start && r.date < end)
        .filter(|r| store.is_none_or(|s| r.store == s))
        .collect();

    let planned_total: Money = trips.iter().map(|r| r.totals.planned_total).sum();
    let extra_total: Money = trips.iter().map(|r| r.totals.extra_total).sum();
    let total: Money = trips.iter().map(|r| r.totals.trip_total).sum();

    Ok(MonthlySummary {
        year,
        month,
        store: store.map(str::to_string),
        trip_count: trips.len(),
        total,
        average_per_trip: total.div_round(trips.len() as u64),
        planned_total,
        extra_total,
        planned_percent: planned_total.percent_of(total),
        extra_percent: extra_total.percent_of(total),
        per_store: per_store(&trips),
        top_items: top_items(&trips),
    })
}

/// Summarizes every trip in the ledger.
pub fn history_summary(ledger: &HistoryLedger) -> HistorySummary {
    let trips: Vec<&TripRecord> = ledger.iter().collect();
    let total_spent: Money = trips.iter().map(|r| r.totals.trip_total).sum();
    let items_bought = trips
        .iter()
        .flat_map(|r| bought_lines(r))
        .map(|(_, qty, _)| u64::from(qty))
        .sum();
    HistorySummary {
        trip_count: trips.len(),
        total_spent,
        items_bought,
        average_per_trip: total_spent.div_round(trips.len() as u64),
        per_store: per_store(&trips),
        top_items: top_items(&trips),
    }
}

fn per_store(trips: &[&TripRecord]) -> Vec<StoreSubtotal> {
    let mut by_store: BTreeMap<&str, (Money, usize)> = BTreeMap::new();
    for r in trips {
        let slot = by_store.entry(r.store.as_str()).or_default();
        slot.0 += r.totals.trip_total;
        slot.1 += 1;
    }
    by_store
        .into_iter()
        .map(|(store, (total, trip_count))| StoreSubtotal {
            store: store.to_string(),
            total,
            trip_count,
        })
        .collect()
}

/// `(name, qty, line total)` for every purchased line of a trip.
fn bought_lines(record: &TripRecord) -> impl Iterator<Item = (&str, u32, Money)> + '_ {
    let planned = record
        .planned_items
        .iter()
        .filter(|p| p.purchased)
        .map(|p| (p.name.as_str(), p.actual_qty, p.spent()));
    let extras = record
        .extra_items
        .iter()
        .map(|x| (x.name.as_str(), x.qty, x.spent()));
    planned.chain(extras)
}

fn top_items(trips: &[&TripRecord]) -> Vec<ItemTally> {
    let mut tallies: HashMap<String, ItemTally> = HashMap::new();
    for r in trips {
        for (name, qty, spent) in bought_lines(r) {
            let tally = tallies.entry(normalize_name(name)).or_insert_with(|| ItemTally {
                name: name.to_string(),
                qty: 0,
                spent: Money::ZERO,
            });
            tally.qty += u64::from(qty);
            tally.spent += spent;
        }
    }
    let mut items: Vec<(String, ItemTally)> = tallies.into_iter().collect();
    items.sort_by(|(ka, a), (kb, b)| b.qty.cmp(&a.qty).then_with(|| ka.cmp(kb)));
    items
        .into_iter()
        .filter(|(_, t)| t.qty > 0)
        .take(TOP_ITEMS_LIMIT)
        .map(|(_, t)| t)
        .collect()
}

fn write_top_items(f: &mut fmt::Formatter<'_>, items: &[ItemTally]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(f)?;
    writeln!(f, "Top items:")?;
    for (i, item) in items.iter().enumerate() {
        writeln!(f, "  {}. {} x{} ({})", i + 1, item.name, item.qty, item.spent)?;
    }
    Ok(())
}

fn trips_word(n: usize) -> &'static str {
    if n == 1 { "trip" } else { "trips" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_levels() {
        let budget = Money::from_cents(10_000);
        assert_eq!(budget_status(Money::from_cents(7_999), budget).level, BudgetLevel::OnTrack);
        assert_eq!(budget_status(Money::from_cents(8_000), budget).level, BudgetLevel::Approaching);
        let over = budget_status(Money::from_cents(10_050), budget);
        assert_eq!(over.level, BudgetLevel::Over);
        assert_eq!(over.remaining, Money::from_cents(-50));
        assert_eq!(budget_status(Money::from_cents(500), Money::ZERO).percent, 0.0);
    }

    #[test]
    fn month_bounds_rejects_bad_months() {
        assert!(month_bounds(2026, 0).is_err());
        assert!(month_bounds(2026, 13).is_err());
        let (start, end) = month_bounds(2026, 12).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2027-01-01T00:00:00+00:00");
    }

    #[test]
    fn empty_month_renders_zeros() {
        let summary = monthly_summary(&HistoryLedger::default(), 2026, 10, None).unwrap();
        assert_eq!(summary.trip_count, 0);
        assert_eq!(summary.total, Money::ZERO);
        assert_eq!(summary.planned_percent, 0.0);
        assert_eq!(summary.extra_percent, 0.0);
        assert_eq!(
            summary.render(),
            "Grocery summary 2026-10 (all stores)\n\
             Trips: 0\n\
             Total spent: $0.00\n\
             Average per trip: $0.00\n\
             Planned: $0.00 (0.00%)\n\
             Extras: $0.00 (0.00%)\n"
        );
    }
}
