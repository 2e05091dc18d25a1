//! Materialization of recurring rules into concrete expenses.
//!
//! The k-th occurrence of a rule is always computed from the rule's start
//! date, so month and year stepping clamp to the last day of shorter months
//! without drifting (Jan 31, Feb 29, Mar 31, ...).

use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::models::{Expense, Interval, RecurringExpense, MAX_OCCURRENCES};

/// Which already-materialized instances an edit or removal of a rule touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only instances dated after "now"; past instances are kept.
    Future,
    /// Every instance generated by the rule.
    All,
}

impl Scope {
    pub fn from_flag(all: bool) -> Self {
        if all {
            Scope::All
        } else {
            Scope::Future
        }
    }
}

/// Expands `rule` relative to the current time. See [`expand_at`].
pub fn expand(rule: &RecurringExpense, from_today: bool) -> Vec<Expense> {
    expand_at(rule, from_today, OffsetDateTime::now_utc())
}

/// Expands `rule` into dated expenses in chronological order.
///
/// With `from_today` set, occurrences dated at or before `now` are skipped
/// and count against the rule's occurrence budget, so only the remaining
/// future instances are produced. Runs longer than [`MAX_OCCURRENCES`] are
/// cut short.
pub fn expand_at(rule: &RecurringExpense, from_today: bool, now: OffsetDateTime) -> Vec<Expense> {
    if !rule.interval.is_recognized() {
        tracing::warn!(
            rule_id = %rule.id,
            interval = %rule.interval,
            "Unrecognized interval, stopping expansion"
        );
        return Vec::new();
    }

    let total = u32::try_from(rule.occurrences.min(MAX_OCCURRENCES)).unwrap_or(0);
    let mut step = 0;
    if from_today {
        while step < total {
            match occurrence(rule.start_date, &rule.interval, step) {
                Some(date) if date <= now => step += 1,
                _ => break,
            }
        }
    }

    let mut expenses = Vec::new();
    for k in step..total {
        let Some(date) = occurrence(rule.start_date, &rule.interval, k) else {
            break;
        };
        expenses.push(materialize(rule, date));
    }
    expenses
}

/// True when `expense` belongs to `rule_id` and falls inside `scope` relative to `now`.
pub fn is_superseded(expense: &Expense, rule_id: &str, scope: Scope, now: OffsetDateTime) -> bool {
    if !expense.is_generated_by(rule_id) {
        return false;
    }
    match scope {
        Scope::All => true,
        Scope::Future => expense.date.is_some_and(|date| date > now),
    }
}

/// Splits `expenses` into `(retained, superseded)` for an edit or removal of `rule_id`.
pub fn partition(
    expenses: Vec<Expense>,
    rule_id: &str,
    scope: Scope,
    now: OffsetDateTime,
) -> (Vec<Expense>, Vec<Expense>) {
    expenses
        .into_iter()
        .partition(|expense| !is_superseded(expense, rule_id, scope, now))
}

fn materialize(rule: &RecurringExpense, date: OffsetDateTime) -> Expense {
    Expense {
        id: Uuid::new_v4().to_string(),
        recurring_id: Some(rule.id.clone()),
        name: rule.name.clone(),
        tags: rule.tags.clone(),
        category: rule.category.clone(),
        amount: rule.amount,
        currency: rule.currency.clone(),
        date: Some(date),
    }
}

fn occurrence(start: OffsetDateTime, interval: &Interval, k: u32) -> Option<OffsetDateTime> {
    match interval {
        Interval::Daily => start.checked_add(Duration::days(i64::from(k))),
        Interval::Weekly => start.checked_add(Duration::weeks(i64::from(k))),
        Interval::Monthly => add_months(start, i64::from(k)),
        Interval::Yearly => add_months(start, i64::from(k) * 12),
        Interval::Unrecognized(_) => None,
    }
}

fn add_months(start: OffsetDateTime, months: i64) -> Option<OffsetDateTime> {
    let index = i64::from(start.year()) * 12 + i64::from(u8::from(start.month())) - 1 + months;
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    let day = start.day().min(month.length(year));
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(start.replace_date(date))
}
