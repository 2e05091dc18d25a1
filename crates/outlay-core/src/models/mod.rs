use std::fmt::Display;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod serde_helpers;
mod validation;

pub use validation::{
    sanitize, validate_category, validate_currency, validate_start_date, DEFAULT_CATEGORIES,
    DEFAULT_CURRENCY, DEFAULT_START_DATE, MAX_OCCURRENCES, SUPPORTED_CURRENCIES,
};

/// A single dated financial record. Negative amounts are income by convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    #[serde(default)]
    pub id: String,
    /// Identifier of the rule that generated this record, `None` when entered by hand.
    #[serde(rename = "recurringID", default, with = "serde_helpers::empty_as_none")]
    pub recurring_id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "serde_helpers::null_as_default")]
    pub tags: Vec<String>,
    pub category: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
}

impl Expense {
    /// A manual expense with no id, currency or date yet; the store fills those in.
    pub fn new(name: impl Into<String>, category: impl Into<String>, amount: Decimal) -> Self {
        Self {
            id: String::new(),
            recurring_id: None,
            name: name.into(),
            tags: Vec::new(),
            category: category.into(),
            amount,
            currency: String::new(),
            date: None,
        }
    }

    pub fn with_date(mut self, date: OffsetDateTime) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn is_generated_by(&self, rule_id: &str) -> bool {
        self.recurring_id.as_deref() == Some(rule_id)
    }
}

/// How far apart two occurrences of a rule are.
///
/// Unknown tags survive deserialization as `Unrecognized` so that a damaged
/// document can still be loaded; validation rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Unrecognized(String),
}

impl Interval {
    pub fn as_str(&self) -> &str {
        match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Yearly => "yearly",
            Interval::Unrecognized(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Interval::Unrecognized(_))
    }
}

impl From<String> for Interval {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "daily" => Interval::Daily,
            "weekly" => Interval::Weekly,
            "monthly" => Interval::Monthly,
            "yearly" => Interval::Yearly,
            _ => Interval::Unrecognized(tag),
        }
    }
}

impl From<&str> for Interval {
    fn from(tag: &str) -> Self {
        Interval::from(tag.to_string())
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        match interval {
            Interval::Unrecognized(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that materializes `occurrences` expenses, the first on `start_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringExpense {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "serde_helpers::null_as_default")]
    pub tags: Vec<String>,
    pub category: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    pub interval: Interval,
    pub occurrences: i32,
}

impl RecurringExpense {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        amount: Decimal,
        start_date: OffsetDateTime,
        interval: Interval,
        occurrences: i32,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            amount,
            currency: String::new(),
            tags: Vec::new(),
            category: category.into(),
            start_date,
            interval,
            occurrences,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

/// The singleton settings document, including every recurring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, deserialize_with = "serde_helpers::null_as_default")]
    pub categories: Vec<String>,
    pub currency: String,
    pub start_date: i32,
    #[serde(default, deserialize_with = "serde_helpers::null_as_default")]
    pub recurring_expenses: Vec<RecurringExpense>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            currency: DEFAULT_CURRENCY.to_string(),
            start_date: DEFAULT_START_DATE,
            recurring_expenses: Vec::new(),
        }
    }
}

/// Current time truncated to microseconds, the finest precision every backend keeps.
pub fn timestamp_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}
