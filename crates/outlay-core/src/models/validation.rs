use std::sync::LazyLock;

use regex::Regex;

use super::{Config, Expense, RecurringExpense};
use crate::storage::StoreError;

pub const DEFAULT_CURRENCY: &str = "usd";
pub const DEFAULT_START_DATE: i32 = 1;

/// Upper bound on how many instances a single rule may materialize.
pub const MAX_OCCURRENCES: i32 = 10_000;

pub const DEFAULT_CATEGORIES: [&str; 10] = [
    "Food",
    "Groceries",
    "Travel",
    "Rent",
    "Utilities",
    "Entertainment",
    "Healthcare",
    "Shopping",
    "Miscellaneous",
    "Income",
];

pub const SUPPORTED_CURRENCIES: [&str; 29] = [
    "usd", "eur", "gbp", "jpy", "cny", "krw", "inr", "rub", "brl", "zar", "aed", "aud", "cad",
    "chf", "hkd", "bdt", "sgd", "thb", "try", "mxn", "php", "pln", "sek", "nzd", "dkk", "idr",
    "ils", "vnd", "myr",
];

static INVALID_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\p{L}\p{N}\s.,\-'_!"]"#).expect("sanitize pattern compiles")
});
static REPEATED_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Replaces anything but letters, digits, whitespace and `.,-'_!"` with a
/// space, then collapses whitespace runs and trims.
pub fn sanitize(input: &str) -> String {
    let replaced = INVALID_CHARS.replace_all(input, " ");
    let collapsed = REPEATED_SPACES.replace_all(&replaced, " ");
    collapsed.trim().to_string()
}

pub fn validate_category(category: &str) -> Result<String, StoreError> {
    let sanitized = sanitize(category);
    if sanitized.is_empty() {
        return Err(StoreError::Validation(
            "category name cannot be empty or contain only invalid characters".into(),
        ));
    }
    Ok(sanitized)
}

pub fn validate_currency(currency: &str) -> Result<(), StoreError> {
    if !SUPPORTED_CURRENCIES.contains(&currency) {
        return Err(StoreError::Validation(format!("invalid currency: {}", currency)));
    }
    Ok(())
}

pub fn validate_start_date(start_date: i32) -> Result<(), StoreError> {
    if !(1..=31).contains(&start_date) {
        return Err(StoreError::Validation(format!("invalid start date: {}", start_date)));
    }
    Ok(())
}

/// Sanitizes every tag, dropping empties and repeats while keeping first-seen order.
fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = sanitize(&tag);
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

fn required_name(kind: &str, name: &str) -> Result<String, StoreError> {
    let name = sanitize(name);
    if name.is_empty() {
        return Err(StoreError::Validation(format!("{} 'name' cannot be empty", kind)));
    }
    Ok(name)
}

/// An empty currency is left for the store to fill from its defaults.
fn optional_currency(currency: &str) -> Result<(), StoreError> {
    if currency.is_empty() {
        return Ok(());
    }
    validate_currency(currency)
}

fn required_category(kind: &str, category: &str) -> Result<String, StoreError> {
    let category = category.trim();
    if category.is_empty() {
        return Err(StoreError::Validation(format!("{} 'category' cannot be empty", kind)));
    }
    Ok(category.to_string())
}

impl Expense {
    /// Sanitizes the record in place, rejecting it if a required field ends up empty.
    pub fn validate(&mut self) -> Result<(), StoreError> {
        self.name = required_name("expense", &self.name)?;
        self.category = required_category("expense", &self.category)?;
        if self.amount.is_zero() {
            return Err(StoreError::Validation("expense 'amount' cannot be 0".into()));
        }
        optional_currency(&self.currency)?;
        self.tags = clean_tags(std::mem::take(&mut self.tags));
        Ok(())
    }
}

impl RecurringExpense {
    pub fn validate(&mut self) -> Result<(), StoreError> {
        self.name = required_name("recurring expense", &self.name)?;
        self.category = required_category("recurring expense", &self.category)?;
        if self.amount.is_zero() {
            return Err(StoreError::Validation("recurring expense 'amount' cannot be 0".into()));
        }
        optional_currency(&self.currency)?;
        self.tags = clean_tags(std::mem::take(&mut self.tags));
        if self.occurrences < 2 {
            return Err(StoreError::Validation("at least 2 occurrences required to recur".into()));
        }
        if self.occurrences > MAX_OCCURRENCES {
            return Err(StoreError::Validation(format!(
                "at most {} occurrences allowed, got {}",
                MAX_OCCURRENCES, self.occurrences
            )));
        }
        if !self.interval.is_recognized() {
            return Err(StoreError::Validation(format!(
                "invalid interval: '{}'. Must be one of 'daily', 'weekly', 'monthly', or 'yearly'",
                self.interval
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Replaces the category list, sanitizing each entry. Nothing changes if any entry is invalid.
    pub fn set_categories(&mut self, categories: Vec<String>) -> Result<(), StoreError> {
        self.categories = categories
            .iter()
            .map(|c| validate_category(c))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    pub fn set_currency(&mut self, currency: &str) -> Result<(), StoreError> {
        validate_currency(currency)?;
        self.currency = currency.to_string();
        Ok(())
    }

    pub fn set_start_date(&mut self, start_date: i32) -> Result<(), StoreError> {
        validate_start_date(start_date)?;
        self.start_date = start_date;
        Ok(())
    }
}
