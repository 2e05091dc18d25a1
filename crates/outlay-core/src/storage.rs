use std::path::PathBuf;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{Config, Expense, RecurringExpense};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed document {}: {source}", path.display())]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Backend(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Coarse classification callers use to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Substrate,
}

impl StoreError {
    pub fn expense_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "expense",
            id: id.into(),
        }
    }

    pub fn rule_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "recurring expense",
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Io(_)
            | StoreError::Serialization(_)
            | StoreError::MalformedDocument { .. }
            | StoreError::Backend(_)
            | StoreError::LockPoisoned => ErrorKind::Substrate,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// The capability every backend offers. Values returned are owned copies.
pub trait ExpenseStore: Send + Sync {
    fn get_config(&self) -> Result<Config, StoreError>;
    fn get_categories(&self) -> Result<Vec<String>, StoreError>;
    fn update_categories(&self, categories: Vec<String>) -> Result<(), StoreError>;
    fn get_currency(&self) -> Result<String, StoreError>;
    fn update_currency(&self, currency: &str) -> Result<(), StoreError>;
    fn get_start_date(&self) -> Result<i32, StoreError>;
    fn update_start_date(&self, start_date: i32) -> Result<(), StoreError>;

    fn get_recurring_expenses(&self) -> Result<Vec<RecurringExpense>, StoreError>;
    fn get_recurring_expense(&self, id: &str) -> Result<RecurringExpense, StoreError>;
    /// Persists the rule and materializes its full run from the start date.
    fn add_recurring_expense(&self, rule: RecurringExpense)
        -> Result<RecurringExpense, StoreError>;
    /// Replaces the rule; with `update_all` unset only future instances are regenerated.
    fn update_recurring_expense(
        &self,
        id: &str,
        rule: RecurringExpense,
        update_all: bool,
    ) -> Result<(), StoreError>;
    /// Deletes the rule; with `remove_all` unset past instances remain as orphans.
    fn remove_recurring_expense(&self, id: &str, remove_all: bool) -> Result<(), StoreError>;

    /// All expenses, newest first.
    fn get_all_expenses(&self) -> Result<Vec<Expense>, StoreError>;
    fn get_expense(&self, id: &str) -> Result<Expense, StoreError>;
    fn add_expense(&self, expense: Expense) -> Result<Expense, StoreError>;
    fn update_expense(&self, id: &str, expense: Expense) -> Result<(), StoreError>;
    fn remove_expense(&self, id: &str) -> Result<(), StoreError>;
    fn add_multiple_expenses(&self, expenses: Vec<Expense>) -> Result<(), StoreError>;
    fn remove_multiple_expenses(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// Last-known config values used to fill empty fields on new writes.
///
/// Each store owns one of these and refreshes it only after a config write
/// has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefaults {
    pub currency: String,
    pub start_date: i32,
}

impl StoreDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            currency: config.currency.clone(),
            start_date: config.start_date,
        }
    }

    pub fn refresh(&mut self, config: &Config) {
        self.currency.clone_from(&config.currency);
        self.start_date = config.start_date;
    }

    /// Validates a new expense and fills in its id, currency and date.
    pub fn new_expense(
        &self,
        mut expense: Expense,
        now: OffsetDateTime,
    ) -> Result<Expense, StoreError> {
        expense.validate()?;
        if expense.id.is_empty() {
            expense.id = Uuid::new_v4().to_string();
        }
        self.fill_currency(&mut expense.currency);
        expense.date.get_or_insert(now);
        Ok(expense)
    }

    /// Validates a full replacement for expense `id`. A missing date is left
    /// for the store to carry over from the stored record.
    pub fn replacement_expense(
        &self,
        id: &str,
        mut expense: Expense,
    ) -> Result<Expense, StoreError> {
        expense.validate()?;
        expense.id = id.to_string();
        self.fill_currency(&mut expense.currency);
        Ok(expense)
    }

    pub fn new_rule(&self, mut rule: RecurringExpense) -> Result<RecurringExpense, StoreError> {
        rule.validate()?;
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().to_string();
        }
        self.fill_currency(&mut rule.currency);
        Ok(rule)
    }

    pub fn replacement_rule(
        &self,
        id: &str,
        mut rule: RecurringExpense,
    ) -> Result<RecurringExpense, StoreError> {
        rule.validate()?;
        rule.id = id.to_string();
        self.fill_currency(&mut rule.currency);
        Ok(rule)
    }

    fn fill_currency(&self, currency: &mut String) {
        if currency.is_empty() {
            currency.clone_from(&self.currency);
        }
    }
}
