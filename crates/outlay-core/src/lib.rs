//! Core types and traits for Outlay storage backends.
//!
//! This crate provides the `ExpenseStore` trait, the record model and the
//! recurrence engine shared by every backend, so that the file-backed and
//! relational stores expose identical semantics.

pub mod models;
pub mod recurrence;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{
    sanitize, timestamp_now, validate_category, Config, Expense, Interval, RecurringExpense,
    DEFAULT_CATEGORIES, DEFAULT_CURRENCY, MAX_OCCURRENCES, SUPPORTED_CURRENCIES,
};
pub use recurrence::{expand, expand_at, is_superseded, partition, Scope};
pub use storage::{ErrorKind, ExpenseStore, StoreDefaults, StoreError};
