//! Outlay keeps expenses and recurring expense rules in a pluggable store.
//!
//! The store implementations live in the `outlay-json` and `outlay-postgres`
//! crates; this crate selects one from configuration and drives it from the
//! command line.

pub mod backend;
pub mod cli;
pub mod config;

pub use outlay_core::{ErrorKind, ExpenseStore, StoreError};
