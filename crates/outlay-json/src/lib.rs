//! File-backed [`ExpenseStore`] keeping two pretty-printed JSON documents,
//! `config.json` and `expenses.json`, inside a base directory.

mod file_io;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use outlay_core::models::serde_helpers;
use outlay_core::{
    expand_at, partition, timestamp_now, Config, Expense, ExpenseStore, RecurringExpense, Scope,
    StoreDefaults, StoreError,
};

use crate::file_io::{read_json, write_json};

pub const CONFIG_FILE: &str = "config.json";
pub const EXPENSES_FILE: &str = "expenses.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExpensesDocument {
    #[serde(default, deserialize_with = "serde_helpers::null_as_default")]
    expenses: Vec<Expense>,
}

/// All reads share the lock and every mutation holds it exclusively across
/// its read-modify-write, so callers never see a half-applied operation.
pub struct JsonStore {
    config_path: PathBuf,
    expenses_path: PathBuf,
    defaults: RwLock<StoreDefaults>,
}

impl JsonStore {
    /// Opens the store at `base_dir`, creating the directory and any missing
    /// document with default contents.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir)?;

        let config_path = base_dir.join(CONFIG_FILE);
        let expenses_path = base_dir.join(EXPENSES_FILE);

        if config_path.exists() {
            tracing::info!(path = %config_path.display(), "Found config file");
        } else {
            write_json(&config_path, &Config::default())?;
            tracing::info!(path = %config_path.display(), "Created config file");
        }
        if expenses_path.exists() {
            tracing::info!(path = %expenses_path.display(), "Found expenses file");
        } else {
            write_json(&expenses_path, &ExpensesDocument::default())?;
            tracing::info!(path = %expenses_path.display(), "Created expenses file");
        }

        let config: Config = read_json(&config_path)?;
        Ok(Self {
            config_path,
            expenses_path,
            defaults: RwLock::new(StoreDefaults::from_config(&config)),
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn expenses_path(&self) -> &Path {
        &self.expenses_path
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, StoreDefaults>, StoreError> {
        self.defaults.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, StoreDefaults>, StoreError> {
        self.defaults.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn load_config(&self) -> Result<Config, StoreError> {
        read_json(&self.config_path)
    }

    fn load_expenses(&self) -> Result<Vec<Expense>, StoreError> {
        let document: ExpensesDocument = read_json(&self.expenses_path)?;
        Ok(document.expenses)
    }

    fn save_expenses(&self, expenses: Vec<Expense>) -> Result<(), StoreError> {
        write_json(&self.expenses_path, &ExpensesDocument { expenses })
    }

    fn with_config<T>(&self, f: impl FnOnce(Config) -> T) -> Result<T, StoreError> {
        let _guard = self.read_lock()?;
        Ok(f(self.load_config()?))
    }

    fn modify_config(
        &self,
        f: impl FnOnce(&mut Config) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut defaults = self.write_lock()?;
        let mut config = self.load_config()?;
        f(&mut config)?;
        write_json(&self.config_path, &config)?;
        defaults.refresh(&config);
        Ok(())
    }

    /// Runs `f` over the expense list and persists it. When `f` returns
    /// `Ok(false)` nothing is written.
    fn modify_expenses(
        &self,
        f: impl FnOnce(&mut Vec<Expense>, &StoreDefaults) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let defaults = self.write_lock()?;
        let mut expenses = self.load_expenses()?;
        if f(&mut expenses, &defaults)? {
            self.save_expenses(expenses)?;
        }
        Ok(())
    }

    /// Rule mutations touch both documents. Expenses are written first so a
    /// failure between the two writes leaves instances without a changed rule
    /// rather than a rule without its instances.
    fn modify_rules(
        &self,
        f: impl FnOnce(&mut Config, &mut Vec<Expense>, &StoreDefaults) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let defaults = self.write_lock()?;
        let mut config = self.load_config()?;
        let mut expenses = self.load_expenses()?;
        f(&mut config, &mut expenses, &defaults)?;
        self.save_expenses(expenses)?;
        write_json(&self.config_path, &config)?;
        Ok(())
    }
}

fn find_expense<'a>(expenses: &'a mut [Expense], id: &str) -> Result<&'a mut Expense, StoreError> {
    expenses
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| StoreError::expense_not_found(id))
}

fn ensure_unique_expense(expenses: &[Expense], id: &str) -> Result<(), StoreError> {
    if expenses.iter().any(|e| e.id == id) {
        return Err(StoreError::Validation(format!("expense with ID {} already exists", id)));
    }
    Ok(())
}

fn newest_first(expenses: &mut [Expense]) {
    expenses.sort_by(|a, b| b.date.cmp(&a.date));
}

/// Drops the instances of `rule_id` covered by `scope`, returning how many went.
fn drop_instances(
    expenses: &mut Vec<Expense>,
    rule_id: &str,
    scope: Scope,
    now: OffsetDateTime,
) -> usize {
    let (kept, superseded) = partition(std::mem::take(expenses), rule_id, scope, now);
    *expenses = kept;
    superseded.len()
}

impl ExpenseStore for JsonStore {
    fn get_config(&self) -> Result<Config, StoreError> {
        self.with_config(|config| config)
    }

    fn get_categories(&self) -> Result<Vec<String>, StoreError> {
        self.with_config(|config| config.categories)
    }

    fn update_categories(&self, categories: Vec<String>) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_categories(categories))?;
        tracing::debug!("Updated categories");
        Ok(())
    }

    fn get_currency(&self) -> Result<String, StoreError> {
        self.with_config(|config| config.currency)
    }

    fn update_currency(&self, currency: &str) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_currency(currency))?;
        tracing::debug!(currency, "Updated currency");
        Ok(())
    }

    fn get_start_date(&self) -> Result<i32, StoreError> {
        self.with_config(|config| config.start_date)
    }

    fn update_start_date(&self, start_date: i32) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_start_date(start_date))?;
        tracing::debug!(start_date, "Updated start date");
        Ok(())
    }

    fn get_recurring_expenses(&self) -> Result<Vec<RecurringExpense>, StoreError> {
        self.with_config(|config| config.recurring_expenses)
    }

    fn get_recurring_expense(&self, id: &str) -> Result<RecurringExpense, StoreError> {
        self.with_config(|config| config.recurring_expenses.into_iter().find(|r| r.id == id))?
            .ok_or_else(|| StoreError::rule_not_found(id))
    }

    fn add_recurring_expense(
        &self,
        rule: RecurringExpense,
    ) -> Result<RecurringExpense, StoreError> {
        let mut stored = None;
        self.modify_rules(|config, expenses, defaults| {
            let rule = defaults.new_rule(rule)?;
            if config.recurring_expenses.iter().any(|r| r.id == rule.id) {
                return Err(StoreError::Validation(format!(
                    "recurring expense with ID {} already exists",
                    rule.id
                )));
            }
            let instances = expand_at(&rule, false, timestamp_now());
            tracing::debug!(
                rule_id = %rule.id,
                instances = instances.len(),
                "Adding recurring expense"
            );
            expenses.extend(instances);
            config.recurring_expenses.push(rule.clone());
            stored = Some(rule);
            Ok(())
        })?;
        stored.ok_or_else(|| StoreError::Backend("recurring expense was not stored".into()))
    }

    fn update_recurring_expense(
        &self,
        id: &str,
        rule: RecurringExpense,
        update_all: bool,
    ) -> Result<(), StoreError> {
        let scope = Scope::from_flag(update_all);
        self.modify_rules(|config, expenses, defaults| {
            let rule = defaults.replacement_rule(id, rule)?;
            let slot = config
                .recurring_expenses
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::rule_not_found(id))?;
            let now = timestamp_now();
            let dropped = drop_instances(expenses, id, scope, now);
            let instances = expand_at(&rule, scope == Scope::Future, now);
            tracing::debug!(
                rule_id = id,
                dropped,
                added = instances.len(),
                "Regenerating instances"
            );
            expenses.extend(instances);
            *slot = rule;
            Ok(())
        })?;
        tracing::debug!(rule_id = id, ?scope, "Updated recurring expense");
        Ok(())
    }

    fn remove_recurring_expense(&self, id: &str, remove_all: bool) -> Result<(), StoreError> {
        let scope = Scope::from_flag(remove_all);
        self.modify_rules(|config, expenses, _| {
            let position = config
                .recurring_expenses
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| {
                    tracing::warn!(rule_id = id, "Recurring expense to remove not found");
                    StoreError::rule_not_found(id)
                })?;
            config.recurring_expenses.remove(position);
            let dropped = drop_instances(expenses, id, scope, timestamp_now());
            tracing::debug!(rule_id = id, dropped, "Dropped instances");
            Ok(())
        })?;
        tracing::debug!(rule_id = id, ?scope, "Removed recurring expense");
        Ok(())
    }

    fn get_all_expenses(&self) -> Result<Vec<Expense>, StoreError> {
        let _guard = self.read_lock()?;
        let mut expenses = self.load_expenses()?;
        newest_first(&mut expenses);
        Ok(expenses)
    }

    fn get_expense(&self, id: &str) -> Result<Expense, StoreError> {
        let _guard = self.read_lock()?;
        self.load_expenses()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::expense_not_found(id))
    }

    fn add_expense(&self, expense: Expense) -> Result<Expense, StoreError> {
        let mut stored = None;
        self.modify_expenses(|expenses, defaults| {
            let expense = defaults.new_expense(expense, timestamp_now())?;
            ensure_unique_expense(expenses, &expense.id)?;
            expenses.push(expense.clone());
            stored = Some(expense);
            Ok(true)
        })?;
        let expense = stored.ok_or_else(|| StoreError::Backend("expense was not stored".into()))?;
        tracing::debug!(expense_id = %expense.id, "Added expense");
        Ok(expense)
    }

    fn update_expense(&self, id: &str, expense: Expense) -> Result<(), StoreError> {
        self.modify_expenses(|expenses, defaults| {
            let slot = find_expense(expenses, id)?;
            let mut replacement = defaults.replacement_expense(id, expense)?;
            if replacement.date.is_none() {
                replacement.date = slot.date;
            }
            *slot = replacement;
            Ok(true)
        })?;
        tracing::debug!(expense_id = id, "Updated expense");
        Ok(())
    }

    fn remove_expense(&self, id: &str) -> Result<(), StoreError> {
        self.modify_expenses(|expenses, _| {
            let position = expenses
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| {
                    tracing::warn!(expense_id = id, "Expense to remove not found");
                    StoreError::expense_not_found(id)
                })?;
            expenses.remove(position);
            Ok(true)
        })?;
        tracing::debug!(expense_id = id, "Removed expense");
        Ok(())
    }

    fn add_multiple_expenses(&self, batch: Vec<Expense>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.modify_expenses(|expenses, defaults| {
            let now = timestamp_now();
            let prepared = batch
                .into_iter()
                .map(|e| defaults.new_expense(e, now))
                .collect::<Result<Vec<_>, _>>()?;
            for (i, expense) in prepared.iter().enumerate() {
                ensure_unique_expense(expenses, &expense.id)?;
                ensure_unique_expense(&prepared[..i], &expense.id)?;
            }
            expenses.extend(prepared);
            Ok(true)
        })?;
        tracing::debug!(count, "Added expenses");
        Ok(())
    }

    fn remove_multiple_expenses(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.modify_expenses(|expenses, _| {
            let before = expenses.len();
            let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
            expenses.retain(|e| !doomed.contains(e.id.as_str()));
            let removed = before - expenses.len();
            tracing::debug!(requested = ids.len(), removed, "Removing expenses");
            Ok(removed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use outlay_core::Interval;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use time::macros::datetime;
    use time::Duration;

    fn open() -> (TempDir, JsonStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path().join("data")).unwrap();
        (temp_dir, store)
    }

    fn daily_rule(start: OffsetDateTime, occurrences: i32) -> RecurringExpense {
        RecurringExpense::new("Coffee", "Food", dec!(4.5), start, Interval::Daily, occurrences)
    }

    #[test]
    fn test_open_creates_documents() {
        let (_temp_dir, store) = open();

        assert!(store.config_path().exists());
        assert!(store.expenses_path().exists());
        assert_eq!(store.get_config().unwrap(), Config::default());
        assert!(store.get_all_expenses().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JsonStore::open(temp_dir.path()).unwrap();
            store.update_currency("eur").unwrap();
            store.add_expense(Expense::new("Book", "Shopping", dec!(12))).unwrap();
        }

        let store = JsonStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get_currency().unwrap(), "eur");
        let expenses = store.get_all_expenses().unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].currency, "eur");
    }

    #[test]
    fn test_reads_documents_with_null_expenses() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(EXPENSES_FILE), r#"{"expenses": null}"#).unwrap();

        let store = JsonStore::open(temp_dir.path()).unwrap();
        assert!(store.get_all_expenses().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path()).unwrap();
        fs::write(store.expenses_path(), "[[[").unwrap();

        let err = store.get_all_expenses().unwrap_err();
        assert!(matches!(err, StoreError::MalformedDocument { .. }));
    }

    #[test]
    fn test_config_updates() {
        let (_temp_dir, store) = open();

        store.update_categories(vec!["Pets".into(), " Kids ".into()]).unwrap();
        assert_eq!(store.get_categories().unwrap(), vec!["Pets".to_string(), "Kids".to_string()]);

        store.update_start_date(15).unwrap();
        assert_eq!(store.get_start_date().unwrap(), 15);

        assert!(store.update_currency("doubloons").unwrap_err().is_validation());
        assert_eq!(store.get_currency().unwrap(), "usd");

        assert!(store.update_start_date(0).is_err());
        assert_eq!(store.get_start_date().unwrap(), 15);
    }

    #[test]
    fn test_expense_crud() {
        let (_temp_dir, store) = open();
        let date = datetime!(2024-03-10 12:00 UTC);

        let stored = store
            .add_expense(Expense::new("Dinner <b>", "Food", dec!(-30)).with_date(date))
            .unwrap();
        assert_eq!(stored.name, "Dinner b");
        assert_eq!(stored.currency, "usd");
        assert_eq!(store.get_expense(&stored.id).unwrap(), stored);

        store
            .update_expense(&stored.id, Expense::new("Dinner", "Food", dec!(-35)))
            .unwrap();
        let updated = store.get_expense(&stored.id).unwrap();
        assert_eq!(updated.amount, dec!(-35));
        assert_eq!(updated.date, Some(date));

        store.remove_expense(&stored.id).unwrap();
        assert!(store.get_expense(&stored.id).unwrap_err().is_not_found());
        assert!(store.remove_expense(&stored.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_add_expense_rejects_invalid_and_duplicates() {
        let (_temp_dir, store) = open();

        assert!(store
            .add_expense(Expense::new("Nothing", "Food", dec!(0)))
            .unwrap_err()
            .is_validation());

        let stored = store.add_expense(Expense::new("Lunch", "Food", dec!(9))).unwrap();
        let mut duplicate = Expense::new("Lunch", "Food", dec!(9));
        duplicate.id = stored.id.clone();
        assert!(store.add_expense(duplicate).unwrap_err().is_validation());
        assert_eq!(store.get_all_expenses().unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_expense() {
        let (_temp_dir, store) = open();
        let err = store
            .update_expense("nope", Expense::new("Lunch", "Food", dec!(9)))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_all_expenses_newest_first() {
        let (_temp_dir, store) = open();
        for day in [3, 1, 2] {
            let date = datetime!(2024-06-01 0:00 UTC) + Duration::days(day);
            store
                .add_expense(Expense::new(format!("Day {}", day), "Food", dec!(1)).with_date(date))
                .unwrap();
        }

        let names: Vec<String> =
            store.get_all_expenses().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Day 3", "Day 2", "Day 1"]);
    }

    #[test]
    fn test_bulk_operations() {
        let (_temp_dir, store) = open();

        store.add_multiple_expenses(Vec::new()).unwrap();
        store
            .add_multiple_expenses(vec![
                Expense::new("A", "Food", dec!(1)),
                Expense::new("B", "Food", dec!(2)),
                Expense::new("C", "Food", dec!(3)),
            ])
            .unwrap();
        let ids: Vec<String> =
            store.get_all_expenses().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 3);

        let err = store
            .add_multiple_expenses(vec![
                Expense::new("D", "Food", dec!(4)),
                Expense::new("", "Food", dec!(1)),
            ])
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.get_all_expenses().unwrap().len(), 3);

        store
            .remove_multiple_expenses(&[ids[0].clone(), "unknown".to_string()])
            .unwrap();
        assert_eq!(store.get_all_expenses().unwrap().len(), 2);
        store.remove_multiple_expenses(&[]).unwrap();
        assert_eq!(store.get_all_expenses().unwrap().len(), 2);

        store
            .remove_multiple_expenses(&[ids[1].clone(), ids[2].clone(), ids[1].clone()])
            .unwrap();
        assert!(store.get_all_expenses().unwrap().is_empty());
    }

    #[test]
    fn test_add_recurring_materializes_instances() {
        let (_temp_dir, store) = open();
        let rule = store
            .add_recurring_expense(
                daily_rule(datetime!(2024-01-01 8:00 UTC), 5).with_tags(["caffeine"]),
            )
            .unwrap();

        assert!(!rule.id.is_empty());
        assert_eq!(rule.currency, "usd");
        assert_eq!(store.get_recurring_expense(&rule.id).unwrap(), rule);

        let expenses = store.get_all_expenses().unwrap();
        assert_eq!(expenses.len(), 5);
        assert!(expenses.iter().all(|e| e.is_generated_by(&rule.id)));
        assert_eq!(expenses[0].date, Some(datetime!(2024-01-05 8:00 UTC)));
        assert_eq!(expenses[0].tags, vec!["caffeine".to_string()]);
    }

    #[test]
    fn test_invalid_rule_changes_nothing() {
        let (_temp_dir, store) = open();
        let err = store
            .add_recurring_expense(daily_rule(datetime!(2024-01-01 8:00 UTC), 1))
            .unwrap_err();

        assert!(err.is_validation());
        assert!(store.get_recurring_expenses().unwrap().is_empty());
        assert!(store.get_all_expenses().unwrap().is_empty());
    }

    #[test]
    fn test_update_recurring_future_only() {
        let (_temp_dir, store) = open();
        let start = OffsetDateTime::now_utc() - Duration::days(3) - Duration::hours(1);
        let rule = store.add_recurring_expense(daily_rule(start, 8)).unwrap();

        let replacement = RecurringExpense {
            amount: dec!(5),
            ..daily_rule(start, 8)
        };
        store.update_recurring_expense(&rule.id, replacement, false).unwrap();

        let expenses = store.get_all_expenses().unwrap();
        let old: Vec<&Expense> = expenses.iter().filter(|e| e.amount == dec!(4.5)).collect();
        let new: Vec<&Expense> = expenses.iter().filter(|e| e.amount == dec!(5)).collect();
        assert_eq!(old.len(), 4);
        assert_eq!(new.len(), 4);
        assert_eq!(store.get_recurring_expense(&rule.id).unwrap().amount, dec!(5));
    }

    #[test]
    fn test_update_recurring_all() {
        let (_temp_dir, store) = open();
        let start = datetime!(2024-01-01 8:00 UTC);
        let rule = store.add_recurring_expense(daily_rule(start, 5)).unwrap();

        let replacement = RecurringExpense {
            interval: Interval::Weekly,
            ..daily_rule(start, 3)
        };
        store.update_recurring_expense(&rule.id, replacement, true).unwrap();

        let expenses = store.get_all_expenses().unwrap();
        assert_eq!(expenses.len(), 3);
        assert_eq!(expenses[0].date, Some(datetime!(2024-01-15 8:00 UTC)));
        assert!(store
            .update_recurring_expense("missing", daily_rule(start, 3), true)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_remove_recurring() {
        let (_temp_dir, store) = open();
        let start = OffsetDateTime::now_utc() - Duration::days(2) - Duration::hours(1);
        let keep_past = store.add_recurring_expense(daily_rule(start, 6)).unwrap();
        let remove_all = store.add_recurring_expense(daily_rule(start, 4)).unwrap();
        store.add_expense(Expense::new("Manual", "Food", dec!(2))).unwrap();

        store.remove_recurring_expense(&keep_past.id, false).unwrap();
        store.remove_recurring_expense(&remove_all.id, true).unwrap();

        assert!(store.get_recurring_expenses().unwrap().is_empty());
        let expenses = store.get_all_expenses().unwrap();
        assert_eq!(expenses.iter().filter(|e| e.is_generated_by(&keep_past.id)).count(), 3);
        assert_eq!(expenses.iter().filter(|e| e.is_generated_by(&remove_all.id)).count(), 0);
        assert_eq!(expenses.len(), 4);

        assert!(store
            .remove_recurring_expense(&keep_past.id, true)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_concurrent_writers() {
        let (_temp_dir, store) = open();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..5 {
                        store
                            .add_expense(Expense::new(format!("T{} #{}", n, i), "Food", dec!(1)))
                            .unwrap();
                        store.get_all_expenses().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_all_expenses().unwrap().len(), 40);
    }
}
