//! PostgreSQL-backed [`ExpenseStore`].
//!
//! Expenses, rules and the settings row live in three tables. Every rule
//! mutation and bulk insert runs in a single transaction, so a failure
//! leaves the database as it was.

mod connection;

use std::sync::{Mutex, MutexGuard, RwLock};

use postgres::binary_copy::BinaryCopyInWriter;
use postgres::error::SqlState;
use postgres::types::Type;
use postgres::{Client, GenericClient, NoTls, Row, Transaction};
use time::OffsetDateTime;

use outlay_core::{
    expand_at, timestamp_now, Config, Expense, ExpenseStore, RecurringExpense, Scope, StoreDefaults,
    StoreError,
};

pub use connection::{parse_ssl_mode, ConnectionOptions};

const EXPENSE_COLUMNS: &str = "id, recurring_id, name, category, amount, currency, date, tags";
const RULE_COLUMNS: &str =
    "id, name, amount, currency, category, start_date, interval, occurrences, tags";

pub struct PostgresStore {
    client: Mutex<Client>,
    defaults: RwLock<StoreDefaults>,
}

impl PostgresStore {
    pub fn connect(options: &ConnectionOptions) -> Result<Self, StoreError> {
        Self::from_config(&options.to_config()?)
    }

    pub fn from_config(config: &postgres::Config) -> Result<Self, StoreError> {
        let mut client = config
            .connect(NoTls)
            .map_err(|e| StoreError::Backend(format!("PostgreSQL connection failed: {}", e)))?;
        init_schema(&mut client)?;
        let settings = load_settings(&mut client, false)?;
        tracing::info!(
            dbname = config.get_dbname().unwrap_or_default(),
            "PostgreSQL store initialized"
        );

        Ok(Self {
            client: Mutex::new(client),
            defaults: RwLock::new(StoreDefaults::from_config(&settings)),
        })
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        self.client.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn defaults(&self) -> Result<StoreDefaults, StoreError> {
        Ok(self.defaults.read().map_err(|_| StoreError::LockPoisoned)?.clone())
    }

    fn modify_config(
        &self,
        f: impl FnOnce(&mut Config) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(db_err("begin transaction"))?;
        let mut config = load_settings(&mut tx, true)?;
        f(&mut config)?;
        save_settings(&mut tx, &config)?;
        tx.commit().map_err(db_err("commit config"))?;

        self.defaults
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .refresh(&config);
        Ok(())
    }
}

fn init_schema(client: &mut Client) -> Result<(), StoreError> {
    client
        .batch_execute(
            "
        CREATE TABLE IF NOT EXISTS expenses (
            id VARCHAR(36) PRIMARY KEY,
            recurring_id VARCHAR(36),
            name VARCHAR(255) NOT NULL,
            category VARCHAR(255) NOT NULL,
            amount NUMERIC(10, 2) NOT NULL,
            currency VARCHAR(3) NOT NULL,
            date TIMESTAMPTZ NOT NULL,
            tags TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date);
        CREATE INDEX IF NOT EXISTS idx_expenses_recurring_id ON expenses(recurring_id);

        CREATE TABLE IF NOT EXISTS recurring_expenses (
            id VARCHAR(36) PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            amount NUMERIC(10, 2) NOT NULL,
            currency VARCHAR(3) NOT NULL,
            category VARCHAR(255) NOT NULL,
            start_date TIMESTAMPTZ NOT NULL,
            interval VARCHAR(50) NOT NULL,
            occurrences INTEGER NOT NULL,
            tags TEXT
        );

        CREATE TABLE IF NOT EXISTS config (
            id VARCHAR(255) PRIMARY KEY DEFAULT 'default',
            categories TEXT NOT NULL,
            currency VARCHAR(255) NOT NULL,
            start_date INTEGER NOT NULL
        );
        ",
        )
        .map_err(db_err("create schema"))?;

    let defaults = Config::default();
    client
        .execute(
            "INSERT INTO config (id, categories, currency, start_date)
             VALUES ('default', $1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
            &[&encode_list(&defaults.categories)?, &defaults.currency, &defaults.start_date],
        )
        .map_err(db_err("seed config"))?;
    Ok(())
}

/// Maps a driver error, turning key collisions into validation failures.
fn db_err(context: &'static str) -> impl Fn(postgres::Error) -> StoreError {
    move |e| {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            StoreError::Validation(format!("{}: record with this ID already exists", context))
        } else {
            StoreError::Backend(format!("{}: {}", context, e))
        }
    }
}

fn encode_list(values: &[String]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(values)?)
}

fn decode_list(raw: Option<String>) -> Result<Vec<String>, StoreError> {
    match raw.as_deref() {
        None | Some("") => Ok(Vec::new()),
        Some(text) => Ok(serde_json::from_str::<Option<Vec<String>>>(text)?.unwrap_or_default()),
    }
}

/// Reads the settings row, writing the defaults back if it has gone missing.
/// `recurring_expenses` is left empty.
fn load_settings(client: &mut impl GenericClient, for_update: bool) -> Result<Config, StoreError> {
    let query = if for_update {
        "SELECT categories, currency, start_date FROM config WHERE id = 'default' FOR UPDATE"
    } else {
        "SELECT categories, currency, start_date FROM config WHERE id = 'default'"
    };
    let Some(row) = client.query_opt(query, &[]).map_err(db_err("load config"))? else {
        let config = Config::default();
        save_settings(client, &config)?;
        tracing::warn!("Config row missing, restored defaults");
        return Ok(config);
    };
    Ok(Config {
        categories: decode_list(row.get(0))?,
        currency: row.get(1),
        start_date: row.get(2),
        recurring_expenses: Vec::new(),
    })
}

fn save_settings(client: &mut impl GenericClient, config: &Config) -> Result<(), StoreError> {
    client
        .execute(
            "INSERT INTO config (id, categories, currency, start_date)
             VALUES ('default', $1, $2, $3)
             ON CONFLICT (id) DO UPDATE
             SET categories = EXCLUDED.categories,
                 currency = EXCLUDED.currency,
                 start_date = EXCLUDED.start_date",
            &[&encode_list(&config.categories)?, &config.currency, &config.start_date],
        )
        .map_err(db_err("save config"))?;
    Ok(())
}

fn expense_from_row(row: &Row) -> Result<Expense, StoreError> {
    let recurring_id: Option<String> = row.get(1);
    let date: OffsetDateTime = row.get(6);
    Ok(Expense {
        id: row.get(0),
        recurring_id: recurring_id.filter(|id| !id.is_empty()),
        name: row.get(2),
        category: row.get(3),
        amount: row.get(4),
        currency: row.get(5),
        date: Some(date),
        tags: decode_list(row.get(7))?,
    })
}

fn rule_from_row(row: &Row) -> Result<RecurringExpense, StoreError> {
    let interval: String = row.get(6);
    Ok(RecurringExpense {
        id: row.get(0),
        name: row.get(1),
        amount: row.get(2),
        currency: row.get(3),
        category: row.get(4),
        start_date: row.get(5),
        interval: interval.into(),
        occurrences: row.get(7),
        tags: decode_list(row.get(8))?,
    })
}

fn load_rules(client: &mut impl GenericClient) -> Result<Vec<RecurringExpense>, StoreError> {
    client
        .query(
            &format!("SELECT {} FROM recurring_expenses ORDER BY start_date, id", RULE_COLUMNS),
            &[],
        )
        .map_err(db_err("load recurring expenses"))?
        .iter()
        .map(rule_from_row)
        .collect()
}

/// Streams `expenses` into the table with a binary COPY.
fn copy_expenses(tx: &mut Transaction<'_>, expenses: &[Expense]) -> Result<(), StoreError> {
    if expenses.is_empty() {
        return Ok(());
    }
    let sink = tx
        .copy_in(&format!("COPY expenses ({}) FROM STDIN BINARY", EXPENSE_COLUMNS))
        .map_err(db_err("start copy"))?;
    let mut writer = BinaryCopyInWriter::new(
        sink,
        &[
            Type::VARCHAR,
            Type::VARCHAR,
            Type::VARCHAR,
            Type::VARCHAR,
            Type::NUMERIC,
            Type::VARCHAR,
            Type::TIMESTAMPTZ,
            Type::TEXT,
        ],
    );
    for expense in expenses {
        let tags = encode_list(&expense.tags)?;
        writer
            .write(&[
                &expense.id,
                &expense.recurring_id,
                &expense.name,
                &expense.category,
                &expense.amount,
                &expense.currency,
                &expense.date,
                &tags,
            ])
            .map_err(db_err("copy expense"))?;
    }
    let rows = writer.finish().map_err(db_err("finish copy"))?;
    tracing::debug!(rows, "Copied expenses");
    Ok(())
}

fn delete_instances(
    tx: &mut Transaction<'_>,
    rule_id: &str,
    scope: Scope,
    now: OffsetDateTime,
) -> Result<u64, StoreError> {
    let deleted = match scope {
        Scope::All => tx.execute("DELETE FROM expenses WHERE recurring_id = $1", &[&rule_id]),
        Scope::Future => tx.execute(
            "DELETE FROM expenses WHERE recurring_id = $1 AND date > $2",
            &[&rule_id, &now],
        ),
    }
    .map_err(db_err("delete recurring instances"))?;
    Ok(deleted)
}

impl ExpenseStore for PostgresStore {
    fn get_config(&self) -> Result<Config, StoreError> {
        let mut client = self.client()?;
        let mut config = load_settings(&mut *client, false)?;
        config.recurring_expenses = load_rules(&mut *client)?;
        Ok(config)
    }

    fn get_categories(&self) -> Result<Vec<String>, StoreError> {
        Ok(load_settings(&mut *self.client()?, false)?.categories)
    }

    fn update_categories(&self, categories: Vec<String>) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_categories(categories))?;
        tracing::debug!("Updated categories");
        Ok(())
    }

    fn get_currency(&self) -> Result<String, StoreError> {
        Ok(load_settings(&mut *self.client()?, false)?.currency)
    }

    fn update_currency(&self, currency: &str) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_currency(currency))?;
        tracing::debug!(currency, "Updated currency");
        Ok(())
    }

    fn get_start_date(&self) -> Result<i32, StoreError> {
        Ok(load_settings(&mut *self.client()?, false)?.start_date)
    }

    fn update_start_date(&self, start_date: i32) -> Result<(), StoreError> {
        self.modify_config(|config| config.set_start_date(start_date))?;
        tracing::debug!(start_date, "Updated start date");
        Ok(())
    }

    fn get_recurring_expenses(&self) -> Result<Vec<RecurringExpense>, StoreError> {
        load_rules(&mut *self.client()?)
    }

    fn get_recurring_expense(&self, id: &str) -> Result<RecurringExpense, StoreError> {
        let row = self
            .client()?
            .query_opt(
                &format!("SELECT {} FROM recurring_expenses WHERE id = $1", RULE_COLUMNS),
                &[&id],
            )
            .map_err(db_err("load recurring expense"))?
            .ok_or_else(|| StoreError::rule_not_found(id))?;
        rule_from_row(&row)
    }

    fn add_recurring_expense(
        &self,
        rule: RecurringExpense,
    ) -> Result<RecurringExpense, StoreError> {
        let rule = self.defaults()?.new_rule(rule)?;
        let instances = expand_at(&rule, false, timestamp_now());

        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(db_err("begin transaction"))?;
        tx.execute(
            &format!(
                "INSERT INTO recurring_expenses ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                RULE_COLUMNS
            ),
            &[
                &rule.id,
                &rule.name,
                &rule.amount,
                &rule.currency,
                &rule.category,
                &rule.start_date,
                &rule.interval.as_str(),
                &rule.occurrences,
                &encode_list(&rule.tags)?,
            ],
        )
        .map_err(db_err("insert recurring expense"))?;
        copy_expenses(&mut tx, &instances)?;
        tx.commit().map_err(db_err("commit recurring expense"))?;

        tracing::debug!(
            rule_id = %rule.id,
            instances = instances.len(),
            "Added recurring expense"
        );
        Ok(rule)
    }

    fn update_recurring_expense(
        &self,
        id: &str,
        rule: RecurringExpense,
        update_all: bool,
    ) -> Result<(), StoreError> {
        let rule = self.defaults()?.replacement_rule(id, rule)?;
        let scope = Scope::from_flag(update_all);
        let now = timestamp_now();

        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(db_err("begin transaction"))?;
        let updated = tx
            .execute(
                "UPDATE recurring_expenses
                 SET name = $1, amount = $2, currency = $3, category = $4, start_date = $5,
                     interval = $6, occurrences = $7, tags = $8
                 WHERE id = $9",
                &[
                    &rule.name,
                    &rule.amount,
                    &rule.currency,
                    &rule.category,
                    &rule.start_date,
                    &rule.interval.as_str(),
                    &rule.occurrences,
                    &encode_list(&rule.tags)?,
                    &id,
                ],
            )
            .map_err(db_err("update recurring expense"))?;
        if updated == 0 {
            return Err(StoreError::rule_not_found(id));
        }
        let deleted = delete_instances(&mut tx, id, scope, now)?;
        copy_expenses(&mut tx, &expand_at(&rule, scope == Scope::Future, now))?;
        tx.commit().map_err(db_err("commit recurring expense"))?;

        tracing::debug!(rule_id = id, ?scope, deleted, "Updated recurring expense");
        Ok(())
    }

    fn remove_recurring_expense(&self, id: &str, remove_all: bool) -> Result<(), StoreError> {
        let scope = Scope::from_flag(remove_all);

        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(db_err("begin transaction"))?;
        let removed = tx
            .execute("DELETE FROM recurring_expenses WHERE id = $1", &[&id])
            .map_err(db_err("delete recurring expense"))?;
        if removed == 0 {
            tracing::warn!(rule_id = id, "Recurring expense to remove not found");
            return Err(StoreError::rule_not_found(id));
        }
        let deleted = delete_instances(&mut tx, id, scope, timestamp_now())?;
        tx.commit().map_err(db_err("commit recurring expense"))?;

        tracing::debug!(rule_id = id, ?scope, deleted, "Removed recurring expense");
        Ok(())
    }

    fn get_all_expenses(&self) -> Result<Vec<Expense>, StoreError> {
        self.client()?
            .query(
                &format!("SELECT {} FROM expenses ORDER BY date DESC", EXPENSE_COLUMNS),
                &[],
            )
            .map_err(db_err("load expenses"))?
            .iter()
            .map(expense_from_row)
            .collect()
    }

    fn get_expense(&self, id: &str) -> Result<Expense, StoreError> {
        let row = self
            .client()?
            .query_opt(&format!("SELECT {} FROM expenses WHERE id = $1", EXPENSE_COLUMNS), &[&id])
            .map_err(db_err("load expense"))?
            .ok_or_else(|| StoreError::expense_not_found(id))?;
        expense_from_row(&row)
    }

    fn add_expense(&self, expense: Expense) -> Result<Expense, StoreError> {
        let expense = self.defaults()?.new_expense(expense, timestamp_now())?;
        self.client()?
            .execute(
                &format!(
                    "INSERT INTO expenses ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    EXPENSE_COLUMNS
                ),
                &[
                    &expense.id,
                    &expense.recurring_id,
                    &expense.name,
                    &expense.category,
                    &expense.amount,
                    &expense.currency,
                    &expense.date,
                    &encode_list(&expense.tags)?,
                ],
            )
            .map_err(db_err("insert expense"))?;
        tracing::debug!(expense_id = %expense.id, "Added expense");
        Ok(expense)
    }

    fn update_expense(&self, id: &str, expense: Expense) -> Result<(), StoreError> {
        let expense = self.defaults()?.replacement_expense(id, expense)?;
        let updated = self
            .client()?
            .execute(
                "UPDATE expenses
                 SET recurring_id = $1, name = $2, category = $3, amount = $4, currency = $5,
                     date = COALESCE($6, date), tags = $7
                 WHERE id = $8",
                &[
                    &expense.recurring_id,
                    &expense.name,
                    &expense.category,
                    &expense.amount,
                    &expense.currency,
                    &expense.date,
                    &encode_list(&expense.tags)?,
                    &id,
                ],
            )
            .map_err(db_err("update expense"))?;
        if updated == 0 {
            return Err(StoreError::expense_not_found(id));
        }
        tracing::debug!(expense_id = id, "Updated expense");
        Ok(())
    }

    fn remove_expense(&self, id: &str) -> Result<(), StoreError> {
        let removed = self
            .client()?
            .execute("DELETE FROM expenses WHERE id = $1", &[&id])
            .map_err(db_err("delete expense"))?;
        if removed == 0 {
            tracing::warn!(expense_id = id, "Expense to remove not found");
            return Err(StoreError::expense_not_found(id));
        }
        tracing::debug!(expense_id = id, "Removed expense");
        Ok(())
    }

    fn add_multiple_expenses(&self, expenses: Vec<Expense>) -> Result<(), StoreError> {
        if expenses.is_empty() {
            return Ok(());
        }
        let defaults = self.defaults()?;
        let now = timestamp_now();
        let expenses = expenses
            .into_iter()
            .map(|e| defaults.new_expense(e, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(db_err("begin transaction"))?;
        copy_expenses(&mut tx, &expenses)?;
        tx.commit().map_err(db_err("commit expenses"))?;
        Ok(())
    }

    fn remove_multiple_expenses(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let removed = self
            .client()?
            .execute("DELETE FROM expenses WHERE id = ANY($1)", &[&ids])
            .map_err(db_err("delete expenses"))?;
        tracing::debug!(requested = ids.len(), removed, "Removed expenses");
        Ok(())
    }
}
