use clap::Subcommand;
use rust_decimal::Decimal;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use outlay_core::{Expense, ExpenseStore, Interval, RecurringExpense, StoreError};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
    /// Manage individual expenses.
    Expenses {
        #[command(subcommand)]
        command: ExpenseCommand,
    },
    /// Manage recurring expense rules.
    Rules {
        #[command(subcommand)]
        command: RuleCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the whole config, including rules.
    Show,
    /// Replace the category list.
    Categories { names: Vec<String> },
    /// Set the default currency code, e.g. eur
    Currency { code: String },
    /// Set the day of month a budgeting period starts on (1-31).
    StartDate { day: i32 },
}

#[derive(Subcommand, Debug)]
pub enum ExpenseCommand {
    /// List expenses, newest first.
    List,
    Get { id: String },
    Add {
        name: String,
        #[arg(long)]
        category: String,
        /// Negative for income
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        /// RFC 3339 timestamp (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        date: Option<OffsetDateTime>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove one or more expenses by ID.
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    List,
    Get { id: String },
    Add {
        name: String,
        #[arg(long)]
        category: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        /// RFC 3339 timestamp of the first occurrence
        #[arg(long, value_parser = parse_timestamp)]
        start: OffsetDateTime,
        /// daily, weekly, monthly or yearly
        #[arg(long)]
        interval: String,
        #[arg(long)]
        occurrences: i32,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove a rule. Past instances are kept unless --all is given.
    Remove {
        id: String,
        #[arg(long)]
        all: bool,
    },
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}

fn render<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Runs `command` against `store` and returns the JSON to print.
pub fn run(store: &dyn ExpenseStore, command: Command) -> Result<String, StoreError> {
    match command {
        Command::Config { command } => match command.unwrap_or(ConfigCommand::Show) {
            ConfigCommand::Show => render(&store.get_config()?),
            ConfigCommand::Categories { names } => {
                store.update_categories(names)?;
                render(&store.get_categories()?)
            }
            ConfigCommand::Currency { code } => {
                store.update_currency(&code)?;
                render(&store.get_currency()?)
            }
            ConfigCommand::StartDate { day } => {
                store.update_start_date(day)?;
                render(&store.get_start_date()?)
            }
        },
        Command::Expenses { command } => match command {
            ExpenseCommand::List => render(&store.get_all_expenses()?),
            ExpenseCommand::Get { id } => render(&store.get_expense(&id)?),
            ExpenseCommand::Add {
                name,
                category,
                amount,
                currency,
                date,
                tags,
            } => {
                let mut expense = Expense::new(name, category, amount).with_tags(tags);
                expense.currency = currency.unwrap_or_default();
                expense.date = date;
                render(&store.add_expense(expense)?)
            }
            ExpenseCommand::Remove { ids } => {
                if let [id] = ids.as_slice() {
                    store.remove_expense(id)?;
                } else {
                    store.remove_multiple_expenses(&ids)?;
                }
                render(&ids)
            }
        },
        Command::Rules { command } => match command {
            RuleCommand::List => render(&store.get_recurring_expenses()?),
            RuleCommand::Get { id } => render(&store.get_recurring_expense(&id)?),
            RuleCommand::Add {
                name,
                category,
                amount,
                currency,
                start,
                interval,
                occurrences,
                tags,
            } => {
                let interval = Interval::from(interval);
                let rule =
                    RecurringExpense::new(name, category, amount, start, interval, occurrences)
                        .with_tags(tags)
                        .with_currency(currency.unwrap_or_default());
                render(&store.add_recurring_expense(rule)?)
            }
            RuleCommand::Remove { id, all } => {
                store.remove_recurring_expense(&id, all)?;
                render(&id)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;
    use clap::Parser;
    use outlay_json::JsonStore;
    use rust_decimal_macros::dec;

    fn command(args: &[&str]) -> Command {
        CliArgs::parse_from(std::iter::once("outlay").chain(args.iter().copied())).command
    }

    #[test]
    fn test_parses_negative_amounts_and_dates() {
        let parsed = command(&[
            "expenses",
            "add",
            "Salary",
            "--category",
            "Income",
            "--amount",
            "-2500.00",
            "--date",
            "2024-03-01T09:00:00Z",
        ]);
        let Command::Expenses {
            command: ExpenseCommand::Add { amount, date, .. },
        } = parsed
        else {
            panic!("expected expenses add");
        };
        assert_eq!(amount, dec!(-2500));
        assert!(date.is_some());
    }

    #[test]
    fn test_rule_lifecycle_through_commands() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path()).unwrap();

        let output = run(
            &store,
            command(&[
                "rules",
                "add",
                "Gym",
                "--category",
                "Healthcare",
                "--amount",
                "40",
                "--start",
                "2024-01-01T06:00:00Z",
                "--interval",
                "monthly",
                "--occurrences",
                "6",
            ]),
        )
        .unwrap();
        let rule: RecurringExpense = serde_json::from_str(&output).unwrap();
        assert_eq!(rule.interval, Interval::Monthly);

        let output = run(&store, command(&["expenses", "list"])).unwrap();
        let listed: Vec<Expense> = serde_json::from_str(&output).unwrap();
        assert_eq!(listed.len(), 6);

        run(&store, command(&["rules", "remove", &rule.id, "--all"])).unwrap();
        assert!(store.get_all_expenses().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path()).unwrap();

        let err = run(
            &store,
            command(&[
                "rules",
                "add",
                "Gym",
                "--category",
                "Healthcare",
                "--amount",
                "40",
                "--start",
                "2024-01-01T06:00:00Z",
                "--interval",
                "hourly",
                "--occurrences",
                "6",
            ]),
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_config_defaults_to_show() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path()).unwrap();

        let output = run(&store, command(&["config"])).unwrap();
        let config: outlay_core::Config = serde_json::from_str(&output).unwrap();
        assert_eq!(config.currency, "usd");
    }
}
