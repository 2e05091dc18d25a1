use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use outlay_core::{expand_at, Expense, ExpenseStore, Interval, RecurringExpense};
use outlay_json::JsonStore;
use rust_decimal_macros::dec;
use time::macros::datetime;

fn rule(interval: Interval, occurrences: i32) -> RecurringExpense {
    RecurringExpense {
        id: "bench-rule".into(),
        currency: "usd".into(),
        ..RecurringExpense::new(
            "Subscription",
            "Entertainment",
            dec!(9.99),
            datetime!(2020-01-31 09:00 UTC),
            interval,
            occurrences,
        )
    }
}

fn bench_expand(c: &mut Criterion) {
    let daily = rule(Interval::Daily, 365);
    let monthly = rule(Interval::Monthly, 120);
    let now = datetime!(2024-06-15 12:00 UTC);

    c.bench_function("expand_daily_year", |b| {
        b.iter(|| expand_at(black_box(&daily), false, now))
    });

    c.bench_function("expand_monthly_decade", |b| {
        b.iter(|| expand_at(black_box(&monthly), false, now))
    });

    c.bench_function("expand_monthly_from_today", |b| {
        b.iter(|| expand_at(black_box(&monthly), true, now))
    });
}

fn bench_json_store(c: &mut Criterion) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn ExpenseStore> = Arc::new(JsonStore::open(temp_dir.path()).unwrap());

    let seed: Vec<Expense> = (0..1000)
        .map(|i| Expense::new(format!("Seed {}", i), "Food", dec!(3.25)))
        .collect();
    store.add_multiple_expenses(seed).unwrap();

    c.bench_function("json_get_all_expenses_1k", |b| {
        b.iter(|| store.get_all_expenses().unwrap())
    });

    c.bench_function("json_add_remove_rule", |b| {
        b.iter(|| {
            let mut input = rule(Interval::Weekly, 52);
            input.id = String::new();
            let stored = store.add_recurring_expense(black_box(input)).unwrap();
            store.remove_recurring_expense(&stored.id, true).unwrap();
        })
    });
}

criterion_group!(benches, bench_expand, bench_json_store);
criterion_main!(benches);
