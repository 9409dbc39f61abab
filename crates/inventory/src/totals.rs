//! Column totals over a table of records.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::Serialize;

use millstock_core::resource::FieldKind;
use millstock_core::{Record, ResourceKind};

use crate::derive::{CLOSING_STOCK, YIELD_PERCENT, derive};
use crate::dispatch::TollTable;
use crate::production::yield_percent;
use crate::stock::closing_stock;

/// Sums of every numeric column plus the sums of per-row derived values.
///
/// Both are accumulated independently so a table footer can be checked
/// against its rows (`is_consistent`). A sum that leaves the `Decimal` range
/// stops accumulating and its name is listed in `overflowed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnTotals {
    pub resource: Option<ResourceKind>,
    pub rows: usize,
    pub columns: BTreeMap<String, Decimal>,
    pub derived: BTreeMap<String, Decimal>,
    pub overflowed: BTreeSet<String>,
}

fn accumulate(
    sums: &mut BTreeMap<String, Decimal>,
    overflowed: &mut BTreeSet<String>,
    name: &str,
    value: Decimal,
) {
    if overflowed.contains(name) {
        return;
    }
    let sum = sums.entry(name.to_string()).or_default();
    match sum.checked_add(value) {
        Some(next) => *sum = next,
        None => {
            sums.remove(name);
            overflowed.insert(name.to_string());
        }
    }
}

impl ColumnTotals {
    pub fn over<'a, I>(kind: ResourceKind, records: I, tolls: &TollTable) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let schema = kind.schema();
        let numeric: Vec<&str> = schema
            .fields
            .iter()
            .filter(|f| f.kind == FieldKind::Number)
            .map(|f| f.name.as_str())
            .collect();

        let mut totals = ColumnTotals {
            resource: Some(kind),
            ..ColumnTotals::default()
        };

        for record in records {
            totals.rows += 1;
            for name in &numeric {
                accumulate(
                    &mut totals.columns,
                    &mut totals.overflowed,
                    name,
                    record.number_or_zero(name),
                );
            }
            for (name, value) in derive(kind, record, tolls).values {
                // Percentages do not add up; see `overall_yield`.
                if name == YIELD_PERCENT {
                    continue;
                }
                accumulate(&mut totals.derived, &mut totals.overflowed, &name, value);
            }
        }

        totals
    }

    pub fn column(&self, name: &str) -> Decimal {
        self.columns.get(name).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn derived(&self, name: &str) -> Decimal {
        self.derived.get(name).copied().unwrap_or(Decimal::ZERO)
    }

    /// `sum(closing per row) == sum(opening) + sum(in) - sum(out)`.
    ///
    /// Trivially true for resources without stock balances; false once any
    /// sum has overflowed.
    pub fn is_consistent(&self) -> bool {
        if !self.overflowed.is_empty() {
            return false;
        }
        match self.resource {
            Some(kind) if kind.has_stock_balance() => {
                Some(self.derived(CLOSING_STOCK))
                    == closing_stock(
                        self.column("opening"),
                        self.column("stockIn"),
                        self.column("stockOut"),
                    )
            }
            _ => true,
        }
    }

    /// Yield of the whole table: total output over total planned tonnage.
    pub fn overall_yield(&self) -> Option<Decimal> {
        yield_percent(self.column("finalOutputKg"), self.column("plannedTons"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stock_row(o: Decimal, i: Decimal, out: Decimal) -> Record {
        Record::new()
            .with_field("opening", o)
            .with_field("stockIn", i)
            .with_field("stockOut", out)
    }

    #[test]
    fn totals_sum_columns_and_closing() {
        let rows = vec![
            stock_row(Decimal::from(100), Decimal::from(20), Decimal::from(5)),
            stock_row(Decimal::new(105, 1), Decimal::ZERO, Decimal::new(25, 1)),
        ];
        let totals = ColumnTotals::over(ResourceKind::RawMaterials, &rows, &TollTable::standard());
        assert_eq!(totals.rows, 2);
        assert_eq!(totals.column("opening"), Decimal::new(1105, 1));
        assert_eq!(totals.derived(CLOSING_STOCK), Decimal::from(123));
        assert!(totals.is_consistent());
    }

    #[test]
    fn empty_table_is_all_zero() {
        let none: Vec<Record> = Vec::new();
        let totals = ColumnTotals::over(ResourceKind::Stocks, &none, &TollTable::standard());
        assert_eq!(totals.rows, 0);
        assert_eq!(totals.derived(CLOSING_STOCK), Decimal::ZERO);
        assert!(totals.is_consistent());
    }

    #[test]
    fn overflowing_sums_are_flagged_not_panicking() {
        let rows = vec![
            stock_row(Decimal::MAX, Decimal::ZERO, Decimal::ZERO),
            stock_row(Decimal::MAX, Decimal::ZERO, Decimal::ZERO),
            stock_row(Decimal::ONE, Decimal::ONE, Decimal::ZERO),
        ];
        let totals = ColumnTotals::over(ResourceKind::Stocks, &rows, &TollTable::standard());
        assert_eq!(totals.rows, 3);
        assert!(totals.overflowed.contains("opening"));
        assert!(totals.overflowed.contains(CLOSING_STOCK));
        assert_eq!(totals.column("stockIn"), Decimal::ONE);
        assert!(!totals.is_consistent());
    }

    #[test]
    fn overall_yield_weights_by_plan() {
        let rows = vec![
            Record::new().with_field("plannedTons", 1).with_field("finalOutputKg", 1000),
            Record::new().with_field("plannedTons", 3).with_field("finalOutputKg", 2000),
        ];
        let totals = ColumnTotals::over(ResourceKind::FinishedProducts, &rows, &TollTable::standard());
        assert_eq!(totals.overall_yield(), Some(Decimal::new(7500, 2)));
        assert!(totals.derived.get(YIELD_PERCENT).is_none());
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;

        fn qty() -> impl Strategy<Value = Decimal> {
            (-10_000_000i64..10_000_000i64, 0u32..4).prop_map(|(v, scale)| Decimal::new(v, scale))
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: the footer's closing total matches the per-row closing values.
            #[test]
            fn row_and_column_closing_agree(
                rows in proptest::collection::vec((qty(), qty(), qty()), 0..40)
            ) {
                let records: Vec<Record> = rows
                    .iter()
                    .map(|(o, i, out)| stock_row(*o, *i, *out))
                    .collect();
                let totals = ColumnTotals::over(ResourceKind::Stocks, &records, &TollTable::standard());
                prop_assert!(totals.is_consistent());

                let by_row: Decimal = records
                    .iter()
                    .filter_map(|r| closing_stock(
                        r.number_or_zero("opening"),
                        r.number_or_zero("stockIn"),
                        r.number_or_zero("stockOut"),
                    ))
                    .sum();
                prop_assert_eq!(by_row, totals.derived(CLOSING_STOCK));
            }
        }
    }
}
