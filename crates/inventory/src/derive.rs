//! Per-resource derived columns.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use millstock_core::{Record, ResourceKind};

use crate::dispatch::{TollTable, toll_fee, total_dispatch_cost};
use crate::production::{stage_losses, yield_percent};
use crate::stock::{below_reorder, closing_stock, total_quantity};

pub const TOTAL_QUANTITY: &str = "totalQuantity";
pub const CLOSING_STOCK: &str = "closingStock";
pub const TOLL_FEE: &str = "tollFee";
pub const TOTAL_COST: &str = "totalCost";
pub const YIELD_PERCENT: &str = "yieldPercent";

/// Derived values for one record, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedFields {
    pub values: BTreeMap<String, Decimal>,
    pub below_reorder: bool,
}

impl DerivedFields {
    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }

    fn insert(&mut self, name: impl Into<String>, value: Decimal) {
        self.values.insert(name.into(), value);
    }
}

/// Recompute every derived column of `record` for its resource.
///
/// A column whose value overflows is left out of the result.
pub fn derive(kind: ResourceKind, record: &Record, tolls: &TollTable) -> DerivedFields {
    let mut out = DerivedFields::default();

    if kind.has_stock_balance() {
        let opening = record.number_or_zero("opening");
        let stock_in = record.number_or_zero("stockIn");
        let stock_out = record.number_or_zero("stockOut");
        if let Some(total) = total_quantity(opening, stock_in) {
            out.insert(TOTAL_QUANTITY, total);
        }
        if let Some(closing) = closing_stock(opening, stock_in, stock_out) {
            out.insert(CLOSING_STOCK, closing);
            if kind == ResourceKind::Stocks {
                out.below_reorder = below_reorder(closing, record.number_or_zero("reorderLevel"));
            }
        }
    }

    match kind {
        ResourceKind::Dispatches => {
            let toll = toll_fee(record.text("tollGroup").unwrap_or_default(), tolls);
            out.insert(TOLL_FEE, toll);
            if let Some(cost) = total_dispatch_cost(
                toll,
                record.number_or_zero("fuelCost"),
                record.number_or_zero("perDiemRate"),
                record.number_or_zero("personnelCount"),
            ) {
                out.insert(TOTAL_COST, cost);
            }
        }
        ResourceKind::FinishedProducts => {
            if let Some(pct) = yield_percent(
                record.number_or_zero("finalOutputKg"),
                record.number_or_zero("plannedTons"),
            ) {
                out.insert(YIELD_PERCENT, pct);
            }
            for (stage, loss) in stage_losses(record) {
                out.insert(format!("{stage}Loss"), loss);
            }
        }
        _ => {}
    }

    out
}
