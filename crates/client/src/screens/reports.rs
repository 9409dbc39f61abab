use std::sync::Arc;

use millstock_core::{Record, ResourceKind};
use millstock_inventory::derive::{CLOSING_STOCK, TOTAL_COST};
use millstock_inventory::{ColumnTotals, TollTable, derive};
use rust_decimal::Decimal;
use serde::Serialize;

use super::controller::DateRange;
use crate::coordinator::{SyncCoordinator, SyncError};

/// Stock balance of one resource over the report range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockSection {
    pub resource: ResourceKind,
    pub rows: usize,
    pub opening: Decimal,
    pub stock_in: Decimal,
    pub stock_out: Decimal,
    pub closing: Decimal,
    /// Stock items at or under their reorder level.
    pub below_reorder: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockReport {
    pub range: DateRange,
    pub sections: Vec<StockSection>,
    pub dispatch_count: usize,
    pub dispatch_cost: Decimal,
    /// Total finished output over total planned tonnage.
    pub overall_yield: Option<Decimal>,
    /// Some figures come from the cached snapshot.
    pub degraded: bool,
}

impl StockReport {
    pub fn section(&self, resource: ResourceKind) -> Option<&StockSection> {
        self.sections.iter().find(|s| s.resource == resource)
    }
}

/// Cross-resource summary screen.
pub struct ReportsController {
    coordinator: Arc<SyncCoordinator>,
    tolls: TollTable,
    range: DateRange,
}

impl ReportsController {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            tolls: TollTable::standard(),
            range: DateRange::default(),
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.range = range;
    }

    async fn fetch(&self, resource: ResourceKind, degraded: &mut bool) -> Result<Vec<Record>, SyncError> {
        let result = self.coordinator.read(resource).await?;
        *degraded |= result.is_degraded();
        Ok(result
            .records
            .into_iter()
            .filter(|r| self.range.contains(r.date("date")))
            .collect())
    }

    pub async fn generate(&self) -> Result<StockReport, SyncError> {
        let mut degraded = false;
        let mut sections = Vec::new();
        let mut overall_yield = None;

        for resource in [
            ResourceKind::RawMaterials,
            ResourceKind::FinishedProducts,
            ResourceKind::Stocks,
        ] {
            let records = self.fetch(resource, &mut degraded).await?;
            let totals = ColumnTotals::over(resource, &records, &self.tolls);
            if resource == ResourceKind::FinishedProducts {
                overall_yield = totals.overall_yield();
            }
            let below_reorder = records
                .iter()
                .filter(|r| derive(resource, r, &self.tolls).below_reorder)
                .count();
            sections.push(StockSection {
                resource,
                rows: totals.rows,
                opening: totals.column("opening"),
                stock_in: totals.column("stockIn"),
                stock_out: totals.column("stockOut"),
                closing: totals.derived(CLOSING_STOCK),
                below_reorder,
            });
        }

        let dispatches = self.fetch(ResourceKind::Dispatches, &mut degraded).await?;
        let dispatch_totals = ColumnTotals::over(ResourceKind::Dispatches, &dispatches, &self.tolls);

        let report = StockReport {
            range: self.range,
            sections,
            dispatch_count: dispatch_totals.rows,
            dispatch_cost: dispatch_totals.derived(TOTAL_COST),
            overall_yield,
            degraded,
        };
        tracing::info!(
            sections = report.sections.len(),
            dispatches = report.dispatch_count,
            degraded = report.degraded,
            "stock report generated"
        );
        Ok(report)
    }
}
