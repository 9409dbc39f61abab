//! Screen controllers: thin callers of the coordinator.
//!
//! Each data screen is a `ScreenController` bound to one resource; the
//! reports screen aggregates across resources. Rendering, spreadsheet export
//! and printing consume what these return.

mod controller;
mod reports;

pub use controller::{Banner, DateRange, DeleteRequest, ScreenController, TableRow};
pub use reports::{ReportsController, StockReport, StockSection};
