//! Derived-field calculator.
//!
//! This crate contains the business arithmetic of the dashboard, implemented
//! purely as deterministic functions (no IO, no HTTP, no storage). Derived
//! values are always recomputed from a record's base fields and never stored.

pub mod derive;
pub mod dispatch;
pub mod production;
pub mod stock;
pub mod totals;

pub use derive::{DerivedFields, derive};
pub use dispatch::{TollTable, toll_fee, total_dispatch_cost};
pub use production::{department_loss, stage_losses, yield_percent};
pub use stock::{below_reorder, closing_stock, total_quantity};
pub use totals::ColumnTotals;
