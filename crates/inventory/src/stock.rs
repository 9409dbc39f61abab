//! Stock balance arithmetic.

use rust_decimal::Decimal;

/// `opening + stock_in - stock_out`, or `None` if it overflows.
///
/// Negative results are returned as-is (over-issuing is a data problem the
/// screen shows, not something to clamp).
pub fn closing_stock(opening: Decimal, stock_in: Decimal, stock_out: Decimal) -> Option<Decimal> {
    opening.checked_add(stock_in)?.checked_sub(stock_out)
}

/// Quantity available before any issue: `opening + stock_in`.
pub fn total_quantity(opening: Decimal, stock_in: Decimal) -> Option<Decimal> {
    opening.checked_add(stock_in)
}

/// Whether a closing balance has reached the reorder level.
///
/// A zero or missing reorder level never triggers.
pub fn below_reorder(closing: Decimal, reorder_level: Decimal) -> bool {
    reorder_level > Decimal::ZERO && closing <= reorder_level
}
