//! Production yield and per-stage losses for finished-product batches.

use rust_decimal::{Decimal, RoundingStrategy};

use millstock_core::Record;
use millstock_core::resource::PROCESSING_STAGES;

/// Output as a share of the planned tonnage, in percent, rounded to 2 places.
///
/// `None` when nothing was planned or the figures are out of range.
pub fn yield_percent(final_output_kg: Decimal, planned_tons: Decimal) -> Option<Decimal> {
    if planned_tons <= Decimal::ZERO {
        return None;
    }
    let planned_kg = planned_tons.checked_mul(Decimal::ONE_THOUSAND)?;
    let pct = final_output_kg
        .checked_div(planned_kg)?
        .checked_mul(Decimal::ONE_HUNDRED)?;
    Some(pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Material lost in one processing stage: `input - output`.
///
/// A stage that reports more output than input yields a negative loss; this is
/// accepted as entered.
pub fn department_loss(input: Decimal, output: Decimal) -> Option<Decimal> {
    input.checked_sub(output)
}

/// Losses for every processing stage that has an input or output recorded.
///
/// Stages whose loss is out of range are left out.
pub fn stage_losses(record: &Record) -> Vec<(&'static str, Decimal)> {
    PROCESSING_STAGES
        .iter()
        .filter_map(|stage| {
            let input = record.number(&format!("{stage}Input"));
            let output = record.number(&format!("{stage}Output"));
            if input.is_none() && output.is_none() {
                return None;
            }
            let loss = department_loss(
                input.unwrap_or(Decimal::ZERO),
                output.unwrap_or(Decimal::ZERO),
            )?;
            Some((*stage, loss))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ton_planned_one_ton_out_is_full_yield() {
        assert_eq!(
            yield_percent(Decimal::from(1000), Decimal::ONE),
            Some(Decimal::new(10000, 2))
        );
    }

    #[test]
    fn yield_rounds_to_two_places() {
        // 2000 / 3000 * 100 = 66.666...
        assert_eq!(
            yield_percent(Decimal::from(2000), Decimal::from(3)),
            Some(Decimal::new(6667, 2))
        );
    }

    #[test]
    fn nothing_planned_has_no_yield() {
        assert_eq!(yield_percent(Decimal::from(500), Decimal::ZERO), None);
    }

    #[test]
    fn negative_loss_is_preserved() {
        assert_eq!(
            department_loss(Decimal::from(90), Decimal::from(95)),
            Some(Decimal::from(-5))
        );
    }

    #[test]
    fn huge_plan_has_no_yield_instead_of_panicking() {
        assert_eq!(yield_percent(Decimal::from(1000), Decimal::MAX), None);
        assert_eq!(department_loss(Decimal::MIN, Decimal::MAX), None);
    }

    #[test]
    fn stage_losses_skip_unrecorded_stages() {
        let rec = Record::new()
            .with_field("cleaningInput", 1000)
            .with_field("cleaningOutput", 970)
            .with_field("packagingOutput", 940);
        let losses = stage_losses(&rec);
        assert_eq!(
            losses,
            vec![
                ("cleaning", Decimal::from(30)),
                ("packaging", Decimal::from(-940)),
            ]
        );
    }
}
