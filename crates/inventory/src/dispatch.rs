//! Dispatch cost arithmetic: toll fees and trip totals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of the toll tariff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TollTier {
    pub group: String,
    pub fee: Decimal,
}

/// Toll tariff keyed by the vehicle-group label chosen on the dispatch form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TollTable {
    tiers: Vec<TollTier>,
}

impl TollTable {
    pub fn new(tiers: Vec<TollTier>) -> Self {
        Self { tiers }
    }

    /// The seven-tier road toll tariff used by the dispatch screen.
    pub fn standard() -> Self {
        const TIERS: [(&str, i64); 7] = [
            ("Group 1: Motorcycles, Tricycles", 3),
            ("Group 2: Saloon Cars, Taxis", 5),
            ("Group 3: SUVs, Pickup Jeeps, Mini Buses", 10),
            ("Group 4: Buses, Light Goods Vehicles", 20),
            ("Group 5: Medium Goods Vehicles (2 Axles)", 50),
            ("Group 6: Heavy Goods Vehicles (3-4 Axles)", 150),
            ("Group 7: Articulated Trucks (5+ Axles)", 600),
        ];
        Self::new(
            TIERS
                .iter()
                .map(|(group, fee)| TollTier {
                    group: (*group).to_string(),
                    fee: Decimal::from(*fee),
                })
                .collect(),
        )
    }

    pub fn tiers(&self) -> &[TollTier] {
        &self.tiers
    }

    /// Fee for an exact group label, if the label is in the table.
    pub fn lookup(&self, group: &str) -> Option<Decimal> {
        self.tiers.iter().find(|t| t.group == group).map(|t| t.fee)
    }
}

impl Default for TollTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Toll fee for a vehicle group. Unknown labels cost nothing.
pub fn toll_fee(group: &str, table: &TollTable) -> Decimal {
    table.lookup(group).unwrap_or(Decimal::ZERO)
}

/// `toll + fuel + per_diem_rate * max(personnel, 1)`, or `None` on overflow.
pub fn total_dispatch_cost(
    toll_fee: Decimal,
    fuel_cost: Decimal,
    per_diem_rate: Decimal,
    personnel_count: Decimal,
) -> Option<Decimal> {
    let crew = personnel_count.max(Decimal::ONE);
    toll_fee
        .checked_add(fuel_cost)?
        .checked_add(per_diem_rate.checked_mul(crew)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_three_costs_ten() {
        let table = TollTable::standard();
        assert_eq!(
            toll_fee("Group 3: SUVs, Pickup Jeeps, Mini Buses", &table),
            Decimal::from(10)
        );
    }

    #[test]
    fn unknown_group_costs_nothing() {
        let table = TollTable::standard();
        assert_eq!(toll_fee("Group 9: Spaceships", &table), Decimal::ZERO);
        assert_eq!(toll_fee("", &table), Decimal::ZERO);
    }

    #[test]
    fn standard_table_spans_three_to_six_hundred() {
        let table = TollTable::standard();
        assert_eq!(table.tiers().len(), 7);
        let fees: Vec<Decimal> = table.tiers().iter().map(|t| t.fee).collect();
        assert_eq!(fees.iter().min(), Some(&Decimal::from(3)));
        assert_eq!(fees.iter().max(), Some(&Decimal::from(600)));
    }

    #[test]
    fn crew_of_zero_still_pays_one_per_diem() {
        let total = total_dispatch_cost(
            Decimal::from(10),
            Decimal::from(200),
            Decimal::from(50),
            Decimal::ZERO,
        );
        assert_eq!(total, Some(Decimal::from(260)));
    }

    #[test]
    fn per_diem_scales_with_crew() {
        let total = total_dispatch_cost(
            Decimal::from(20),
            Decimal::new(15050, 2),
            Decimal::from(40),
            Decimal::from(3),
        );
        assert_eq!(total, Some(Decimal::new(29050, 2)));
    }

    #[test]
    fn absurd_crew_cost_overflows_to_none() {
        let total = total_dispatch_cost(Decimal::from(10), Decimal::ZERO, Decimal::MAX, Decimal::from(2));
        assert_eq!(total, None);
    }
}
