use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::billing::round_money;
use crate::domain::campaign::Campaign;

const ROI_HIGH: Decimal = dec!(25);
const CTR_HIGH: Decimal = dec!(5);
const CTR_LOW: Decimal = dec!(1);
const CONVERSION_HIGH: Decimal = dec!(2);
const CONVERSION_LOW: Decimal = dec!(0.5);

/// How the adjustment factor was derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetStrategy {
    RoiScaleUp,
    RoiScaleDown,
    RoiSteady,
    EngagementHeuristic,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDecision {
    pub campaign_id: i64,
    pub old_budget: Option<Decimal>,
    pub new_budget: Option<Decimal>,
    pub factor: Decimal,
    pub strategy: BudgetStrategy,
}

impl BudgetDecision {
    pub fn changed(&self) -> bool {
        self.old_budget != self.new_budget
    }
}

/// Adjustment factor for the given performance figures (percentages).
pub fn budget_factor(
    roi: Option<Decimal>,
    ctr: Option<Decimal>,
    conversion_rate: Option<Decimal>,
) -> (Decimal, BudgetStrategy) {
    let ctr_high = ctr.is_some_and(|c| c > CTR_HIGH);
    let conversion_high = conversion_rate.is_some_and(|c| c > CONVERSION_HIGH);

    match roi {
        Some(roi) => {
            let (mut factor, strategy) = if roi > ROI_HIGH {
                (dec!(1.20), BudgetStrategy::RoiScaleUp)
            } else if roi < Decimal::ZERO {
                (dec!(0.85), BudgetStrategy::RoiScaleDown)
            } else {
                (dec!(1.05), BudgetStrategy::RoiSteady)
            };
            if ctr_high {
                factor *= dec!(1.03);
            }
            if conversion_high {
                factor *= dec!(1.02);
            }
            (factor, strategy)
        }
        None => {
            let mut factor = Decimal::ONE;
            if ctr_high {
                factor += dec!(0.1);
            } else if ctr.is_some_and(|c| c < CTR_LOW) {
                factor -= dec!(0.05);
            }
            if conversion_high {
                factor += dec!(0.1);
            } else if conversion_rate.is_some_and(|c| c < CONVERSION_LOW) {
                factor -= dec!(0.05);
            }
            (factor, BudgetStrategy::EngagementHeuristic)
        }
    }
}

/// Decides the campaign's next budget. Zero or absent budgets are returned
/// unchanged.
pub fn optimize_budget(campaign: &Campaign) -> BudgetDecision {
    let old_budget = campaign.budget;
    match old_budget {
        Some(budget) if !budget.is_zero() => {
            let (factor, strategy) =
                budget_factor(campaign.roi(), campaign.ctr(), campaign.conversion_rate());
            BudgetDecision {
                campaign_id: campaign.id,
                old_budget,
                new_budget: Some(round_money(budget * factor)),
                factor,
                strategy,
            }
        }
        _ => BudgetDecision {
            campaign_id: campaign.id,
            old_budget,
            new_budget: old_budget,
            factor: Decimal::ONE,
            strategy: BudgetStrategy::Unchanged,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::PerformanceMetrics;
    use chrono::Utc;

    fn campaign(budget: Option<Decimal>, metrics: PerformanceMetrics) -> Campaign {
        Campaign {
            id: 1,
            name: "c".to_string(),
            budget,
            active: true,
            owner: None,
            metrics: Some(metrics),
            updated_at: Utc::now(),
        }
    }

    fn roi(roi: Decimal) -> PerformanceMetrics {
        PerformanceMetrics {
            roi: Some(roi),
            ..Default::default()
        }
    }

    #[test]
    fn test_high_roi_scales_up() {
        let decision = optimize_budget(&campaign(Some(dec!(1000)), roi(dec!(30))));
        assert_eq!(decision.factor, dec!(1.20));
        assert_eq!(decision.new_budget, Some(dec!(1200.00)));
        assert_eq!(decision.strategy, BudgetStrategy::RoiScaleUp);
    }

    #[test]
    fn test_negative_roi_scales_down() {
        let decision = optimize_budget(&campaign(Some(dec!(1000)), roi(dec!(-10))));
        assert_eq!(decision.new_budget, Some(dec!(850.00)));
    }

    #[test]
    fn test_zero_budget_is_never_scaled() {
        let decision = optimize_budget(&campaign(Some(Decimal::ZERO), roi(dec!(30))));
        assert_eq!(decision.new_budget, Some(Decimal::ZERO));
        assert!(!decision.changed());

        let decision = optimize_budget(&campaign(None, roi(dec!(30))));
        assert_eq!(decision.new_budget, None);
        assert_eq!(decision.strategy, BudgetStrategy::Unchanged);
    }

    #[test]
    fn test_roi_bonuses_multiply() {
        let metrics = PerformanceMetrics {
            roi: Some(dec!(10)),
            ctr: Some(dec!(6)),
            conversion_rate: Some(dec!(3)),
            ..Default::default()
        };
        let (factor, _) = budget_factor(metrics.roi, metrics.ctr, metrics.conversion_rate);
        assert_eq!(factor, dec!(1.05) * dec!(1.03) * dec!(1.02));

        let decision = optimize_budget(&campaign(Some(dec!(100)), metrics));
        assert_eq!(decision.new_budget, Some(dec!(110.31)));
    }

    #[test]
    fn test_heuristic_without_roi() {
        assert_eq!(budget_factor(None, Some(dec!(6)), Some(dec!(3))).0, dec!(1.2));
        assert_eq!(budget_factor(None, Some(dec!(0.5)), Some(dec!(0.1))).0, dec!(0.90));
        assert_eq!(budget_factor(None, Some(dec!(3)), None).0, Decimal::ONE);
        assert_eq!(
            budget_factor(None, None, None).1,
            BudgetStrategy::EngagementHeuristic
        );
    }
}
