use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use indexmap::IndexMap;

use crate::models::{AnomalyWeights, BandThresholds, LineItem};

use super::gate_scorer::arithmetic_gap;

/// 行项目异常特征 (均归一化到 [0, 1])
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyFeatures {
    /// |delta| / HIGH 阈值
    pub delta_ratio: f64,
    /// |单价 × 数量 - 总额| / |总额|
    pub arithmetic_gap: f64,
    /// 无参考费率时为 1
    pub missing_reference: f64,
    /// 整百金额 (常见于估算/手填)
    pub round_amount: f64,
}

impl AnomalyFeatures {
    pub fn extract(
        item: &LineItem,
        delta_percent: Option<&BigDecimal>,
        thresholds: &BandThresholds,
    ) -> Self {
        let delta_ratio = delta_percent
            .map(|d| ratio(&d.abs(), &thresholds.high))
            .unwrap_or(0.0);

        let arithmetic_gap = if item.total_amount.is_zero() {
            if arithmetic_gap(item).is_zero() {
                0.0
            } else {
                1.0
            }
        } else {
            ratio(&arithmetic_gap(item), &item.total_amount.abs())
        };

        let missing_reference = if delta_percent.is_none() { 1.0 } else { 0.0 };

        let hundred = BigDecimal::from(100);
        let round_amount = if !item.total_amount.is_zero()
            && (&item.total_amount % &hundred).is_zero()
        {
            1.0
        } else {
            0.0
        };

        Self {
            delta_ratio,
            arithmetic_gap,
            missing_reference,
            round_amount,
        }
    }

    /// 加权平均: Σ w·f / Σ w，权重全为 0 时为 0
    pub fn score(&self, weights: &AnomalyWeights) -> f64 {
        let pairs = [
            (weights.delta_ratio, self.delta_ratio),
            (weights.arithmetic_gap, self.arithmetic_gap),
            (weights.missing_reference, self.missing_reference),
            (weights.round_amount, self.round_amount),
        ];
        let total_weight: f64 = pairs.iter().map(|(w, _)| w.max(0.0)).sum();
        if total_weight <= f64::EPSILON {
            return 0.0;
        }
        let weighted: f64 = pairs.iter().map(|(w, f)| w.max(0.0) * f).sum();
        (weighted / total_weight).clamp(0.0, 1.0)
    }

    /// 按固定顺序导出，便于写入轨迹
    pub fn as_map(&self) -> IndexMap<&'static str, f64> {
        let mut map = IndexMap::new();
        map.insert("delta_ratio", self.delta_ratio);
        map.insert("arithmetic_gap", self.arithmetic_gap);
        map.insert("missing_reference", self.missing_reference);
        map.insert("round_amount", self.round_amount);
        map
    }
}

/// a / b 截断到 [0, 1]；b 非正时视为最大偏离
fn ratio(a: &BigDecimal, b: &BigDecimal) -> f64 {
    if *b <= BigDecimal::zero() {
        return if a.is_zero() { 0.0 } else { 1.0 };
    }
    (a / b).to_f64().unwrap_or(1.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChargeGroup;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn item(rate: &str, qty: &str, total: &str) -> LineItem {
        LineItem::new(
            "BL-001",
            "TERMINAL HANDLING FEE (20DC)",
            dec(rate),
            dec(qty),
            dec(total),
            ChargeGroup::Contract,
        )
    }

    #[test]
    fn clean_item_has_no_features() {
        let f = AnomalyFeatures::extract(
            &item("372.50", "1", "372.50"),
            Some(&dec("0")),
            &BandThresholds::standard(),
        );
        assert_eq!(f.delta_ratio, 0.0);
        assert_eq!(f.arithmetic_gap, 0.0);
        assert_eq!(f.missing_reference, 0.0);
        assert_eq!(f.round_amount, 0.0);
        assert_eq!(f.score(&AnomalyWeights::default()), 0.0);
    }

    #[test]
    fn delta_ratio_caps_at_one() {
        let t = BandThresholds::standard();
        let half = AnomalyFeatures::extract(&item("1", "1", "1"), Some(&dec("-5")), &t);
        assert!((half.delta_ratio - 0.5).abs() < 1e-9);
        let over = AnomalyFeatures::extract(&item("1", "1", "1"), Some(&dec("36.05")), &t);
        assert_eq!(over.delta_ratio, 1.0);
    }

    #[test]
    fn missing_reference_and_round_amount() {
        let f = AnomalyFeatures::extract(&item("400", "1", "400"), None, &BandThresholds::standard());
        assert_eq!(f.missing_reference, 1.0);
        assert_eq!(f.round_amount, 1.0);
        let score = f.score(&AnomalyWeights::default());
        assert!((score - 0.20).abs() < 1e-9);
    }

    #[test]
    fn arithmetic_gap_relative_to_total() {
        let f = AnomalyFeatures::extract(
            &item("110", "1", "100"),
            Some(&dec("0")),
            &BandThresholds::standard(),
        );
        assert!((f.arithmetic_gap - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_score_zero() {
        let f = AnomalyFeatures::extract(&item("400", "1", "400"), None, &BandThresholds::standard());
        let weights = AnomalyWeights {
            delta_ratio: 0.0,
            arithmetic_gap: 0.0,
            missing_reference: 0.0,
            round_amount: 0.0,
        };
        assert_eq!(f.score(&weights), 0.0);
    }

    proptest! {
        #[test]
        fn score_stays_in_unit_interval(
            rate in 0i64..100_000,
            qty in 0i64..100,
            total in 0i64..1_000_000,
            delta in proptest::option::of(-100_000i64..100_000),
        ) {
            let it = item(
                &BigDecimal::new(rate.into(), 2).to_string(),
                &qty.to_string(),
                &BigDecimal::new(total.into(), 2).to_string(),
            );
            let delta = delta.map(|d| BigDecimal::new(d.into(), 2));
            let f = AnomalyFeatures::extract(&it, delta.as_ref(), &BandThresholds::standard());
            let s = f.score(&AnomalyWeights::default());
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
