use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;

use crate::models::{Band, BandThresholds, ChargeGroup};

/// 偏差百分比: round((draft - ref) / ref * 100, 2)；ref 缺失或为 0 时为 None
pub fn delta_percent(draft: &BigDecimal, reference: Option<&BigDecimal>) -> Option<BigDecimal> {
    let reference = reference?;
    if reference.is_zero() {
        return None;
    }
    let ratio = (draft - reference) / reference;
    Some((ratio * BigDecimal::from(100)).round(2))
}

/// 按阈值分级：|delta| 不超过的第一个阈值胜出，超过最后一个即 CRITICAL
pub fn band(delta: &BigDecimal, thresholds: &BandThresholds) -> Band {
    let magnitude = delta.abs();
    for (limit, band) in thresholds.ladder() {
        if &magnitude <= limit {
            return band;
        }
    }
    Band::Critical
}

/// 按计费分组选择阈值
#[derive(Debug, Clone)]
pub struct BandTable {
    standard: BandThresholds,
    by_group: HashMap<ChargeGroup, BandThresholds>,
}

impl BandTable {
    pub fn new(standard: BandThresholds) -> Self {
        Self {
            standard,
            by_group: HashMap::new(),
        }
    }

    pub fn with_group(mut self, group: ChargeGroup, thresholds: BandThresholds) -> Self {
        self.by_group.insert(group, thresholds);
        self
    }

    /// 未单独配置的分组使用标准阈值
    pub fn thresholds_for(&self, group: ChargeGroup) -> &BandThresholds {
        self.by_group.get(&group).unwrap_or(&self.standard)
    }

    pub fn classify(&self, group: ChargeGroup, delta: &BigDecimal) -> Band {
        band(delta, self.thresholds_for(group))
    }
}

impl Default for BandTable {
    fn default() -> Self {
        BandTable::new(BandThresholds::standard())
            .with_group(ChargeGroup::PortalFee, BandThresholds::portal_fee())
    }
}
