use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::{Band, Currency, TransportMode};
use crate::error::{AuditError, AuditResult};

/// 固定费用关键字规则 (如 DO FEE)，可限定运输方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedFeeRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub rate: BigDecimal,
    #[serde(default)]
    pub mode: Option<TransportMode>,
    /// 越小越先评估
    #[serde(default)]
    pub priority: u32,
}

impl FixedFeeRule {
    pub fn new(name: impl Into<String>, keywords: &[&str], rate: BigDecimal) -> Self {
        Self {
            name: name.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            rate,
            mode: None,
            priority: 0,
        }
    }

    pub fn for_mode(mut self, mode: TransportMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// 描述中包含任一关键字 (忽略大小写)
    pub fn keyword_hit(&self, description_upper: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.trim().is_empty() && description_upper.contains(&k.to_uppercase()))
    }
}

/// 平台费固定费率，金额为结算币种
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalFeeRule {
    pub fee_name: String,
    pub rate: BigDecimal,
}

/// 合同费率 (按标准化描述)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRule {
    pub description: String,
    pub rate: BigDecimal,
}

/// 航线费率 (起运地, 目的地, 计费单位)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneRule {
    pub origin: String,
    pub destination: String,
    pub unit: String,
    pub rate: BigDecimal,
}

/// 偏差阈值 (百分比绝对值，严格递增)
///
/// |delta| <= pass → PASS，<= warn → WARN，<= high → HIGH，其余 CRITICAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub pass: BigDecimal,
    pub warn: BigDecimal,
    pub high: BigDecimal,
}

impl BandThresholds {
    pub fn new(pass: BigDecimal, warn: BigDecimal, high: BigDecimal) -> AuditResult<Self> {
        let t = Self { pass, warn, high };
        t.validate()?;
        Ok(t)
    }

    /// 平台费: ±0.5% / ±5% / ±10%
    pub fn portal_fee() -> Self {
        Self {
            pass: BigDecimal::new(5.into(), 1),
            warn: BigDecimal::from(5),
            high: BigDecimal::from(10),
        }
    }

    /// 标准合同费: ±2% / ±5% / ±10%
    pub fn standard() -> Self {
        Self {
            pass: BigDecimal::from(2),
            warn: BigDecimal::from(5),
            high: BigDecimal::from(10),
        }
    }

    pub fn validate(&self) -> AuditResult<()> {
        let zero = BigDecimal::from(0);
        if self.pass < zero || !(self.pass < self.warn && self.warn < self.high) {
            return Err(AuditError::InvalidConfig(format!(
                "band thresholds must be strictly ascending: {} / {} / {}",
                self.pass, self.warn, self.high
            )));
        }
        Ok(())
    }

    /// 按等级顺序的 (阈值, 等级) 列表
    pub fn ladder(&self) -> [(&BigDecimal, Band); 3] {
        [
            (&self.pass, Band::Pass),
            (&self.warn, Band::Warn),
            (&self.high, Band::High),
        ]
    }
}

/// 固定汇率: 1 base = rate quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub base: Currency,
    pub quote: Currency,
    pub rate: BigDecimal,
}

impl Default for FxRate {
    fn default() -> Self {
        Self {
            base: Currency::Usd,
            quote: Currency::Aed,
            rate: BigDecimal::new(36725.into(), 4),
        }
    }
}

/// 风险分量权重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub delta_magnitude: f64,
    pub anomaly: f64,
    pub certification_missing: f64,
    pub signature_risk: f64,
    /// 风险分 >= 该值即需复核
    pub trigger_threshold: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            delta_magnitude: 0.4,
            anomaly: 0.3,
            certification_missing: 0.15,
            signature_risk: 0.15,
            trigger_threshold: 0.5,
        }
    }
}

/// 异常特征权重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyWeights {
    pub delta_ratio: f64,
    pub arithmetic_gap: f64,
    pub missing_reference: f64,
    pub round_amount: f64,
}

impl Default for AnomalyWeights {
    fn default() -> Self {
        Self {
            delta_ratio: 0.5,
            arithmetic_gap: 0.3,
            missing_reference: 0.15,
            round_amount: 0.05,
        }
    }
}
