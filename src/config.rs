use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AuditError, AuditResult};
use crate::models::{
    AnomalyWeights, BandThresholds, ChargeGroup, ContractRule, Currency, FixedFeeRule, FxRate,
    LaneRule, PortalFeeRule, RiskWeights,
};
use crate::service::delta_band::BandTable;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// 执行引擎配置：工作线程上限、熔断策略、每日外部引擎预算
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_workers: usize,
    /// 连续失败多少次后熔断 (1 = 首次失败即熔断)
    pub breaker_failure_threshold: u32,
    pub breaker_cool_down_secs: u64,
    /// 每日外部解析调用预算 (0 = 不限)
    pub daily_budget: u64,
    /// 解析结果 JSON 的根目录，相对路径基于此解析
    pub document_root: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            breaker_failure_threshold: 3,
            breaker_cool_down_secs: 300,
            daily_budget: 500,
            document_root: None,
        }
    }
}

impl EngineConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.breaker_cool_down_secs)
    }

    /// 实际线程数 = min(配置上限, 可用并行度)
    pub fn worker_count(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.max(1).min(available)
    }
}

/// 审核规则配置 (费率表、阈值、别名、汇率、权重)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub fixed_fees: Vec<FixedFeeRule>,
    pub portal_fees: Vec<PortalFeeRule>,
    pub contract_rates: Vec<ContractRule>,
    pub lane_rates: Vec<LaneRule>,
    /// 别名 → 标准地名
    pub origin_aliases: HashMap<String, String>,
    pub destination_aliases: HashMap<String, String>,
    /// 描述中未识别出计费单位时使用
    pub default_lane_unit: String,
    pub standard_thresholds: BandThresholds,
    pub group_thresholds: HashMap<ChargeGroup, BandThresholds>,
    pub settlement_currency: Currency,
    pub fx: FxRate,
    pub risk_weights: RiskWeights,
    pub anomaly_weights: AnomalyWeights,
    /// 单价 × 数量 与总额允许误差
    pub arithmetic_epsilon: BigDecimal,
    pub min_evidence_documents: usize,
    /// 代垫费用与证据金额允许偏差 (百分比)
    pub at_cost_tolerance_percent: BigDecimal,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let mut group_thresholds = HashMap::new();
        group_thresholds.insert(ChargeGroup::PortalFee, BandThresholds::portal_fee());
        Self {
            fixed_fees: Vec::new(),
            portal_fees: Vec::new(),
            contract_rates: Vec::new(),
            lane_rates: Vec::new(),
            origin_aliases: HashMap::new(),
            destination_aliases: HashMap::new(),
            default_lane_unit: "TRUCK".to_string(),
            standard_thresholds: BandThresholds::standard(),
            group_thresholds,
            settlement_currency: Currency::Usd,
            fx: FxRate::default(),
            risk_weights: RiskWeights::default(),
            anomaly_weights: AnomalyWeights::default(),
            arithmetic_epsilon: BigDecimal::new(1.into(), 2),
            min_evidence_documents: 1,
            at_cost_tolerance_percent: BigDecimal::from(1),
        }
    }
}

impl AuditConfig {
    /// 校验配置一致性
    pub fn validate(&self) -> AuditResult<()> {
        self.standard_thresholds.validate()?;
        for t in self.group_thresholds.values() {
            t.validate()?;
        }
        if self.fx.rate <= BigDecimal::from(0) || self.fx.base == self.fx.quote {
            return Err(AuditError::InvalidConfig(format!(
                "fx rate must be positive between two currencies: 1 {} = {} {}",
                self.fx.base, self.fx.rate, self.fx.quote
            )));
        }
        let w = &self.risk_weights;
        for (name, v) in [
            ("delta_magnitude", w.delta_magnitude),
            ("anomaly", w.anomaly),
            ("certification_missing", w.certification_missing),
            ("signature_risk", w.signature_risk),
            ("trigger_threshold", w.trigger_threshold),
        ] {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                return Err(AuditError::InvalidConfig(format!(
                    "risk weight {} must be within [0, 1], got {}",
                    name, v
                )));
            }
        }
        if self.arithmetic_epsilon <= BigDecimal::from(0) {
            return Err(AuditError::InvalidConfig(
                "arithmetic_epsilon must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn band_table(&self) -> BandTable {
        self.group_thresholds
            .iter()
            .fold(BandTable::new(self.standard_thresholds.clone()), |table, (group, t)| {
                table.with_group(*group, t.clone())
            })
    }
}

impl AppConfig {
    /// 从默认值 + 环境变量加载配置 (APP__SERVER__PORT=9000 之类)
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = AppConfig::default();
        config::Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_audit_config_is_valid() {
        assert!(AuditConfig::default().validate().is_ok());
    }

    #[test]
    fn portal_fee_thresholds_are_default() {
        let table = AuditConfig::default().band_table();
        assert_eq!(
            table.thresholds_for(ChargeGroup::PortalFee),
            &BandThresholds::portal_fee()
        );
        assert_eq!(
            table.thresholds_for(ChargeGroup::Contract),
            &BandThresholds::standard()
        );
    }

    #[test]
    fn out_of_range_risk_weight_rejected() {
        let mut cfg = AuditConfig::default();
        cfg.risk_weights.anomaly = 1.5;
        assert!(matches!(cfg.validate(), Err(AuditError::InvalidConfig(_))));
    }

    #[test]
    fn audit_config_deserializes_with_defaults() {
        let cfg: AuditConfig = serde_json::from_str(
            r#"{ "contract_rates": [ { "description": "TERMINAL HANDLING FEE (20DC)", "rate": "372" } ] }"#,
        )
        .unwrap();
        assert_eq!(cfg.contract_rates.len(), 1);
        assert_eq!(cfg.min_evidence_documents, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn worker_count_is_bounded() {
        let engine = EngineConfig {
            max_workers: 1,
            ..Default::default()
        };
        assert_eq!(engine.worker_count(), 1);
    }
}
