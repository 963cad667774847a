use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use indexmap::IndexMap;

use crate::models::{AuditTrail, Band, BandThresholds, FinalStatus, GateStatus, RiskWeights};

use super::gate_scorer::{GateOutcome, CERTIFICATE_PRESENT, SIGNATURE_PRESENT};

pub const DELTA_MAGNITUDE: &str = "delta_magnitude";
pub const ANOMALY: &str = "anomaly";
pub const CERTIFICATION_MISSING: &str = "certification_missing";
pub const SIGNATURE_RISK: &str = "signature_risk";

/// 风险评估输入 (前序阶段的结果)
#[derive(Debug, Clone)]
pub struct RiskInput<'a> {
    pub delta_percent: Option<&'a BigDecimal>,
    pub band: Option<Band>,
    pub thresholds: &'a BandThresholds,
    /// 已归一化的异常分
    pub anomaly: f64,
    pub external_checks: &'a IndexMap<String, bool>,
    pub gate: &'a GateOutcome,
    pub has_reference: bool,
    /// 代垫费用金额与证据不符
    pub evidence_mismatch: bool,
    /// 代垫费用在证据中未找到
    pub evidence_unmatched: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub score: f64,
    pub components: IndexMap<String, f64>,
    pub status: FinalStatus,
    pub trail: AuditTrail,
}

#[derive(Debug, Clone)]
pub struct RiskEscalator {
    weights: RiskWeights,
}

impl RiskEscalator {
    pub fn new(weights: RiskWeights) -> Self {
        Self { weights }
    }

    /// 计算风险分并给出状态；`current` 为 FAIL/ERROR 时保持不变
    pub fn assess(&self, input: &RiskInput<'_>, current: FinalStatus) -> RiskAssessment {
        let components = self.components(input);
        let w = &self.weights;
        let raw = w.delta_magnitude * components[DELTA_MAGNITUDE]
            + w.anomaly * components[ANOMALY]
            + w.certification_missing * components[CERTIFICATION_MISSING]
            + w.signature_risk * components[SIGNATURE_RISK];
        let score = round4(raw);

        let mut trail = AuditTrail::new();
        let mut fail_reasons = Vec::new();
        let mut review_reasons = Vec::new();

        if input.gate.status == GateStatus::Fail {
            fail_reasons.push(format!("gate score {} below threshold", input.gate.score));
        }
        if input.band == Some(Band::Critical) {
            fail_reasons.push("delta band CRITICAL".to_string());
        }
        if input.evidence_mismatch {
            fail_reasons.push("evidence amount mismatch".to_string());
        }

        if score >= w.trigger_threshold {
            review_reasons.push(format!(
                "risk score {} >= trigger {}",
                score, w.trigger_threshold
            ));
        }
        if let Some(band @ (Band::Warn | Band::High)) = input.band {
            review_reasons.push(format!("delta band {}", band));
        }
        if input.gate.has_soft_issue() {
            review_reasons.push(format!(
                "soft gate issue: {}",
                input.gate.failed.join(", ")
            ));
        }
        if !input.has_reference {
            review_reasons.push("reference rate unverifiable".to_string());
        }
        if input.evidence_unmatched {
            review_reasons.push("no evidence line matched".to_string());
        }

        let proposed = if !fail_reasons.is_empty() {
            trail.push(format!("FAIL: {}", fail_reasons.join("; ")));
            FinalStatus::Fail
        } else if !review_reasons.is_empty() {
            trail.push(format!("REVIEW_NEEDED: {}", review_reasons.join("; ")));
            FinalStatus::ReviewNeeded
        } else {
            FinalStatus::Pass
        };

        let status = current.escalate(proposed);
        trail.push(format!("risk score {} -> {}", score, status));

        RiskAssessment {
            score,
            components,
            status,
            trail,
        }
    }

    fn components(&self, input: &RiskInput<'_>) -> IndexMap<String, f64> {
        let delta_magnitude = match input.delta_percent {
            Some(d) if input.thresholds.high > BigDecimal::zero() => (d.abs() / &input.thresholds.high)
                .to_f64()
                .unwrap_or(1.0)
                .clamp(0.0, 1.0),
            Some(d) if !d.is_zero() => 1.0,
            _ => 0.0,
        };
        let flag = |name: &str| match input.external_checks.get(name) {
            Some(false) => 1.0,
            _ => 0.0,
        };

        let mut components = IndexMap::new();
        components.insert(DELTA_MAGNITUDE.to_string(), round4(delta_magnitude));
        components.insert(ANOMALY.to_string(), round4(input.anomaly.clamp(0.0, 1.0)));
        components.insert(CERTIFICATION_MISSING.to_string(), flag(CERTIFICATE_PRESENT));
        components.insert(SIGNATURE_RISK.to_string(), flag(SIGNATURE_PRESENT));
        components
    }
}

impl Default for RiskEscalator {
    fn default() -> Self {
        Self::new(RiskWeights::default())
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
