use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{LineItem, MatchResult};

/// 证据通道被熔断/预算跳过时写入轨迹的标记
pub const NOTE_EVIDENCE_SUSPENDED: &str = "evidence path suspended";

/// COST-GUARD 偏差等级 (按阈值严格递增)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Band {
    Pass,
    Warn,
    High,
    Critical,
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Band::Pass => "PASS",
            Band::Warn => "WARN",
            Band::High => "HIGH",
            Band::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    Pass,
    Fail,
}

/// 最终状态，只升不降: PASS < REVIEW_NEEDED < FAIL < ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Pass,
    ReviewNeeded,
    Fail,
    Error,
}

impl FinalStatus {
    /// 升级到 `to` (若更严重)；ERROR 一旦出现不再变化
    pub fn escalate(self, to: FinalStatus) -> FinalStatus {
        if self == FinalStatus::Error {
            return self;
        }
        self.max(to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FinalStatus::Fail | FinalStatus::Error)
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalStatus::Pass => "PASS",
            FinalStatus::ReviewNeeded => "REVIEW_NEEDED",
            FinalStatus::Fail => "FAIL",
            FinalStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 参考费率命中的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSourceKind {
    FixedFee,
    PortalFee,
    Contract,
    Lane,
    Evidence,
}

impl fmt::Display for RateSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateSourceKind::FixedFee => "fixed_fee",
            RateSourceKind::PortalFee => "portal_fee",
            RateSourceKind::Contract => "contract",
            RateSourceKind::Lane => "lane",
            RateSourceKind::Evidence => "evidence",
        };
        f.write_str(s)
    }
}

/// 审计轨迹 (单次校验内只追加)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<String>);

impl AuditTrail {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, note: impl Into<String>) {
        self.0.push(note.into());
    }

    pub fn extend(&mut self, other: AuditTrail) {
        self.0.extend(other.0);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|n| n.contains(needle))
    }
}

/// 单条明细的校验记录，生成后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub line_item: LineItem,
    pub reference_rate: Option<BigDecimal>,
    pub rate_source: Option<RateSourceKind>,
    pub delta_percent: Option<BigDecimal>,
    pub band: Option<Band>,
    pub gate_score: u32,
    pub gate_status: GateStatus,
    pub failed_gates: Vec<String>,
    pub evidence_match: Option<MatchResult>,
    pub risk_score: f64,
    pub risk_components: IndexMap<String, f64>,
    pub final_status: FinalStatus,
    pub notes: AuditTrail,
}

impl ValidationRecord {
    /// 需人工重新处理 (ERROR 记录)
    pub fn needs_reprocessing(&self) -> bool {
        self.final_status == FinalStatus::Error
    }
}

/// 校验记录草稿，`finish` 之后即冻结
#[derive(Debug, Clone)]
pub struct RecordDraft {
    line_item: LineItem,
    reference_rate: Option<BigDecimal>,
    rate_source: Option<RateSourceKind>,
    delta_percent: Option<BigDecimal>,
    band: Option<Band>,
    gate_score: u32,
    gate_status: GateStatus,
    failed_gates: Vec<String>,
    evidence_match: Option<MatchResult>,
    risk_score: f64,
    risk_components: IndexMap<String, f64>,
    status: FinalStatus,
    notes: AuditTrail,
}

impl RecordDraft {
    pub fn new(line_item: LineItem) -> Self {
        Self {
            line_item,
            reference_rate: None,
            rate_source: None,
            delta_percent: None,
            band: None,
            gate_score: 0,
            gate_status: GateStatus::Fail,
            failed_gates: Vec::new(),
            evidence_match: None,
            risk_score: 0.0,
            risk_components: IndexMap::new(),
            status: FinalStatus::Pass,
            notes: AuditTrail::new(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note);
    }

    pub fn notes_mut(&mut self) -> &mut AuditTrail {
        &mut self.notes
    }

    pub fn set_reference(&mut self, rate: BigDecimal, source: RateSourceKind) {
        self.reference_rate = Some(rate);
        self.rate_source = Some(source);
    }

    pub fn reference_rate(&self) -> Option<&BigDecimal> {
        self.reference_rate.as_ref()
    }

    pub fn set_delta(&mut self, delta_percent: Option<BigDecimal>, band: Option<Band>) {
        self.delta_percent = delta_percent;
        self.band = band;
    }

    pub fn delta_percent(&self) -> Option<&BigDecimal> {
        self.delta_percent.as_ref()
    }

    pub fn set_gate(&mut self, score: u32, status: GateStatus, failed: Vec<String>) {
        self.gate_score = score;
        self.gate_status = status;
        self.failed_gates = failed;
    }

    pub fn set_evidence_match(&mut self, m: MatchResult) {
        self.evidence_match = Some(m);
    }

    pub fn set_risk(&mut self, score: f64, components: IndexMap<String, f64>) {
        self.risk_score = score;
        self.risk_components = components;
    }

    pub fn escalate(&mut self, to: FinalStatus) {
        self.status = self.status.escalate(to);
    }

    pub fn status(&self) -> FinalStatus {
        self.status
    }

    pub fn finish(self) -> ValidationRecord {
        ValidationRecord {
            line_item: self.line_item,
            reference_rate: self.reference_rate,
            rate_source: self.rate_source,
            delta_percent: self.delta_percent,
            band: self.band,
            gate_score: self.gate_score,
            gate_status: self.gate_status,
            failed_gates: self.failed_gates,
            evidence_match: self.evidence_match,
            risk_score: self.risk_score,
            risk_components: self.risk_components,
            final_status: self.status,
            notes: self.notes,
        }
    }

    /// 生成 ERROR 记录：丢弃阶段中间结果，只保留明细与已有轨迹
    pub fn into_error(self, message: &str) -> ValidationRecord {
        let mut notes = self.notes;
        notes.push(format!("ERROR: {}; flagged for manual reprocessing", message));
        ValidationRecord {
            line_item: self.line_item,
            reference_rate: None,
            rate_source: None,
            delta_percent: None,
            band: None,
            gate_score: 0,
            gate_status: GateStatus::Fail,
            failed_gates: Vec::new(),
            evidence_match: None,
            risk_score: 0.0,
            risk_components: IndexMap::new(),
            final_status: FinalStatus::Error,
            notes,
        }
    }
}

/// 批量校验统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_items: usize,
    pub passed: usize,
    pub review_needed: usize,
    pub failed: usize,
    pub errored: usize,
    pub with_reference_rate: usize,
    pub evidence_skipped: usize,
}

impl BatchStats {
    pub fn from_records(records: &[ValidationRecord]) -> Self {
        let mut stats = BatchStats {
            total_items: records.len(),
            ..Default::default()
        };
        for r in records {
            match r.final_status {
                FinalStatus::Pass => stats.passed += 1,
                FinalStatus::ReviewNeeded => stats.review_needed += 1,
                FinalStatus::Fail => stats.failed += 1,
                FinalStatus::Error => stats.errored += 1,
            }
            if r.reference_rate.is_some() {
                stats.with_reference_rate += 1;
            }
            if r.notes.contains(NOTE_EVIDENCE_SUSPENDED) {
                stats.evidence_skipped += 1;
            }
        }
        stats
    }
}
