use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;

use crate::error::AuditError;
use crate::models::{AuditTrail, Band, GateStatus, LineItem};

/// 综合闸门通过线
pub const GATE_PASS_SCORE: u32 = 80;

pub const RATE_SOURCE_PRESENT: &str = "rate_source_present";
pub const DESCRIPTION_PRESENT: &str = "description_present";
pub const RATE_POSITIVE: &str = "rate_positive";
pub const QUANTITY_POSITIVE: &str = "quantity_positive";
pub const ARITHMETIC_CONSISTENT: &str = "arithmetic_consistent";
pub const CONTRACT_RATE_VALIDATED: &str = "contract_rate_validated";
pub const EVIDENCE_COUNT: &str = "evidence_count";
pub const DOCUMENT_SET_COMPLETE: &str = "document_set_complete";
pub const CERTIFICATE_PRESENT: &str = "certificate_present";
pub const SIGNATURE_PRESENT: &str = "signature_present";

/// 闸门及权重 (合计 100)，顺序即报告顺序
pub const GATE_WEIGHTS: [(&str, u32); 10] = [
    (RATE_SOURCE_PRESENT, 10),
    (DESCRIPTION_PRESENT, 5),
    (RATE_POSITIVE, 10),
    (QUANTITY_POSITIVE, 10),
    (ARITHMETIC_CONSISTENT, 20),
    (CONTRACT_RATE_VALIDATED, 15),
    (EVIDENCE_COUNT, 10),
    (DOCUMENT_SET_COMPLETE, 10),
    (CERTIFICATE_PRESENT, 5),
    (SIGNATURE_PRESENT, 5),
];

/// 由外部提供结果的闸门
pub const EXTERNAL_GATES: [&str; 3] = [DOCUMENT_SET_COMPLETE, CERTIFICATE_PRESENT, SIGNATURE_PRESENT];

/// 闸门打分输入
#[derive(Debug, Clone)]
pub struct GateInput<'a> {
    pub item: &'a LineItem,
    pub reference_rate: Option<&'a BigDecimal>,
    pub band: Option<Band>,
    pub evidence_count: usize,
    pub min_evidence_documents: usize,
    pub arithmetic_epsilon: &'a BigDecimal,
    pub external_checks: &'a IndexMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub score: u32,
    pub status: GateStatus,
    /// 每个闸门的结果 (按权重表顺序)
    pub checks: IndexMap<String, bool>,
    pub failed: Vec<String>,
    pub trail: AuditTrail,
}

impl GateOutcome {
    /// 总分过线但仍有闸门未通过
    pub fn has_soft_issue(&self) -> bool {
        self.status == GateStatus::Pass && !self.failed.is_empty()
    }

    pub fn passed(&self, gate: &str) -> Option<bool> {
        self.checks.get(gate).copied()
    }
}

/// 单价 × 数量 与 总额 的差额绝对值
pub fn arithmetic_gap(item: &LineItem) -> BigDecimal {
    (&item.unit_rate * &item.quantity - &item.total_amount).abs()
}

/// 按权重表计算闸门分数
pub fn score(input: &GateInput<'_>) -> GateOutcome {
    let item = input.item;
    let mut trail = AuditTrail::new();
    let mut checks: IndexMap<String, bool> = IndexMap::new();

    let gap = arithmetic_gap(item);
    let arithmetic_ok = &gap < input.arithmetic_epsilon;
    if !arithmetic_ok {
        let err = AuditError::ArithmeticInconsistency {
            expected: (&item.unit_rate * &item.quantity).to_string(),
            actual: item.total_amount.to_string(),
        };
        trail.push(err.to_string());
    }

    let builtin = [
        (
            RATE_SOURCE_PRESENT,
            item.rate_source.as_deref().map_or(false, |s| !s.trim().is_empty()),
        ),
        (DESCRIPTION_PRESENT, !item.description.trim().is_empty()),
        (RATE_POSITIVE, item.unit_rate > BigDecimal::zero()),
        (QUANTITY_POSITIVE, item.quantity > BigDecimal::zero()),
        (ARITHMETIC_CONSISTENT, arithmetic_ok),
        (
            CONTRACT_RATE_VALIDATED,
            input.reference_rate.is_some() && matches!(input.band, Some(b) if b != Band::Critical),
        ),
        (EVIDENCE_COUNT, input.evidence_count >= input.min_evidence_documents),
    ];
    for (name, ok) in builtin {
        checks.insert(name.to_string(), ok);
    }

    // 外部检查按名称合并；未提供视为不适用 (通过)
    for name in EXTERNAL_GATES {
        let ok = input.external_checks.get(name).copied().unwrap_or(true);
        checks.insert(name.to_string(), ok);
    }
    for name in input.external_checks.keys() {
        if !GATE_WEIGHTS.iter().any(|(g, _)| *g == name.as_str()) {
            trail.push(format!("unknown external check '{}' ignored", name));
        }
    }

    let mut total = 0u32;
    let mut failed = Vec::new();
    for (name, weight) in GATE_WEIGHTS {
        if checks.get(name).copied().unwrap_or(false) {
            total += weight;
        } else {
            failed.push(name.to_string());
        }
    }

    let status = if total >= GATE_PASS_SCORE {
        GateStatus::Pass
    } else {
        GateStatus::Fail
    };
    trail.push(format!(
        "gate score {} ({:?}){}",
        total,
        status,
        if failed.is_empty() {
            String::new()
        } else {
            format!(", failed: {}", failed.join(", "))
        }
    ));

    GateOutcome {
        score: total,
        status,
        checks,
        failed,
        trail,
    }
}
