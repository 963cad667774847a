//! 校验编排：对单条明细依次执行 费率解析 → 偏差分级 → 闸门打分 → 代垫核对 → 风险升级，
//! 证据文档只在费率回退或代垫核对需要时才经过证据通道；
//! 批量请求在有界 rayon 线程池上并行，结果保持输入顺序。

use bigdecimal::{BigDecimal, Zero};
use rayon::prelude::*;
use serde::Serialize;
use std::cell::{Cell, OnceCell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::anomaly::AnomalyFeatures;
use super::delta_band::{delta_percent, BandTable};
use super::evidence_matcher::EvidenceMatcher;
use super::gate_scorer::{self, GateInput};
use super::rate_resolver::{EvidenceSource, RateResolver, ResolveContext};
use super::risk_escalator::{RiskEscalator, RiskInput};
use crate::config::{AuditConfig, EngineConfig};
use crate::error::{AuditError, AuditResult};
use crate::models::{
    AuditTrail, BatchStats, ChargeGroup, DocumentRef, FinalStatus, LineItem, MatchResult,
    ParsedDocument, RecordDraft, ValidationRecord, ValidationRequest, NOTE_EVIDENCE_SUSPENDED,
};
use crate::source::{EvidenceFetch, EvidenceGateway, InMemoryShipments, ShipmentLookup};

/// 批量校验结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub records: Vec<ValidationRecord>,
    pub stats: BatchStats,
}

/// 代垫费用核对结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corroboration {
    NotApplicable,
    Confirmed,
    Mismatch,
    Unmatched,
}

/// 校验引擎
///
/// 规则与阈值只读共享；证据通道 (熔断器/预算/缓存) 与线程池可在多个引擎间共享，
/// 以便按请求覆盖规则时仍使用同一组资源状态。
pub struct AuditEngine {
    config: Arc<AuditConfig>,
    resolver: RateResolver,
    bands: BandTable,
    matcher: EvidenceMatcher,
    escalator: RiskEscalator,
    shipments: Arc<dyn ShipmentLookup>,
    gateway: Option<Arc<EvidenceGateway>>,
    pool: Arc<rayon::ThreadPool>,
}

impl AuditEngine {
    pub fn new(config: AuditConfig, engine: &EngineConfig) -> AuditResult<Self> {
        let workers = engine.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("audit-worker-{}", i))
            .build()
            .map_err(|e| AuditError::InvalidConfig(format!("cannot build worker pool: {}", e)))?;
        tracing::info!("[Audit] worker pool ready with {} threads", workers);
        Self::assemble(
            config,
            Arc::new(InMemoryShipments::new()),
            None,
            Arc::new(pool),
        )
    }

    fn assemble(
        config: AuditConfig,
        shipments: Arc<dyn ShipmentLookup>,
        gateway: Option<Arc<EvidenceGateway>>,
        pool: Arc<rayon::ThreadPool>,
    ) -> AuditResult<Self> {
        config.validate()?;
        Ok(Self {
            resolver: RateResolver::from_config(&config),
            bands: config.band_table(),
            matcher: EvidenceMatcher::new(config.settlement_currency, config.fx.clone()),
            escalator: RiskEscalator::new(config.risk_weights.clone()),
            config: Arc::new(config),
            shipments,
            gateway,
            pool,
        })
    }

    pub fn with_shipments(mut self, shipments: Arc<dyn ShipmentLookup>) -> Self {
        self.shipments = shipments;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<EvidenceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// 用另一套规则派生引擎，共享线程池与证据通道
    pub fn with_rules(&self, config: AuditConfig) -> AuditResult<Self> {
        Self::assemble(
            config,
            Arc::clone(&self.shipments),
            self.gateway.clone(),
            Arc::clone(&self.pool),
        )
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn gateway(&self) -> Option<&EvidenceGateway> {
        self.gateway.as_deref()
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// 校验单条明细；任何阶段的错误或 panic 都只影响本条记录 (ERROR)
    pub fn validate(&self, request: &ValidationRequest) -> ValidationRecord {
        let mut draft = RecordDraft::new(request.item.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(request, &mut draft)));
        match outcome {
            Ok(Ok(())) => draft.finish(),
            Ok(Err(e)) => {
                tracing::warn!("[Audit] {} failed: {}", request.item.source_ref, e);
                draft.into_error(&e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("[Audit] {} panicked: {}", request.item.source_ref, message);
                draft.into_error(&AuditError::Catastrophic(message).to_string())
            }
        }
    }

    /// 批量校验，结果与输入一一对应
    pub fn validate_batch(&self, requests: &[ValidationRequest]) -> BatchOutcome {
        let start = Instant::now();
        tracing::info!(
            "[Audit] validating {} items on {} workers",
            requests.len(),
            self.workers()
        );
        let records: Vec<ValidationRecord> = self
            .pool
            .install(|| requests.par_iter().map(|r| self.validate(r)).collect());
        let stats = BatchStats::from_records(&records);
        tracing::info!(
            "[Audit] batch done in {:?}: pass {}, review {}, fail {}, error {}, evidence skipped {}",
            start.elapsed(),
            stats.passed,
            stats.review_needed,
            stats.failed,
            stats.errored,
            stats.evidence_skipped
        );
        BatchOutcome { records, stats }
    }

    fn run_stages(&self, request: &ValidationRequest, draft: &mut RecordDraft) -> AuditResult<()> {
        let item = &request.item;
        let evidence = LazyEvidence::new(self.gateway.as_deref(), request);

        // 1. 参考费率 (证据文档只在表规则全部未命中时读取)
        let ctx = ResolveContext {
            shipments: self.shipments.as_ref(),
            evidence: &evidence,
        };
        let resolution = self.resolver.resolve(item, &ctx);
        draft.notes_mut().extend(resolution.trail);
        evidence.settle(draft)?;
        let mut evidence_match: Option<MatchResult> = None;
        if let Some(hit) = resolution.rate {
            draft.set_reference(hit.rate, hit.source);
            evidence_match = hit.evidence;
        }

        // 2. 偏差与分级
        let thresholds = self.bands.thresholds_for(item.charge_group);
        let delta = delta_percent(&item.unit_rate, draft.reference_rate());
        let band = delta.as_ref().map(|d| self.bands.classify(item.charge_group, d));
        match (&delta, band) {
            (Some(d), Some(b)) => draft.note(format!("delta {}% -> band {}", d, b)),
            _ => draft.note("delta undefined: no usable reference rate"),
        }
        draft.set_delta(delta, band);

        // 3. 闸门
        let gate = gate_scorer::score(&GateInput {
            item,
            reference_rate: draft.reference_rate(),
            band,
            evidence_count: request.evidence_count(),
            min_evidence_documents: self.config.min_evidence_documents,
            arithmetic_epsilon: &self.config.arithmetic_epsilon,
            external_checks: &request.external_checks,
        });
        draft.set_gate(gate.score, gate.status, gate.failed.clone());
        draft.notes_mut().extend(gate.trail.clone());

        // 4. 代垫费用核对 (与分级独立)
        let document = if item.charge_group == ChargeGroup::AtCost {
            evidence.document(draft.notes_mut())
        } else {
            None
        };
        evidence.settle(draft)?;
        let corroboration = match document {
            Some(doc) => {
                let (verdict, matched) = self.corroborate(item, &doc, evidence_match.take(), draft);
                evidence_match = matched;
                verdict
            }
            None => Corroboration::NotApplicable,
        };
        if let Some(m) = evidence_match {
            draft.set_evidence_match(m);
        }

        // 5. 异常指标 + 风险升级
        let features = AnomalyFeatures::extract(item, draft.delta_percent(), thresholds);
        let anomaly = features.score(&self.config.anomaly_weights);
        let detail: Vec<String> = features
            .as_map()
            .iter()
            .map(|(name, value)| format!("{}={:.4}", name, value))
            .collect();
        draft.note(format!("anomaly score {:.4} ({})", anomaly, detail.join(", ")));
        let assessment = self.escalator.assess(
            &RiskInput {
                delta_percent: draft.delta_percent(),
                band,
                thresholds,
                anomaly,
                external_checks: &request.external_checks,
                gate: &gate,
                has_reference: draft.reference_rate().is_some(),
                evidence_mismatch: corroboration == Corroboration::Mismatch,
                evidence_unmatched: corroboration == Corroboration::Unmatched,
            },
            draft.status(),
        );
        draft.escalate(assessment.status);
        draft.set_risk(assessment.score, assessment.components);
        draft.notes_mut().extend(assessment.trail);

        tracing::debug!(
            "[Audit] {} '{}' -> {}",
            item.source_ref,
            item.description,
            draft.status()
        );
        Ok(())
    }

    /// 代垫费用：证据金额与明细总额偏差超过容差即不符
    fn corroborate(
        &self,
        item: &LineItem,
        document: &ParsedDocument,
        resolved: Option<MatchResult>,
        draft: &mut RecordDraft,
    ) -> (Corroboration, Option<MatchResult>) {
        let matched = resolved.or_else(|| {
            self.matcher
                .find_in_document(&item.description, document, item.currency)
        });
        let Some(m) = matched else {
            draft.note(format!("at-cost '{}' not found in evidence", item.description));
            return (Corroboration::Unmatched, None);
        };

        let evidenced = match (&m.amount, &m.unit_rate, &m.quantity) {
            (Some(amount), _, _) => amount.clone(),
            (None, Some(rate), Some(qty)) => rate * qty,
            (None, Some(rate), None) => rate * &item.quantity,
            (None, None, _) => {
                draft.note(format!("at-cost evidence '{}' carries no amount", m.description));
                return (Corroboration::Unmatched, Some(m));
            }
        };

        let gap = (&item.total_amount - &evidenced).abs();
        let off_percent = if evidenced.is_zero() {
            if gap.is_zero() {
                BigDecimal::zero()
            } else {
                BigDecimal::from(100)
            }
        } else {
            (gap / evidenced.abs() * BigDecimal::from(100)).round(2)
        };

        if off_percent > self.config.at_cost_tolerance_percent {
            draft.note(format!(
                "at-cost amount {} differs from evidence {} by {}%",
                item.total_amount, evidenced, off_percent
            ));
            (Corroboration::Mismatch, Some(m))
        } else {
            draft.note(format!("at-cost amount corroborated by evidence {}", evidenced));
            (Corroboration::Confirmed, Some(m))
        }
    }
}

/// 按需读取第一份支撑文档，每条明细最多经过一次证据通道
///
/// 证据通道不可用时只记录说明；解析失败把明细降为待复核，其余错误在 `settle` 时交给编排器。
struct LazyEvidence<'a> {
    gateway: Option<&'a EvidenceGateway>,
    document: Option<&'a DocumentRef>,
    loaded: OnceCell<Option<Arc<ParsedDocument>>>,
    degraded: Cell<bool>,
    failure: RefCell<Option<AuditError>>,
}

impl<'a> LazyEvidence<'a> {
    fn new(gateway: Option<&'a EvidenceGateway>, request: &'a ValidationRequest) -> Self {
        Self {
            gateway,
            document: request.documents.first(),
            loaded: OnceCell::new(),
            degraded: Cell::new(false),
            failure: RefCell::new(None),
        }
    }

    fn load(&self, trail: &mut AuditTrail) -> Option<Arc<ParsedDocument>> {
        let doc = self.document?;
        let Some(gateway) = self.gateway else {
            trail.push(format!("no document parser configured, {} not read", doc.path));
            return None;
        };
        match gateway.fetch(doc) {
            EvidenceFetch::Loaded(parsed) => {
                trail.push(format!("evidence loaded from {}", doc.path));
                Some(parsed)
            }
            EvidenceFetch::Empty => {
                trail.push(format!("evidence {} contains no content", doc.path));
                None
            }
            EvidenceFetch::Suspended => {
                trail.push(format!("{}: circuit breaker open", NOTE_EVIDENCE_SUSPENDED));
                None
            }
            EvidenceFetch::BudgetExhausted => {
                trail.push(format!("{}: daily budget exhausted", NOTE_EVIDENCE_SUSPENDED));
                None
            }
            EvidenceFetch::Failed(AuditError::ParsingFailure(msg)) => {
                trail.push(format!("evidence parsing failed: {}", msg));
                self.degraded.set(true);
                None
            }
            EvidenceFetch::Failed(other) => {
                *self.failure.borrow_mut() = Some(other);
                None
            }
        }
    }

    /// 把读取结论落到记录上
    fn settle(&self, draft: &mut RecordDraft) -> AuditResult<()> {
        if let Some(e) = self.failure.borrow_mut().take() {
            return Err(e);
        }
        if self.degraded.get() {
            draft.escalate(FinalStatus::ReviewNeeded);
        }
        Ok(())
    }
}

impl EvidenceSource for LazyEvidence<'_> {
    fn document(&self, trail: &mut AuditTrail) -> Option<Arc<ParsedDocument>> {
        self.loaded.get_or_init(|| self.load(trail)).clone()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
