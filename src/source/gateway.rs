use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::breaker::{BreakerPolicy, BreakerState, CircuitBreaker};
use super::budget::DailyBudget;
use super::clock::{Clock, SystemClock};
use super::documents::DocumentParser;
use crate::error::AuditError;
use crate::models::{DocumentRef, ParsedDocument};

/// 证据文档获取结果
#[derive(Debug, Clone)]
pub enum EvidenceFetch {
    Loaded(Arc<ParsedDocument>),
    /// 解析成功但没有内容
    Empty,
    /// 熔断中，未调用解析引擎
    Suspended,
    /// 当日预算用尽，未调用解析引擎
    BudgetExhausted,
    Failed(AuditError),
}

/// 证据通道：解析引擎 + 熔断器 + 每日预算 + 只读文档缓存
///
/// 解析调用是整条流水线唯一可能阻塞的点。
pub struct EvidenceGateway {
    parser: Arc<dyn DocumentParser>,
    breaker: CircuitBreaker,
    budget: DailyBudget,
    cache: DashMap<DocumentRef, Arc<ParsedDocument>>,
    clock: Arc<dyn Clock>,
}

impl EvidenceGateway {
    pub fn new(parser: Arc<dyn DocumentParser>) -> Self {
        Self {
            parser,
            breaker: CircuitBreaker::default(),
            budget: DailyBudget::unlimited(),
            cache: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_breaker(mut self, policy: BreakerPolicy) -> Self {
        self.breaker = CircuitBreaker::new(policy);
        self
    }

    pub fn with_budget(mut self, budget: DailyBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn budget(&self) -> &DailyBudget {
        &self.budget
    }

    pub fn cached_documents(&self) -> usize {
        self.cache.len()
    }

    /// 获取证据文档
    ///
    /// 顺序：熔断 (冷却中直接跳过，缓存也不读) → 缓存 → 占用调用机会 → 预算 → 解析。
    /// 半开试探机会只交给真正的解析调用，未调用解析引擎的出口都会交回。
    pub fn fetch(&self, doc: &DocumentRef) -> EvidenceFetch {
        let now = self.clock.now();
        if self.breaker.state(now) == BreakerState::Open {
            tracing::debug!("[Evidence] {} skipped, breaker open", doc.path);
            return EvidenceFetch::Suspended;
        }

        if let Some(hit) = self.cache.get(doc) {
            let hit = Arc::clone(hit.value());
            return if hit.is_empty() {
                EvidenceFetch::Empty
            } else {
                EvidenceFetch::Loaded(hit)
            };
        }

        let Some(admission) = self.breaker.admit(now) else {
            tracing::debug!("[Evidence] {} skipped, trial call in flight", doc.path);
            return EvidenceFetch::Suspended;
        };

        if !self.budget.try_consume(self.parser.cost_units(), now) {
            self.breaker.release(admission);
            tracing::warn!(
                "[Evidence] daily budget exhausted ({} units), {} not parsed",
                self.budget.limit(),
                doc.path
            );
            return EvidenceFetch::BudgetExhausted;
        }

        let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.parser.parse(&doc.path, &doc.doc_type)
        }));
        match parsed {
            Ok(Ok(parsed)) => {
                self.breaker.record_success();
                let parsed = Arc::new(parsed);
                self.cache.insert(doc.clone(), Arc::clone(&parsed));
                if parsed.is_empty() {
                    EvidenceFetch::Empty
                } else {
                    tracing::debug!(
                        "[Evidence] parsed {} ({} blocks)",
                        doc.path,
                        parsed.blocks.len()
                    );
                    EvidenceFetch::Loaded(parsed)
                }
            }
            Ok(Err(e)) => {
                if e.trips_breaker() {
                    self.breaker.record_failure(now);
                } else {
                    self.breaker.release(admission);
                }
                tracing::warn!("[Evidence] {} failed: {}", doc.path, e);
                EvidenceFetch::Failed(e)
            }
            Err(payload) => {
                // 解析引擎崩溃计为一次失败，panic 继续交给编排器转成 ERROR 记录
                self.breaker.record_failure(now);
                tracing::error!("[Evidence] parser crashed on {}", doc.path);
                panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditResult;
    use crate::models::Block;
    use crate::source::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingParser {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingParser {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    /// 路径前缀决定结果：bad 解析失败，rejected 路径被拒，crash 直接 panic
    impl DocumentParser for CountingParser {
        fn parse(&self, path: &str, _doc_type: &str) -> AuditResult<ParsedDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.starts_with("crash") {
                panic!("engine crashed on {}", path);
            }
            if path.starts_with("rejected") {
                return Err(AuditError::DocumentRejected(path.to_string()));
            }
            if self.fail || path.starts_with("bad") {
                Err(AuditError::ParsingFailure(format!("engine down for {}", path)))
            } else {
                Ok(ParsedDocument::new(vec![Block::text("DO FEE 100")]))
            }
        }
    }

    fn doc(path: &str) -> DocumentRef {
        DocumentRef::new(path, "invoice")
    }

    /// 首次失败即熔断，冷却 60 秒
    fn tripping_gateway(parser: Arc<CountingParser>, clock: Arc<ManualClock>) -> EvidenceGateway {
        EvidenceGateway::new(parser)
            .with_breaker(BreakerPolicy {
                failure_threshold: 1,
                cool_down: Duration::from_secs(60),
            })
            .with_clock(clock)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()))
    }

    #[test]
    fn breaker_stops_engine_calls_during_cool_down() {
        let parser = CountingParser::new(true);
        let clock = clock();
        let gw = EvidenceGateway::new(parser.clone())
            .with_breaker(BreakerPolicy {
                failure_threshold: 2,
                cool_down: Duration::from_secs(120),
            })
            .with_clock(clock.clone());

        for i in 0..2 {
            let r = gw.fetch(&DocumentRef::new(format!("doc-{}.json", i), "invoice"));
            assert!(matches!(r, EvidenceFetch::Failed(_)));
        }
        for i in 2..10 {
            let r = gw.fetch(&DocumentRef::new(format!("doc-{}.json", i), "invoice"));
            assert!(matches!(r, EvidenceFetch::Suspended));
        }
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);

        clock.advance(chrono::Duration::seconds(121));
        let r = gw.fetch(&DocumentRef::new("doc-trial.json", "invoice"));
        assert!(matches!(r, EvidenceFetch::Failed(_)));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn parsed_documents_are_cached() {
        let parser = CountingParser::new(false);
        let gw = EvidenceGateway::new(parser.clone()).with_clock(clock());
        let doc = DocumentRef::new("a.json", "invoice");
        assert!(matches!(gw.fetch(&doc), EvidenceFetch::Loaded(_)));
        assert!(matches!(gw.fetch(&doc), EvidenceFetch::Loaded(_)));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.cached_documents(), 1);
    }

    #[test]
    fn exhausted_budget_skips_engine() {
        let parser = CountingParser::new(false);
        let gw = EvidenceGateway::new(parser.clone())
            .with_budget(DailyBudget::new(1))
            .with_clock(clock());
        assert!(matches!(
            gw.fetch(&DocumentRef::new("a.json", "invoice")),
            EvidenceFetch::Loaded(_)
        ));
        assert!(matches!(
            gw.fetch(&DocumentRef::new("b.json", "invoice")),
            EvidenceFetch::BudgetExhausted
        ));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.breaker().consecutive_failures(), 0);
    }

    #[test]
    fn cache_hit_in_half_open_window_keeps_trial_for_engine() {
        let parser = CountingParser::new(false);
        let clock = clock();
        let gw = tripping_gateway(parser.clone(), clock.clone());

        assert!(matches!(gw.fetch(&doc("good.json")), EvidenceFetch::Loaded(_)));
        assert!(matches!(gw.fetch(&doc("bad.json")), EvidenceFetch::Failed(_)));
        assert!(matches!(gw.fetch(&doc("good.json")), EvidenceFetch::Suspended));

        clock.advance(chrono::Duration::seconds(61));
        assert!(matches!(gw.fetch(&doc("good.json")), EvidenceFetch::Loaded(_)));
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::HalfOpen);
        assert_eq!(parser.calls(), 2);

        assert!(matches!(gw.fetch(&doc("fresh.json")), EvidenceFetch::Loaded(_)));
        assert_eq!(parser.calls(), 3);
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::Closed);
    }

    #[test]
    fn exhausted_budget_in_half_open_window_releases_trial() {
        let parser = CountingParser::new(false);
        let clock = clock();
        let gw = tripping_gateway(parser.clone(), clock.clone()).with_budget(DailyBudget::new(1));

        assert!(matches!(gw.fetch(&doc("bad.json")), EvidenceFetch::Failed(_)));
        clock.advance(chrono::Duration::seconds(61));
        assert!(matches!(gw.fetch(&doc("fresh.json")), EvidenceFetch::BudgetExhausted));
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::HalfOpen);
        assert_eq!(gw.breaker().consecutive_failures(), 1);
        assert_eq!(parser.calls(), 1);

        // 次日预算恢复，试探机会仍在
        clock.advance(chrono::Duration::days(1));
        assert!(matches!(gw.fetch(&doc("fresh.json")), EvidenceFetch::Loaded(_)));
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::Closed);
    }

    #[test]
    fn non_breaker_error_in_half_open_window_releases_trial() {
        let parser = CountingParser::new(false);
        let clock = clock();
        let gw = tripping_gateway(parser.clone(), clock.clone());

        assert!(matches!(gw.fetch(&doc("bad.json")), EvidenceFetch::Failed(_)));
        clock.advance(chrono::Duration::seconds(61));
        assert!(matches!(
            gw.fetch(&doc("rejected.json")),
            EvidenceFetch::Failed(AuditError::DocumentRejected(_))
        ));
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::HalfOpen);

        assert!(matches!(gw.fetch(&doc("fresh.json")), EvidenceFetch::Loaded(_)));
        assert_eq!(parser.calls(), 3);
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::Closed);
    }

    #[test]
    fn parser_panic_counts_as_breaker_failure() {
        let parser = CountingParser::new(false);
        let clock = clock();
        let gw = tripping_gateway(parser.clone(), clock.clone());

        let crashed = panic::catch_unwind(AssertUnwindSafe(|| gw.fetch(&doc("crash.json"))));
        assert!(crashed.is_err());
        assert_eq!(gw.breaker().state(clock.now()), BreakerState::Open);
        assert!(matches!(gw.fetch(&doc("fresh.json")), EvidenceFetch::Suspended));
        assert_eq!(parser.calls(), 1);
    }
}
