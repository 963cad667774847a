//! 参考费率解析：按优先级依次尝试各阶段规则，第一个命中者生效
//!
//! 固定费用关键字 → 平台费 → 合同费率 → 航线费率 → 证据回退

use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;
use std::sync::Arc;

use super::evidence_matcher::EvidenceMatcher;
use super::fx::round2;
use super::text::{
    extract_lane, extract_unit, infer_mode, is_transport_charge, normalize, normalize_unit,
};
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::models::{
    AuditTrail, FixedFeeRule, LineItem, MatchResult, ParsedDocument, RateSourceKind,
    TransportMode,
};
use crate::source::ShipmentLookup;

/// 命中的参考费率
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    pub rate: BigDecimal,
    pub source: RateSourceKind,
    pub detail: String,
    /// 证据阶段命中时的匹配结果
    pub evidence: Option<MatchResult>,
}

impl ResolvedRate {
    fn new(rate: BigDecimal, source: RateSourceKind, detail: impl Into<String>) -> Self {
        Self {
            rate,
            source,
            detail: detail.into(),
            evidence: None,
        }
    }
}

/// 证据文档来源，只在证据阶段需要时读取
pub trait EvidenceSource {
    /// 读取过程中的说明写入 `trail`
    fn document(&self, trail: &mut AuditTrail) -> Option<Arc<ParsedDocument>>;
}

/// 已经在手的文档 (或没有文档)
impl EvidenceSource for Option<Arc<ParsedDocument>> {
    fn document(&self, _trail: &mut AuditTrail) -> Option<Arc<ParsedDocument>> {
        self.clone()
    }
}

/// 解析上下文 (只读)
pub struct ResolveContext<'a> {
    pub shipments: &'a dyn ShipmentLookup,
    pub evidence: &'a dyn EvidenceSource,
}

/// 费率阶段的统一能力
pub trait RateStage: Send + Sync {
    fn kind(&self) -> RateSourceKind;

    /// 越小越先执行
    fn priority(&self) -> u32;

    fn resolve(
        &self,
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<ResolvedRate>;
}

/// 解析结果 + 审计轨迹
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub rate: Option<ResolvedRate>,
    pub trail: AuditTrail,
}

pub struct RateResolver {
    stages: Vec<Box<dyn RateStage>>,
}

impl RateResolver {
    pub fn new(mut stages: Vec<Box<dyn RateStage>>) -> Self {
        stages.sort_by_key(|s| s.priority());
        Self { stages }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        let matcher = EvidenceMatcher::new(config.settlement_currency, config.fx.clone());
        Self::new(vec![
            Box::new(FixedFeeStage::new(config.fixed_fees.clone())),
            Box::new(PortalFeeStage::new(
                config
                    .portal_fees
                    .iter()
                    .map(|r| (r.fee_name.as_str(), r.rate.clone())),
            )),
            Box::new(ContractStage::new(
                config
                    .contract_rates
                    .iter()
                    .map(|r| (r.description.as_str(), r.rate.clone())),
            )),
            Box::new(LaneStage::from_config(config)),
            Box::new(EvidenceStage::new(matcher)),
        ])
    }

    pub fn stage_kinds(&self) -> Vec<RateSourceKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// 依次尝试各阶段；全部未命中返回 None
    pub fn resolve(&self, item: &LineItem, ctx: &ResolveContext<'_>) -> Resolution {
        let mut trail = AuditTrail::new();
        for stage in &self.stages {
            if let Some(hit) = stage.resolve(item, ctx, &mut trail) {
                tracing::debug!(
                    "[Resolver] {} resolved by {} at {}",
                    item.source_ref,
                    hit.source,
                    hit.rate
                );
                trail.push(format!(
                    "rate resolved by {}: {} ({})",
                    hit.source, hit.rate, hit.detail
                ));
                return Resolution {
                    rate: Some(hit),
                    trail,
                };
            }
        }
        let missing = AuditError::ConfigurationMissing(format!(
            "all resolution stages exhausted for '{}'",
            item.description
        ));
        trail.push(format!("no reference rate: {}", missing));
        Resolution { rate: None, trail }
    }
}

/// 1. 固定费用关键字
pub struct FixedFeeStage {
    rules: Vec<FixedFeeRule>,
}

impl FixedFeeStage {
    pub fn new(mut rules: Vec<FixedFeeRule>) -> Self {
        // 稳定排序，同优先级保持配置顺序
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    fn transport_mode(
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<TransportMode> {
        if let Some(info) = ctx.shipments.lookup(&item.source_ref) {
            return Some(info.mode);
        }
        let guessed = infer_mode(&item.description);
        if let Some(mode) = guessed {
            trail.push(format!(
                "shipment {} not found, mode {:?} inferred from description",
                item.source_ref, mode
            ));
        }
        guessed
    }
}

impl RateStage for FixedFeeStage {
    fn kind(&self) -> RateSourceKind {
        RateSourceKind::FixedFee
    }

    fn priority(&self) -> u32 {
        10
    }

    fn resolve(
        &self,
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<ResolvedRate> {
        let upper = item.description.to_uppercase();
        let mut mode: Option<Option<TransportMode>> = None;
        for rule in &self.rules {
            if !rule.keyword_hit(&upper) {
                continue;
            }
            if let Some(required) = rule.mode {
                // 运输方式只在需要时查询一次
                let actual = *mode.get_or_insert_with(|| Self::transport_mode(item, ctx, trail));
                if actual != Some(required) {
                    continue;
                }
            }
            return Some(ResolvedRate::new(
                rule.rate.clone(),
                RateSourceKind::FixedFee,
                format!("keyword rule '{}'", rule.name),
            ));
        }
        None
    }
}

/// 2. 平台费固定费率
pub struct PortalFeeStage {
    table: HashMap<String, BigDecimal>,
}

impl PortalFeeStage {
    pub fn new<'a>(entries: impl Iterator<Item = (&'a str, BigDecimal)>) -> Self {
        Self {
            table: entries.map(|(k, v)| (normalize(k), v)).collect(),
        }
    }
}

impl RateStage for PortalFeeStage {
    fn kind(&self) -> RateSourceKind {
        RateSourceKind::PortalFee
    }

    fn priority(&self) -> u32 {
        20
    }

    fn resolve(
        &self,
        item: &LineItem,
        _ctx: &ResolveContext<'_>,
        _trail: &mut AuditTrail,
    ) -> Option<ResolvedRate> {
        let key = normalize(&item.description);
        self.table.get(&key).map(|rate| {
            ResolvedRate::new(rate.clone(), RateSourceKind::PortalFee, format!("portal fee '{}'", key))
        })
    }
}

/// 3. 合同费率
pub struct ContractStage {
    table: HashMap<String, BigDecimal>,
}

impl ContractStage {
    pub fn new<'a>(entries: impl Iterator<Item = (&'a str, BigDecimal)>) -> Self {
        Self {
            table: entries.map(|(k, v)| (normalize(k), v)).collect(),
        }
    }
}

impl RateStage for ContractStage {
    fn kind(&self) -> RateSourceKind {
        RateSourceKind::Contract
    }

    fn priority(&self) -> u32 {
        30
    }

    fn resolve(
        &self,
        item: &LineItem,
        _ctx: &ResolveContext<'_>,
        _trail: &mut AuditTrail,
    ) -> Option<ResolvedRate> {
        let key = normalize(&item.description);
        self.table.get(&key).map(|rate| {
            ResolvedRate::new(rate.clone(), RateSourceKind::Contract, format!("contract '{}'", key))
        })
    }
}

/// 4. 航线费率 (起运地, 目的地, 单位)
pub struct LaneStage {
    table: HashMap<(String, String, String), BigDecimal>,
    origin_aliases: HashMap<String, String>,
    destination_aliases: HashMap<String, String>,
    default_unit: String,
}

impl LaneStage {
    pub fn from_config(config: &AuditConfig) -> Self {
        let alias_map = |m: &HashMap<String, String>| -> HashMap<String, String> {
            m.iter().map(|(k, v)| (normalize(k), normalize(v))).collect()
        };
        let origin_aliases = alias_map(&config.origin_aliases);
        let destination_aliases = alias_map(&config.destination_aliases);
        let table = config
            .lane_rates
            .iter()
            .map(|l| {
                (
                    (
                        canonical(&origin_aliases, &l.origin),
                        canonical(&destination_aliases, &l.destination),
                        normalize_unit(&l.unit),
                    ),
                    l.rate.clone(),
                )
            })
            .collect();
        Self {
            table,
            origin_aliases,
            destination_aliases,
            default_unit: normalize_unit(&config.default_lane_unit),
        }
    }
}

impl LaneStage {
    /// 描述里没有航线的运输费，取运单上的起运地/目的地
    fn shipment_lane(
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<(String, String)> {
        if !is_transport_charge(&item.description) {
            return None;
        }
        let info = ctx.shipments.lookup(&item.source_ref)?;
        let (Some(origin), Some(destination)) = (info.origin, info.destination) else {
            return None;
        };
        trail.push(format!(
            "lane {} -> {} taken from shipment {}",
            origin, destination, item.source_ref
        ));
        Some((origin, destination))
    }
}

/// 地名标准化后查别名表，没有别名即自身
fn canonical(aliases: &HashMap<String, String>, place: &str) -> String {
    let key = normalize(place);
    aliases.get(&key).cloned().unwrap_or(key)
}

impl RateStage for LaneStage {
    fn kind(&self) -> RateSourceKind {
        RateSourceKind::Lane
    }

    fn priority(&self) -> u32 {
        40
    }

    fn resolve(
        &self,
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<ResolvedRate> {
        if self.table.is_empty() {
            return None;
        }
        let (origin, destination) = match extract_lane(&item.description) {
            Some(lane) => (lane.origin, lane.destination),
            None => Self::shipment_lane(item, ctx, trail)?,
        };
        let origin = canonical(&self.origin_aliases, &origin);
        let destination = canonical(&self.destination_aliases, &destination);
        let unit = extract_unit(&item.description).unwrap_or_else(|| self.default_unit.clone());
        let key = (origin, destination, unit);
        match self.table.get(&key) {
            Some(rate) => Some(ResolvedRate::new(
                rate.clone(),
                RateSourceKind::Lane,
                format!("lane {} -> {} per {}", key.0, key.1, key.2),
            )),
            None => {
                trail.push(format!(
                    "lane {} -> {} per {} not in lane table",
                    key.0, key.1, key.2
                ));
                None
            }
        }
    }
}

/// 5. 证据回退：在支撑文档中匹配同类费用
pub struct EvidenceStage {
    matcher: EvidenceMatcher,
}

impl EvidenceStage {
    pub fn new(matcher: EvidenceMatcher) -> Self {
        Self { matcher }
    }
}

impl RateStage for EvidenceStage {
    fn kind(&self) -> RateSourceKind {
        RateSourceKind::Evidence
    }

    fn priority(&self) -> u32 {
        50
    }

    fn resolve(
        &self,
        item: &LineItem,
        ctx: &ResolveContext<'_>,
        trail: &mut AuditTrail,
    ) -> Option<ResolvedRate> {
        let document = ctx.evidence.document(trail)?;
        let Some(m) = self
            .matcher
            .find_in_document(&item.description, &document, item.currency)
        else {
            trail.push(AuditError::MatchNotFound(item.description.clone()).to_string());
            return None;
        };

        // 优先取单价，否则用 金额 / 数量
        let rate = match (&m.unit_rate, &m.amount, &m.quantity) {
            (Some(rate), _, _) => Some(rate.clone()),
            (None, Some(amount), Some(qty)) if !qty.is_zero() => Some(round2(&(amount / qty))),
            (None, Some(amount), _) => Some(amount.clone()),
            _ => None,
        }?;

        let mut detail = format!("{:?} match '{}' score {:.2}", m.method, m.description, m.score);
        if let Some(from) = m.converted_from {
            detail.push_str(&format!(", converted {} -> {}", from, item.currency));
        }
        Some(ResolvedRate {
            rate,
            source: RateSourceKind::Evidence,
            detail,
            evidence: Some(m),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Block, ChargeGroup, ContractRule, Currency, LaneRule, PortalFeeRule, ShipmentInfo,
    };
    use crate::source::InMemoryShipments;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn item(desc: &str, group: ChargeGroup) -> LineItem {
        LineItem::new("BL-001", desc, dec("100"), dec("1"), dec("100"), group)
    }

    fn config() -> AuditConfig {
        let mut cfg = AuditConfig::default();
        cfg.fixed_fees = vec![
            FixedFeeRule::new("do-fee-air", &["DO FEE"], dec("150")).for_mode(TransportMode::Air),
            FixedFeeRule::new("do-fee-sea", &["DO FEE"], dec("250"))
                .for_mode(TransportMode::Container),
        ];
        cfg.portal_fees = vec![PortalFeeRule {
            fee_name: "Mirsal Portal Fee".into(),
            rate: dec("8.50"),
        }];
        cfg.contract_rates = vec![ContractRule {
            description: "Terminal Handling Fee (20DC)".into(),
            rate: dec("372"),
        }];
        cfg.lane_rates = vec![LaneRule {
            origin: "KHALIFA".into(),
            destination: "KEZAD".into(),
            unit: "40HC".into(),
            rate: dec("900"),
        }];
        cfg.origin_aliases.insert("Khalifa Port".into(), "KHALIFA".into());
        cfg.destination_aliases.insert("Khalifa Economic Zone".into(), "KEZAD".into());
        cfg
    }

    fn resolve(cfg: &AuditConfig, item: &LineItem, doc: Option<&ParsedDocument>) -> Resolution {
        let shipments = InMemoryShipments::new();
        let evidence = doc.cloned().map(Arc::new);
        let resolver = RateResolver::from_config(cfg);
        resolver.resolve(
            item,
            &ResolveContext {
                shipments: &shipments,
                evidence: &evidence,
            },
        )
    }

    #[test]
    fn stages_run_in_priority_order() {
        let resolver = RateResolver::from_config(&config());
        assert_eq!(
            resolver.stage_kinds(),
            vec![
                RateSourceKind::FixedFee,
                RateSourceKind::PortalFee,
                RateSourceKind::Contract,
                RateSourceKind::Lane,
                RateSourceKind::Evidence,
            ]
        );
    }

    #[test]
    fn fixed_fee_uses_shipment_mode() {
        let cfg = config();
        let mut shipments = InMemoryShipments::new();
        shipments.insert("BL-001", ShipmentInfo::new(TransportMode::Container));
        let no_document: Option<Arc<ParsedDocument>> = None;
        let resolver = RateResolver::from_config(&cfg);
        let r = resolver.resolve(
            &item("DO FEE", ChargeGroup::Contract),
            &ResolveContext {
                shipments: &shipments,
                evidence: &no_document,
            },
        );
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::FixedFee);
        assert_eq!(hit.rate, dec("250"));
    }

    #[test]
    fn fixed_fee_falls_back_to_description_heuristic() {
        let r = resolve(&config(), &item("DO FEE AWB 176-555", ChargeGroup::Contract), None);
        assert_eq!(r.rate.unwrap().rate, dec("150"));
        assert!(r.trail.contains("inferred from description"));
    }

    #[test]
    fn fixed_fee_without_mode_falls_through() {
        let r = resolve(&config(), &item("DO FEE", ChargeGroup::Contract), None);
        assert!(r.rate.is_none());
        assert!(r.trail.contains("no reference rate"));
    }

    #[test]
    fn portal_fee_table_by_normalized_name() {
        let r = resolve(&config(), &item("MIRSAL  portal-fee", ChargeGroup::PortalFee), None);
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::PortalFee);
        assert_eq!(hit.rate, dec("8.50"));
    }

    #[test]
    fn contract_table_by_normalized_description() {
        let r = resolve(
            &config(),
            &item("TERMINAL HANDLING FEE (20DC)", ChargeGroup::Contract),
            None,
        );
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::Contract);
        assert_eq!(hit.rate, dec("372"));
    }

    #[test]
    fn lane_table_with_aliases() {
        let r = resolve(
            &config(),
            &item("Trucking from Khalifa Port to Khalifa Economic Zone (40HC)", ChargeGroup::Contract),
            None,
        );
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::Lane);
        assert_eq!(hit.rate, dec("900"));
    }

    #[test]
    fn lane_taken_from_shipment_when_description_has_none() {
        let mut shipments = InMemoryShipments::new();
        let mut info = ShipmentInfo::new(TransportMode::Container);
        info.origin = Some("Khalifa Port".into());
        info.destination = Some("KEZAD".into());
        shipments.insert("BL-001", info);
        let no_document: Option<Arc<ParsedDocument>> = None;
        let resolver = RateResolver::from_config(&config());
        let ctx = ResolveContext {
            shipments: &shipments,
            evidence: &no_document,
        };

        let r = resolver.resolve(&item("INLAND TRUCKING 40HC", ChargeGroup::Contract), &ctx);
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::Lane);
        assert_eq!(hit.rate, dec("900"));
        assert!(r.trail.contains("taken from shipment BL-001"));

        // 非运输费不套用运单航线
        let r = resolver.resolve(&item("CUSTOMS INSPECTION 40HC", ChargeGroup::Contract), &ctx);
        assert!(r.rate.is_none());
    }

    #[test]
    fn unknown_lane_is_noted() {
        let r = resolve(
            &config(),
            &item("Trucking from Jebel Ali to KEZAD (40HC)", ChargeGroup::Contract),
            None,
        );
        assert!(r.rate.is_none());
        assert!(r.trail.contains("JEBEL ALI -> KEZAD per 40HC not in lane table"));
    }

    #[test]
    fn evidence_fallback_converts_currency() {
        let doc = ParsedDocument::new(vec![Block::text("ICP PORTAL FEE AED 27.00")]);
        let it = item("ICP PORTAL FEE", ChargeGroup::PortalFee).with_currency(Currency::Usd);
        let r = resolve(&config(), &it, Some(&doc));
        let hit = r.rate.unwrap();
        assert_eq!(hit.source, RateSourceKind::Evidence);
        assert_eq!(hit.rate, dec("7.35"));
        assert_eq!(hit.evidence.unwrap().converted_from, Some(Currency::Aed));
    }

    /// 记录证据文档被读取的次数
    struct CountingEvidence {
        document: Arc<ParsedDocument>,
        reads: std::cell::Cell<usize>,
    }

    impl EvidenceSource for CountingEvidence {
        fn document(&self, trail: &mut AuditTrail) -> Option<Arc<ParsedDocument>> {
            self.reads.set(self.reads.get() + 1);
            trail.push("evidence read");
            Some(Arc::clone(&self.document))
        }
    }

    #[test]
    fn evidence_is_read_only_when_tables_miss() {
        let evidence = CountingEvidence {
            document: Arc::new(ParsedDocument::new(vec![Block::text("MISC CHARGE 40.00")])),
            reads: std::cell::Cell::new(0),
        };
        let shipments = InMemoryShipments::new();
        let resolver = RateResolver::from_config(&config());
        let ctx = ResolveContext {
            shipments: &shipments,
            evidence: &evidence,
        };

        let r = resolver.resolve(&item("TERMINAL HANDLING FEE (20DC)", ChargeGroup::Contract), &ctx);
        assert_eq!(r.rate.unwrap().source, RateSourceKind::Contract);
        assert_eq!(evidence.reads.get(), 0);
        assert!(!r.trail.contains("evidence read"));

        let r = resolver.resolve(&item("MISC CHARGE", ChargeGroup::Other), &ctx);
        assert_eq!(r.rate.unwrap().source, RateSourceKind::Evidence);
        assert_eq!(evidence.reads.get(), 1);
    }

    #[test]
    fn no_document_no_evidence_stage() {
        let r = resolve(&config(), &item("ICP PORTAL FEE", ChargeGroup::PortalFee), None);
        assert!(r.rate.is_none());
    }
}
