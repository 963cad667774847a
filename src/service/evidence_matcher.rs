//! 证据匹配：在解析后的支撑文档中定位与费用描述对应的真实费用行
//!
//! 四级级联 Exact → Contains → Keyword(Jaccard) → Fuzzy(序列相似度)，
//! 第一个有合格候选的阶段胜出；阶段内取最高分，平分取先出现者。

use bigdecimal::{BigDecimal, Zero};

use super::fx;
use super::text::{
    detect_currency, is_numeric_cell, jaccard, normalize, parse_amount, sequence_ratio, tokenize,
};
use crate::models::{
    BlockKind, Currency, EvidenceCandidate, FxRate, MatchMethod, MatchResult, ParsedDocument,
};

/// 关键字阶段最低 Jaccard 相似度
pub const KEYWORD_MIN_SIMILARITY: f64 = 0.20;
/// 模糊阶段最低序列相似度
pub const FUZZY_MIN_RATIO: f64 = 0.40;

const CURRENCY_TOKENS: &[&str] = &["USD", "AED", "DHS", "DH", "US"];

/// 匹配器配置：结算币种与固定汇率
#[derive(Debug, Clone)]
pub struct EvidenceMatcher {
    settlement: Currency,
    fx: FxRate,
}

impl EvidenceMatcher {
    pub fn new(settlement: Currency, fx: FxRate) -> Self {
        Self { settlement, fx }
    }

    /// 在候选中匹配费用类别；币种与结算币种不同时按固定汇率换算
    pub fn find(&self, category: &str, candidates: &[EvidenceCandidate]) -> Option<MatchResult> {
        self.find_in(category, candidates, self.settlement)
    }

    /// 同 `find`，换算目标币种由调用方指定 (一般为明细币种)
    pub fn find_in(
        &self,
        category: &str,
        candidates: &[EvidenceCandidate],
        target: Currency,
    ) -> Option<MatchResult> {
        let (idx, method, score) = best_match(category, candidates)?;
        let c = &candidates[idx];
        let mut result = MatchResult {
            description: c.description.clone(),
            quantity: c.quantity.clone(),
            unit_rate: c.unit_rate.clone(),
            amount: c.amount.clone(),
            method,
            score,
            converted_from: None,
        };

        let currency = c.currency.or_else(|| detect_currency(&c.raw_text));
        if let Some(from) = currency {
            if from != target {
                let amount = result
                    .amount
                    .as_ref()
                    .and_then(|a| fx::convert_rounded(a, from, target, &self.fx));
                let unit_rate = result
                    .unit_rate
                    .as_ref()
                    .and_then(|r| fx::convert_rounded(r, from, target, &self.fx));
                if amount.is_some() || unit_rate.is_some() {
                    result.amount = amount.or(result.amount);
                    result.unit_rate = unit_rate.or(result.unit_rate);
                    result.converted_from = Some(from);
                }
            }
        }
        Some(result)
    }

    /// 从文档抽取候选后匹配
    pub fn find_in_document(
        &self,
        category: &str,
        document: &ParsedDocument,
        target: Currency,
    ) -> Option<MatchResult> {
        let candidates = extract_candidates(document);
        self.find_in(category, &candidates, target)
    }
}

/// 纯匹配级联，返回 (候选下标, 方式, 分数)
pub fn best_match(category: &str, candidates: &[EvidenceCandidate]) -> Option<(usize, MatchMethod, f64)> {
    let cat_upper = category.trim().to_uppercase();
    if cat_upper.is_empty() || candidates.is_empty() {
        return None;
    }
    let descs: Vec<String> = candidates
        .iter()
        .map(|c| c.description.trim().to_uppercase())
        .collect();

    // 1. 完全相等
    if let Some(i) = descs.iter().position(|d| *d == cat_upper) {
        return Some((i, MatchMethod::Exact, 1.0));
    }

    // 2. 包含：类别是候选描述的子串，分数 = 长度占比
    let contains = pick_best(descs.iter().map(|d| {
        if d.contains(&cat_upper) {
            Some(cat_upper.chars().count() as f64 / d.chars().count() as f64)
        } else {
            None
        }
    }));
    if let Some((i, score)) = contains {
        return Some((i, MatchMethod::Contains, score));
    }

    // 3. 关键字 Jaccard
    let cat_tokens = tokenize(&cat_upper);
    let keyword = pick_best(descs.iter().map(|d| {
        let s = jaccard(&cat_tokens, &tokenize(d));
        (s >= KEYWORD_MIN_SIMILARITY).then_some(s)
    }));
    if let Some((i, score)) = keyword {
        return Some((i, MatchMethod::Keyword, score));
    }

    // 4. 模糊
    let fuzzy = pick_best(descs.iter().map(|d| {
        let r = sequence_ratio(&cat_upper, d);
        (r >= FUZZY_MIN_RATIO).then_some(r)
    }));
    fuzzy.map(|(i, score)| (i, MatchMethod::Fuzzy, score))
}

/// 最高分胜出，严格大于才替换 (平分保留先出现者)
fn pick_best(scores: impl Iterator<Item = Option<f64>>) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.enumerate() {
        let Some(score) = score else { continue };
        let is_better = match best {
            None => true,
            Some((_, b)) => score > b,
        };
        if is_better {
            best = Some((i, score));
        }
    }
    best
}

/// 从解析文档抽取候选费用行 (按块顺序)
///
/// 表格行：第一个非数字单元格为描述，数字单元格从右往左依次为 金额/单价/数量。
/// 文本/汇总块：每行末尾带数字的视为一条候选。
pub fn extract_candidates(document: &ParsedDocument) -> Vec<EvidenceCandidate> {
    let mut out = Vec::new();
    for block in &document.blocks {
        match block.kind {
            BlockKind::Table => {
                for row in &block.rows {
                    if let Some(c) = candidate_from_row(row) {
                        out.push(c);
                    }
                }
            }
            BlockKind::Text | BlockKind::Summary => {
                let Some(text) = block.text.as_deref() else { continue };
                for line in text.lines() {
                    if let Some(c) = candidate_from_line(line) {
                        out.push(c);
                    }
                }
            }
        }
    }
    out
}

fn candidate_from_row(row: &[String]) -> Option<EvidenceCandidate> {
    let description = row
        .iter()
        .find(|cell| !cell.trim().is_empty() && !is_numeric_cell(cell))?
        .trim()
        .to_string();
    let numbers: Vec<BigDecimal> = row
        .iter()
        .filter(|cell| is_numeric_cell(cell))
        .filter_map(|cell| parse_amount(cell))
        .collect();
    let raw_text = row.join(" | ");
    let mut c = EvidenceCandidate::new(description).with_raw_text(raw_text.clone());
    assign_numbers(&mut c, numbers);
    c.currency = detect_currency(&raw_text);
    Some(c)
}

fn candidate_from_line(line: &str) -> Option<EvidenceCandidate> {
    let trimmed = line.trim();
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    // 行尾连续的数字/币种 token 为金额部分，其余为描述
    let mut split = tokens.len();
    while split > 0 && (is_numeric_cell(tokens[split - 1]) || is_currency_token(tokens[split - 1])) {
        split -= 1;
    }
    let numbers: Vec<BigDecimal> = tokens[split..]
        .iter()
        .filter(|t| is_numeric_cell(t))
        .filter_map(|t| parse_amount(t))
        .collect();
    if numbers.is_empty() {
        return None;
    }
    let description = strip_currency_tokens(&tokens[..split].join(" "));
    if normalize(&description).is_empty() {
        return None;
    }
    let mut c = EvidenceCandidate::new(description).with_raw_text(trimmed);
    assign_numbers(&mut c, numbers);
    c.currency = detect_currency(trimmed);
    Some(c)
}

fn is_currency_token(t: &str) -> bool {
    let u = t.trim_matches(|c: char| !c.is_alphanumeric()).to_uppercase();
    t == "$" || CURRENCY_TOKENS.contains(&u.as_str())
}

fn strip_currency_tokens(s: &str) -> String {
    let kept: Vec<&str> = s
        .split_whitespace()
        .filter(|t| {
            let u = t.trim_matches(|c: char| !c.is_alphanumeric());
            !u.is_empty() && !is_currency_token(u)
        })
        .collect();
    kept.join(" ")
        .trim_end_matches(|c: char| c == ':' || c == '-')
        .trim()
        .to_string()
}

/// 右起：金额、单价、数量；仅有一个数字时即为金额
fn assign_numbers(c: &mut EvidenceCandidate, mut numbers: Vec<BigDecimal>) {
    c.amount = numbers.pop();
    c.unit_rate = numbers.pop();
    c.quantity = numbers.pop();
    if c.unit_rate.is_none() {
        c.unit_rate = c.amount.clone();
    }
    if c.quantity.is_none() && c.unit_rate.is_some() {
        if let (Some(rate), Some(amount)) = (&c.unit_rate, &c.amount) {
            if !rate.is_zero() && rate != amount {
                c.quantity = Some((amount / rate).round(2));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Block;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn cands(descs: &[&str]) -> Vec<EvidenceCandidate> {
        descs.iter().map(|d| EvidenceCandidate::new(*d)).collect()
    }

    fn matcher() -> EvidenceMatcher {
        EvidenceMatcher::new(Currency::Usd, FxRate::default())
    }

    #[test]
    fn exact_wins_over_contains() {
        let c = cands(&["MASTER DO FEE (OTHER)", "DO FEE"]);
        let (idx, method, score) = best_match("do fee", &c).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(method, MatchMethod::Exact);
        assert_eq!(score, 1.0);

        let c = cands(&["DO FEE", "MASTER DO FEE (OTHER)"]);
        let m = matcher().find("DO FEE", &c).unwrap();
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.description, "DO FEE");
    }

    #[test]
    fn contains_prefers_most_specific_candidate() {
        let c = cands(&["MASTER DO FEE (OTHER)", "DO FEE ORIGINAL"]);
        let (idx, method, _) = best_match("DO FEE", &c).unwrap();
        assert_eq!(method, MatchMethod::Contains);
        assert_eq!(idx, 1);
    }

    #[test]
    fn keyword_stage_uses_jaccard() {
        let c = cands(&["CUSTOMS INSPECTION", "TRUCKING FROM KHALIFA PORT"]);
        let (idx, method, score) = best_match("INLAND TRUCKING KHALIFA", &c).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(method, MatchMethod::Keyword);
        assert!(score >= KEYWORD_MIN_SIMILARITY);
    }

    #[test]
    fn keyword_ties_keep_first_candidate() {
        let c = cands(&["KHALIFA TRUCKING X", "TRUCKING KHALIFA Y"]);
        let (idx, method, _) = best_match("INLAND TRUCKING KHALIFA", &c).unwrap();
        assert_eq!(method, MatchMethod::Keyword);
        assert_eq!(idx, 0);
    }

    #[test]
    fn fuzzy_stage_catches_typos() {
        let c = cands(&["DEMURAGE CHRGS"]);
        let (_, method, score) = best_match("DEMURRAGE CHARGES", &c).unwrap();
        assert_eq!(method, MatchMethod::Fuzzy);
        assert!(score >= FUZZY_MIN_RATIO);
    }

    #[test]
    fn no_match_below_thresholds() {
        let c = cands(&["XYZ"]);
        assert!(best_match("TERMINAL HANDLING", &c).is_none());
        assert!(best_match("TERMINAL HANDLING", &[]).is_none());
    }

    #[test]
    fn foreign_currency_is_converted() {
        let c = vec![EvidenceCandidate::new("ICP PORTAL FEE")
            .with_amount(dec("27"))
            .with_unit_rate(dec("27"))
            .with_raw_text("ICP PORTAL FEE AED 27.00")];
        let m = matcher().find("ICP PORTAL FEE", &c).unwrap();
        assert_eq!(m.converted_from, Some(Currency::Aed));
        assert_eq!(m.unit_rate, Some(dec("7.35")));
        assert_eq!(m.amount, Some(dec("7.35")));
    }

    #[test]
    fn table_rows_become_candidates() {
        let doc = ParsedDocument::new(vec![Block::table(vec![
            vec!["Description".into(), "Qty".into(), "Rate".into(), "Amount".into()],
            vec!["TERMINAL HANDLING".into(), "2".into(), "186.00".into(), "372.00".into()],
        ])]);
        let c = extract_candidates(&doc);
        assert_eq!(c.len(), 2);
        assert_eq!(c[1].description, "TERMINAL HANDLING");
        assert_eq!(c[1].quantity, Some(dec("2")));
        assert_eq!(c[1].unit_rate, Some(dec("186.00")));
        assert_eq!(c[1].amount, Some(dec("372.00")));
    }

    #[test]
    fn text_lines_become_candidates() {
        let doc = ParsedDocument::new(vec![Block::text(
            "Receipt no 77\nICP PORTAL FEE AED 27.00\n\nThank you",
        )]);
        let c = extract_candidates(&doc);
        let portal = c.iter().find(|c| c.description == "ICP PORTAL FEE").unwrap();
        assert_eq!(portal.amount, Some(dec("27.00")));
        assert_eq!(portal.currency, Some(Currency::Aed));
    }
}
