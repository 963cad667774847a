//! 费用描述的文本解析工具：标准化、分词、相似度、航线/单位/币种抽取

use bigdecimal::BigDecimal;
use indexmap::IndexSet;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::models::{Currency, TransportMode};

static LANE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFROM\s+(.+?)\s+TO\s+(.+?)\s*(?:\(|\[|,|;|\s-\s|$)")
        .expect("lane pattern")
});

static UNIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(20\s?(?:DC|GP|FT)|40\s?(?:DC|GP|FT)|40\s?HC|45\s?HC|TRUCK|TRIP|CBM|KG|TON)\b")
        .expect("unit pattern")
});

static USD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\bUSD\b|\bUS\$|\$)").expect("usd pattern"));

static AED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\bAED\b|\bDHS?\b|\bDIRHAMS?\b)").expect("aed pattern"));

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("number pattern"));

const STOP_WORDS: &[&str] = &[
    "A", "AN", "AND", "AT", "BY", "FOR", "FROM", "IN", "OF", "ON", "OR", "PER", "THE", "TO",
    "VIA", "WITH",
];

const TRANSPORT_HINTS: &[&str] = &[
    "TRANSPORT",
    "TRANSPORTATION",
    "TRUCKING",
    "HAULAGE",
    "INLAND",
];
const AIR_HINTS: &[&str] = &["AIR", "AWB", "FLIGHT", "AIRPORT", "AIRFREIGHT"];
const CONTAINER_HINTS: &[&str] = &[
    "CONTAINER", "FCL", "LCL", "TEU", "20DC", "20GP", "40DC", "40GP", "40HC", "45HC", "20FT",
    "40FT", "OCEAN", "VESSEL",
];

/// 标准化：大写，非字母数字替换为空格，压缩空白
pub fn normalize(s: &str) -> String {
    s.to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 按非单词字符分词，去掉停用词和纯数字 token (保序去重)
pub fn tokenize(s: &str) -> IndexSet<String> {
    s.to_uppercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard 相似度 |A∩B| / |A∪B|
pub fn jaccard(a: &IndexSet<String>, b: &IndexSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f64 / union as f64
}

/// 序列相似度 (Ratcliff/Obershelp)：2*M / (|a|+|b|)
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_common_block(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + size..], &b[j + size..])
}

/// 最长公共子串，平局取 a 中最靠前、其次 b 中最靠前的位置
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                cur[j + 1] = prev[j] + 1;
                let k = cur[j + 1];
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        prev = cur;
    }
    best
}

/// 航线抽取 "FROM X TO Y"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneText {
    pub origin: String,
    pub destination: String,
}

pub fn extract_lane(description: &str) -> Option<LaneText> {
    let caps = LANE_PATTERN.captures(description)?;
    let origin = normalize(strip_unit(caps.get(1)?.as_str()).as_str());
    let destination = normalize(strip_unit(caps.get(2)?.as_str()).as_str());
    if origin.is_empty() || destination.is_empty() {
        return None;
    }
    Some(LaneText {
        origin,
        destination,
    })
}

fn strip_unit(s: &str) -> String {
    UNIT_PATTERN.replace_all(s, "").trim().to_string()
}

/// 计费单位抽取并标准化 (20DC/20GP → 20FT，40DC/40GP → 40FT)
pub fn extract_unit(description: &str) -> Option<String> {
    let caps = UNIT_PATTERN.captures(description)?;
    Some(normalize_unit(caps.get(1)?.as_str()))
}

pub fn normalize_unit(unit: &str) -> String {
    let u: String = unit
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    match u.as_str() {
        "20DC" | "20GP" | "20FT" => "20FT".to_string(),
        "40DC" | "40GP" | "40FT" => "40FT".to_string(),
        "TRIP" => "TRUCK".to_string(),
        _ => u,
    }
}

/// 文本中出现的币种；同时出现时以先出现者为准
pub fn detect_currency(text: &str) -> Option<Currency> {
    let usd = USD_PATTERN.find(text).map(|m| m.start());
    let aed = AED_PATTERN.find(text).map(|m| m.start());
    match (usd, aed) {
        (Some(u), Some(a)) if a < u => Some(Currency::Aed),
        (Some(_), _) => Some(Currency::Usd),
        (None, Some(_)) => Some(Currency::Aed),
        (None, None) => None,
    }
}

/// 解析金额文本 ("1,250.50" → 1250.50)
pub fn parse_amount(s: &str) -> Option<BigDecimal> {
    let m = NUMBER_PATTERN.find(s.trim())?;
    let cleaned: String = m.as_str().chars().filter(|c| *c != ',').collect();
    BigDecimal::from_str(&cleaned).ok()
}

/// 单元格是否为数字 (允许币种符号/代码)
pub fn is_numeric_cell(s: &str) -> bool {
    let stripped = USD_PATTERN.replace_all(s, "");
    let stripped = AED_PATTERN.replace_all(&stripped, "");
    let t = stripped.trim();
    !t.is_empty() && NUMBER_PATTERN.find(t).map_or(false, |m| m.as_str().len() == t.len())
}

/// 是否为陆运/运输类费用
pub fn is_transport_charge(description: &str) -> bool {
    normalize(description)
        .split(' ')
        .any(|t| TRANSPORT_HINTS.contains(&t))
}

/// 按描述关键字推断运输方式
pub fn infer_mode(description: &str) -> Option<TransportMode> {
    let tokens: Vec<String> = normalize(description)
        .split(' ')
        .map(str::to_string)
        .collect();
    if tokens.iter().any(|t| AIR_HINTS.contains(&t.as_str())) {
        return Some(TransportMode::Air);
    }
    if tokens.iter().any(|t| CONTAINER_HINTS.contains(&t.as_str())) {
        return Some(TransportMode::Container);
    }
    None
}
