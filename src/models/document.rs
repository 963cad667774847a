use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::Currency;

/// 解析块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Table,
    Summary,
}

/// 解析引擎输出的单个块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub page_index: u32,
}

impl Block {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text,
            text: Some(text.into()),
            rows: Vec::new(),
            confidence: 1.0,
            engine: String::new(),
            page_index: 0,
        }
    }

    pub fn table(rows: Vec<Vec<String>>) -> Self {
        Self {
            kind: BlockKind::Table,
            text: None,
            rows,
            confidence: 1.0,
            engine: String::new(),
            page_index: 0,
        }
    }
}

/// 证据文档解析结果 (外部解析引擎产出，块顺序即文档顺序)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub doc_type: String,
    pub blocks: Vec<Block>,
}

impl ParsedDocument {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            path: String::new(),
            doc_type: String::new(),
            blocks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| {
            b.rows.is_empty() && b.text.as_deref().map_or(true, |t| t.trim().is_empty())
        })
    }
}

/// 证据文档引用 (路径 + 类型提示)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub path: String,
    #[serde(default)]
    pub doc_type: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            doc_type: doc_type.into(),
        }
    }
}

/// 从文档中抽取的候选费用行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub description: String,
    pub quantity: Option<BigDecimal>,
    pub unit_rate: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub currency: Option<Currency>,
    pub raw_text: String,
}

impl EvidenceCandidate {
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            raw_text: description.clone(),
            description,
            quantity: None,
            unit_rate: None,
            amount: None,
            currency: None,
        }
    }

    pub fn with_amount(mut self, amount: BigDecimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_unit_rate(mut self, unit_rate: BigDecimal) -> Self {
        self.unit_rate = Some(unit_rate);
        self
    }

    pub fn with_quantity(mut self, quantity: BigDecimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = raw_text.into();
        self
    }
}

/// 证据匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    Exact,
    Contains,
    Keyword,
    Fuzzy,
}

/// 证据匹配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub description: String,
    pub quantity: Option<BigDecimal>,
    pub unit_rate: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub method: MatchMethod,
    pub score: f64,
    /// 若发生币种换算，记录原始币种
    pub converted_from: Option<Currency>,
}
