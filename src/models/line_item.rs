use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 计费依据分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChargeGroup {
    Contract,
    AtCost,
    PortalFee,
    Other,
}

impl Default for ChargeGroup {
    fn default() -> Self {
        ChargeGroup::Other
    }
}

/// 币种 (结算币种与证据币种)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Aed,
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Usd
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Usd => write!(f, "USD"),
            Currency::Aed => write!(f, "AED"),
        }
    }
}

/// 发票明细行 (上游产生，本模块只读)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub source_ref: String,          // 来源引用 (提单/运单号)
    pub description: String,         // 费用描述
    #[serde(default)]
    pub rate_source: Option<String>, // 费率来源标签
    pub unit_rate: BigDecimal,       // 单价
    pub quantity: BigDecimal,        // 数量
    pub total_amount: BigDecimal,    // 总额
    #[serde(default)]
    pub charge_group: ChargeGroup,
    #[serde(default)]
    pub currency: Currency,
}

impl LineItem {
    pub fn new(
        source_ref: impl Into<String>,
        description: impl Into<String>,
        unit_rate: BigDecimal,
        quantity: BigDecimal,
        total_amount: BigDecimal,
        charge_group: ChargeGroup,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            description: description.into(),
            rate_source: None,
            unit_rate,
            quantity,
            total_amount,
            charge_group,
            currency: Currency::default(),
        }
    }

    pub fn with_rate_source(mut self, rate_source: impl Into<String>) -> Self {
        self.rate_source = Some(rate_source.into());
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
}
