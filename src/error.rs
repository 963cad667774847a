use thiserror::Error;

/// 审核错误分类
///
/// 单个明细的错误只会写入该明细的校验记录，不会越过编排器影响整个批次。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// 缺少必需的费率表/阈值，按"无参考费率"处理
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// 证据文档解析失败，计入熔断器
    #[error("parsing failure: {0}")]
    ParsingFailure(String),

    /// 单价 × 数量 与 总额 不一致
    #[error("arithmetic inconsistency: expected {expected}, got {actual}")]
    ArithmeticInconsistency { expected: String, actual: String },

    /// 证据中找不到对应费用
    #[error("no evidence match for '{0}'")]
    MatchNotFound(String),

    /// 文档路径越出允许的目录，不调用解析引擎
    #[error("document rejected: {0}")]
    DocumentRejected(String),

    /// 配置本身不合法 (阈值非递增、权重越界等)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 单个明细校验中出现的意外错误
    #[error("unexpected failure: {0}")]
    Catastrophic(String),
}

impl AuditError {
    /// 是否应计入熔断器失败次数
    pub fn trips_breaker(&self) -> bool {
        matches!(self, AuditError::ParsingFailure(_))
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
