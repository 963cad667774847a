use std::path::{Component, Path, PathBuf};

use crate::error::{AuditError, AuditResult};
use crate::models::ParsedDocument;

/// 文档解析协作方：给定路径与类型提示返回解析结果
///
/// 引擎选择与 OCR 细节对本模块不可见；超时由实现方负责，超时按失败处理。
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &str, doc_type: &str) -> AuditResult<ParsedDocument>;

    /// 单次调用消耗的预算单位
    fn cost_units(&self) -> u64 {
        1
    }
}

/// 读取解析引擎落盘的 JSON 结果
#[derive(Debug, Clone, Default)]
pub struct JsonDocumentParser {
    root: Option<PathBuf>,
}

impl JsonDocumentParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 相对路径基于 `root` 解析
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// 设置了 `root` 时只接受其下的相对路径
    fn resolve(&self, path: &str) -> AuditResult<PathBuf> {
        let p = Path::new(path);
        let Some(root) = &self.root else {
            return Ok(p.to_path_buf());
        };
        let escapes = p
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(AuditError::DocumentRejected(format!(
                "{} is outside the document root",
                path
            )));
        }
        Ok(root.join(p))
    }
}

impl DocumentParser for JsonDocumentParser {
    fn parse(&self, path: &str, doc_type: &str) -> AuditResult<ParsedDocument> {
        let full = self.resolve(path)?;
        let raw = std::fs::read_to_string(&full).map_err(|e| {
            AuditError::ParsingFailure(format!("cannot read {}: {}", full.display(), e))
        })?;
        let mut doc: ParsedDocument = serde_json::from_str(&raw).map_err(|e| {
            AuditError::ParsingFailure(format!("invalid parsed document {}: {}", full.display(), e))
        })?;
        doc.path = path.to_string();
        if doc.doc_type.is_empty() {
            doc.doc_type = doc_type.to_string();
        }
        Ok(doc)
    }
}
