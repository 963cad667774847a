use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{DocumentRef, LineItem};

/// 单条明细的校验请求：明细 + 证据文档 + 外部闸门检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub item: LineItem,
    /// 支撑文档；第一份作为证据匹配来源
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    /// 外部检查 (如 document_set_complete / certificate_present / signature_present)
    #[serde(default)]
    pub external_checks: IndexMap<String, bool>,
}

impl ValidationRequest {
    pub fn new(item: LineItem) -> Self {
        Self {
            item,
            documents: Vec::new(),
            external_checks: IndexMap::new(),
        }
    }

    pub fn with_document(mut self, doc: DocumentRef) -> Self {
        self.documents.push(doc);
        self
    }

    pub fn with_check(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.external_checks.insert(name.into(), passed);
        self
    }

    pub fn evidence_count(&self) -> usize {
        self.documents.len()
    }
}
