use std::collections::HashMap;

use crate::models::ShipmentInfo;

/// 运单元数据查询 (外部协作方)
pub trait ShipmentLookup: Send + Sync {
    fn lookup(&self, reference: &str) -> Option<ShipmentInfo>;
}

/// 内存运单表
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipments {
    by_ref: HashMap<String, ShipmentInfo>,
}

impl InMemoryShipments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(by_ref: HashMap<String, ShipmentInfo>) -> Self {
        let by_ref = by_ref
            .into_iter()
            .map(|(k, v)| (k.trim().to_uppercase(), v))
            .collect();
        Self { by_ref }
    }

    pub fn insert(&mut self, reference: impl Into<String>, info: ShipmentInfo) {
        self.by_ref.insert(reference.into().trim().to_uppercase(), info);
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}

impl ShipmentLookup for InMemoryShipments {
    fn lookup(&self, reference: &str) -> Option<ShipmentInfo> {
        self.by_ref.get(&reference.trim().to_uppercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransportMode;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut s = InMemoryShipments::new();
        s.insert("bl-001", ShipmentInfo::new(TransportMode::Container));
        assert_eq!(s.lookup("BL-001").map(|i| i.mode), Some(TransportMode::Container));
        assert!(s.lookup("BL-002").is_none());
    }
}
