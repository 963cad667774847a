use serde::{Deserialize, Serialize};

/// 运输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportMode {
    Air,
    Container,
}

/// 运单元数据 (外部查询结果)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    pub mode: TransportMode,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

impl ShipmentInfo {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            origin: None,
            destination: None,
        }
    }
}
