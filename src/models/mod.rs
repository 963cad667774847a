pub mod document;
pub mod line_item;
pub mod record;
pub mod request;
pub mod rules;
pub mod shipment;

pub use document::{
    Block, BlockKind, DocumentRef, EvidenceCandidate, MatchMethod, MatchResult, ParsedDocument,
};
pub use line_item::{ChargeGroup, Currency, LineItem};
pub use record::{
    AuditTrail, Band, BatchStats, FinalStatus, GateStatus, RateSourceKind, RecordDraft,
    ValidationRecord, NOTE_EVIDENCE_SUSPENDED,
};
pub use request::ValidationRequest;
pub use rules::{
    AnomalyWeights, BandThresholds, ContractRule, FixedFeeRule, FxRate, LaneRule, PortalFeeRule,
    RiskWeights,
};
pub use shipment::{ShipmentInfo, TransportMode};
