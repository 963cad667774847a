pub mod anomaly;
pub mod delta_band;
pub mod evidence_matcher;
pub mod fx;
pub mod gate_scorer;
pub mod orchestrator;
pub mod rate_resolver;
pub mod risk_escalator;
pub mod text;

pub use delta_band::BandTable;
pub use evidence_matcher::EvidenceMatcher;
pub use gate_scorer::{GateInput, GateOutcome};
pub use orchestrator::{AuditEngine, BatchOutcome};
pub use rate_resolver::{EvidenceSource, RateResolver, RateStage, ResolveContext, ResolvedRate};
pub use risk_escalator::{RiskAssessment, RiskEscalator, RiskInput};
