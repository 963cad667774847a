pub mod breaker;
pub mod budget;
pub mod clock;
pub mod documents;
pub mod gateway;
pub mod shipments;

pub use breaker::{Admission, BreakerPolicy, BreakerState, CircuitBreaker};
pub use budget::DailyBudget;
pub use clock::{Clock, ManualClock, SystemClock};
pub use documents::{DocumentParser, JsonDocumentParser};
pub use gateway::{EvidenceFetch, EvidenceGateway};
pub use shipments::{InMemoryShipments, ShipmentLookup};
