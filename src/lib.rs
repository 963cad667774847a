pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod source;

pub use config::AppConfig;
pub use error::{AuditError, AuditResult};
pub use service::{AuditEngine, BatchOutcome};
