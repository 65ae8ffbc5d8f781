// Herald Core Library
// Message bus and shared runtime plumbing for the audio services

pub mod event;
pub mod event_ext;
pub mod telemetry;
pub mod utils;

// Export core types
pub use event::{Event, EventBus, EventBusStats, QoSLevel};
pub use event_ext::EventExt;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeraldError {
    #[error("Event bus error: {0}")]
    EventBusError(String),

    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, HeraldError>;
