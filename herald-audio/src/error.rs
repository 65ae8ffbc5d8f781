use herald_core::HeraldError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    /// Bad request input (empty text, wrong payload type)
    #[error("{0}")]
    Validation(String),

    /// Connectivity or timeout talking to a synthesis engine; eligible for fallback
    #[error("Synthesis engine unreachable: {0}")]
    TransientSynthesis(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Cache entry corrupt: {0}")]
    CacheCorruption(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("No media backend supports uri scheme: {0}")]
    NoBackend(String),

    #[error("Unknown TTS engine: {0}")]
    UnknownEngine(String),

    #[error("Unknown media backend type: {0}")]
    UnknownBackend(String),

    #[error("Bus error: {0}")]
    Bus(#[from] HeraldError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AudioError {
    /// Whether the failure is a connectivity/timeout class error
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::TransientSynthesis(_))
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
