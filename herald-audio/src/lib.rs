//! Herald audio services.
//!
//! - `speech`: turns `speak` requests into ordered, cached, spoken audio
//! - `media`: routes long-form media to interchangeable playback backends
//!
//! Both are driven by the `herald_core` event bus and share the audio output
//! abstraction in `playback`.

pub mod cache;
pub mod config;
pub mod error;
pub mod media;
pub mod playback;
pub mod resolver;
pub mod speech;
pub mod topics;
pub mod tts;
pub(crate) mod utils;

pub use config::{BackendConfig, MediaConfig, SpeechConfig, UserSpeechPrefs};
pub use error::{AudioError, AudioResult};
pub use media::{MediaBackend, MediaRegistry, MediaRouter, Track, TrackEvent};
pub use playback::{AudioOutput, CommandOutput, PlaybackHandle};
pub use resolver::{resolve, RoutingContext, UtteranceRequest, VoiceRequest};
pub use speech::SpeechService;
pub use tts::{NoopTranslator, Translator, TtsBackend, TtsRegistry};
