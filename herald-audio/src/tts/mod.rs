//! Speech synthesis: engine backends, markup handling, caching engine,
//! the per-engine speech pipeline and the fallback controller.

pub mod cli;
pub mod engine;
pub mod fallback;
pub mod pipeline;
pub mod registry;
#[cfg(feature = "remote")]
pub mod remote;
pub mod ssml;
pub mod traits;

pub use engine::{LanguageResponse, SynthesisEngine, SynthesisOutput};
pub use fallback::FallbackController;
pub use pipeline::SpeechPipeline;
pub use registry::TtsRegistry;
pub use traits::{NoopTranslator, Translator, TtsBackend, Viseme};
