//! On-disk caches shared by every synthesis engine.

pub mod synthesis;
pub mod translation;

pub use synthesis::{CachedAudio, SynthesisCache, SynthesisKey};
pub use translation::TranslationCache;
