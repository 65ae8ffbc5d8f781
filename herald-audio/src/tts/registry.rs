//! Maps configured engine identifiers to backend constructors.

use super::cli::{EspeakBackend, PiperBackend};
use super::traits::TtsBackend;
use crate::config::ModuleOptions;
use crate::error::{AudioError, AudioResult};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub type TtsFactory =
    Arc<dyn Fn(&ModuleOptions) -> AudioResult<Arc<dyn TtsBackend>> + Send + Sync>;

pub struct TtsRegistry {
    factories: DashMap<String, TtsFactory>,
}

impl TtsRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Registry with the built-in engines
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("piper", |opts| Ok(Arc::new(PiperBackend::new(opts)) as Arc<dyn TtsBackend>));
        registry.register("espeak-ng", |opts| {
            Ok(Arc::new(EspeakBackend::new(opts)) as Arc<dyn TtsBackend>)
        });
        #[cfg(feature = "remote")]
        registry.register("remote", |opts| {
            Ok(Arc::new(super::remote::RemoteBackend::new(opts)?) as Arc<dyn TtsBackend>)
        });
        registry
    }

    /// Add or replace a constructor
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&ModuleOptions) -> AudioResult<Arc<dyn TtsBackend>> + Send + Sync + 'static,
    {
        debug!(target: "tts", engine = %name, "Registered TTS engine");
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn create(&self, name: &str, options: &ModuleOptions) -> AudioResult<Arc<dyn TtsBackend>> {
        // Clone the factory out so no map guard is held while constructing
        let factory = self
            .factories
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| AudioError::UnknownEngine(name.to_string()))?;
        factory(options)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for TtsRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_engine_fails_fast() {
        let registry = TtsRegistry::with_defaults();
        assert!(matches!(
            registry.create("nope", &ModuleOptions::new()),
            Err(AudioError::UnknownEngine(name)) if name == "nope"
        ));
    }

    #[test]
    fn defaults_are_registered() {
        let names = TtsRegistry::with_defaults().names();
        assert!(names.contains(&"piper".to_string()));
        assert!(names.contains(&"espeak-ng".to_string()));
    }
}
