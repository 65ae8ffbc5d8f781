//! Persistent translation cache (`tx_cache.json`, keyed by target language
//! then source sentence).

use crate::error::AudioResult;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct TranslationCache {
    path: PathBuf,
    entries: DashMap<String, HashMap<String, String>>,
    // Serializes snapshot writes so an older snapshot never replaces a newer one
    write_lock: Mutex<()>,
}

impl TranslationCache {
    /// Load `<cache_root>/tx_cache.json`. A missing file starts empty; a corrupt
    /// one is logged and ignored.
    pub fn open(cache_root: impl AsRef<Path>) -> Self {
        let path = cache_root.as_ref().join("tx_cache.json");
        let entries = DashMap::new();

        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => {
                    for (lang, sentences) in map {
                        let Some(obj) = sentences.as_object() else {
                            warn!(target: "cache", lang = %lang, "Skipping malformed translation block");
                            continue;
                        };
                        let block: HashMap<String, String> = obj
                            .iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect();
                        entries.insert(lang, block);
                    }
                }
                Err(e) => {
                    warn!(target: "cache", path = %path.display(), error = %e, "Translation cache is corrupt; starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(target: "cache", path = %path.display(), error = %e, "Cannot read translation cache");
            }
        }

        Self {
            path,
            entries,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, lang: &str, sentence: &str) -> Option<String> {
        self.entries
            .get(&lang.to_lowercase())
            .and_then(|block| block.get(sentence).cloned())
    }

    /// Record a translation and persist the whole cache.
    pub fn store(&self, lang: &str, sentence: &str, translated: &str) -> AudioResult<()> {
        self.entries
            .entry(lang.to_lowercase())
            .or_default()
            .insert(sentence.to_string(), translated.to_string());
        debug!(target: "cache", lang = %lang, "Stored translation");
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|b| b.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self) -> AudioResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut root = Map::new();
        for block in self.entries.iter() {
            let sentences: Map<String, Value> = block
                .value()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            root.insert(block.key().clone(), Value::Object(sentences));
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(root))?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::open(dir.path());
        assert!(cache.lookup("es-es", "hello").is_none());
        cache.store("es-ES", "hello", "hola").unwrap();

        let reopened = TranslationCache::open(dir.path());
        assert_eq!(reopened.lookup("es-es", "hello").as_deref(), Some("hola"));
        assert_eq!(reopened.len(), 1);

        let raw: Value = serde_json::from_slice(&fs::read(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["es-es"]["hello"], "hola");
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tx_cache.json"), b"{not json").unwrap();
        let cache = TranslationCache::open(dir.path());
        assert!(cache.is_empty());
        cache.store("de-de", "yes", "ja").unwrap();
        assert_eq!(TranslationCache::open(dir.path()).len(), 1);
    }
}
