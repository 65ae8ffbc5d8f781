//! Synthesized audio cache.
//!
//! Layout: `<root>/tts/<engine>/<language>/<gender>/<md5>.<ext>` with an
//! optional `<md5>.pho` phoneme sidecar. Entries are validated on every read;
//! an entry whose audio is missing or empty, or whose sidecar disagrees with
//! what was stored, is deleted and reported as a miss.

use crate::error::{AudioError, AudioResult};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SynthesisKey {
    pub engine: String,
    pub language: String,
    pub gender: String,
    /// md5 hex digest of the final (validated, translated) sentence
    pub digest: String,
    /// Audio file extension of the engine
    pub ext: String,
}

impl SynthesisKey {
    pub fn new(engine: &str, language: &str, gender: &str, sentence: &str, ext: &str) -> Self {
        Self {
            engine: engine.to_string(),
            language: language.to_lowercase(),
            gender: gender.to_lowercase(),
            digest: format!("{:x}", md5::compute(sentence.as_bytes())),
            ext: ext.trim_start_matches('.').to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CachedAudio {
    pub path: PathBuf,
    pub phonemes: Option<String>,
}

pub struct SynthesisCache {
    root: PathBuf,
    // Entries stored or validated during this process' lifetime
    index: DashMap<SynthesisKey, CachedAudio>,
}

impl SynthesisCache {
    /// `cache_root` is the shared cache directory; audio lives under `tts/`.
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            root: cache_root.as_ref().join("tts"),
            index: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &SynthesisKey) -> PathBuf {
        self.root
            .join(&key.engine)
            .join(&key.language)
            .join(&key.gender)
    }

    pub fn audio_path(&self, key: &SynthesisKey) -> PathBuf {
        self.entry_dir(key)
            .join(format!("{}.{}", key.digest, key.ext))
    }

    pub fn phoneme_path(&self, key: &SynthesisKey) -> PathBuf {
        self.entry_dir(key).join(format!("{}.pho", key.digest))
    }

    /// Scratch path for a backend to write into before `store` moves it in place
    pub fn staging_path(&self, key: &SynthesisKey) -> AudioResult<PathBuf> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!(
            "{}.{}.part-{}",
            key.digest,
            key.ext,
            herald_core::utils::gen_id()
        )))
    }

    /// Validated read. A miss (including an evicted corrupt entry) is `None`.
    pub fn lookup(&self, key: &SynthesisKey) -> Option<CachedAudio> {
        match self.validate(key) {
            Ok(Some(entry)) => {
                self.index.insert(key.clone(), entry.clone());
                debug!(target: "cache", path = %entry.path.display(), "Synthesis cache hit");
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(target: "cache", error = %e, "Evicting synthesis cache entry");
                self.evict(key);
                None
            }
        }
    }

    fn validate(&self, key: &SynthesisKey) -> AudioResult<Option<CachedAudio>> {
        let audio = self.audio_path(key);
        let pho = self.phoneme_path(key);
        let recorded = self.index.get(key).map(|e| e.phonemes.is_some());

        let audio_len = match fs::metadata(&audio) {
            Ok(m) => m.len(),
            Err(_) => {
                if recorded.is_some() || pho.exists() {
                    return Err(AudioError::CacheCorruption(format!(
                        "{} is missing",
                        audio.display()
                    )));
                }
                return Ok(None);
            }
        };
        if audio_len == 0 {
            return Err(AudioError::CacheCorruption(format!(
                "{} is empty",
                audio.display()
            )));
        }

        let phonemes = match fs::read(&pho) {
            Ok(bytes) => Some(String::from_utf8(bytes).map_err(|_| {
                AudioError::CacheCorruption(format!("{} is not valid text", pho.display()))
            })?),
            Err(_) if recorded == Some(true) => {
                return Err(AudioError::CacheCorruption(format!(
                    "{} is missing",
                    pho.display()
                )))
            }
            Err(_) => None,
        };

        Ok(Some(CachedAudio {
            path: audio,
            phonemes,
        }))
    }

    /// Move staged audio into place and persist phonemes alongside it.
    ///
    /// Empty audio is rejected and the staged file removed.
    pub fn store(
        &self,
        key: &SynthesisKey,
        staged: &Path,
        phonemes: Option<&str>,
    ) -> AudioResult<CachedAudio> {
        let len = fs::metadata(staged).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            let _ = fs::remove_file(staged);
            return Err(AudioError::Synthesis(format!(
                "engine {} produced no audio",
                key.engine
            )));
        }

        let audio = self.audio_path(key);
        let pho = self.phoneme_path(key);
        if let Some(dir) = audio.parent() {
            fs::create_dir_all(dir)?;
        }
        match phonemes {
            Some(p) => fs::write(&pho, p)?,
            None => {
                let _ = fs::remove_file(&pho);
            }
        }
        fs::rename(staged, &audio)?;

        let entry = CachedAudio {
            path: audio,
            phonemes: phonemes.map(str::to_string),
        };
        self.index.insert(key.clone(), entry.clone());
        debug!(target: "cache", path = %entry.path.display(), "Stored synthesized audio");
        Ok(entry)
    }

    /// Delete an entry's files. Missing files are not an error.
    pub fn evict(&self, key: &SynthesisKey) {
        self.index.remove(key);
        let _ = fs::remove_file(self.audio_path(key));
        let _ = fs::remove_file(self.phoneme_path(key));
    }

    /// Remove everything cached for `engine`, or the whole cache when `None`
    pub fn clear(&self, engine: Option<&str>) -> AudioResult<()> {
        let dir = match engine {
            Some(e) => {
                self.index.retain(|k, _| k.engine != e);
                self.root.join(e)
            }
            None => {
                self.index.clear();
                self.root.clone()
            }
        };
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
