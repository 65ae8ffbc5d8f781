use crate::utils::env_or;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Free-form options for one synthesis module or media backend
pub type ModuleOptions = Map<String, Value>;

/// Speech pipeline configuration
///
/// Env overrides:
/// - HERALD_TTS_MODULE, HERALD_TTS_FALLBACK
/// - HERALD_LANG, HERALD_CACHE_DIR, HERALD_API_NAMESPACE
/// - HERALD_COMPLETION_TIMEOUT_MS, HERALD_STOP_GRACE_MS
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Registry identifier of the primary synthesis engine
    pub module: String,
    /// Local engine retried when the primary is unreachable
    pub fallback_module: Option<String>,
    /// Source language of utterances handed to the pipeline
    pub lang: String,
    /// Root of the synthesis and translation caches
    pub cache_root: PathBuf,
    /// Prefix of the API request topic (`<namespace>.get_tts`)
    pub api_namespace: String,
    /// Speaker label used for voice requests built from profiles/defaults
    pub speaker_name: String,
    /// Upper bound on waiting for an utterance to finish playing
    pub completion_timeout_ms: u64,
    /// Time a terminated player gets before it is killed
    pub stop_grace_ms: u64,
    /// Per-module options, keyed by module identifier
    pub modules: HashMap<String, ModuleOptions>,
    /// Default speech preferences for the local user
    pub user: UserSpeechPrefs,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let cache_root = std::env::var("HERALD_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("herald"));
        let fallback_module = match std::env::var("HERALD_TTS_FALLBACK") {
            Ok(s) if s.is_empty() || s == "none" => None,
            Ok(s) => Some(s),
            Err(_) => Some("espeak-ng".to_string()),
        };

        Self {
            module: std::env::var("HERALD_TTS_MODULE").unwrap_or_else(|_| "espeak-ng".into()),
            fallback_module,
            lang: std::env::var("HERALD_LANG").unwrap_or_else(|_| "en-us".into()),
            cache_root,
            api_namespace: std::env::var("HERALD_API_NAMESPACE")
                .unwrap_or_else(|_| "neon".into()),
            speaker_name: "Herald".into(),
            completion_timeout_ms: env_or("HERALD_COMPLETION_TIMEOUT_MS", 120_000),
            stop_grace_ms: env_or("HERALD_STOP_GRACE_MS", 1_000),
            modules: HashMap::new(),
            user: UserSpeechPrefs::default(),
        }
    }
}

impl SpeechConfig {
    /// Options configured for `module`, empty when none
    pub fn module_options(&self, module: &str) -> ModuleOptions {
        self.modules.get(module).cloned().unwrap_or_default()
    }

    /// Fallback module, unless it is the primary itself
    pub fn effective_fallback(&self) -> Option<&str> {
        self.fallback_module
            .as_deref()
            .filter(|fb| !fb.is_empty() && *fb != self.module)
    }
}

/// Default voice selection of the local user
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSpeechPrefs {
    pub tts_language: String,
    pub tts_gender: String,
    #[serde(alias = "neon_voice")]
    pub voice: Option<String>,
    pub secondary_tts_language: Option<String>,
    pub secondary_tts_gender: Option<String>,
    #[serde(alias = "secondary_neon_voice")]
    pub secondary_voice: Option<String>,
}

impl Default for UserSpeechPrefs {
    fn default() -> Self {
        Self {
            tts_language: "en-us".into(),
            tts_gender: "female".into(),
            voice: None,
            secondary_tts_language: None,
            secondary_tts_gender: None,
            secondary_voice: None,
        }
    }
}

/// Media router configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Name of the backend tried first for every scheme it supports
    #[serde(rename = "default-backend", alias = "default_backend")]
    pub default_backend: Option<String>,
    /// Configured backends keyed by instance name
    pub backends: BTreeMap<String, BackendConfig>,
    /// How long to wait for a response after recording ends before un-ducking
    pub restore_timeout_ms: u64,
    /// Stop requests arriving this soon after a play start are ignored
    pub stop_debounce_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("local".to_string(), BackendConfig::default());
        Self {
            default_backend: Some("local".into()),
            backends,
            restore_timeout_ms: env_or("HERALD_MEDIA_RESTORE_TIMEOUT_MS", 8_000),
            stop_debounce_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Registry identifier of the backend implementation
    #[serde(rename = "type")]
    pub kind: String,
    pub active: bool,
    /// Lower the volume while the assistant speaks or listens. Unset leaves
    /// the choice to the backend.
    pub duck: Option<bool>,
    pub low_volume: u8,
    /// Overrides the schemes the implementation declares
    pub schemes: Option<Vec<String>>,
    pub options: ModuleOptions,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "simple".into(),
            active: true,
            duck: None,
            low_volume: 30,
            schemes: None,
            options: Map::new(),
        }
    }
}
