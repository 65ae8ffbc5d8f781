use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use herald_audio::config::ModuleOptions;
use herald_audio::{BackendConfig, MediaConfig, SpeechConfig, UserSpeechPrefs};

/// Configuration of the whole audio service
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub speech: SpeechConfig,
    pub media: MediaConfig,
    /// Run the media router alongside speech
    pub media_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            speech: SpeechConfig::default(),
            media: MediaConfig::default(),
            media_enabled: std::env::var("HERALD_MEDIA")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }
}

impl ServiceConfig {
    /// Path of the TOML overlay (HERALD_CONFIG or ./herald.toml)
    pub fn path() -> PathBuf {
        std::env::var("HERALD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("herald.toml"))
    }

    /// Load configuration from the TOML overlay on top of env-driven defaults.
    /// A missing or broken file leaves the defaults in place.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(p: &Path) -> Self {
        let default = Self::default();
        if !p.exists() {
            tracing::info!(target: "speech_service", path = %p.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<ServiceToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "speech_service", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "speech_service", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ServiceToml {
    pub speech: Option<SpeechToml>,
    pub media: Option<MediaToml>,
}

impl ServiceToml {
    fn overlay(self, mut base: ServiceConfig) -> ServiceConfig {
        if let Some(s) = self.speech {
            s.apply(&mut base.speech);
        }
        if let Some(m) = self.media {
            if let Some(enabled) = m.enabled {
                base.media_enabled = enabled;
            }
            m.apply(&mut base.media);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeechToml {
    pub module: Option<String>,
    /// Empty string or "none" disables the fallback
    pub fallback_module: Option<String>,
    pub lang: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub api_namespace: Option<String>,
    pub speaker_name: Option<String>,
    pub completion_timeout_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub user: Option<UserSpeechPrefs>,
    pub modules: Option<HashMap<String, ModuleOptions>>,
}
impl SpeechToml {
    fn apply(self, s: &mut SpeechConfig) {
        if let Some(x) = self.module {
            s.module = x;
        }
        if let Some(x) = self.fallback_module {
            s.fallback_module = if x.is_empty() || x == "none" { None } else { Some(x) };
        }
        if let Some(x) = self.lang {
            s.lang = x;
        }
        if let Some(x) = self.cache_dir {
            s.cache_root = x;
        }
        if let Some(x) = self.api_namespace {
            s.api_namespace = x;
        }
        if let Some(x) = self.speaker_name {
            s.speaker_name = x;
        }
        if let Some(x) = self.completion_timeout_ms {
            s.completion_timeout_ms = x;
        }
        if let Some(x) = self.stop_grace_ms {
            s.stop_grace_ms = x;
        }
        if let Some(x) = self.user {
            s.user = x;
        }
        if let Some(x) = self.modules {
            s.modules.extend(x);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct MediaToml {
    pub enabled: Option<bool>,
    #[serde(rename = "default-backend", alias = "default_backend")]
    pub default_backend: Option<String>,
    pub backends: Option<BTreeMap<String, BackendConfig>>,
    pub restore_timeout_ms: Option<u64>,
    pub stop_debounce_ms: Option<u64>,
}
impl MediaToml {
    fn apply(self, m: &mut MediaConfig) {
        if let Some(x) = self.default_backend {
            m.default_backend = Some(x);
        }
        if let Some(x) = self.backends {
            // Configured backends replace the built-in local one
            m.backends = x;
        }
        if let Some(x) = self.restore_timeout_ms {
            m.restore_timeout_ms = x;
        }
        if let Some(x) = self.stop_debounce_ms {
            m.stop_debounce_ms = x;
        }
    }
}
