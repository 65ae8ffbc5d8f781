use super::simple::SimpleBackend;
use crate::config::BackendConfig;
use crate::error::{AudioError, AudioResult};
use crate::playback::AudioOutput;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::debug;

/// A playlist entry, optionally carrying a mime hint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub uri: String,
    pub mime: Option<String>,
}

impl Track {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime: None,
        }
    }

    /// Accepts `"uri"` or `["uri", "mime"]`
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(Self::new(s.clone())),
            Value::Array(items) => {
                let uri = items.first()?.as_str()?.to_string();
                let mime = items.get(1).and_then(Value::as_str).map(str::to_string);
                Some(Self { uri, mime })
            }
            _ => None,
        }
    }

    pub fn list_from_value(v: Option<&Value>) -> Vec<Self> {
        match v {
            Some(Value::Array(items)) => items.iter().filter_map(Self::from_value).collect(),
            Some(single) => Self::from_value(single).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// URI scheme; scheme-less absolute paths count as `file`
    pub fn scheme(&self) -> String {
        match self.uri.split_once(':') {
            Some((scheme, _)) if !scheme.is_empty() && !scheme.contains('/') => {
                scheme.to_lowercase()
            }
            _ => "file".to_string(),
        }
    }

    pub fn without_mime(self) -> Self {
        Self {
            uri: self.uri,
            mime: None,
        }
    }
}

/// Playback progress reported by backends
#[derive(Clone, Debug, PartialEq)]
pub enum TrackEvent {
    Started { backend: String, track: String },
    QueueEnded { backend: String },
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    fn supported_schemes(&self) -> Vec<String>;

    fn is_remote(&self) -> bool {
        false
    }

    /// Whether `[uri, mime]` hints are useful to this backend
    fn supports_mime_hints(&self) -> bool {
        false
    }

    async fn clear_list(&self);

    async fn add_list(&self, tracks: Vec<Track>);

    async fn play(&self, repeat: bool) -> AudioResult<()>;

    /// Stop playback. Returns whether anything was playing.
    async fn stop(&self) -> bool;

    async fn pause(&self);

    async fn resume(&self);

    async fn next(&self);

    async fn previous(&self);

    async fn lower_volume(&self);

    async fn restore_volume(&self);

    async fn seek_forward(&self, seconds: f64) {
        debug!(target: "media", backend = %self.name(), seconds, "Seeking not supported");
    }

    async fn seek_backward(&self, seconds: f64) {
        debug!(target: "media", backend = %self.name(), seconds, "Seeking not supported");
    }

    async fn track_info(&self) -> Value {
        json!({})
    }

    async fn shutdown(&self) {
        self.stop().await;
    }
}

/// What a backend constructor gets besides its own config
#[derive(Clone)]
pub struct BackendContext {
    pub output: Arc<dyn AudioOutput>,
    pub events: mpsc::UnboundedSender<TrackEvent>,
    pub grace: Duration,
}

pub type MediaFactory = Arc<
    dyn Fn(&str, &BackendConfig, &BackendContext) -> AudioResult<Arc<dyn MediaBackend>>
        + Send
        + Sync,
>;

/// Maps backend `type` identifiers to constructors
pub struct MediaRegistry {
    factories: DashMap<String, MediaFactory>,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("simple", |name, cfg, ctx| {
            Ok(Arc::new(SimpleBackend::new(name, cfg, ctx.clone())) as Arc<dyn MediaBackend>)
        });
        registry
    }

    pub fn register<F>(&self, kind: &str, factory: F)
    where
        F: Fn(&str, &BackendConfig, &BackendContext) -> AudioResult<Arc<dyn MediaBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn create(
        &self,
        name: &str,
        cfg: &BackendConfig,
        ctx: &BackendContext,
    ) -> AudioResult<Arc<dyn MediaBackend>> {
        let factory = self
            .factories
            .get(&cfg.kind)
            .map(|f| f.value().clone())
            .ok_or_else(|| AudioError::UnknownBackend(cfg.kind.clone()))?;
        factory(name, cfg, ctx)
    }
}

impl Default for MediaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
