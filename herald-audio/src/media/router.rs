//! Media backend router.
//!
//! Picks a backend for each play request by URI scheme, keeps exactly one
//! backend current, forwards track progress to the bus and ducks the current
//! backend while the assistant speaks or listens.

use super::backend::{BackendContext, MediaBackend, MediaRegistry, Track, TrackEvent};
use crate::config::MediaConfig;
use crate::error::{AudioError, AudioResult};
use crate::playback::AudioOutput;
use crate::topics;
use herald_core::{Event, EventBus, EventExt, QoSLevel};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

#[derive(Default)]
struct RouterState {
    current: Option<Arc<dyn MediaBackend>>,
    play_start: Option<Instant>,
    volume_is_low: bool,
}

pub struct MediaRouter {
    bus: Arc<EventBus>,
    config: MediaConfig,
    // Local backends first, then remote, each in registration order
    backends: Vec<Arc<dyn MediaBackend>>,
    default: Option<Arc<dyn MediaBackend>>,
    state: Mutex<RouterState>,
    track_events: Mutex<Option<mpsc::UnboundedReceiver<TrackEvent>>>,
    subscriptions: std::sync::Mutex<Vec<String>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MediaRouter {
    /// `track_events` is the receiving side of the channel handed to the backends.
    pub fn new(
        bus: Arc<EventBus>,
        config: MediaConfig,
        backends: Vec<Arc<dyn MediaBackend>>,
        track_events: mpsc::UnboundedReceiver<TrackEvent>,
    ) -> Self {
        let (local, remote): (Vec<_>, Vec<_>) = backends.into_iter().partition(|b| !b.is_remote());
        let backends: Vec<Arc<dyn MediaBackend>> = local.into_iter().chain(remote).collect();

        let default = config.default_backend.as_deref().and_then(|name| {
            let found = backends.iter().find(|b| b.name() == name).cloned();
            if found.is_none() {
                warn!(target: "media", backend = %name, "Default backend not loaded");
            }
            found
        });
        info!(
            target: "media",
            backends = ?backends.iter().map(|b| b.name().to_string()).collect::<Vec<_>>(),
            default = ?default.as_ref().map(|b| b.name().to_string()),
            "Media backends loaded"
        );

        Self {
            bus,
            config,
            backends,
            default,
            state: Mutex::new(RouterState::default()),
            track_events: Mutex::new(Some(track_events)),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Instantiate every active configured backend. Unknown backend types fail.
    pub fn from_config(
        bus: Arc<EventBus>,
        config: MediaConfig,
        registry: &MediaRegistry,
        output: Arc<dyn AudioOutput>,
        grace: Duration,
    ) -> AudioResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = BackendContext {
            output,
            events: tx,
            grace,
        };
        let mut backends = Vec::new();
        for (name, cfg) in &config.backends {
            if !cfg.active {
                debug!(target: "media", backend = %name, "Inactive backend skipped");
                continue;
            }
            backends.push(registry.create(name, cfg, &ctx)?);
        }
        Ok(Self::new(bus, config, backends, rx))
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub async fn current(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|b| b.name().to_string())
    }

    fn supports(backend: &Arc<dyn MediaBackend>, scheme: &str) -> bool {
        backend.supported_schemes().iter().any(|s| s == scheme)
    }

    /// Backend for a track: preferred, then default, then the first that
    /// supports the scheme.
    pub fn select_backend(
        &self,
        first: &Track,
        preferred: Option<&str>,
    ) -> Option<Arc<dyn MediaBackend>> {
        let scheme = first.scheme();
        if let Some(p) = preferred
            .and_then(|name| self.backends.iter().find(|b| b.name() == name))
            .filter(|b| Self::supports(b, &scheme))
        {
            return Some(p.clone());
        }
        if let Some(d) = self.default.as_ref().filter(|b| Self::supports(b, &scheme)) {
            debug!(target: "media", backend = %d.name(), "Using default backend");
            return Some(d.clone());
        }
        self.backends
            .iter()
            .find(|b| Self::supports(b, &scheme))
            .cloned()
    }

    /// Backend named in the request, explicitly or within the utterance
    fn preferred_from(&self, event: &Event) -> Option<String> {
        if let Some(name) = event.data_str("backend") {
            return Some(name.to_string());
        }
        let utterance = event.data_str("utterance")?;
        self.backends
            .iter()
            .find(|b| utterance.contains(b.name()))
            .map(|b| {
                debug!(target: "media", backend = %b.name(), "Backend preferred by utterance");
                b.name().to_string()
            })
    }

    async fn perform_stop(&self, st: &mut RouterState) -> bool {
        let Some(current) = st.current.take() else {
            return false;
        };
        if st.volume_is_low {
            current.restore_volume().await;
            st.volume_is_low = false;
        }
        let stopped = current.stop().await;
        if stopped {
            let ev = Event::new(
                topics::STOP_HANDLED,
                json!({"by": format!("audio:{}", current.name())}),
            );
            if let Err(e) = self.bus.emit(ev).await {
                warn!(target: "media", error = %e, "Failed to emit stop.handled");
            }
        }
        stopped
    }

    /// Start a playlist, replacing whatever was playing. Returns the chosen backend.
    pub async fn play(
        &self,
        tracks: Vec<Track>,
        preferred: Option<&str>,
        repeat: bool,
    ) -> AudioResult<String> {
        let first = tracks
            .first()
            .ok_or_else(|| AudioError::Validation("no tracks to play".into()))?;
        let mut st = self.state.lock().await;
        self.perform_stop(&mut st).await;

        let backend = self
            .select_backend(first, preferred)
            .ok_or_else(|| AudioError::NoBackend(first.scheme()))?;
        let tracks: Vec<Track> = if backend.supports_mime_hints() {
            tracks
        } else {
            tracks.into_iter().map(Track::without_mime).collect()
        };

        backend.clear_list().await;
        backend.add_list(tracks).await;
        backend.play(repeat).await?;
        info!(target: "media", backend = %backend.name(), repeat, "Playback started");

        let name = backend.name().to_string();
        st.current = Some(backend);
        st.play_start = Some(Instant::now());
        Ok(name)
    }

    /// Append to the current playlist, or start one
    pub async fn queue(&self, tracks: Vec<Track>, preferred: Option<&str>) -> AudioResult<String> {
        {
            let st = self.state.lock().await;
            if let Some(current) = &st.current {
                current.add_list(tracks).await;
                return Ok(current.name().to_string());
            }
        }
        self.play(tracks, preferred, false).await
    }

    /// Stop the current backend, unless playback started within the debounce window
    pub async fn stop(&self) -> bool {
        let mut st = self.state.lock().await;
        let debounce = Duration::from_millis(self.config.stop_debounce_ms);
        if st.play_start.map_or(false, |t| t.elapsed() < debounce) {
            debug!(target: "media", "Ignoring stop right after play start");
            return false;
        }
        self.perform_stop(&mut st).await
    }

    async fn current_backend(&self) -> Option<Arc<dyn MediaBackend>> {
        self.state.lock().await.current.clone()
    }

    pub async fn pause(&self) {
        if let Some(b) = self.current_backend().await {
            b.pause().await;
        }
    }

    pub async fn resume(&self) {
        if let Some(b) = self.current_backend().await {
            b.resume().await;
        }
    }

    pub async fn next(&self) {
        if let Some(b) = self.current_backend().await {
            b.next().await;
        }
    }

    pub async fn prev(&self) {
        if let Some(b) = self.current_backend().await {
            b.previous().await;
        }
    }

    pub async fn seek_forward(&self, seconds: f64) {
        if let Some(b) = self.current_backend().await {
            b.seek_forward(seconds).await;
        }
    }

    pub async fn seek_backward(&self, seconds: f64) {
        if let Some(b) = self.current_backend().await {
            b.seek_backward(seconds).await;
        }
    }

    pub async fn track_info(&self) -> Value {
        match self.current_backend().await {
            Some(b) => b.track_info().await,
            None => json!({}),
        }
    }

    /// `{name: {supported_uris, default, remote}}` for every loaded backend
    pub fn list_backends(&self) -> Value {
        let mut data = Map::new();
        for b in &self.backends {
            let is_default = self
                .default
                .as_ref()
                .map_or(false, |d| d.name() == b.name());
            data.insert(
                b.name().to_string(),
                json!({
                    "supported_uris": b.supported_schemes(),
                    "default": is_default,
                    "remote": b.is_remote(),
                }),
            );
        }
        Value::Object(data)
    }

    pub async fn lower_volume(&self) {
        let mut st = self.state.lock().await;
        if let Some(current) = st.current.clone() {
            debug!(target: "media", "Lowering volume");
            current.lower_volume().await;
            st.volume_is_low = true;
        }
    }

    pub async fn restore_volume(&self) {
        let mut st = self.state.lock().await;
        if let Some(current) = st.current.clone() {
            debug!(target: "media", "Restoring volume");
            st.volume_is_low = false;
            current.restore_volume().await;
        }
    }

    /// After recording ends, keep the volume low while a response may follow.
    /// Restores at once on "recognition unknown", or when nothing is spoken
    /// within the restore timeout.
    pub async fn restore_after_record(self: &Arc<Self>) -> AudioResult<()> {
        if self.current_backend().await.is_none() {
            debug!(target: "media", "No audio service to restore volume of");
            return Ok(());
        }
        // Subscribe before returning so nothing emitted right after is missed
        let (speak_id, mut speak_rx) = self
            .bus
            .subscribe(topics::SPEAK.to_string(), vec![], QoSLevel::QosBatched)
            .await?;
        let (unknown_id, mut unknown_rx) = self
            .bus
            .subscribe(topics::RECOGNITION_UNKNOWN.to_string(), vec![], QoSLevel::QosBatched)
            .await?;
        let limit = Duration::from_millis(self.config.restore_timeout_ms);
        let router = Arc::clone(self);

        tokio::spawn(async move {
            let restore = tokio::select! {
                _ = speak_rx.recv() => false,
                _ = unknown_rx.recv() => true,
                _ = sleep(limit) => true,
            };
            for id in [speak_id, unknown_id] {
                let _ = router.bus.unsubscribe(&id).await;
            }
            if restore {
                router.restore_volume().await;
            }
        });
        Ok(())
    }

    /// Subscribe the inbound topics and start forwarding track events
    pub async fn start(self: &Arc<Self>) -> AudioResult<()> {
        let inbound = [
            topics::MEDIA_PLAY,
            topics::MEDIA_QUEUE,
            topics::MEDIA_PAUSE,
            topics::MEDIA_RESUME,
            topics::MEDIA_STOP,
            topics::MEDIA_NEXT,
            topics::MEDIA_PREV,
            topics::MEDIA_SEEK_FORWARD,
            topics::MEDIA_SEEK_BACKWARD,
            topics::MEDIA_TRACK_INFO,
            topics::MEDIA_LIST_BACKENDS,
            topics::AUDIO_OUTPUT_START,
            topics::AUDIO_OUTPUT_END,
            topics::RECORD_BEGIN,
            topics::RECORD_END,
        ];
        for topic in inbound {
            let (sub_id, mut rx) = self
                .bus
                .subscribe(topic.to_string(), vec![], QoSLevel::QosBatched)
                .await?;
            lock_vec(&self.subscriptions).push(sub_id);
            let router = Arc::clone(self);
            let handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = router.dispatch(topic, event).await {
                        warn!(target: "media", topic = %topic, error = %e, "Media request failed");
                    }
                }
            });
            lock_vec(&self.tasks).push(handle);
        }

        if let Some(mut events) = self.track_events.lock().await.take() {
            let bus = self.bus.clone();
            let handle = tokio::spawn(async move {
                while let Some(ev) = events.recv().await {
                    let out = match ev {
                        TrackEvent::Started { backend, track } => {
                            debug!(target: "media", backend = %backend, "New track coming up");
                            Event::new(topics::PLAYING_TRACK, json!({"track": track}))
                        }
                        TrackEvent::QueueEnded { backend } => {
                            debug!(target: "media", backend = %backend, "End of playlist");
                            Event::new(topics::QUEUE_END, json!({}))
                        }
                    };
                    if let Err(e) = bus.emit(out).await {
                        warn!(target: "media", error = %e, "Failed to emit track event");
                    }
                }
            });
            lock_vec(&self.tasks).push(handle);
        }
        info!(target: "media", "Media router started");
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, topic: &str, event: Event) -> AudioResult<()> {
        match topic {
            topics::MEDIA_PLAY => {
                let tracks = Track::list_from_value(event.data_field("tracks"));
                if tracks.is_empty() {
                    warn!(target: "media", "Play request without tracks");
                    return Ok(());
                }
                let repeat = event
                    .data_field("repeat")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let preferred = self.preferred_from(&event);
                self.play_or_drop(self.play(tracks, preferred.as_deref(), repeat).await)
            }
            topics::MEDIA_QUEUE => {
                let tracks = Track::list_from_value(event.data_field("tracks"));
                if tracks.is_empty() {
                    return Ok(());
                }
                let preferred = self.preferred_from(&event);
                self.play_or_drop(self.queue(tracks, preferred.as_deref()).await)
            }
            topics::MEDIA_PAUSE => {
                self.pause().await;
                Ok(())
            }
            topics::MEDIA_RESUME => {
                self.resume().await;
                Ok(())
            }
            topics::MEDIA_STOP => {
                self.stop().await;
                Ok(())
            }
            topics::MEDIA_NEXT => {
                self.next().await;
                Ok(())
            }
            topics::MEDIA_PREV => {
                self.prev().await;
                Ok(())
            }
            topics::MEDIA_SEEK_FORWARD => {
                self.seek_forward(seconds_of(&event)).await;
                Ok(())
            }
            topics::MEDIA_SEEK_BACKWARD => {
                self.seek_backward(seconds_of(&event)).await;
                Ok(())
            }
            topics::MEDIA_TRACK_INFO => {
                let info = self.track_info().await;
                self.bus
                    .emit(event.reply(topics::MEDIA_TRACK_INFO_REPLY, info))
                    .await?;
                Ok(())
            }
            topics::MEDIA_LIST_BACKENDS => {
                self.bus.emit(event.response(self.list_backends())).await?;
                Ok(())
            }
            topics::AUDIO_OUTPUT_START | topics::RECORD_BEGIN => {
                self.lower_volume().await;
                Ok(())
            }
            topics::AUDIO_OUTPUT_END => {
                self.restore_volume().await;
                Ok(())
            }
            topics::RECORD_END => self.restore_after_record().await,
            other => {
                warn!(target: "media", topic = %other, "Unhandled topic");
                Ok(())
            }
        }
    }

    fn play_or_drop(&self, res: AudioResult<String>) -> AudioResult<()> {
        match res {
            Ok(_) => Ok(()),
            Err(AudioError::NoBackend(scheme)) => {
                info!(target: "media", scheme = %scheme, "No service found for uri type");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn shutdown(&self) -> AudioResult<()> {
        let subs: Vec<String> = lock_vec(&self.subscriptions).drain(..).collect();
        for id in subs {
            self.bus.unsubscribe(&id).await?;
        }
        for task in lock_vec(&self.tasks).drain(..) {
            task.abort();
        }
        {
            let mut st = self.state.lock().await;
            st.current = None;
        }
        for b in &self.backends {
            info!(target: "media", backend = %b.name(), "Shutting down");
            b.shutdown().await;
        }
        Ok(())
    }
}

fn seconds_of(event: &Event) -> f64 {
    event
        .data_field("seconds")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
}

fn lock_vec<T>(m: &std::sync::Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
