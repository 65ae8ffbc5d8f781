//! Speech service: bus handlers for speaking, direct synthesis requests,
//! stop and mute, plus hot reload of the synthesis pipelines.

use crate::cache::{SynthesisCache, TranslationCache};
use crate::config::SpeechConfig;
use crate::error::{AudioError, AudioResult};
use crate::playback::{AudioOutput, CommandOutput, CompletionRegistry, PlaybackThread};
use crate::resolver::{resolve, RoutingContext, UtteranceRequest};
use crate::topics;
use crate::tts::{
    FallbackController, NoopTranslator, SpeechPipeline, SynthesisEngine, Translator, TtsRegistry,
};
use herald_core::{Event, EventBus, EventExt, QoSLevel};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub struct SpeechService {
    bus: Arc<EventBus>,
    registry: Arc<TtsRegistry>,
    output: Arc<dyn AudioOutput>,
    translator: Arc<dyn Translator>,
    completions: Arc<CompletionRegistry>,
    // Serializes speak handling and reloads
    config: Mutex<SpeechConfig>,
    // Read without the speak lock so stop never waits on synthesis
    active: RwLock<Arc<FallbackController>>,
    muted: AtomicBool,
    api_topic: String,
    subscriptions: std::sync::Mutex<Vec<String>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SpeechService {
    /// Build the service from config with the built-in engines, process audio
    /// output and no translation. Must be called inside a tokio runtime.
    pub fn from_config(bus: Arc<EventBus>, config: SpeechConfig) -> AudioResult<Self> {
        Self::new(
            bus,
            config,
            Arc::new(TtsRegistry::with_defaults()),
            Arc::new(CommandOutput::new()),
            Arc::new(NoopTranslator),
        )
    }

    pub fn new(
        bus: Arc<EventBus>,
        config: SpeechConfig,
        registry: Arc<TtsRegistry>,
        output: Arc<dyn AudioOutput>,
        translator: Arc<dyn Translator>,
    ) -> AudioResult<Self> {
        let completions = Arc::new(CompletionRegistry::new());
        let controller = build_controller(
            &bus,
            &config,
            &registry,
            &output,
            &translator,
            &completions,
        )?;
        Ok(Self {
            api_topic: topics::get_tts(&config.api_namespace),
            bus,
            registry,
            output,
            translator,
            completions,
            config: Mutex::new(config),
            active: RwLock::new(Arc::new(controller)),
            muted: AtomicBool::new(false),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn controller(&self) -> Arc<FallbackController> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe one consumer task per inbound topic
    pub async fn start(self: &Arc<Self>) -> AudioResult<()> {
        let inbound = [
            topics::SPEAK.to_string(),
            self.api_topic.clone(),
            topics::STOP.to_string(),
            topics::SPEECH_STOP.to_string(),
            topics::TTS_MUTE.to_string(),
            topics::TTS_UNMUTE.to_string(),
            topics::TTS_MUTE_STATUS_REQUEST.to_string(),
        ];
        for topic in inbound {
            let (sub_id, mut rx) = self
                .bus
                .subscribe(topic.clone(), vec![], QoSLevel::QosBatched)
                .await?;
            lock_vec(&self.subscriptions).push(sub_id);

            let svc = Arc::clone(self);
            let handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    svc.dispatch(&topic, event).await;
                }
                debug!(target: "speech", topic = %topic, "Consumer exited");
            });
            lock_vec(&self.tasks).push(handle);
        }
        info!(target: "speech", api = %self.api_topic, "Speech service started");
        Ok(())
    }

    async fn dispatch(&self, topic: &str, event: Event) {
        let res = match topic {
            topics::SPEAK => self.handle_speak(event).await,
            topics::STOP | topics::SPEECH_STOP => {
                self.handle_stop().await;
                Ok(())
            }
            topics::TTS_MUTE => self.set_muted(true).await,
            topics::TTS_UNMUTE => self.set_muted(false).await,
            topics::TTS_MUTE_STATUS_REQUEST => self.emit_mute_status().await,
            t if t == self.api_topic => self.handle_get_tts(event).await,
            other => {
                warn!(target: "speech", topic = %other, "Unhandled topic");
                Ok(())
            }
        };
        if let Err(e) = res {
            error!(target: "speech", topic = %topic, error = %e, "Handler failed");
        }
    }

    /// Speak an utterance and signal completion on its correlation id.
    pub async fn handle_speak(&self, event: Event) -> AudioResult<()> {
        let request = UtteranceRequest::from_event(&event);
        if !request.routing.targets_audio() {
            debug!(target: "speech", "Speak targeted elsewhere; ignored");
            return Ok(());
        }

        if let Some(ident) = &request.ident {
            self.spawn_completion_waiter(&event, ident).await;
        }

        if self.muted.load(Ordering::SeqCst) {
            warn!(target: "speech", "Tried to speak, but TTS is muted");
            self.release(&request);
            return Ok(());
        }
        if request.text.trim().is_empty() {
            warn!(target: "speech", "Speak request without utterance");
            self.release(&request);
            return Ok(());
        }

        let config = self.config.lock().await;
        info!(target: "speech", utterance = %request.text, "Speak");
        let voices = resolve(&request.routing, &config.user, &config.speaker_name);
        let started = Instant::now();
        let controller = self.controller();

        match controller.execute(&request, &voices).await {
            Ok(0) => {
                self.release(&request);
            }
            Ok(items) => {
                info!(
                    target: "speech",
                    ident = ?request.ident,
                    items,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Utterance queued"
                );
            }
            Err(e) => {
                error!(
                    target: "speech",
                    ident = ?request.ident,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "TTS execution failed"
                );
                self.release(&request);
            }
        }
        Ok(())
    }

    fn release(&self, request: &UtteranceRequest) {
        if let Some(ident) = &request.ident {
            self.completions.complete(ident);
        }
    }

    async fn spawn_completion_waiter(&self, event: &Event, ident: &str) {
        let rx = self.completions.register(ident);
        let limit = Duration::from_millis(self.config.lock().await.completion_timeout_ms);
        let bus = self.bus.clone();
        let done = event.forward(ident, json!({}));
        let ident = ident.to_string();
        tokio::spawn(async move {
            if !CompletionRegistry::wait(rx, limit).await {
                warn!(target: "speech", ident = %ident, timeout_ms = limit.as_millis() as u64, "Timed out waiting for speech to finish");
            }
            if let Err(e) = bus.emit(done).await {
                warn!(target: "speech", error = %e, "Failed to emit completion");
            }
        });
    }

    /// Synthesize without playing and reply with the per-language results
    pub async fn handle_get_tts(&self, event: Event) -> AudioResult<()> {
        let ident = match event.ident() {
            Some(ident) => ident,
            None => topics::get_tts_response(&self.config.lock().await.api_namespace),
        };
        if event.data_field("speaker").map_or(true, Value::is_null) {
            warn!(target: "speech", "No speaker data with request, defaults will be used");
        }

        let text = match event.data_field("text") {
            Some(v) if !is_falsy(v) => v.clone(),
            _ => {
                return self
                    .reply(&event, &ident, json!({"error": "No text provided."}))
                    .await;
            }
        };
        let text = match text {
            Value::String(s) => s,
            other => {
                return self
                    .reply(&event, &ident, json!({"error": format!("text is not a str: {}", other)}))
                    .await;
            }
        };

        let routing = RoutingContext::from_event(&event);
        let voices = {
            let config = self.config.lock().await;
            resolve(&routing, &config.user, &config.speaker_name)
        };
        let data = match self.controller().get_multiple_tts(&text, &voices).await {
            Ok(responses) => serde_json::to_value(responses)?,
            Err(e) => {
                error!(target: "speech", error = %e, "get_tts failed");
                json!({"error": e.to_string()})
            }
        };
        self.reply(&event, &ident, data).await
    }

    async fn reply(&self, event: &Event, ident: &str, data: Value) -> AudioResult<()> {
        self.bus.emit(event.reply(ident, data)).await?;
        Ok(())
    }

    /// Stop speech. Emits `mycroft.stop.handled` when something was playing.
    pub async fn handle_stop(&self) {
        let controller = self.controller();
        let was_speaking = controller.is_speaking();
        controller.clear().await;
        if was_speaking {
            info!(target: "speech", "Speech stopped");
            let ev = Event::new(topics::STOP_HANDLED, json!({"by": "TTS"}));
            if let Err(e) = self.bus.emit(ev).await {
                warn!(target: "speech", error = %e, "Failed to emit stop.handled");
            }
        }
    }

    pub async fn set_muted(&self, muted: bool) -> AudioResult<()> {
        self.muted.store(muted, Ordering::SeqCst);
        info!(target: "speech", muted, "TTS mute changed");
        self.emit_mute_status().await
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn emit_mute_status(&self) -> AudioResult<()> {
        let ev = Event::new(topics::TTS_MUTE_STATUS, json!({"muted": self.is_muted()}));
        self.bus.emit(ev).await?;
        Ok(())
    }

    pub fn is_speaking(&self) -> bool {
        self.controller().is_speaking()
    }

    /// Apply a new configuration. Pipelines are rebuilt only when it differs;
    /// the old playback tasks are stopped once the new ones are in place.
    /// Returns whether anything changed.
    pub async fn reload(&self, new_config: SpeechConfig) -> AudioResult<bool> {
        let mut config = self.config.lock().await;
        if *config == new_config {
            return Ok(false);
        }
        if new_config.api_namespace != config.api_namespace {
            warn!(target: "speech", "api_namespace changes apply after restart");
        }

        // A failed build leaves the running pipelines untouched
        let controller = Arc::new(build_controller(
            &self.bus,
            &new_config,
            &self.registry,
            &self.output,
            &self.translator,
            &self.completions,
        )?);
        let old = match self.active.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, controller),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), controller),
        };
        old.shutdown().await;
        info!(target: "speech", module = %new_config.module, "TTS pipelines reloaded");
        *config = new_config;
        Ok(true)
    }

    pub async fn shutdown(&self) -> AudioResult<()> {
        let subs: Vec<String> = lock_vec(&self.subscriptions).drain(..).collect();
        for id in subs {
            self.bus.unsubscribe(&id).await?;
        }
        for task in lock_vec(&self.tasks).drain(..) {
            task.abort();
        }
        self.controller().shutdown().await;
        info!(target: "speech", "Speech service shut down");
        Ok(())
    }
}

fn lock_vec<T>(m: &std::sync::Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Values a request treats as "no text"
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_pipeline(
    bus: &Arc<EventBus>,
    module: &str,
    config: &SpeechConfig,
    registry: &TtsRegistry,
    output: &Arc<dyn AudioOutput>,
    translator: &Arc<dyn Translator>,
    completions: &Arc<CompletionRegistry>,
    caches: &(Arc<SynthesisCache>, Arc<TranslationCache>),
) -> AudioResult<SpeechPipeline> {
    let backend = registry.create(module, &config.module_options(module))?;
    let engine = SynthesisEngine::new(
        backend,
        &config.lang,
        translator.clone(),
        caches.0.clone(),
        caches.1.clone(),
    );
    let playback = PlaybackThread::start(
        bus.clone(),
        output.clone(),
        completions.clone(),
        Duration::from_millis(config.stop_grace_ms),
    );
    Ok(SpeechPipeline::new(engine, playback, bus.clone()))
}

fn build_controller(
    bus: &Arc<EventBus>,
    config: &SpeechConfig,
    registry: &TtsRegistry,
    output: &Arc<dyn AudioOutput>,
    translator: &Arc<dyn Translator>,
    completions: &Arc<CompletionRegistry>,
) -> AudioResult<FallbackController> {
    let caches = (
        Arc::new(SynthesisCache::new(&config.cache_root)),
        Arc::new(TranslationCache::open(&config.cache_root)),
    );
    let primary = build_pipeline(
        bus, &config.module, config, registry, output, translator, completions, &caches,
    )?;

    let fallback = match config.effective_fallback() {
        Some(module) => match build_pipeline(
            bus, module, config, registry, output, translator, completions, &caches,
        ) {
            Ok(p) => Some(Arc::new(p)),
            Err(AudioError::UnknownEngine(name)) => {
                warn!(target: "speech", engine = %name, "Unknown fallback engine; running without fallback");
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    info!(
        target: "speech",
        module = %config.module,
        fallback = ?config.effective_fallback(),
        "TTS pipelines ready"
    );
    Ok(FallbackController::new(Arc::new(primary), fallback))
}
