//! Shared fakes for the herald-audio integration tests.
//!
//! - `FakeTts`: synthesis engine that writes a small file and counts calls
//! - `FakeOutput`: audio output whose players "play" for a fixed duration
//! - `FakeMedia`: media backend that records every call
//! - `Recorder`: per-topic receivers for asserting on bus traffic

#![allow(dead_code)]

use async_trait::async_trait;
use herald_audio::media::{MediaBackend, Track};
use herald_audio::{AudioError, AudioOutput, AudioResult, PlaybackHandle, TtsBackend, VoiceRequest};
use herald_core::{Event, EventBus, QoSLevel};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Duration, Instant};

// =============================================================================
// Synthesis
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TtsFailure {
    Transient,
    Permanent,
}

pub struct FakeTts {
    id: String,
    calls: AtomicUsize,
    failure: Mutex<Option<TtsFailure>>,
}

impl FakeTts {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
        })
    }

    pub fn failing(id: &str, failure: TtsFailure) -> Arc<Self> {
        let tts = Self::new(id);
        tts.set_failure(Some(failure));
        tts
    }

    pub fn set_failure(&self, failure: Option<TtsFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsBackend for FakeTts {
    fn engine_id(&self) -> &str {
        &self.id
    }

    async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
        out: &Path,
    ) -> AudioResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(TtsFailure::Transient) => {
                Err(AudioError::TransientSynthesis(format!("{} offline", self.id)))
            }
            Some(TtsFailure::Permanent) => Err(AudioError::Synthesis("bad voice".into())),
            None => {
                let body = format!("{}|{}|{}", self.id, voice.language, sentence);
                tokio::fs::write(out, body).await?;
                Ok(Some("pau:0.1 hh:0.2 ay:0.4".into()))
            }
        }
    }
}

pub fn voice(language: &str, gender: &str) -> VoiceRequest {
    VoiceRequest {
        speaker: "Herald".into(),
        language: language.into(),
        gender: gender.into(),
        voice: None,
    }
}

// =============================================================================
// Audio output
// =============================================================================

#[derive(Default)]
pub struct OutputLog {
    pub played: Vec<String>,
    pub terminated: Vec<String>,
    pub paused: Vec<String>,
    pub resumed: Vec<String>,
}

/// Every `play` returns a handle that finishes after `duration`
pub struct FakeOutput {
    duration: Duration,
    /// Number of upcoming `play` calls that fail to start
    failures: AtomicUsize,
    pub log: Arc<Mutex<OutputLog>>,
}

impl FakeOutput {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            failures: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(OutputLog::default())),
        })
    }

    pub fn fail_next(&self, plays: usize) {
        self.failures.store(plays, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<String> {
        self.log.lock().unwrap().played.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.log.lock().unwrap().terminated.clone()
    }

    pub fn paused(&self) -> Vec<String> {
        self.log.lock().unwrap().paused.clone()
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play(&self, source: &str) -> AudioResult<Box<dyn PlaybackHandle>> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AudioError::Playback(format!("player crashed on {}", source)));
        }
        self.log.lock().unwrap().played.push(source.to_string());
        Ok(Box::new(FakeHandle {
            source: source.to_string(),
            deadline: Instant::now() + self.duration,
            log: self.log.clone(),
        }))
    }
}

struct FakeHandle {
    source: String,
    deadline: Instant,
    log: Arc<Mutex<OutputLog>>,
}

#[async_trait]
impl PlaybackHandle for FakeHandle {
    async fn wait(&mut self) -> AudioResult<()> {
        sleep_until(self.deadline).await;
        Ok(())
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.log.lock().unwrap().terminated.push(self.source.clone());
    }

    fn pause(&mut self) -> AudioResult<()> {
        self.log.lock().unwrap().paused.push(self.source.clone());
        Ok(())
    }

    fn resume(&mut self) -> AudioResult<()> {
        self.log.lock().unwrap().resumed.push(self.source.clone());
        Ok(())
    }
}

// =============================================================================
// Media
// =============================================================================

pub struct FakeMedia {
    name: String,
    schemes: Vec<String>,
    remote: bool,
    mime_hints: bool,
    playing: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub tracks: Mutex<Vec<Track>>,
}

impl FakeMedia {
    pub fn new(name: &str, schemes: &[&str]) -> Arc<Self> {
        Self::build(name, schemes, false, false)
    }

    pub fn remote(name: &str, schemes: &[&str]) -> Arc<Self> {
        Self::build(name, schemes, true, false)
    }

    pub fn with_mime_hints(name: &str, schemes: &[&str]) -> Arc<Self> {
        Self::build(name, schemes, false, true)
    }

    fn build(name: &str, schemes: &[&str], remote: bool, mime_hints: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
            remote,
            mime_hints,
            playing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_schemes(&self) -> Vec<String> {
        self.schemes.clone()
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn supports_mime_hints(&self) -> bool {
        self.mime_hints
    }

    async fn clear_list(&self) {
        self.record("clear_list");
        self.tracks.lock().unwrap().clear();
    }

    async fn add_list(&self, tracks: Vec<Track>) {
        self.record("add_list");
        self.tracks.lock().unwrap().extend(tracks);
    }

    async fn play(&self, _repeat: bool) -> AudioResult<()> {
        self.record("play");
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> bool {
        self.record("stop");
        self.playing.swap(false, Ordering::SeqCst)
    }

    async fn pause(&self) {
        self.record("pause");
    }

    async fn resume(&self) {
        self.record("resume");
    }

    async fn next(&self) {
        self.record("next");
    }

    async fn previous(&self) {
        self.record("previous");
    }

    async fn lower_volume(&self) {
        self.record("lower_volume");
    }

    async fn restore_volume(&self) {
        self.record("restore_volume");
    }

    async fn track_info(&self) -> Value {
        json!({"name": self.name, "tracks": self.tracks.lock().unwrap().len()})
    }
}

// =============================================================================
// Bus recording
// =============================================================================

pub struct Recorder {
    receivers: HashMap<String, mpsc::Receiver<Event>>,
}

impl Recorder {
    pub async fn new(bus: &EventBus, topics: &[&str]) -> Self {
        let mut receivers = HashMap::new();
        for topic in topics {
            let (_id, rx) = bus
                .subscribe(topic.to_string(), vec![], QoSLevel::QosBatched)
                .await
                .unwrap();
            receivers.insert(topic.to_string(), rx);
        }
        Self { receivers }
    }

    /// Next event on `topic`, or None after `wait`
    pub async fn next(&mut self, topic: &str, wait: Duration) -> Option<Event> {
        let rx = self.receivers.get_mut(topic).expect("topic not recorded");
        timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Drain and count what has arrived on `topic` so far
    pub fn count(&mut self, topic: &str) -> usize {
        let rx = self.receivers.get_mut(topic).expect("topic not recorded");
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

pub async fn new_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new().await.unwrap())
}
