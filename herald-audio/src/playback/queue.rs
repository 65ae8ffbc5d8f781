//! Ordered playback of synthesized utterances.
//!
//! One task per pipeline drains a FIFO of items and owns the live player
//! handle. Other callers talk to it through the queue and a control channel:
//! `clear` bumps a generation counter and sends `Stop(generation)`, so a stop
//! only ever hits items that were dequeued before the clear.

use super::completion::CompletionRegistry;
use super::player::{AudioOutput, PlaybackHandle};
use crate::error::AudioError;
use crate::topics;
use crate::tts::Viseme;
use herald_core::{Event, EventBus, EventExt};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct PlaybackItem {
    pub audio: PathBuf,
    pub visemes: Option<Vec<Viseme>>,
    /// Open the microphone once this item ends a run
    pub listen: bool,
    pub ident: Option<String>,
    /// Request that produced the item; outbound events inherit its context
    pub source: Option<Event>,
}

#[derive(Debug)]
enum PlaybackCommand {
    Stop(u64),
    Pause,
    Resume,
}

enum Played {
    Finished,
    Stopped,
    Failed(AudioError),
}

enum Wake {
    Done(Result<(), AudioError>),
    Control(Option<PlaybackCommand>),
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<PlaybackItem>,
    generation: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    terminated: AtomicBool,
    speaking: AtomicBool,
    bus: Arc<EventBus>,
    output: Arc<dyn AudioOutput>,
    completions: Arc<CompletionRegistry>,
    grace: Duration,
}

impl Shared {
    async fn emit(&self, item: &PlaybackItem, msg_type: &str, data: Value) {
        let event = match &item.source {
            Some(src) => src.forward(msg_type, data),
            None => Event::new(msg_type, data),
        };
        if let Err(e) = self.bus.emit(event).await {
            warn!(target: "playback", error = %e, topic = %msg_type, "Failed to emit");
        }
    }

    async fn end_run(&self, item: &PlaybackItem, listen: bool) {
        if self.speaking.swap(false, Ordering::SeqCst) {
            self.emit(item, topics::AUDIO_OUTPUT_END, json!({})).await;
            if listen {
                self.emit(item, topics::MIC_LISTEN, json!({})).await;
            }
        }
    }
}

pub struct PlaybackThread {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<PlaybackCommand>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackThread {
    /// Spawn the playback task. Must be called inside a tokio runtime.
    pub fn start(
        bus: Arc<EventBus>,
        output: Arc<dyn AudioOutput>,
        completions: Arc<CompletionRegistry>,
        grace: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            terminated: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            bus,
            output,
            completions,
            grace,
        });
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(shared.clone(), control_rx));
        Self {
            shared,
            control,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    pub async fn enqueue(&self, item: PlaybackItem) {
        if self.shared.terminated.load(Ordering::SeqCst) {
            warn!(target: "playback", "Playback stopped; dropping item");
            if let Some(ident) = &item.ident {
                self.shared.completions.complete(ident);
            }
            return;
        }
        self.shared.state.lock().await.items.push_back(item);
        self.shared.notify.notify_one();
    }

    /// Drop everything queued and stop the item currently playing
    pub async fn clear(&self) {
        let (generation, drained) = {
            let mut st = self.shared.state.lock().await;
            st.generation += 1;
            (st.generation, st.items.drain(..).collect::<Vec<_>>())
        };
        if !drained.is_empty() {
            debug!(target: "playback", dropped = drained.len(), "Cleared playback queue");
        }
        let idents: HashSet<&str> = drained.iter().filter_map(|i| i.ident.as_deref()).collect();
        for ident in idents {
            self.shared.completions.complete(ident);
        }
        let _ = self.control.send(PlaybackCommand::Stop(generation));
    }

    /// Clear and end the playback task
    pub async fn stop(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        self.clear().await;
        self.shared.notify.notify_one();
    }

    /// Wait for the playback task to exit
    pub async fn join(&self) {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(target: "playback", error = %e, "Playback task panicked");
            }
        }
    }

    pub fn pause(&self) {
        let _ = self.control.send(PlaybackCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(PlaybackCommand::Resume);
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a run of items is in progress
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}

async fn run(shared: Arc<Shared>, mut control: mpsc::UnboundedReceiver<PlaybackCommand>) {
    debug!(target: "playback", "Playback task started");
    let mut last: Option<PlaybackItem> = None;
    loop {
        if shared.terminated.load(Ordering::SeqCst) {
            break;
        }

        let next = {
            let mut st = shared.state.lock().await;
            let generation = st.generation;
            st.items.pop_front().map(|item| (item, generation))
        };

        let Some((item, generation)) = next else {
            // A clear can empty the queue between two items of a run
            if let Some(prev) = last.take() {
                shared.end_run(&prev, false).await;
            }
            // Idle: stale control commands are drained here
            tokio::select! {
                _ = shared.notify.notified() => {}
                cmd = control.recv() => {
                    if cmd.is_none() {
                        break;
                    }
                }
            }
            continue;
        };

        if !shared.speaking.swap(true, Ordering::SeqCst) {
            shared.emit(&item, topics::AUDIO_OUTPUT_START, json!({})).await;
        }
        if let Some(visemes) = &item.visemes {
            let start = herald_core::utils::now_ms() as f64 / 1000.0;
            shared
                .emit(&item, topics::VISEME_LIST, json!({"start": start, "visemes": visemes}))
                .await;
        }

        let outcome = play_item(&shared, &item, generation, &mut control).await;

        let drained = shared.state.lock().await.items.is_empty();
        match outcome {
            Played::Finished => {
                if drained {
                    shared.end_run(&item, item.listen).await;
                }
            }
            Played::Stopped => {
                info!(target: "playback", audio = %item.audio.display(), "Playback stopped");
                shared.end_run(&item, false).await;
            }
            Played::Failed(e) => {
                warn!(target: "playback", audio = %item.audio.display(), error = %e, "Playback failed");
                shared.end_run(&item, false).await;
            }
        }

        if let Some(ident) = &item.ident {
            let still_queued = shared
                .state
                .lock()
                .await
                .items
                .iter()
                .any(|i| i.ident.as_deref() == Some(ident.as_str()));
            if !still_queued {
                shared.completions.complete(ident);
            }
        }
        last = Some(item);
    }

    // Release anything left behind
    let leftover: Vec<PlaybackItem> = shared.state.lock().await.items.drain(..).collect();
    for item in leftover {
        if let Some(ident) = &item.ident {
            shared.completions.complete(ident);
        }
    }
    debug!(target: "playback", "Playback task exited");
}

async fn play_item(
    shared: &Shared,
    item: &PlaybackItem,
    generation: u64,
    control: &mut mpsc::UnboundedReceiver<PlaybackCommand>,
) -> Played {
    let source = item.audio.to_string_lossy();
    let mut handle: Box<dyn PlaybackHandle> = match shared.output.play(&source).await {
        Ok(h) => h,
        Err(e) => return Played::Failed(e),
    };

    loop {
        let wake = tokio::select! {
            res = handle.wait() => Wake::Done(res),
            cmd = control.recv() => Wake::Control(cmd),
        };
        match wake {
            Wake::Done(Ok(())) => return Played::Finished,
            Wake::Done(Err(e)) => return Played::Failed(e),
            Wake::Control(None) => {
                handle.terminate(shared.grace).await;
                return Played::Stopped;
            }
            Wake::Control(Some(PlaybackCommand::Stop(g))) if g > generation => {
                handle.terminate(shared.grace).await;
                return Played::Stopped;
            }
            Wake::Control(Some(PlaybackCommand::Stop(_))) => {
                debug!(target: "playback", "Ignoring stale stop");
            }
            Wake::Control(Some(PlaybackCommand::Pause)) => {
                if let Err(e) = handle.pause() {
                    warn!(target: "playback", error = %e, "Pause failed");
                }
            }
            Wake::Control(Some(PlaybackCommand::Resume)) => {
                if let Err(e) = handle.resume() {
                    warn!(target: "playback", error = %e, "Resume failed");
                }
            }
        }
    }
}
