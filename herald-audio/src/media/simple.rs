//! Process-per-track playlist player.
//!
//! Each track runs in its own player process (see `CommandOutput`). Process
//! players cannot change volume, so ducking pauses the process and remembers
//! the volume it stood in for.

use super::backend::{BackendContext, MediaBackend, Track, TrackEvent};
use crate::config::BackendConfig;
use crate::error::AudioResult;
use crate::playback::PlaybackHandle;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const FULL_VOLUME: u8 = 100;

#[derive(Debug)]
enum Control {
    Stop,
    Next,
    Previous,
    Pause,
    Resume,
}

#[derive(Default)]
struct PlaylistState {
    tracks: Vec<Track>,
    index: usize,
    repeat: bool,
    playing: bool,
    paused: bool,
    current: Option<String>,
    volume: u8,
    // Volume to go back to while ducked
    normal_volume: Option<u8>,
}

pub struct SimpleBackend {
    name: String,
    schemes: Vec<String>,
    duck: bool,
    low_volume: u8,
    ctx: BackendContext,
    state: Arc<Mutex<PlaylistState>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimpleBackend {
    pub fn new(name: &str, cfg: &BackendConfig, ctx: BackendContext) -> Self {
        let schemes = cfg
            .schemes
            .clone()
            .unwrap_or_else(|| vec!["file".into(), "http".into(), "https".into()]);
        Self {
            name: name.to_string(),
            schemes,
            duck: cfg.duck.unwrap_or(true),
            low_volume: cfg.low_volume,
            ctx,
            state: Arc::new(Mutex::new(PlaylistState {
                volume: FULL_VOLUME,
                ..Default::default()
            })),
            control: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    async fn send(&self, cmd: Control) -> bool {
        match self.control.lock().await.as_ref() {
            Some(tx) => tx.send(cmd).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl MediaBackend for SimpleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_schemes(&self) -> Vec<String> {
        self.schemes.clone()
    }

    fn supports_mime_hints(&self) -> bool {
        true
    }

    async fn clear_list(&self) {
        let mut st = self.state.lock().await;
        st.tracks.clear();
        st.index = 0;
    }

    async fn add_list(&self, tracks: Vec<Track>) {
        debug!(target: "media", backend = %self.name, added = tracks.len(), "Track list extended");
        self.state.lock().await.tracks.extend(tracks);
    }

    async fn play(&self, repeat: bool) -> AudioResult<()> {
        self.stop().await;
        {
            let mut st = self.state.lock().await;
            st.index = 0;
            st.repeat = repeat;
            st.playing = true;
            st.paused = false;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.control.lock().await = Some(tx);
        let task = tokio::spawn(run_playlist(
            self.name.clone(),
            self.state.clone(),
            self.ctx.clone(),
            rx,
        ));
        *self.task.lock().await = Some(task);
        info!(target: "media", backend = %self.name, repeat, "Playlist started");
        Ok(())
    }

    async fn stop(&self) -> bool {
        let was_playing = self.state.lock().await.playing;
        self.send(Control::Stop).await;
        *self.control.lock().await = None;
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(target: "media", backend = %self.name, error = %e, "Playlist task failed");
            }
        }
        let mut st = self.state.lock().await;
        st.playing = false;
        st.paused = false;
        st.current = None;
        if let Some(v) = st.normal_volume.take() {
            st.volume = v;
        }
        was_playing
    }

    async fn pause(&self) {
        let mut st = self.state.lock().await;
        if st.playing && !st.paused {
            // Already suspended by ducking; just record the user's intent
            if st.normal_volume.is_none() {
                self.send(Control::Pause).await;
            }
            st.paused = true;
        }
    }

    async fn resume(&self) {
        let mut st = self.state.lock().await;
        if st.paused {
            st.paused = false;
            if st.normal_volume.is_none() {
                self.send(Control::Resume).await;
            }
        }
    }

    async fn next(&self) {
        self.send(Control::Next).await;
    }

    async fn previous(&self) {
        self.send(Control::Previous).await;
    }

    async fn lower_volume(&self) {
        let mut st = self.state.lock().await;
        if !self.duck || !st.playing || st.normal_volume.is_some() {
            return;
        }
        st.normal_volume = Some(st.volume);
        st.volume = self.low_volume;
        if !st.paused {
            self.send(Control::Pause).await;
        }
        debug!(target: "media", backend = %self.name, "Ducked");
    }

    async fn restore_volume(&self) {
        let mut st = self.state.lock().await;
        let Some(normal) = st.normal_volume.take() else {
            return;
        };
        st.volume = normal;
        if !st.paused {
            self.send(Control::Resume).await;
        }
        debug!(target: "media", backend = %self.name, "Volume restored");
    }

    async fn track_info(&self) -> Value {
        let st = self.state.lock().await;
        match &st.current {
            Some(uri) => json!({
                "name": uri,
                "uri": uri,
                "index": st.index,
                "tracks": st.tracks.len(),
                "paused": st.paused,
                "volume": st.volume,
            }),
            None => json!({}),
        }
    }
}

enum Step {
    Advance,
    Back,
    Stop,
}

async fn run_playlist(
    name: String,
    state: Arc<Mutex<PlaylistState>>,
    ctx: BackendContext,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        let (track, suspended) = {
            let mut st = state.lock().await;
            if st.index >= st.tracks.len() {
                if st.repeat && !st.tracks.is_empty() {
                    st.index = 0;
                } else {
                    st.playing = false;
                    st.current = None;
                    break;
                }
            }
            let track = st.tracks[st.index].clone();
            st.current = Some(track.uri.clone());
            (track, st.paused || st.normal_volume.is_some())
        };

        let _ = ctx.events.send(TrackEvent::Started {
            backend: name.clone(),
            track: track.uri.clone(),
        });

        let step = match ctx.output.play(&track.uri).await {
            Ok(mut handle) => {
                if suspended {
                    let _ = handle.pause();
                }
                drive(&mut handle, &mut control, &ctx).await
            }
            Err(e) => {
                warn!(target: "media", backend = %name, track = %track.uri, error = %e, "Couldn't play track");
                Step::Advance
            }
        };

        let mut st = state.lock().await;
        match step {
            Step::Advance => st.index += 1,
            Step::Back => st.index = st.index.saturating_sub(1),
            Step::Stop => return,
        }
    }
    let _ = ctx.events.send(TrackEvent::QueueEnded { backend: name.clone() });
    debug!(target: "media", backend = %name, "End of playlist");
}

async fn drive(
    handle: &mut Box<dyn PlaybackHandle>,
    control: &mut mpsc::UnboundedReceiver<Control>,
    ctx: &BackendContext,
) -> Step {
    loop {
        let cmd = tokio::select! {
            res = handle.wait() => {
                if let Err(e) = res {
                    warn!(target: "media", error = %e, "Player exited with error");
                }
                return Step::Advance;
            }
            cmd = control.recv() => cmd,
        };
        match cmd {
            None | Some(Control::Stop) => {
                handle.terminate(ctx.grace).await;
                return Step::Stop;
            }
            Some(Control::Next) => {
                handle.terminate(ctx.grace).await;
                return Step::Advance;
            }
            Some(Control::Previous) => {
                handle.terminate(ctx.grace).await;
                return Step::Back;
            }
            Some(Control::Pause) => {
                if let Err(e) = handle.pause() {
                    warn!(target: "media", error = %e, "Pause failed");
                }
            }
            Some(Control::Resume) => {
                if let Err(e) = handle.resume() {
                    warn!(target: "media", error = %e, "Resume failed");
                }
            }
        }
    }
}
