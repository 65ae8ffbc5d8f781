//! Process-based audio output.
//!
//! Players are chosen per file type: aplay/paplay/ffplay for wav, mpg123 for
//! mp3, ogg123 for ogg, ffplay for anything else and for streams. HERALD_PLAYER
//! overrides the choice for every file when that binary is available.

use crate::error::{AudioError, AudioResult};
use crate::utils::get_from_path;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// A live playback that can be waited on and controlled
#[async_trait]
pub trait PlaybackHandle: Send {
    /// Resolves when playback ends. Cancel-safe.
    async fn wait(&mut self) -> AudioResult<()>;

    /// Ask playback to stop, forcing it after `grace`
    async fn terminate(&mut self, grace: Duration);

    fn pause(&mut self) -> AudioResult<()>;

    fn resume(&mut self) -> AudioResult<()>;
}

/// Audio output collaborator
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Start playing a local path or stream URI
    async fn play(&self, source: &str) -> AudioResult<Box<dyn PlaybackHandle>>;
}

#[derive(Default)]
pub struct CommandOutput {
    preferred: Option<String>,
}

impl CommandOutput {
    pub fn new() -> Self {
        Self {
            preferred: std::env::var("HERALD_PLAYER").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn with_player(player: &str) -> Self {
        Self {
            preferred: Some(player.to_string()),
        }
    }

    fn select_player(&self, source: &str) -> Option<PathBuf> {
        if let Some(p) = self.preferred.as_deref().and_then(get_from_path) {
            return Some(p);
        }
        let is_stream = source.contains("://") && !source.starts_with("file://");
        let ext = source
            .rsplit('.')
            .next()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let candidates: &[&str] = match ext.as_str() {
            _ if is_stream => &["ffplay", "mpg123"],
            "wav" => &["aplay", "paplay", "ffplay"],
            "mp3" => &["mpg123", "ffplay"],
            "ogg" => &["ogg123", "ffplay"],
            _ => &["ffplay"],
        };
        candidates.iter().find_map(|c| get_from_path(c))
    }
}

fn player_args(player: &std::path::Path, source: &str) -> Vec<String> {
    let name = player.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let mut args = Vec::new();
    match name {
        "ffplay" => {
            args.extend(["-autoexit", "-nodisp", "-loglevel", "quiet"].map(String::from));
        }
        "mpg123" | "ogg123" => args.push("-q".into()),
        _ => {}
    }
    args.push(source.trim_start_matches("file://").to_string());
    args
}

#[async_trait]
impl AudioOutput for CommandOutput {
    async fn play(&self, source: &str) -> AudioResult<Box<dyn PlaybackHandle>> {
        let player = self
            .select_player(source)
            .ok_or_else(|| AudioError::Playback(format!("no player available for {}", source)))?;
        let mut cmd = Command::new(&player);
        cmd.args(player_args(&player, source))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        debug!(target: "playback", player = ?player, source = %source, "Starting player");
        let child = cmd.spawn()?;
        Ok(Box::new(ProcessHandle {
            child,
            player: player.to_string_lossy().to_string(),
        }))
    }
}

pub struct ProcessHandle {
    child: Child,
    player: String,
}

impl ProcessHandle {
    #[cfg(unix)]
    fn signal(&self, sig: libc::c_int) -> AudioResult<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

#[async_trait]
impl PlaybackHandle for ProcessHandle {
    async fn wait(&mut self) -> AudioResult<()> {
        let status = self.child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(AudioError::Playback(format!("{} exited with {}", self.player, status)))
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            // A stopped process cannot act on SIGTERM
            let _ = self.signal(libc::SIGCONT);
            if self.signal(libc::SIGTERM).is_ok()
                && timeout(grace, self.child.wait()).await.is_ok()
            {
                return;
            }
        }
        #[cfg(not(unix))]
        let _ = grace;
        if let Err(e) = self.child.kill().await {
            warn!(target: "playback", error = %e, player = %self.player, "Failed to kill player");
        }
    }

    fn pause(&mut self) -> AudioResult<()> {
        #[cfg(unix)]
        return self.signal(libc::SIGSTOP);
        #[cfg(not(unix))]
        Err(AudioError::Playback("pause is not supported on this platform".into()))
    }

    fn resume(&mut self) -> AudioResult<()> {
        #[cfg(unix)]
        return self.signal(libc::SIGCONT);
        #[cfg(not(unix))]
        Err(AudioError::Playback("resume is not supported on this platform".into()))
    }
}
