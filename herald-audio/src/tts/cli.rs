//! Local command-line synthesis engines.
//!
//! - `piper`: higher quality, needs a voice model (`voice`, `voice_dir` options
//!   or PIPER_VOICE / PIPER_VOICE_DIR)
//! - `espeak-ng`: widely available, voice chosen from the request language
//!
//! Binaries are located once at construction (PIPER_BIN, ESPEAK_BIN or PATH).
//! A missing binary is reported when synthesis is attempted, not at startup.

use super::traits::TtsBackend;
use crate::config::ModuleOptions;
use crate::error::{AudioError, AudioResult};
use crate::resolver::VoiceRequest;
use crate::utils::{env_or, get_from_env_or_path, get_from_path};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

fn opt_str<'a>(options: &'a ModuleOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn opt_f32(options: &ModuleOptions, key: &str, default: f32) -> f32 {
    options
        .get(key)
        .and_then(Value::as_f64)
        .map(|f| f as f32)
        .unwrap_or(default)
}

fn synth_timeout(options: &ModuleOptions) -> Duration {
    let ms = options
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| env_or("TTS_TIMEOUT_MS", 20_000));
    Duration::from_millis(ms)
}

/// Run a synthesizer process with a deadline. The child is killed when the
/// deadline passes, so a late process never writes into the cache tree.
async fn run_bounded(
    engine: &str,
    limit: Duration,
    mut cmd: Command,
    input: Option<String>,
) -> AudioResult<()> {
    cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(target: "tts", engine = %engine, command = ?cmd, "Running synthesizer");
    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take();

    let run = async move {
        if let (Some(text), Some(mut stdin)) = (input, stdin) {
            stdin.write_all(text.as_bytes()).await?;
            // EOF tells the engine the text is complete
            drop(stdin);
        }
        child.wait_with_output().await
    };

    match timeout(limit, run).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(AudioError::Synthesis(format!(
            "{} failed: {}",
            engine,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(AudioError::TransientSynthesis(format!(
            "{} timed out after {} ms",
            engine,
            limit.as_millis()
        ))),
    }
}

pub struct PiperBackend {
    bin: Option<PathBuf>,
    voice: Option<PathBuf>,
    voice_dir: Option<PathBuf>,
    rate: f32,
    sample_rate: u32,
    timeout: Duration,
}

impl PiperBackend {
    pub fn new(options: &ModuleOptions) -> Self {
        let bin = opt_str(options, "bin")
            .and_then(get_from_path)
            .or_else(|| get_from_env_or_path("PIPER_BIN", "piper"));
        match &bin {
            Some(p) => info!(target: "tts", bin = ?p, "Detected Piper binary"),
            None => warn!(target: "tts", "Piper binary not found"),
        }
        Self {
            bin,
            voice: opt_str(options, "voice")
                .map(PathBuf::from)
                .or_else(|| std::env::var("PIPER_VOICE").ok().map(PathBuf::from)),
            voice_dir: opt_str(options, "voice_dir")
                .map(PathBuf::from)
                .or_else(|| std::env::var("PIPER_VOICE_DIR").ok().map(PathBuf::from)),
            rate: opt_f32(options, "rate", 1.0),
            sample_rate: options
                .get("sample_rate")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(22_050),
            timeout: synth_timeout(options),
        }
    }

    /// Voice model for a request: explicit request voice, then configured
    /// model, then `<voice_dir>/<language>-<gender>` and `<voice_dir>/<language>`.
    fn resolve_voice(&self, voice: &VoiceRequest) -> Option<PathBuf> {
        if let Some(name) = &voice.voice {
            let p = PathBuf::from(name);
            if p.exists() {
                return Some(p);
            }
            if let Some(found) = self.find_in_dir(name) {
                return Some(found);
            }
        }
        if let Some(v) = &self.voice {
            return Some(v.clone());
        }
        self.find_in_dir(&format!("{}-{}", voice.language, voice.gender))
            .or_else(|| self.find_in_dir(&voice.language))
    }

    fn find_in_dir(&self, name: &str) -> Option<PathBuf> {
        let dir = self.voice_dir.as_ref()?;
        let candidate = dir.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
        ["onnx", "onnx.gz", "pt", "pth"]
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .find(|c| c.exists())
    }
}

#[async_trait]
impl TtsBackend for PiperBackend {
    fn engine_id(&self) -> &str {
        "piper"
    }

    async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
        out: &Path,
    ) -> AudioResult<Option<String>> {
        let piper = self
            .bin
            .clone()
            .ok_or_else(|| AudioError::Synthesis("Piper binary not found".into()))?;
        let model = self.resolve_voice(voice).ok_or_else(|| {
            AudioError::Synthesis(format!(
                "No Piper voice for {} / {}; set PIPER_VOICE or voice_dir",
                voice.language, voice.gender
            ))
        })?;

        let mut cmd = Command::new(piper);
        cmd.arg("-m").arg(model);
        cmd.arg("-f").arg(out);
        let length_scale = (1.0f32 / self.rate).clamp(0.5, 2.0);
        cmd.arg("--length_scale").arg(format!("{:.2}", length_scale));
        cmd.arg("--sample_rate").arg(self.sample_rate.to_string());
        run_bounded("piper", self.timeout, cmd, Some(sentence.to_string())).await?;
        Ok(None)
    }
}

pub struct EspeakBackend {
    bin: Option<PathBuf>,
    rate: f32,
    volume: f32,
    timeout: Duration,
}

impl EspeakBackend {
    pub fn new(options: &ModuleOptions) -> Self {
        let bin = opt_str(options, "bin")
            .and_then(get_from_path)
            .or_else(|| get_from_env_or_path("ESPEAK_BIN", "espeak-ng"))
            .or_else(|| get_from_path("espeak"));
        match &bin {
            Some(p) => info!(target: "tts", bin = ?p, "Detected espeak-ng binary"),
            None => warn!(target: "tts", "espeak-ng binary not found"),
        }
        Self {
            bin,
            rate: opt_f32(options, "rate", 1.0),
            volume: opt_f32(options, "volume", 1.0),
            timeout: synth_timeout(options),
        }
    }
}

#[async_trait]
impl TtsBackend for EspeakBackend {
    fn engine_id(&self) -> &str {
        "espeak-ng"
    }

    fn ssml_tags(&self) -> Vec<String> {
        ["speak", "say-as", "voice", "prosody", "break", "emphasis", "sub"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
        out: &Path,
    ) -> AudioResult<Option<String>> {
        let espeak = self
            .bin
            .clone()
            .ok_or_else(|| AudioError::Synthesis("espeak-ng not found".into()))?;

        let mut cmd = Command::new(espeak);
        let wpm = (160.0 * self.rate).round().clamp(80.0, 450.0) as i32;
        let amp = (100.0 * self.volume).round().clamp(50.0, 200.0) as i32;
        let code = voice.voice.as_deref().unwrap_or(&voice.language);
        let variant = if voice.gender == "male" { "+m3" } else { "+f3" };
        cmd.arg("-v").arg(format!("{}{}", code, variant));
        cmd.arg("-m");
        cmd.arg("-s").arg(wpm.to_string());
        cmd.arg("-a").arg(amp.to_string());
        cmd.arg("-w").arg(out);
        cmd.arg(sentence);
        run_bounded("espeak-ng", self.timeout, cmd, None).await?;
        Ok(None)
    }
}
