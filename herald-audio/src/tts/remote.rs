//! HTTP synthesis backend for a remote TTS server.
//!
//! POSTs `{text, lang, gender, voice}` as JSON to `url` and stores the response
//! body as audio. A `x-phonemes` response header, when present, is returned as
//! the phoneme string. Connection failures, timeouts and gateway errors are
//! transient so the fallback engine can take over.

use super::traits::TtsBackend;
use crate::config::ModuleOptions;
use crate::error::{AudioError, AudioResult};
use crate::resolver::VoiceRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
    engine_id: String,
    ext: String,
}

impl RemoteBackend {
    pub fn new(options: &ModuleOptions) -> AudioResult<Self> {
        let url = options
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| std::env::var("HERALD_REMOTE_TTS_URL").ok())
            .ok_or_else(|| AudioError::Validation("remote TTS requires a `url` option".into()))?;
        let timeout_ms = options
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(10_000);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AudioError::Synthesis(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            url,
            engine_id: options
                .get("engine_id")
                .and_then(Value::as_str)
                .unwrap_or("remote")
                .to_string(),
            ext: options
                .get("ext")
                .and_then(Value::as_str)
                .unwrap_or("wav")
                .to_string(),
        })
    }
}

fn classify(e: reqwest::Error) -> AudioError {
    if e.is_timeout() || e.is_connect() {
        AudioError::TransientSynthesis(e.to_string())
    } else {
        AudioError::Synthesis(e.to_string())
    }
}

#[async_trait]
impl TtsBackend for RemoteBackend {
    fn engine_id(&self) -> &str {
        &self.engine_id
    }

    fn audio_ext(&self) -> &str {
        &self.ext
    }

    async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
        out: &Path,
    ) -> AudioResult<Option<String>> {
        let body = json!({
            "text": sentence,
            "lang": voice.language,
            "gender": voice.gender,
            "voice": voice.voice,
        });
        debug!(target: "tts", url = %self.url, "Requesting remote synthesis");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let msg = format!("remote TTS returned {}", status);
            return Err(if status.is_server_error() {
                AudioError::TransientSynthesis(msg)
            } else {
                AudioError::Synthesis(msg)
            });
        }

        let phonemes = resp
            .headers()
            .get("x-phonemes")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(classify)?;
        tokio::fs::write(out, &bytes).await?;
        Ok(phonemes)
    }
}
