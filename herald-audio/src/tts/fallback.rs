use super::engine::LanguageResponse;
use super::pipeline::SpeechPipeline;
use crate::error::AudioResult;
use crate::resolver::{UtteranceRequest, VoiceRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Primary pipeline with a single-shot local fallback.
///
/// Only connectivity/timeout failures of the primary are retried, and only
/// once; a failing fallback is reported as is.
pub struct FallbackController {
    primary: Arc<SpeechPipeline>,
    fallback: Option<Arc<SpeechPipeline>>,
}

impl FallbackController {
    pub fn new(primary: Arc<SpeechPipeline>, fallback: Option<Arc<SpeechPipeline>>) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &Arc<SpeechPipeline> {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&Arc<SpeechPipeline>> {
        self.fallback.as_ref()
    }

    fn pipelines(&self) -> impl Iterator<Item = &Arc<SpeechPipeline>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }

    pub async fn execute(
        &self,
        request: &UtteranceRequest,
        voices: &[VoiceRequest],
    ) -> AudioResult<usize> {
        match self.primary.execute(request, voices).await {
            Err(e) if e.is_transient() => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                warn!(
                    target: "tts",
                    error = %e,
                    fallback = %fallback.engine().engine_id(),
                    "Primary engine unreachable; using fallback"
                );
                fallback.execute(request, voices).await.map_err(|fe| {
                    error!(target: "tts", error = %fe, "Fallback engine failed");
                    fe
                })
            }
            other => other,
        }
    }

    pub async fn get_multiple_tts(
        &self,
        sentence: &str,
        voices: &[VoiceRequest],
    ) -> AudioResult<BTreeMap<String, LanguageResponse>> {
        match self.primary.get_multiple_tts(sentence, voices).await {
            Err(e) if e.is_transient() => match &self.fallback {
                Some(fallback) => {
                    warn!(target: "tts", error = %e, "Primary engine unreachable; using fallback");
                    fallback.get_multiple_tts(sentence, voices).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    /// Whether any pipeline is currently playing
    pub fn is_speaking(&self) -> bool {
        self.pipelines().any(|p| p.playback().is_speaking())
    }

    /// Drop queued speech and stop the current item on every pipeline
    pub async fn clear(&self) {
        for p in self.pipelines() {
            p.playback().clear().await;
        }
    }

    pub async fn shutdown(&self) {
        for p in self.pipelines() {
            p.shutdown().await;
        }
    }
}
