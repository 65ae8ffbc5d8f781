use super::engine::{LanguageResponse, SynthesisEngine, SynthesisOutput};
use crate::error::AudioResult;
use crate::playback::{PlaybackItem, PlaybackThread};
use crate::resolver::{UtteranceRequest, VoiceRequest};
use crate::topics;
use herald_core::{EventBus, EventExt};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A synthesis engine paired with its own playback queue
pub struct SpeechPipeline {
    engine: SynthesisEngine,
    playback: PlaybackThread,
    bus: Arc<EventBus>,
}

impl SpeechPipeline {
    pub fn new(engine: SynthesisEngine, playback: PlaybackThread, bus: Arc<EventBus>) -> Self {
        Self {
            engine,
            playback,
            bus,
        }
    }

    pub fn engine(&self) -> &SynthesisEngine {
        &self.engine
    }

    pub fn playback(&self) -> &PlaybackThread {
        &self.playback
    }

    /// Synthesize every voice of the request, then enqueue the renditions in
    /// order. Returns the number of items enqueued.
    ///
    /// All synthesis happens before anything is enqueued, so a failing voice
    /// leaves the queue untouched.
    pub async fn execute(
        &self,
        request: &UtteranceRequest,
        voices: &[VoiceRequest],
    ) -> AudioResult<usize> {
        let mut outputs: Vec<SynthesisOutput> = Vec::with_capacity(voices.len());
        for voice in voices {
            outputs.push(self.engine.synthesize(&request.text, voice).await?);
        }

        if request.routing.remote_response {
            self.emit_remote_response(request, &outputs).await;
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let unique: Vec<&SynthesisOutput> = outputs
            .iter()
            .filter(|o| seen.insert(o.audio.path.clone()))
            .collect();
        let count = unique.len();

        for (i, out) in unique.into_iter().enumerate() {
            let item = PlaybackItem {
                audio: out.audio.path.clone(),
                visemes: self.engine.visemes(out.audio.phonemes.as_deref()),
                listen: request.listen && i + 1 == count,
                ident: request.ident.clone(),
                source: Some(request.source.clone()),
            };
            self.playback.enqueue(item).await;
        }
        debug!(target: "tts", engine = %self.engine.engine_id(), items = count, "Enqueued utterance");
        Ok(count)
    }

    pub async fn get_multiple_tts(
        &self,
        sentence: &str,
        voices: &[VoiceRequest],
    ) -> AudioResult<BTreeMap<String, LanguageResponse>> {
        self.engine.get_multiple_tts(sentence, voices).await
    }

    async fn emit_remote_response(&self, request: &UtteranceRequest, outputs: &[SynthesisOutput]) {
        let responses = LanguageResponse::collect(outputs);
        let speaker = request.routing.speaker.clone().unwrap_or_else(|| {
            outputs
                .first()
                .map(|o| {
                    json!({
                        "name": o.voice.speaker,
                        "language": o.voice.language,
                        "gender": o.voice.gender,
                        "voice": o.voice.voice,
                    })
                })
                .unwrap_or_default()
        });
        let event = request.source.forward(
            topics::REMOTE_RESPONSE,
            json!({"responses": responses, "speaker": speaker}),
        );
        if let Err(e) = self.bus.emit(event).await {
            warn!(target: "tts", error = %e, "Failed to emit remote response");
        }
    }

    /// Stop the playback task
    pub async fn shutdown(&self) {
        self.playback.stop().await;
        self.playback.join().await;
    }
}
