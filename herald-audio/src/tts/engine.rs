//! Synthesis engine: wraps a backend with markup validation, translation and
//! the shared caches.

use super::ssml::validate_ssml;
use super::traits::{Translator, TtsBackend, Viseme};
use crate::cache::{CachedAudio, SynthesisCache, SynthesisKey, TranslationCache};
use crate::error::{AudioError, AudioResult};
use crate::resolver::VoiceRequest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SynthesisOutput {
    /// Sentence actually synthesized (validated, possibly translated)
    pub sentence: String,
    pub translated: bool,
    pub voice: VoiceRequest,
    pub audio: CachedAudio,
    pub cache_hit: bool,
}

/// Per-language entry of a multi-voice synthesis response
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LanguageResponse {
    pub sentence: String,
    pub translated: bool,
    pub phonemes: Option<String>,
    /// Gender of the first rendition for this language
    pub gender: String,
    /// Audio path per gender
    #[serde(flatten)]
    pub audio: BTreeMap<String, String>,
}

impl LanguageResponse {
    /// Group synthesis outputs by language; later genders of the same
    /// language are merged into the existing entry.
    pub fn collect(outputs: &[SynthesisOutput]) -> BTreeMap<String, LanguageResponse> {
        let mut responses: BTreeMap<String, LanguageResponse> = BTreeMap::new();
        for out in outputs {
            let path = out.audio.path.to_string_lossy().to_string();
            responses
                .entry(out.voice.language.clone())
                .and_modify(|r| {
                    r.audio.entry(out.voice.gender.clone()).or_insert_with(|| path.clone());
                })
                .or_insert_with(|| LanguageResponse {
                    sentence: out.sentence.clone(),
                    translated: out.translated,
                    phonemes: out.audio.phonemes.clone(),
                    gender: out.voice.gender.clone(),
                    audio: BTreeMap::from([(out.voice.gender.clone(), path.clone())]),
                });
        }
        responses
    }
}

pub struct SynthesisEngine {
    backend: Arc<dyn TtsBackend>,
    /// Language utterances arrive in
    lang: String,
    translator: Arc<dyn Translator>,
    audio_cache: Arc<SynthesisCache>,
    tx_cache: Arc<TranslationCache>,
}

fn primary_subtag(lang: &str) -> String {
    lang.split(['-', '_'])
        .next()
        .unwrap_or(lang)
        .to_lowercase()
}

impl SynthesisEngine {
    pub fn new(
        backend: Arc<dyn TtsBackend>,
        lang: &str,
        translator: Arc<dyn Translator>,
        audio_cache: Arc<SynthesisCache>,
        tx_cache: Arc<TranslationCache>,
    ) -> Self {
        Self {
            backend,
            lang: lang.to_lowercase(),
            translator,
            audio_cache,
            tx_cache,
        }
    }

    pub fn engine_id(&self) -> &str {
        self.backend.engine_id()
    }

    pub fn backend(&self) -> &Arc<dyn TtsBackend> {
        &self.backend
    }

    pub fn visemes(&self, phonemes: Option<&str>) -> Option<Vec<Viseme>> {
        phonemes.and_then(|p| self.backend.visemes(p))
    }

    /// Produce (or reuse) audio for one voice rendition of `sentence`.
    pub async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
    ) -> AudioResult<SynthesisOutput> {
        let backend = &self.backend;
        let validated = validate_ssml(sentence, &backend.ssml_tags(), |t| backend.modify_tag(t));
        let (sentence, translated) = self.translate_for(&validated, &voice.language).await?;

        let key = SynthesisKey::new(
            backend.engine_id(),
            &voice.language,
            &voice.gender,
            &sentence,
            backend.audio_ext(),
        );
        if let Some(audio) = self.audio_cache.lookup(&key) {
            return Ok(SynthesisOutput {
                sentence,
                translated,
                voice: voice.clone(),
                audio,
                cache_hit: true,
            });
        }

        let staged = self.audio_cache.staging_path(&key)?;
        let started = Instant::now();
        let phonemes = match backend.synthesize(&sentence, voice, &staged).await {
            Ok(p) => p,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged).await;
                warn!(target: "tts", engine = %backend.engine_id(), error = %e, "Synthesis failed");
                return Err(e);
            }
        };
        let audio = self.audio_cache.store(&key, &staged, phonemes.as_deref())?;
        info!(
            target: "tts",
            engine = %backend.engine_id(),
            lang = %voice.language,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesized sentence"
        );

        Ok(SynthesisOutput {
            sentence,
            translated,
            voice: voice.clone(),
            audio,
            cache_hit: false,
        })
    }

    /// Synthesize every voice and group the results per language
    pub async fn get_multiple_tts(
        &self,
        sentence: &str,
        voices: &[VoiceRequest],
    ) -> AudioResult<BTreeMap<String, LanguageResponse>> {
        let mut outputs = Vec::with_capacity(voices.len());
        for voice in voices {
            outputs.push(self.synthesize(sentence, voice).await?);
        }
        Ok(LanguageResponse::collect(&outputs))
    }

    async fn translate_for(&self, sentence: &str, target: &str) -> AudioResult<(String, bool)> {
        if primary_subtag(target) == primary_subtag(&self.lang) {
            return Ok((sentence.to_string(), false));
        }
        if let Some(hit) = self.tx_cache.lookup(target, sentence) {
            debug!(target: "tts", lang = %target, "Translation cache hit");
            return Ok((hit, true));
        }
        let translated = self
            .translator
            .translate(sentence, target, &self.lang)
            .await
            .map_err(|e| match e {
                AudioError::Translation(_) => e,
                other => AudioError::Translation(other.to_string()),
            })?;
        if let Err(e) = self.tx_cache.store(target, sentence, &translated) {
            warn!(target: "cache", error = %e, "Failed to persist translation");
        }
        Ok((translated, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::traits::MockTranslator;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TtsBackend for CountingBackend {
        fn engine_id(&self) -> &str {
            "counting"
        }

        async fn synthesize(
            &self,
            sentence: &str,
            _voice: &VoiceRequest,
            out: &Path,
        ) -> AudioResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(out, sentence.as_bytes()).await?;
            Ok(Some("hh:0.1 ay:0.2".into()))
        }
    }

    fn voice(lang: &str, gender: &str) -> VoiceRequest {
        VoiceRequest {
            speaker: "Herald".into(),
            language: lang.into(),
            gender: gender.into(),
            voice: None,
        }
    }

    fn engine(
        root: &Path,
        translator: MockTranslator,
    ) -> (SynthesisEngine, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let engine = SynthesisEngine::new(
            backend.clone(),
            "en-us",
            Arc::new(translator),
            Arc::new(SynthesisCache::new(root)),
            Arc::new(TranslationCache::open(root)),
        );
        (engine, backend)
    }

    #[tokio::test]
    async fn second_synthesis_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let (engine, backend) = engine(dir.path(), translator);

        let first = engine.synthesize("hello there", &voice("en-us", "female")).await.unwrap();
        let second = engine.synthesize("hello there", &voice("en-us", "female")).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.audio.path, second.audio.path);
        assert_eq!(second.audio.phonemes.as_deref(), Some("hh:0.1 ay:0.2"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_language_is_translated_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(1)
            .returning(|_, _, _| Ok("hola".to_string()));
        let (engine, backend) = engine(dir.path(), translator);

        let out = engine.synthesize("hello", &voice("es-es", "male")).await.unwrap();
        assert!(out.translated);
        assert_eq!(out.sentence, "hola");

        let again = engine.synthesize("hello", &voice("es-es", "male")).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn regional_variant_is_not_translated() {
        let dir = tempfile::tempdir().unwrap();
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let (engine, _) = engine(dir.path(), translator);

        let out = engine.synthesize("colour", &voice("en-gb", "female")).await.unwrap();
        assert!(!out.translated);
    }

    #[tokio::test]
    async fn genders_merge_per_language() {
        let dir = tempfile::tempdir().unwrap();
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let (engine, _) = engine(dir.path(), translator);

        let map = engine
            .get_multiple_tts("hi", &[voice("en-us", "female"), voice("en-us", "male")])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        let entry = &map["en-us"];
        assert_eq!(entry.gender, "female");
        assert!(entry.audio.contains_key("female"));
        assert!(entry.audio.contains_key("male"));

        let json = serde_json::to_value(entry).unwrap();
        assert_eq!(json["sentence"], "hi");
        assert!(json["male"].is_string());
    }
}
