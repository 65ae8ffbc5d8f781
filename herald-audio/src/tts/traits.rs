use crate::error::AudioResult;
use crate::resolver::VoiceRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One mouth shape and the time (seconds from item start) it ends
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viseme {
    pub code: String,
    pub end: f64,
}

/// A text-to-speech engine.
///
/// Backends only turn text into an audio file. Markup validation,
/// translation and caching are layered on top by `SynthesisEngine`.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Identifier used in cache paths and logs
    fn engine_id(&self) -> &str;

    fn audio_ext(&self) -> &str {
        "wav"
    }

    /// Markup tags the engine understands. Empty means plain text only.
    fn ssml_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Rewrite a supported tag into the engine's dialect
    fn modify_tag(&self, tag: &str) -> String {
        tag.to_string()
    }

    /// Write audio for `sentence` to `out`, returning phonemes when the
    /// engine produces them.
    async fn synthesize(
        &self,
        sentence: &str,
        voice: &VoiceRequest,
        out: &Path,
    ) -> AudioResult<Option<String>>;

    /// Mouth shapes for the phoneme string returned by `synthesize`.
    ///
    /// The default understands timed `phone:end` pairs separated by spaces.
    fn visemes(&self, phonemes: &str) -> Option<Vec<Viseme>> {
        timed_phonemes_to_visemes(phonemes)
    }
}

/// Translation collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str, source: &str) -> AudioResult<String>;
}

/// Returns text unchanged; used when no translation service is configured
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str, _target: &str, _source: &str) -> AudioResult<String> {
        Ok(text.to_string())
    }
}

fn viseme_code(phone: &str) -> &'static str {
    match phone {
        "v" | "f" => "5",
        "uh" | "w" | "uw" | "er" | "r" | "ow" => "2",
        "b" | "p" | "m" | "pau" => "4",
        "aw" => "1",
        "th" | "dh" | "zh" | "ch" | "sh" | "jh" | "z" | "s" => "3",
        "n" | "t" | "d" | "l" | "g" | "ng" | "k" => "3",
        "oy" | "ao" => "6",
        "ae" | "eh" | "ey" | "ah" | "ih" | "y" | "iy" | "aa" | "ay" | "ax" | "hh" => "0",
        _ => "4",
    }
}

/// Parse `phone:end phone:end ...`. Any malformed pair rejects the whole string.
pub fn timed_phonemes_to_visemes(phonemes: &str) -> Option<Vec<Viseme>> {
    let mut out = Vec::new();
    for pair in phonemes.split_whitespace() {
        let (phone, end) = pair.split_once(':')?;
        let end: f64 = end.parse().ok()?;
        out.push(Viseme {
            code: viseme_code(&phone.to_lowercase()).to_string(),
            end,
        });
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
