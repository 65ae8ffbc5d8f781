//! Voice-request resolution: which (language, gender, voice) renditions an
//! utterance needs, derived from the request's routing context.

use crate::config::UserSpeechPrefs;
use herald_core::{Event, EventExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const DEFAULT_LANGUAGE: &str = "en-us";
pub const DEFAULT_GENDER: &str = "female";

/// One rendition of an utterance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceRequest {
    pub speaker: String,
    pub language: String,
    pub gender: String,
    pub voice: Option<String>,
}

/// Routing information carried by a `speak` event
#[derive(Clone, Debug, Default)]
pub struct RoutingContext {
    pub destination: Option<Vec<String>>,
    /// Explicit speaker override from the event data
    pub speaker: Option<Value>,
    /// Listener profiles keyed by nickname
    pub profiles: Option<Map<String, Value>>,
    /// The response is delivered to a remote client instead of played locally
    pub remote_response: bool,
}

impl RoutingContext {
    pub fn from_event(event: &Event) -> Self {
        let profiles = match event.context.get("nick_profiles") {
            Some(Value::Object(m)) if !m.is_empty() => Some(m.clone()),
            Some(Value::Object(_)) | None | Some(Value::Null) => None,
            Some(other) => {
                warn!(target: "speech", profiles = %other, "Ignoring malformed nick_profiles");
                None
            }
        };
        Self {
            destination: event.destinations(),
            speaker: event
                .data_field("speaker")
                .filter(|v| !v.is_null())
                .cloned(),
            profiles,
            remote_response: event
                .context
                .get("klat_data")
                .map(|v| !v.is_null())
                .unwrap_or(false),
        }
    }

    /// Untargeted events and events targeted at `audio` are handled here
    pub fn targets_audio(&self) -> bool {
        match &self.destination {
            None => true,
            Some(d) => d.iter().any(|x| x == "audio"),
        }
    }
}

/// A `speak` request as consumed by the pipeline
#[derive(Clone, Debug)]
pub struct UtteranceRequest {
    pub text: String,
    pub ident: Option<String>,
    /// Trigger listening once the utterance has been spoken
    pub listen: bool,
    pub routing: RoutingContext,
    pub source: Event,
}

impl UtteranceRequest {
    pub fn from_event(event: &Event) -> Self {
        let text = event
            .data_str("utterance")
            .or_else(|| event.data_str("text"))
            .unwrap_or_default()
            .to_string();
        Self {
            text,
            ident: event.ident(),
            listen: event
                .data_field("expect_response")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            routing: RoutingContext::from_event(event),
            source: event.clone(),
        }
    }
}

/// Resolve the ordered, de-duplicated voice requests for a routing context.
///
/// Precedence: explicit speaker, then listener profiles, then `defaults`.
/// Never returns an empty list.
pub fn resolve(
    routing: &RoutingContext,
    defaults: &UserSpeechPrefs,
    speaker_name: &str,
) -> Vec<VoiceRequest> {
    let mut requests = Vec::new();

    let from_speaker = routing
        .speaker
        .as_ref()
        .and_then(|s| speaker_request(s, speaker_name));

    if let Some(req) = from_speaker {
        debug!(target: "speech", speaker = %req.speaker, "Using explicit speaker");
        requests.push(req);
    } else if let Some(profiles) = &routing.profiles {
        for (nick, profile) in profiles {
            let Some(obj) = profile.as_object() else {
                warn!(target: "speech", nick = %nick, "Profile is not an object; skipped");
                continue;
            };
            // Newer profiles nest preferences under `speech`
            let prefs = obj.get("speech").and_then(Value::as_object).unwrap_or(obj);
            profile_requests(prefs, speaker_name, &mut requests);
        }
    } else {
        default_requests(defaults, speaker_name, &mut requests);
    }

    let mut deduped: Vec<VoiceRequest> = Vec::with_capacity(requests.len());
    for req in requests {
        if !deduped.contains(&req) {
            deduped.push(req);
        }
    }

    if deduped.is_empty() {
        deduped.push(VoiceRequest {
            speaker: speaker_name.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            gender: DEFAULT_GENDER.to_string(),
            voice: None,
        });
    }
    debug!(target: "speech", count = deduped.len(), "Resolved voice requests");
    deduped
}

fn speaker_request(speaker: &Value, speaker_name: &str) -> Option<VoiceRequest> {
    let obj = match speaker.as_object() {
        Some(o) => o,
        None => {
            warn!(target: "speech", speaker = %speaker, "Speaker is not an object; ignored");
            return None;
        }
    };
    let Some(language) = non_empty_str(obj, "language") else {
        warn!(target: "speech", "Speaker has no language; ignored");
        return None;
    };
    Some(VoiceRequest {
        speaker: non_empty_str(obj, "name").unwrap_or(speaker_name).to_string(),
        language: language.to_lowercase(),
        gender: non_empty_str(obj, "gender")
            .unwrap_or(DEFAULT_GENDER)
            .to_string(),
        voice: non_empty_str(obj, "voice").map(str::to_string),
    })
}

fn profile_requests(prefs: &Map<String, Value>, speaker_name: &str, out: &mut Vec<VoiceRequest>) {
    let language = non_empty_str(prefs, "tts_language").unwrap_or(DEFAULT_LANGUAGE);
    out.push(VoiceRequest {
        speaker: speaker_name.to_string(),
        language: language.to_lowercase(),
        gender: non_empty_str(prefs, "tts_gender")
            .unwrap_or(DEFAULT_GENDER)
            .to_string(),
        voice: None,
    });
    if let Some(secondary) = non_empty_str(prefs, "secondary_tts_language") {
        if !secondary.eq_ignore_ascii_case(language) {
            out.push(VoiceRequest {
                speaker: speaker_name.to_string(),
                language: secondary.to_lowercase(),
                gender: non_empty_str(prefs, "secondary_tts_gender")
                    .unwrap_or(DEFAULT_GENDER)
                    .to_string(),
                voice: None,
            });
        }
    }
}

fn default_requests(prefs: &UserSpeechPrefs, speaker_name: &str, out: &mut Vec<VoiceRequest>) {
    if prefs.tts_language.trim().is_empty() {
        warn!(target: "speech", "Default tts_language is empty");
        return;
    }
    out.push(VoiceRequest {
        speaker: speaker_name.to_string(),
        language: prefs.tts_language.to_lowercase(),
        gender: prefs.tts_gender.clone(),
        voice: prefs.voice.clone(),
    });
    if let Some(secondary) = prefs.secondary_tts_language.as_deref() {
        if !secondary.is_empty() && !secondary.eq_ignore_ascii_case(&prefs.tts_language) {
            out.push(VoiceRequest {
                speaker: speaker_name.to_string(),
                language: secondary.to_lowercase(),
                gender: prefs
                    .secondary_tts_gender
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GENDER.to_string()),
                voice: prefs.secondary_voice.clone(),
            });
        }
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
