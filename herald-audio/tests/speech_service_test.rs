//! Speech service over the bus: speak, get_tts, stop, mute and reload.

mod common;

use async_trait::async_trait;
use common::{new_bus, FakeOutput, FakeTts, Recorder, TtsFailure};
use herald_audio::{
    topics, AudioResult, NoopTranslator, SpeechConfig, SpeechService, Translator, TtsBackend,
    TtsRegistry,
};
use herald_core::{Event, EventBus};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const WAIT: Duration = Duration::from_secs(3);

/// Prefixes the target language so translated sentences are recognisable
struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, target: &str, _source: &str) -> AudioResult<String> {
        Ok(format!("[{}] {}", target, text))
    }
}

fn config(cache_root: &Path) -> SpeechConfig {
    SpeechConfig {
        module: "fake".into(),
        fallback_module: None,
        lang: "en-us".into(),
        cache_root: cache_root.to_path_buf(),
        api_namespace: "neon".into(),
        completion_timeout_ms: 5_000,
        stop_grace_ms: 10,
        ..SpeechConfig::default()
    }
}

struct Harness {
    bus: Arc<EventBus>,
    service: Arc<SpeechService>,
    tts: Arc<FakeTts>,
    output: Arc<FakeOutput>,
    dir: tempfile::TempDir,
}

async fn harness(track_len: Duration, translator: Arc<dyn Translator>) -> AudioResult<Harness> {
    let dir = tempfile::tempdir()?;
    let bus = new_bus().await;
    let tts = FakeTts::new("fake");
    let output = FakeOutput::new(track_len);

    let registry = TtsRegistry::new();
    let engine = tts.clone();
    registry.register("fake", move |_| Ok(engine.clone() as Arc<dyn TtsBackend>));

    let service = Arc::new(SpeechService::new(
        bus.clone(),
        config(dir.path()),
        Arc::new(registry),
        output.clone(),
        translator,
    )?);
    service.start().await?;
    Ok(Harness {
        bus,
        service,
        tts,
        output,
        dir,
    })
}

fn ctx(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

fn speak(text: &str, context: Value) -> Event {
    Event::new(topics::SPEAK, json!({"utterance": text})).with_context(ctx(context))
}

// =============================================================================
// get_tts
// =============================================================================

#[tokio::test]
async fn get_tts_returns_audio_per_language() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["123"]).await;

    let request = Event::new("neon.get_tts", json!({"text": "This is a test"}))
        .with_context(ctx(json!({"ident": "123", "source": "client"})));
    h.bus.emit(request).await?;

    let reply = rec.next("123", WAIT).await.expect("reply");
    let responses = reply.data.as_object().expect("object");
    assert_eq!(responses.keys().collect::<Vec<_>>(), vec!["en-us"]);
    let en = &responses["en-us"];
    assert_eq!(en["sentence"], "This is a test");
    assert_eq!(en["translated"], false);
    assert_eq!(en["gender"], "female");
    let path = en["female"].as_str().expect("audio path");
    assert!(Path::new(path).exists());
    assert_eq!(reply.context["destination"], "client");
    // Nothing is played for direct synthesis requests
    assert!(h.output.played().is_empty());

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn get_tts_rejects_bad_text() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["bad", "empty"]).await;

    h.bus
        .emit(
            Event::new("neon.get_tts", json!({"text": 123}))
                .with_context(ctx(json!({"ident": "bad"}))),
        )
        .await?;
    let reply = rec.next("bad", WAIT).await.expect("reply");
    assert_eq!(reply.data, json!({"error": "text is not a str: 123"}));

    h.bus
        .emit(
            Event::new("neon.get_tts", json!({"text": ""}))
                .with_context(ctx(json!({"ident": "empty"}))),
        )
        .await?;
    let reply = rec.next("empty", WAIT).await.expect("reply");
    assert_eq!(reply.data, json!({"error": "No text provided."}));
    assert_eq!(h.tts.calls(), 0);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn get_tts_without_ident_uses_default_reply_topic() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["neon.get_tts.response"]).await;

    h.bus
        .emit(Event::new("neon.get_tts", json!({"text": "hello"})))
        .await?;
    let reply = rec.next("neon.get_tts.response", WAIT).await.expect("reply");
    assert!(reply.data.get("en-us").is_some());

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn get_tts_translates_for_secondary_language() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(TaggingTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["multi"]).await;

    let request = Event::new("neon.get_tts", json!({"text": "hello"})).with_context(ctx(json!({
        "ident": "multi",
        "nick_profiles": {"alice": {"speech": {
            "tts_language": "en-us", "tts_gender": "female",
            "secondary_tts_language": "es-es", "secondary_tts_gender": "male"
        }}}
    })));
    h.bus.emit(request).await?;

    let reply = rec.next("multi", WAIT).await.expect("reply");
    assert_eq!(reply.data["en-us"]["sentence"], "hello");
    assert_eq!(reply.data["es-es"]["sentence"], "[es-es] hello");
    assert_eq!(reply.data["es-es"]["translated"], true);
    assert!(reply.data["es-es"]["male"].is_string());

    h.service.shutdown().await?;
    Ok(())
}

// =============================================================================
// speak
// =============================================================================

#[tokio::test]
async fn speak_plays_and_signals_completion() -> AudioResult<()> {
    let h = harness(Duration::from_millis(20), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(
        &h.bus,
        &["speak-1", topics::AUDIO_OUTPUT_START, topics::AUDIO_OUTPUT_END],
    )
    .await;

    h.bus
        .emit(speak("hello world", json!({"ident": "speak-1"})))
        .await?;

    let done = rec.next("speak-1", WAIT).await.expect("completion");
    assert_eq!(done.context["ident"], "speak-1");
    assert_eq!(h.output.played().len(), 1);
    assert_eq!(rec.count(topics::AUDIO_OUTPUT_START), 1);
    assert_eq!(rec.count(topics::AUDIO_OUTPUT_END), 1);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_sentence_is_served_from_cache() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["first", "second"]).await;

    h.bus.emit(speak("cached words", json!({"ident": "first"}))).await?;
    assert!(rec.next("first", WAIT).await.is_some());
    h.bus.emit(speak("cached words", json!({"ident": "second"}))).await?;
    assert!(rec.next("second", WAIT).await.is_some());

    assert_eq!(h.tts.calls(), 1);
    let played = h.output.played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0], played[1]);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn speak_for_other_destination_is_ignored() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["elsewhere"]).await;

    h.bus
        .emit(speak("not for me", json!({"ident": "elsewhere", "destination": ["skills"]})))
        .await?;
    assert!(rec.next("elsewhere", Duration::from_millis(200)).await.is_none());
    assert_eq!(h.tts.calls(), 0);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn remote_client_gets_audio_instead_of_playback() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &[topics::REMOTE_RESPONSE, "klat-1"]).await;

    h.bus
        .emit(speak(
            "for the chat",
            json!({"ident": "klat-1", "klat_data": {"cid": "abc"}}),
        ))
        .await?;

    let resp = rec
        .next(topics::REMOTE_RESPONSE, WAIT)
        .await
        .expect("klat.response");
    assert!(resp.data["responses"]["en-us"]["female"].is_string());
    assert_eq!(resp.context["klat_data"]["cid"], "abc");
    assert!(rec.next("klat-1", WAIT).await.is_some());
    assert!(h.output.played().is_empty());

    h.service.shutdown().await?;
    Ok(())
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[tokio::test]
async fn failed_utterance_still_signals_completion() -> AudioResult<()> {
    let dir = tempfile::tempdir()?;
    let bus = new_bus().await;
    let primary = FakeTts::failing("fake", TtsFailure::Transient);
    let local = FakeTts::failing("local", TtsFailure::Permanent);
    let output = FakeOutput::new(Duration::from_millis(10));

    let registry = TtsRegistry::new();
    let engine = primary.clone();
    registry.register("fake", move |_| Ok(engine.clone() as Arc<dyn TtsBackend>));
    let engine = local.clone();
    registry.register("local", move |_| Ok(engine.clone() as Arc<dyn TtsBackend>));

    let cfg = SpeechConfig {
        fallback_module: Some("local".into()),
        ..config(dir.path())
    };
    let service = Arc::new(SpeechService::new(
        bus.clone(),
        cfg,
        Arc::new(registry),
        output.clone(),
        Arc::new(NoopTranslator),
    )?);
    service.start().await?;
    let mut rec = Recorder::new(&bus, &["doomed", topics::AUDIO_OUTPUT_START]).await;

    bus.emit(speak("nobody can say this", json!({"ident": "doomed"})))
        .await?;

    let done = rec.next("doomed", WAIT).await.expect("completion");
    assert_eq!(done.context["ident"], "doomed");
    assert_eq!(primary.calls(), 1);
    assert_eq!(local.calls(), 1);
    assert!(output.played().is_empty());
    assert_eq!(rec.count(topics::AUDIO_OUTPUT_START), 0);
    assert!(files_under(&dir.path().join("tts")).is_empty());

    service.shutdown().await?;
    Ok(())
}

// =============================================================================
// stop and mute
// =============================================================================

#[tokio::test]
async fn stop_interrupts_speech() -> AudioResult<()> {
    let h = harness(Duration::from_secs(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(
        &h.bus,
        &["long", topics::AUDIO_OUTPUT_START, topics::STOP_HANDLED],
    )
    .await;

    // Idle stop is silent
    h.service.handle_stop().await;
    assert_eq!(rec.count(topics::STOP_HANDLED), 0);

    h.bus.emit(speak("a very long answer", json!({"ident": "long"}))).await?;
    assert!(rec.next(topics::AUDIO_OUTPUT_START, WAIT).await.is_some());
    assert!(h.service.is_speaking());

    h.bus.emit(Event::new(topics::STOP, json!({}))).await?;
    let handled = rec.next(topics::STOP_HANDLED, WAIT).await.expect("stop.handled");
    assert_eq!(handled.data, json!({"by": "TTS"}));
    assert!(rec.next("long", WAIT).await.is_some());
    assert_eq!(h.output.terminated().len(), 1);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn muted_service_releases_without_speaking() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &[topics::TTS_MUTE_STATUS, "quiet"]).await;

    h.bus.emit(Event::new(topics::TTS_MUTE, json!({}))).await?;
    let status = rec.next(topics::TTS_MUTE_STATUS, WAIT).await.expect("status");
    assert_eq!(status.data, json!({"muted": true}));
    assert!(h.service.is_muted());

    h.bus.emit(speak("shh", json!({"ident": "quiet"}))).await?;
    assert!(rec.next("quiet", WAIT).await.is_some());
    assert_eq!(h.tts.calls(), 0);
    assert!(h.output.played().is_empty());

    h.bus.emit(Event::new(topics::TTS_UNMUTE, json!({}))).await?;
    let status = rec.next(topics::TTS_MUTE_STATUS, WAIT).await.expect("status");
    assert_eq!(status.data, json!({"muted": false}));

    h.bus
        .emit(Event::new(topics::TTS_MUTE_STATUS_REQUEST, json!({})))
        .await?;
    let status = rec.next(topics::TTS_MUTE_STATUS, WAIT).await.expect("status");
    assert_eq!(status.data, json!({"muted": false}));

    h.service.shutdown().await?;
    Ok(())
}

// =============================================================================
// reload
// =============================================================================

#[tokio::test]
async fn reload_rebuilds_only_on_change() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let mut rec = Recorder::new(&h.bus, &["after-reload"]).await;

    let same = config(h.dir.path());
    assert!(!h.service.reload(same.clone()).await?);

    let changed = SpeechConfig {
        stop_grace_ms: 50,
        ..same
    };
    assert!(h.service.reload(changed).await?);

    h.bus
        .emit(speak("still talking", json!({"ident": "after-reload"})))
        .await?;
    assert!(rec.next("after-reload", WAIT).await.is_some());
    assert_eq!(h.output.played().len(), 1);

    h.service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn reload_to_unknown_engine_keeps_current_pipeline() -> AudioResult<()> {
    let h = harness(Duration::from_millis(10), Arc::new(NoopTranslator)).await?;
    let broken = SpeechConfig {
        module: "does-not-exist".into(),
        ..config(h.dir.path())
    };
    assert!(h.service.reload(broken).await.is_err());

    let mut rec = Recorder::new(&h.bus, &["still-ok"]).await;
    h.bus.emit(speak("fine", json!({"ident": "still-ok"}))).await?;
    assert!(rec.next("still-ok", WAIT).await.is_some());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(h.output.played().len(), 1);

    h.service.shutdown().await?;
    Ok(())
}
