use herald_core::{Event, EventExt};
use serde_json::{json, Map, Value};

fn ctx(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

#[test]
fn reply_swaps_source_and_destination() {
    let req = Event::new("neon.get_tts", json!({"text": "hi"}))
        .with_context(ctx(json!({"source": "client", "destination": "audio", "ident": "42"})));

    let reply = req.reply("42", json!({"ok": true}));
    assert_eq!(reply.r#type, "42");
    assert_eq!(reply.context["source"], "audio");
    assert_eq!(reply.context["destination"], "client");
    assert_eq!(reply.context["ident"], "42");
}

#[test]
fn forward_keeps_context() {
    let req = Event::new("speak", json!({})).with_context(ctx(json!({"source": "skills"})));
    let fwd = req.forward("recognizer_loop:audio_output_start", json!({}));
    assert_eq!(fwd.context, req.context);
}

#[test]
fn response_appends_suffix() {
    let req = Event::new("mycroft.audio.service.list_backends", json!({}));
    assert_eq!(
        req.response(json!({})).r#type,
        "mycroft.audio.service.list_backends.response"
    );
}

#[test]
fn speak_ident_wins_over_ident() {
    let ev = Event::new("speak", json!({}))
        .with_context(ctx(json!({"ident": "a", "speak_ident": "b"})));
    assert_eq!(ev.ident().as_deref(), Some("b"));

    let numeric = Event::new("speak", json!({})).with_context(ctx(json!({"ident": 1700000000.5})));
    assert_eq!(numeric.ident().as_deref(), Some("1700000000.5"));

    let from_data = Event::new("speak", json!({"ident": "d"}));
    assert_eq!(from_data.ident().as_deref(), Some("d"));

    assert!(Event::new("speak", json!({})).ident().is_none());
}

#[test]
fn destinations_accept_string_or_list() {
    let single = Event::new("speak", json!({})).with_context(ctx(json!({"destination": "audio"})));
    assert_eq!(single.destinations(), Some(vec!["audio".to_string()]));

    let list = Event::new("speak", json!({}))
        .with_context(ctx(json!({"destination": ["gui", "audio"]})));
    assert_eq!(list.destinations().map(|d| d.len()), Some(2));

    assert!(Event::new("speak", json!({})).destinations().is_none());
}
