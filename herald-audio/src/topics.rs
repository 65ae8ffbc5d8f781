//! Bus message names. These are the protocol contract with the rest of the
//! assistant and must not change.

// Speech inbound
pub const SPEAK: &str = "speak";
pub const STOP: &str = "mycroft.stop";
pub const SPEECH_STOP: &str = "mycroft.audio.speech.stop";
pub const TTS_MUTE: &str = "mycroft.tts.mute";
pub const TTS_UNMUTE: &str = "mycroft.tts.unmute";
pub const TTS_MUTE_STATUS_REQUEST: &str = "mycroft.tts.mute_status.request";

// Speech outbound
pub const AUDIO_OUTPUT_START: &str = "recognizer_loop:audio_output_start";
pub const AUDIO_OUTPUT_END: &str = "recognizer_loop:audio_output_end";
pub const MIC_LISTEN: &str = "mycroft.mic.listen";
pub const STOP_HANDLED: &str = "mycroft.stop.handled";
pub const TTS_MUTE_STATUS: &str = "mycroft.tts.mute_status";
pub const VISEME_LIST: &str = "enclosure.mouth.viseme_list";
pub const REMOTE_RESPONSE: &str = "klat.response";

// Recognizer signals used for ducking
pub const RECORD_BEGIN: &str = "recognizer_loop:record_begin";
pub const RECORD_END: &str = "recognizer_loop:record_end";
pub const RECOGNITION_UNKNOWN: &str = "recognizer_loop:speech.recognition.unknown";

// Media inbound
pub const MEDIA_PLAY: &str = "mycroft.audio.service.play";
pub const MEDIA_QUEUE: &str = "mycroft.audio.service.queue";
pub const MEDIA_PAUSE: &str = "mycroft.audio.service.pause";
pub const MEDIA_RESUME: &str = "mycroft.audio.service.resume";
pub const MEDIA_STOP: &str = "mycroft.audio.service.stop";
pub const MEDIA_NEXT: &str = "mycroft.audio.service.next";
pub const MEDIA_PREV: &str = "mycroft.audio.service.prev";
pub const MEDIA_SEEK_FORWARD: &str = "mycroft.audio.service.seek_forward";
pub const MEDIA_SEEK_BACKWARD: &str = "mycroft.audio.service.seek_backward";
pub const MEDIA_TRACK_INFO: &str = "mycroft.audio.service.track_info";
pub const MEDIA_LIST_BACKENDS: &str = "mycroft.audio.service.list_backends";

// Media outbound
pub const MEDIA_TRACK_INFO_REPLY: &str = "mycroft.audio.service.track_info_reply";
pub const PLAYING_TRACK: &str = "mycroft.audio.playing_track";
pub const QUEUE_END: &str = "mycroft.audio.queue_end";

/// `<namespace>.get_tts`
pub fn get_tts(namespace: &str) -> String {
    format!("{}.get_tts", namespace)
}

/// Default reply type for `get_tts` requests without an ident
pub fn get_tts_response(namespace: &str) -> String {
    format!("{}.get_tts.response", namespace)
}
