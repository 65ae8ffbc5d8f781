//! Extension trait for Event providing reply/forward helpers and context accessors.

use crate::event::Event;
use serde_json::Value;

/// Context keys shared by every service on the bus
pub mod keys {
    pub const IDENT: &str = "ident";
    pub const SPEAK_IDENT: &str = "speak_ident";
    pub const SOURCE: &str = "source";
    pub const DESTINATION: &str = "destination";
}

/// Extension trait for Event providing helpers for request/response messaging.
pub trait EventExt {
    /// Builds a response: context is inherited with `source` and `destination` swapped.
    fn reply(&self, msg_type: &str, data: Value) -> Event;

    /// Builds a follow-up carrying the same context unchanged.
    fn forward(&self, msg_type: &str, data: Value) -> Event;

    /// Builds `<type>.response` addressed back to the sender.
    fn response(&self, data: Value) -> Event;

    /// Correlation id of the request. `speak_ident` wins over `ident` when both are set.
    fn ident(&self) -> Option<String>;

    /// Destination list from the context, if any. A single string counts as one entry.
    fn destinations(&self) -> Option<Vec<String>>;
}

impl EventExt for Event {
    fn reply(&self, msg_type: &str, data: Value) -> Event {
        let mut context = self.context.clone();
        let source = context.remove(keys::SOURCE);
        let destination = context.remove(keys::DESTINATION);
        if let Some(d) = destination {
            context.insert(keys::SOURCE.to_string(), d);
        }
        if let Some(s) = source {
            context.insert(keys::DESTINATION.to_string(), s);
        }
        Event::new(msg_type, data).with_context(context)
    }

    fn forward(&self, msg_type: &str, data: Value) -> Event {
        Event::new(msg_type, data).with_context(self.context.clone())
    }

    fn response(&self, data: Value) -> Event {
        self.reply(&format!("{}.response", self.r#type), data)
    }

    fn ident(&self) -> Option<String> {
        [keys::SPEAK_IDENT, keys::IDENT]
            .iter()
            .find_map(|key| {
                self.context
                    .get(*key)
                    .or_else(|| self.data_field(key))
                    .and_then(ident_string)
            })
    }

    fn destinations(&self) -> Option<Vec<String>> {
        match self.context.get(keys::DESTINATION)? {
            Value::String(s) => Some(vec![s.clone()]),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }
}

// Idents arrive as strings or (from some clients) as numeric timestamps
fn ident_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
