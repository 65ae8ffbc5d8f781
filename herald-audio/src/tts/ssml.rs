//! Markup validation applied to every sentence before synthesis.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Keep tags naming one of `supported` (rewritten by `modify_tag`), drop the
/// rest and collapse the double spaces left behind. With no supported tags
/// all markup is removed.
pub fn validate_ssml<F>(utterance: &str, supported: &[String], modify_tag: F) -> String
where
    F: Fn(&str) -> String,
{
    if supported.is_empty() {
        return remove_ssml(utterance);
    }
    let validated = TAG_RE.replace_all(utterance, |caps: &regex::Captures| {
        let tag = &caps[0];
        if supported.iter().any(|s| tag.contains(s.as_str())) {
            modify_tag(tag)
        } else {
            String::new()
        }
    });
    validated.replace("  ", " ")
}

pub fn remove_ssml(text: &str) -> String {
    TAG_RE.replace_all(text, "").replace("  ", " ")
}
