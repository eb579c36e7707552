//! Fuzz target for inbound frame decoding
//!
//! # Strategy
//!
//! - Raw text: arbitrary strings, mostly not JSON
//! - Shaped objects: an `event_type` drawn from the known tags (or not)
//!   plus arbitrary fields, so decoding gets past the discriminant
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - A decoded frame reports the `event_type` it was tagged with
//! - Every decoded frame encodes
//! - Encoding of known frames is stable: decode(encode(f)) encodes to the
//!   same text

#![no_main]

use arbitrary::Arbitrary;
use collab_proto::{EventType, Frame};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum FuzzInput {
    Raw(String),
    Shaped { tag: u8, custom_tag: String, fields: Vec<(FieldName, FieldValue)> },
}

#[derive(Debug, Arbitrary)]
enum FieldName {
    Room,
    Username,
    Content,
    Code,
    Timestamp,
    Users,
    Other(String),
}

#[derive(Debug, Arbitrary)]
enum FieldValue {
    Text(String),
    Number(i64),
    Bool(bool),
    Null,
    Timestamp { secs: u32, millis: u16, naive: bool },
    Names(Vec<String>),
}

fuzz_target!(|input: FuzzInput| {
    let (text, expected_tag) = match input {
        FuzzInput::Raw(text) => (text, None),
        FuzzInput::Shaped { tag, custom_tag, fields } => {
            let tag = EventType::ALL
                .get(usize::from(tag))
                .map_or(custom_tag, |kind| kind.as_str().to_string());
            (shaped_object(&tag, &fields), Some(tag))
        },
    };

    let Ok(frame) = Frame::decode(&text) else {
        return;
    };

    if let Some(tag) = expected_tag {
        assert_eq!(frame.event_type(), tag);
    }

    let once = frame.encode().unwrap_or_else(|e| panic!("decoded frame failed to encode: {e}"));
    if frame.kind().is_none() {
        return;
    }
    if let Ok(again) = Frame::decode(&once) {
        assert_eq!(again.event_type(), frame.event_type());
        assert_eq!(again.encode().ok().as_deref(), Some(once.as_str()), "unstable encoding");
    }
});

fn shaped_object(tag: &str, fields: &[(FieldName, FieldValue)]) -> String {
    let mut parts = vec![format!("\"event_type\":{}", quote(tag))];
    for (name, value) in fields {
        let name = match name {
            FieldName::Room => "room".to_string(),
            FieldName::Username => "username".to_string(),
            FieldName::Content => "content".to_string(),
            FieldName::Code => "code".to_string(),
            FieldName::Timestamp => "timestamp".to_string(),
            FieldName::Users => "users".to_string(),
            FieldName::Other(name) => name.clone(),
        };
        parts.push(format!("{}:{}", quote(&name), render(value)));
    }
    format!("{{{}}}", parts.join(","))
}

fn render(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => quote(text),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Null => "null".to_string(),
        FieldValue::Timestamp { secs, millis, naive } => {
            let days = secs / 86_400;
            let rem = secs % 86_400;
            let stamp = format!(
                "2000-01-{:02}T{:02}:{:02}:{:02}.{:03}",
                days % 28 + 1,
                rem / 3600,
                rem / 60 % 60,
                rem % 60,
                millis % 1000
            );
            if *naive { quote(&stamp) } else { quote(&format!("{stamp}Z")) }
        },
        FieldValue::Names(names) => {
            let names: Vec<String> = names.iter().map(|n| quote(n)).collect();
            format!("[{}]", names.join(","))
        },
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
