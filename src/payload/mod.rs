//! Inbound payload normalization.
//!
//! Chat gateways wrap the same information in many shapes. Normalization
//! happens once, right after signature verification, and produces the
//! sender number, the text, and a [`MessageKind`]; nothing downstream looks
//! at the raw JSON again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Interactive,
    Template,
    Media,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interactive => "interactive",
            Self::Template => "template",
            Self::Media => "media",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "interactive" => Self::Interactive,
            "template" => Self::Template,
            "media" => Self::Media,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Digits only, with the country prefix applied.
    pub sender: String,
    pub text: String,
    pub kind: MessageKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed JSON body: {0}")]
    Malformed(String),
    #[error("could not extract sender number")]
    MissingIdentity,
}

/// Parse and normalize a raw webhook body.
pub fn normalize_payload(
    raw: &[u8],
    default_country_code: &str,
) -> Result<NormalizedMessage, PayloadError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(PayloadError::Malformed("expected a JSON object".into()));
    }
    let sender = extract_sender(&value, default_country_code)?;
    let (text, kind) = extract_text_and_kind(&value);
    Ok(NormalizedMessage { sender, text, kind })
}

const SENDER_PATHS: &[&[&str]] = &[
    &["from"],
    &["number"],
    &["remoteJid"],
    &["key", "remoteJid"],
    &["contact", "number"],
    &["contact", "phone"],
    &["ticket", "contact", "number"],
    &["ticket", "contact", "phone"],
];

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn extract_sender(payload: &Value, default_country_code: &str) -> Result<String, PayloadError> {
    for path in SENDER_PATHS {
        let Some(candidate) = lookup(payload, path).and_then(scalar_string) else {
            continue;
        };
        // "5511999990000@s.whatsapp.net" carries the number before the '@'
        let local = candidate.split('@').next().unwrap_or_default();
        let digits: String = local.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            continue;
        }
        if digits.starts_with(default_country_code) {
            return Ok(digits);
        }
        return Ok(format!("{default_country_code}{digits}"));
    }
    Err(PayloadError::MissingIdentity)
}

/// First non-empty string among `keys` on `obj`.
fn first_str(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn from_message(message: &Value) -> (String, MessageKind) {
    let Some(obj) = message.as_object() else {
        let text = match message {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return (text, MessageKind::Text);
    };

    if let Some(inner) = lookup(message, &["ephemeralMessage", "message"]) {
        return from_message(inner);
    }

    for media_key in ["imageMessage", "videoMessage", "documentMessage"] {
        if let Some(media) = obj.get(media_key) {
            let text = first_str(media, &["caption", "fileName"]).unwrap_or_default();
            return (text, MessageKind::Media);
        }
    }

    if let Some(conversation) = obj.get("conversation") {
        return (
            conversation.as_str().unwrap_or_default().to_string(),
            MessageKind::Text,
        );
    }

    if let Some(extended) = obj.get("extendedTextMessage") {
        let text = first_str(extended, &["text", "caption"]).unwrap_or_default();
        return (text, MessageKind::Text);
    }

    if let Some(buttons) = obj.get("buttonsResponseMessage") {
        let text = first_str(buttons, &["selectedDisplayText", "selectedButtonId"])
            .unwrap_or_default();
        return (text, MessageKind::Interactive);
    }

    if let Some(list) = obj.get("listResponseMessage") {
        let text = first_str(list, &["title", "description"])
            .or_else(|| {
                list.get("singleSelectReply")
                    .and_then(|s| first_str(s, &["selectedRowId", "selectedText"]))
            })
            .unwrap_or_default();
        return (text, MessageKind::Interactive);
    }

    if let Some(interactive) = obj.get("interactiveResponseMessage") {
        let text = match lookup(interactive, &["result", "paramsJson"]) {
            Some(Value::String(params)) => Some(params.clone()),
            Some(params @ Value::Object(_)) => first_str(params, &["id", "title", "description"]),
            _ => lookup(
                interactive,
                &["nativeFlowResponseMessage", "messageParamsJson"],
            )
            .and_then(|p| first_str(p, &["id"])),
        }
        .filter(|t| !t.is_empty())
        .or_else(|| first_str(interactive, &["body", "id"]))
        .unwrap_or_default();
        return (text, MessageKind::Interactive);
    }

    if let Some(template) = obj.get("templateMessage") {
        let hydrated = template.get("hydratedTemplate").unwrap_or(&Value::Null);
        let text = first_str(
            hydrated,
            &["hydratedContentText", "contentText", "bodyText"],
        )
        .or_else(|| first_str(template, &["contentText"]))
        .or_else(|| {
            hydrated
                .get("buttons")
                .and_then(|b| b.get(0))
                .and_then(|b| first_str(b, &["buttonId", "displayText"]))
        })
        .unwrap_or_default();
        return (text, MessageKind::Template);
    }

    if let Some(nested @ Value::Object(_)) = obj.get("message") {
        return from_message(nested);
    }

    for key in ["text", "body", "caption", "content"] {
        if let Some(value) = obj.get(key).and_then(scalar_string)
            && !value.is_empty()
        {
            return (value, MessageKind::Text);
        }
    }

    (String::new(), MessageKind::Text)
}

pub fn extract_text_and_kind(payload: &Value) -> (String, MessageKind) {
    let message = match payload.get("message") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    if let Some(message @ Value::Object(_)) = message {
        let (text, kind) = from_message(message);
        if !text.is_empty() || kind != MessageKind::Text {
            return (text, kind);
        }
    }

    if let Some(nested) = lookup(payload, &["messages"])
        .and_then(|m| m.get(0))
        .and_then(|m| m.get("message"))
    {
        let (text, kind) = from_message(nested);
        if !text.is_empty() || kind != MessageKind::Text {
            return (text, kind);
        }
    }

    for key in ["text", "body", "caption"] {
        if let Some(value) = payload.get(key).and_then(scalar_string)
            && !value.is_empty()
        {
            return (value, MessageKind::Text);
        }
    }

    (String::new(), MessageKind::Text)
}
