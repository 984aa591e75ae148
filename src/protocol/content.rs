use serde::{Deserialize, Serialize};

/// Role of a structured-content turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// A single typed part within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "functionCall", rename_all = "camelCase")]
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        args: serde_json::Value,
    },
    #[serde(rename = "functionResponse", rename_all = "camelCase")]
    FunctionResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        response: serde_json::Value,
    },
    /// Inline media carried as base64 data.
    #[serde(rename = "inlineData", rename_all = "camelCase")]
    InlineData { mime_type: String, data: String },
    /// Media referenced by URI.
    #[serde(rename = "fileData", rename_all = "camelCase")]
    FileData { mime_type: String, file_uri: String },
}

/// One role-tagged unit of structured conversation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

/// Tolerant wire shape for history entries: some callers send a bare part
/// array where a turn is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TurnInput {
    Turn(Turn),
    Parts(Vec<Part>),
}

impl TurnInput {
    /// Normalize into a [`Turn`], inferring the role for bare part arrays:
    /// anything carrying a `FunctionResponse` is a pairing turn, everything
    /// else is user content. Pairing turns sit on the user side of the
    /// conversation, so both cases infer `user`.
    #[must_use]
    pub fn into_turn(self) -> Turn {
        match self {
            TurnInput::Turn(turn) => turn,
            TurnInput::Parts(parts) => Turn {
                role: TurnRole::User,
                parts,
            },
        }
    }
}

/// Reason the model stopped generating, structured-content side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

/// Token usage reported with a finished response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A complete decoded response, structured-content side.
#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub parts: Vec<Part>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// Pull plain text out of an arbitrarily-nested system-instruction shape.
///
/// Accepts a bare string, `{ "text": … }`, `{ "parts": […] }`, or arrays of
/// any of those, and concatenates every string leaf found.
#[must_use]
pub fn collect_system_text(value: &serde_json::Value) -> String {
    let mut out = String::new();
    collect_text_into(value, &mut out);
    out
}

fn collect_text_into(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text_into(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text") {
                collect_text_into(text, out);
            } else if let Some(parts) = map.get("parts") {
                collect_text_into(parts, out);
            }
        }
        _ => {}
    }
}
