pub mod accumulator;
pub mod extractor;

mod recovery;

use crate::error::TranslateError;
use crate::json_scan::{scan_object, ObjectScan};

/// A tool call recovered from a response, whether it arrived as native
/// JSON deltas or embedded in text markup.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub id: Option<String>,
    pub name: String,
    pub args: serde_json::Value,
}

/// A parsed `[namespace.]name[:id]` call header.
#[derive(Debug, Clone)]
pub(crate) struct CallHeader {
    pub name: String,
    pub id: Option<String>,
}

/// Parse a call header of the form `[namespace.]name[:id]`, e.g.
/// `functions.read_file:0`. The namespace prefix is discarded; only the
/// final path segment names the function.
pub(crate) fn parse_call_header(text: &str) -> Result<CallHeader, TranslateError> {
    let trimmed = text.trim();
    let (path, id) = match trimmed.rsplit_once(':') {
        Some((head, tail)) => (
            head,
            if tail.is_empty() {
                None
            } else {
                Some(tail.to_string())
            },
        ),
        None => (trimmed, None),
    };
    let name = path.rsplit('.').next().unwrap_or("").trim();
    if name.is_empty() {
        return Err(TranslateError::MissingFunctionName);
    }
    Ok(CallHeader {
        name: name.to_string(),
        id,
    })
}

pub(crate) fn min_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Parse a tool-call argument block leniently.
///
/// An empty block is an explicit error, distinct from omitted arguments
/// (callers pass `{}` for those). A parse failure caused by extra trailing
/// `}` characters — a known backend quirk — is healed by re-parsing just
/// the balanced object, once.
pub(crate) fn parse_arguments_lenient(
    name: &str,
    text: &str,
) -> Result<serde_json::Value, TranslateError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TranslateError::EmptyArguments(name.to_string()));
    }

    let first_err = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => return Ok(value),
        Ok(other) => {
            return Err(TranslateError::MalformedArguments {
                name: name.to_string(),
                detail: format!("expected a JSON object, got {}", kind_label(&other)),
            })
        }
        Err(err) => err,
    };

    // Self-heal: if a balanced object ends early and only `}` (and
    // whitespace) trails it, strip exactly the surplus and retry once.
    if let ObjectScan::Complete(end) = scan_object(trimmed.as_bytes(), 0) {
        let trailing = trimmed[end..].trim();
        if !trailing.is_empty() && trailing.bytes().all(|b| b == b'}') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&trimmed[..end]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    Err(TranslateError::MalformedArguments {
        name: name.to_string(),
        detail: first_err.to_string(),
    })
}

fn kind_label(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
