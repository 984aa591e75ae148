use serde_json::json;

use crate::fc::parse_arguments_lenient;
use crate::protocol::chat::ChatResponse;
use crate::protocol::content::{ContentResponse, FinishReason, Part};
use crate::protocol::mapping::{chat_finish_to_content, chat_usage_to_content};

/// Decode a complete (non-streaming) chat response into structured parts.
///
/// Only the first choice is read. A tool call with arguments that cannot be
/// coerced into a JSON object is dropped with a warning; the rest of the
/// response still decodes.
pub fn decode_response(response: &ChatResponse) -> ContentResponse {
    let mut parts = Vec::new();
    let mut finish_reason = FinishReason::Stop;

    if let Some(choice) = response.choices.first() {
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                parts.push(Part::Text(text.clone()));
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for tc in tool_calls {
                // Backends signal "no arguments" with an empty string here,
                // unlike markup dialects where an empty block is an error.
                let args = if tc.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    match parse_arguments_lenient(&tc.function.name, &tc.function.arguments) {
                        Ok(args) => args,
                        Err(err) => {
                            tracing::warn!(name = %tc.function.name, %err, "dropping tool call");
                            continue;
                        }
                    }
                };
                parts.push(Part::FunctionCall {
                    id: Some(tc.id.clone()),
                    name: tc.function.name.clone(),
                    args,
                });
            }
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            finish_reason = chat_finish_to_content(reason);
        }
    }

    ContentResponse {
        parts,
        finish_reason,
        usage: response.usage.as_ref().map(chat_usage_to_content),
    }
}
