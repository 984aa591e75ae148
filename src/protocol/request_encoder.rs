use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};

use crate::protocol::chat::{ChatMessage, ChatToolCall};
use crate::protocol::content::{collect_system_text, Part, Turn, TurnInput, TurnRole};
use crate::protocol::mapping::turn_role_to_chat;
use crate::reconciler::ToolCallIdReconciler;

// Request direction: structured conversation turns become a flat, ordered
// chat message list. The hard part is history hygiene: upstream-recorded
// histories repeat ids, orphan calls, and split assistant turns, all of
// which strict chat backends reject. Encoding therefore runs an id
// reconciler over the whole conversation, drops unpaired tool traffic, and
// merges adjacent assistant messages at the end.

/// Encode a structured conversation into a protocol-valid chat message list.
///
/// `system_instruction` accepts the lenient shapes backends actually send:
/// a plain string, a part object, or a list of either.
pub fn encode_request(system_instruction: Option<&Value>, turns: &[Turn]) -> Vec<ChatMessage> {
    let mut reconciler = ToolCallIdReconciler::new();
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(turns.len() + 1);

    if let Some(instruction) = system_instruction {
        let text = collect_system_text(instruction);
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for turn in turns {
        encode_turn(turn, &mut reconciler, &mut messages);
    }

    remove_orphans(&mut messages);
    merge_consecutive_assistants(&mut messages);
    messages
}

/// [`encode_request`] over loose turn input, where a bare part list stands
/// for a user turn.
pub fn encode_request_loose(
    system_instruction: Option<&Value>,
    inputs: Vec<TurnInput>,
) -> Vec<ChatMessage> {
    let turns: Vec<Turn> = inputs.into_iter().map(TurnInput::into_turn).collect();
    encode_request(system_instruction, &turns)
}

fn encode_turn(turn: &Turn, reconciler: &mut ToolCallIdReconciler, messages: &mut Vec<ChatMessage>) {
    let has_response = turn
        .parts
        .iter()
        .any(|p| matches!(p, Part::FunctionResponse { .. }));
    if has_response {
        for part in &turn.parts {
            match part {
                Part::FunctionResponse { id, response, .. } => {
                    let content = match response {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string(other).unwrap_or_default(),
                    };
                    messages.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(Value::String(content)),
                        tool_calls: None,
                        tool_call_id: Some(reconciler.consume(id.as_deref())),
                    });
                }
                _ => {
                    tracing::debug!("ignoring non-response part in a tool-response turn");
                }
            }
        }
        return;
    }

    let has_call = turn
        .parts
        .iter()
        .any(|p| matches!(p, Part::FunctionCall { .. }));
    if turn.role == TurnRole::Model && has_call {
        messages.push(encode_call_turn(turn, reconciler));
        return;
    }

    if let Some(message) = encode_plain_turn(turn) {
        messages.push(message);
    }
}

fn encode_call_turn(turn: &Turn, reconciler: &mut ToolCallIdReconciler) -> ChatMessage {
    let mut tool_calls = Vec::new();
    let mut text = String::new();
    let mut last_text: Option<&str> = None;
    for part in &turn.parts {
        match part {
            Part::Text(t) => {
                // Some backends echo the same sentence before and after the
                // call markup; collapse exact consecutive repeats.
                if last_text != Some(t.as_str()) {
                    text.push_str(t);
                    last_text = Some(t);
                }
            }
            Part::FunctionCall { id, name, args } => {
                let assigned = reconciler.assign(id.as_deref());
                let arguments =
                    serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(ChatToolCall::function(assigned, name.clone(), arguments));
            }
            _ => {
                tracing::debug!("dropping media part from an assistant tool-call turn");
            }
        }
    }
    // Empty string rather than a missing field: strict backends reject null
    // content next to tool_calls.
    ChatMessage {
        role: "assistant".to_string(),
        content: Some(Value::String(text)),
        tool_calls: Some(tool_calls),
        tool_call_id: None,
    }
}

fn encode_plain_turn(turn: &Turn) -> Option<ChatMessage> {
    let role = turn_role_to_chat(turn.role);
    let mut text = String::new();
    let mut media: Vec<Value> = Vec::new();
    for part in &turn.parts {
        match part {
            Part::Text(t) => text.push_str(t),
            Part::InlineData { mime_type, data } => {
                if turn.role == TurnRole::User {
                    media.push(json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                    }));
                } else {
                    tracing::debug!(%mime_type, "degrading assistant media part to text-only");
                }
            }
            Part::FileData {
                mime_type,
                file_uri,
            } => {
                if turn.role == TurnRole::User {
                    media.push(json!({
                        "type": "image_url",
                        "image_url": { "url": file_uri },
                    }));
                } else {
                    tracing::debug!(%mime_type, "degrading assistant media part to text-only");
                }
            }
            Part::FunctionCall { name, .. } => {
                tracing::debug!(%name, "ignoring function call outside a model turn");
            }
            Part::FunctionResponse { .. } => {}
        }
    }

    if media.is_empty() {
        if text.is_empty() {
            return None;
        }
        return Some(ChatMessage::text(role, text));
    }
    let mut content = Vec::with_capacity(media.len() + 1);
    if !text.is_empty() {
        content.push(json!({ "type": "text", "text": text }));
    }
    content.extend(media);
    Some(ChatMessage {
        role: role.to_string(),
        content: Some(Value::Array(content)),
        tool_calls: None,
        tool_call_id: None,
    })
}

/// Drop tool traffic that never pairs up: a tool message with no earlier
/// assistant call carrying its id, and an assistant call entry with no
/// later tool message answering it. Assistant messages left with neither
/// text nor calls are dropped too.
fn remove_orphans(messages: &mut Vec<ChatMessage>) {
    let mut call_index: FxHashMap<String, usize> = FxHashMap::default();
    for (i, message) in messages.iter().enumerate() {
        if let Some(tool_calls) = &message.tool_calls {
            for tc in tool_calls {
                call_index.insert(tc.id.clone(), i);
            }
        }
    }

    let mut claimed: FxHashSet<String> = FxHashSet::default();
    let mut keep: Vec<bool> = vec![true; messages.len()];
    for (j, message) in messages.iter().enumerate() {
        if message.role != "tool" {
            continue;
        }
        let paired = message.tool_call_id.as_ref().is_some_and(|id| {
            call_index.get(id).is_some_and(|&i| i < j) && claimed.insert(id.clone())
        });
        if !paired {
            tracing::warn!(
                id = message.tool_call_id.as_deref().unwrap_or(""),
                "dropping orphaned tool response"
            );
            keep[j] = false;
        }
    }
    let mut index = 0;
    messages.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });

    for message in messages.iter_mut() {
        if let Some(tool_calls) = &mut message.tool_calls {
            tool_calls.retain(|tc| {
                let paired = claimed.contains(&tc.id);
                if !paired {
                    tracing::warn!(id = %tc.id, name = %tc.function.name, "dropping unanswered tool call");
                }
                paired
            });
            if tool_calls.is_empty() {
                message.tool_calls = None;
            }
        }
    }

    messages.retain(|message| {
        !(message.role == "assistant"
            && message.tool_calls.is_none()
            && message.content_str().is_none_or(str::is_empty)
            && message.content.as_ref().is_none_or(Value::is_string))
    });
}

/// Merge runs of adjacent assistant messages into one, concatenating text
/// and moving tool calls onto the merged message. A run never extends past
/// a message that already carries tool calls: the tool responses that
/// follow it must stay adjacent.
fn merge_consecutive_assistants(messages: &mut Vec<ChatMessage>) {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for message in messages.drain(..) {
        if message.role == "assistant" {
            if let Some(prev) = merged.last_mut() {
                let mergeable = prev.role == "assistant"
                    && prev.tool_calls.is_none()
                    && prev.content.as_ref().is_none_or(Value::is_string)
                    && message.content.as_ref().is_none_or(Value::is_string);
                if mergeable {
                    if let Some(Value::String(addition)) = message.content {
                        if !addition.is_empty() {
                            match &mut prev.content {
                                Some(Value::String(existing)) => existing.push_str(&addition),
                                _ => prev.content = Some(Value::String(addition)),
                            }
                        }
                    }
                    prev.tool_calls = message.tool_calls;
                    continue;
                }
            }
        }
        merged.push(message);
    }
    *messages = merged;
}
