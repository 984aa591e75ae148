use super::chat::ChatUsage;
use super::content::{FinishReason, TokenUsage, TurnRole};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn turn_role_to_chat(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "assistant",
    }
}

#[must_use]
pub fn chat_role_to_turn(s: &str) -> TurnRole {
    match s {
        "assistant" | "model" => TurnRole::Model,
        _ => TurnRole::User,
    }
}

// ---------------------------------------------------------------------------
// Finish-reason mappings
// ---------------------------------------------------------------------------

/// Map a chat-protocol finish reason to the structured-content enum.
///
/// Tool-call finish reasons map to `Stop`: the structured side signals the
/// calls through `FunctionCall` parts, not through the finish reason.
#[must_use]
pub fn chat_finish_to_content(s: &str) -> FinishReason {
    match s {
        "stop" | "tool_calls" | "function_call" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        "content_filter" => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

#[must_use]
pub fn content_finish_to_chat(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::Other => "stop",
        FinishReason::MaxTokens => "length",
        FinishReason::Safety => "content_filter",
    }
}

// ---------------------------------------------------------------------------
// Usage mapping
// ---------------------------------------------------------------------------

/// Convert backend usage counters to structured-side usage.
///
/// When a backend supplies only a total, the breakdown is estimated at
/// 70/30 prompt/completion, with the completion share absorbing rounding
/// so the two always sum to the total.
#[must_use]
pub fn chat_usage_to_content(usage: &ChatUsage) -> TokenUsage {
    match (usage.prompt_tokens, usage.completion_tokens) {
        (Some(prompt), Some(completion)) => TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: usage.total_tokens.unwrap_or(prompt + completion),
        },
        _ => {
            let total = usage
                .total_tokens
                .or(usage.prompt_tokens)
                .or(usage.completion_tokens)
                .unwrap_or(0);
            let prompt = usage.prompt_tokens.unwrap_or(total * 7 / 10);
            TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: usage
                    .completion_tokens
                    .unwrap_or_else(|| total.saturating_sub(prompt)),
                total_tokens: total,
            }
        }
    }
}
