use rustc_hash::FxHashMap;

use super::{parse_arguments_lenient, ParsedToolCall};

/// Reassembles tool calls whose id/name/argument fragments arrive as
/// separate, index-keyed deltas in the native streaming protocol.
///
/// The delta protocol reuses an integer slot while one call streams in;
/// each slot accumulates argument text and records id/name on first sight.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: FxHashMap<u32, Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta fragment into its slot.
    pub fn add_chunk(
        &mut self,
        index: u32,
        argument_fragment: Option<&str>,
        id: Option<&str>,
        name: Option<&str>,
    ) {
        let slot = self.slots.entry(index).or_default();
        if slot.id.is_none() {
            if let Some(id) = id.filter(|s| !s.is_empty()) {
                slot.id = Some(id.to_string());
            }
        }
        if slot.name.is_none() {
            if let Some(name) = name.filter(|s| !s.is_empty()) {
                slot.name = Some(name.to_string());
            }
        }
        if let Some(fragment) = argument_fragment {
            slot.arguments.push_str(fragment);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Parse every slot and return the calls that came out whole.
    ///
    /// Slots without a name are dropped with a warning; an empty argument
    /// buffer means omitted arguments and yields `{}`.
    #[must_use]
    pub fn completed_calls(&self) -> Vec<ParsedToolCall> {
        let mut indices: Vec<u32> = self.slots.keys().copied().collect();
        indices.sort_unstable();

        let mut calls = Vec::with_capacity(indices.len());
        for index in indices {
            let slot = &self.slots[&index];
            let Some(name) = slot.name.as_deref() else {
                tracing::warn!(index, "dropping streamed tool call with no name");
                continue;
            };
            let args = if slot.arguments.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                match parse_arguments_lenient(name, &slot.arguments) {
                    Ok(args) => args,
                    Err(err) => {
                        tracing::warn!(index, name, %err, "dropping streamed tool call");
                        continue;
                    }
                }
            };
            calls.push(ParsedToolCall {
                id: slot.id.clone(),
                name: name.to_string(),
                args,
            });
        }
        calls
    }

    /// Clear all slots. Callers must invoke this at the start of every new
    /// stream to avoid cross-stream data pollution.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_reassemble() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, None, Some("call_1"), Some("get_weather"));
        acc.add_chunk(0, Some("{\"ci"), None, None);
        acc.add_chunk(0, Some("ty\":\"SF\"}"), None, None);

        let calls = acc.completed_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].args["city"], "SF");
    }

    #[test]
    fn test_multiple_slots_sorted_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(1, Some("{}"), Some("b"), Some("second"));
        acc.add_chunk(0, Some("{}"), Some("a"), Some("first"));

        let calls = acc.completed_calls();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn test_empty_arguments_mean_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, Some(""), Some("c"), Some("list_files"));
        let calls = acc.completed_calls();
        assert_eq!(calls[0].args, serde_json::json!({}));
    }

    #[test]
    fn test_nameless_slot_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, Some("{\"a\":1}"), Some("id"), None);
        assert!(acc.completed_calls().is_empty());
    }

    #[test]
    fn test_unparseable_arguments_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, Some("{\"a\":"), Some("id"), Some("broken"));
        acc.add_chunk(1, Some("{\"b\":2}"), None, Some("ok"));
        let calls = acc.completed_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn test_id_and_name_first_sight_wins() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, None, Some("first"), Some("name_a"));
        acc.add_chunk(0, Some("{}"), Some("second"), Some("name_b"));
        let calls = acc.completed_calls();
        assert_eq!(calls[0].id.as_deref(), Some("first"));
        assert_eq!(calls[0].name, "name_a");
    }

    #[test]
    fn test_reset_clears_slots() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_chunk(0, Some("{}"), Some("x"), Some("f"));
        acc.reset();
        assert!(acc.is_empty());
        assert!(acc.completed_calls().is_empty());
    }
}
