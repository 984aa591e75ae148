use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

/// Assigns, queues, and deduplicates tool-call identifiers so that calls
/// and responses stay correctly paired across a multi-turn history, even
/// when the source ids collide or are missing.
///
/// One reconciler is owned by one encoding pass and discarded afterwards.
/// Ids produced by [`assign`](Self::assign) are queued per normalized
/// original id; [`consume`](Self::consume) retrieves them oldest-first, so
/// a tool legitimately invoked twice under the same original id pairs each
/// response with the matching call.
#[derive(Debug, Default)]
pub struct ToolCallIdReconciler {
    queues: FxHashMap<String, VecDeque<String>>,
    used: FxHashSet<String>,
    suffix_counters: FxHashMap<String, u64>,
    synthesized_seq: u64,
    unmatched_seq: u64,
}

/// Queue key shared by all calls that arrived without an original id.
const UNKEYED: &str = "";

fn normalize(original_id: Option<&str>) -> Option<&str> {
    original_id.map(str::trim).filter(|s| !s.is_empty())
}

impl ToolCallIdReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a request-unique id for a tool call and queue it under the
    /// call's normalized original id for later pairing.
    pub fn assign(&mut self, original_id: Option<&str>) -> String {
        let normalized = normalize(original_id);
        let id = match normalized {
            Some(base) => self.unique_id(base),
            None => {
                self.synthesized_seq += 1;
                let base = format!("call_{}", self.synthesized_seq);
                self.unique_id(&base)
            }
        };
        self.queues
            .entry(normalized.unwrap_or(UNKEYED).to_string())
            .or_default()
            .push_back(id.clone());
        id
    }

    /// Retrieve the oldest still-unconsumed id assigned for this original
    /// id. Falls back to a fresh unique id when the queue is empty, or a
    /// generic unmatched placeholder when no original id was given.
    pub fn consume(&mut self, original_id: Option<&str>) -> String {
        let normalized = normalize(original_id);
        let key = normalized.unwrap_or(UNKEYED);
        if let Some(queue) = self.queues.get_mut(key) {
            if let Some(id) = queue.pop_front() {
                return id;
            }
        }
        match normalized {
            Some(base) => self.unique_id(base),
            None => {
                self.unmatched_seq += 1;
                let base = format!("unmatched_call_{}", self.unmatched_seq);
                self.unique_id(&base)
            }
        }
    }

    fn unique_id(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let counter = self.suffix_counters.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{base}__{counter}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
