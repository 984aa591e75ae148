use crate::fc::accumulator::ToolCallAccumulator;
use crate::fc::extractor::{Extraction, MarkupExtractor, PushOutcome};
use crate::fc::ParsedToolCall;
use crate::protocol::chat::ChatStreamChunk;
use crate::protocol::content::{FinishReason, Part, TokenUsage};
use crate::protocol::mapping::{chat_finish_to_content, chat_usage_to_content};

/// Parts and metadata surfaced by one streamed chunk.
#[derive(Debug, Default)]
pub struct StreamOutput {
    pub parts: Vec<Part>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

impl StreamOutput {
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.finish_reason.is_none() && self.usage.is_none()
    }
}

/// Incremental decoder for a streamed chat response.
///
/// Text deltas run through the markup extractor, so cleaned text surfaces as
/// soon as it provably cannot be tool-call markup. Tool calls, whether
/// native deltas or extracted from markup, are held back and flushed exactly
/// once, on the chunk that carries a finish reason. After that flush the
/// decoder is back in its initial state, so a stray repeated terminal chunk
/// yields nothing new.
#[derive(Debug, Default)]
pub struct StreamingDecoder {
    extractor: MarkupExtractor,
    accumulator: ToolCallAccumulator,
    pending_calls: Vec<ParsedToolCall>,
    usage: Option<TokenUsage>,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed stream chunk.
    pub fn push_chunk(&mut self, chunk: &ChatStreamChunk) -> StreamOutput {
        let mut out = StreamOutput::default();

        // Usage can ride on any chunk, terminal or not.
        if let Some(usage) = &chunk.usage {
            self.usage = Some(chat_usage_to_content(usage));
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = choice.delta.content.as_deref() {
                if !content.is_empty() {
                    self.push_text(content, &mut out);
                }
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    let function = tc.function.as_ref();
                    self.accumulator.add_chunk(
                        tc.index,
                        function.and_then(|f| f.arguments.as_deref()),
                        tc.id.as_deref(),
                        function.and_then(|f| f.name.as_deref()),
                    );
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.flush_terminal(reason, &mut out);
            }
        }
        out
    }

    /// Discard all buffered state, e.g. when a stream is abandoned mid-way.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.accumulator.reset();
        self.pending_calls.clear();
        self.usage = None;
    }

    fn push_text(&mut self, content: &str, out: &mut StreamOutput) {
        // Fast path: with nothing buffered and no marker shape anywhere in
        // the delta, the text can be surfaced as-is.
        if self.extractor.is_idle()
            && !MarkupExtractor::contains_markup_markers(content)
            && MarkupExtractor::marker_fragment_start(content).is_none()
        {
            out.parts.push(Part::Text(content.to_string()));
            return;
        }
        match self.extractor.push(content) {
            PushOutcome::Resolved(extraction) => self.absorb(extraction, out),
            PushOutcome::Pending => {}
        }
    }

    fn absorb(&mut self, extraction: Extraction, out: &mut StreamOutput) {
        for text in extraction.texts {
            out.parts.push(Part::Text(text));
        }
        self.pending_calls.extend(extraction.calls);
    }

    fn flush_terminal(&mut self, reason: &str, out: &mut StreamOutput) {
        let drained = self.extractor.finish();
        self.absorb(drained, out);
        self.pending_calls.extend(self.accumulator.completed_calls());
        for call in self.pending_calls.drain(..) {
            out.parts.push(Part::FunctionCall {
                id: call.id,
                name: call.name,
                args: call.args,
            });
        }
        out.finish_reason = Some(chat_finish_to_content(reason));
        out.usage = self.usage.take();
        self.extractor.reset();
        self.accumulator.reset();
    }
}
