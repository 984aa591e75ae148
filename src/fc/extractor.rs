use std::sync::LazyLock;

use memchr::{memchr, memmem};
use smallvec::SmallVec;

use super::recovery::{self, Probe};
use super::{min_opt, parse_arguments_lenient, parse_call_header, CallHeader, ParsedToolCall};
use crate::json_scan::{scan_object, ObjectScan};

// Streaming extractor for tool-call markup embedded in text output. The
// section dialect wraps calls in five delimiter tokens:
//
//   <|tool_calls_section_begin|>
//     <|tool_call_begin|> functions.name:id <|tool_call_argument_begin|>
//       {...}
//     <|tool_call_end|>
//   <|tool_calls_section_end|>
//
// Deltas are appended to a growing buffer and a state machine walks it,
// consuming resolved regions. Text is only released once the remainder of
// the buffer provably cannot be (or become) markup; the recovery module
// handles the degenerate dialects emitted when token training slips.

pub(crate) const SECTION_BEGIN: &str = "<|tool_calls_section_begin|>";
pub(crate) const SECTION_END: &str = "<|tool_calls_section_end|>";
pub(crate) const CALL_BEGIN: &str = "<|tool_call_begin|>";
pub(crate) const CALL_END: &str = "<|tool_call_end|>";
pub(crate) const ARG_BEGIN: &str = "<|tool_call_argument_begin|>";

const TOKENS: [&str; 5] = [SECTION_BEGIN, SECTION_END, CALL_BEGIN, CALL_END, ARG_BEGIN];
const LONGEST_TOKEN: usize = SECTION_BEGIN.len();

const HEADER_LEAD: &str = "[tool_call:";

/// Responses hold whole tool calls, not documents; a buffer past this size
/// means runaway markup and gets flushed as plain text.
const MAX_BUFFER: usize = 512 * 1024;

static SECTION_BEGIN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(SECTION_BEGIN));
static SECTION_END_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(SECTION_END));
static CALL_BEGIN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(CALL_BEGIN));
pub(crate) static CALL_END_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(CALL_END));
pub(crate) static ARG_BEGIN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(ARG_BEGIN));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InSection,
    InCall,
    InArguments,
}

/// Text and calls resolved by one extractor step.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Cleaned text regions, in stream order.
    pub texts: SmallVec<[String; 2]>,
    /// Tool calls parsed out of the markup, in stream order.
    pub calls: Vec<ParsedToolCall>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.calls.is_empty()
    }
}

/// Outcome of feeding one delta to the extractor.
#[derive(Debug)]
pub enum PushOutcome {
    /// Something resolved: safe text, parsed calls, or both.
    Resolved(Extraction),
    /// Everything is withheld pending more bytes.
    Pending,
}

/// Incremental tool-call markup extractor.
///
/// Feed response text through [`push`](Self::push); call
/// [`finish`](Self::finish) exactly once when the stream terminates to drain
/// whatever is still buffered. The guarantee is no leakage: no fragment of a
/// markup token is ever released as text mid-stream.
#[derive(Debug)]
pub struct MarkupExtractor {
    buf: String,
    state: State,
    header: Option<CallHeader>,
    section_calls: Vec<ParsedToolCall>,
    section_text: String,
    max_buffer: usize,
}

impl Default for MarkupExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupExtractor {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            state: State::Outside,
            header: None,
            section_calls: Vec::new(),
            section_text: String::new(),
            max_buffer: MAX_BUFFER,
        }
    }

    /// True when nothing is buffered and no section is open. In this state a
    /// marker-free delta can bypass the extractor entirely.
    pub fn is_idle(&self) -> bool {
        self.state == State::Outside && self.buf.is_empty()
    }

    /// The raw bytes currently withheld.
    pub fn buffered(&self) -> &str {
        &self.buf
    }

    /// Quick scan for anything markup-shaped: a delimiter token, a
    /// `[tool_call:` header, or a bare `name:digits{` call (including one
    /// cut off right at the brace).
    pub fn contains_markup_markers(text: &str) -> bool {
        let bytes = text.as_bytes();
        if SECTION_BEGIN_FINDER.find(bytes).is_some()
            || SECTION_END_FINDER.find(bytes).is_some()
            || CALL_BEGIN_FINDER.find(bytes).is_some()
            || CALL_END_FINDER.find(bytes).is_some()
            || ARG_BEGIN_FINDER.find(bytes).is_some()
        {
            return true;
        }
        if memmem::find(bytes, HEADER_LEAD.as_bytes()).is_some() {
            return true;
        }
        recovery::bare_call_shape(text)
    }

    /// Offset of a trailing fragment that could still grow into a marker
    /// (partial token, partial header, bare-call head), if any.
    pub(crate) fn marker_fragment_start(text: &str) -> Option<usize> {
        min_opt(token_tail_start(text), recovery::dialect_fragment_start(text))
    }

    /// Feed one text delta.
    pub fn push(&mut self, delta: &str) -> PushOutcome {
        if !delta.is_empty() {
            self.buf.push_str(delta);
        }
        if self.buf.len() > self.max_buffer {
            return PushOutcome::Resolved(self.overflow_flush());
        }

        let mut out = Extraction::default();
        loop {
            let progressed = match self.state {
                State::Outside => self.step_outside(&mut out),
                State::InSection => self.step_in_section(&mut out),
                State::InCall => self.step_in_call(),
                State::InArguments => self.step_in_arguments(),
            };
            if !progressed {
                break;
            }
        }
        if out.is_empty() {
            PushOutcome::Pending
        } else {
            PushOutcome::Resolved(out)
        }
    }

    /// Drain everything at stream end: complete a mid-arguments call whose
    /// object already closed, run a last recovery pass, then release the
    /// remainder as text with any stray tokens stripped. Leaves the
    /// extractor idle, so a second call is a no-op.
    pub fn finish(&mut self) -> Extraction {
        let mut out = Extraction::default();

        match self.state {
            State::InArguments => {
                let args_text = std::mem::take(&mut self.buf);
                let trimmed = args_text.trim();
                let candidate = match scan_object(trimmed.as_bytes(), 0) {
                    ObjectScan::Complete(end) => &trimmed[..end],
                    _ => trimmed,
                };
                self.finish_call(candidate);
            }
            State::InCall => {
                if !self.buf.is_empty() {
                    tracing::warn!("discarding unterminated tool-call header at stream end");
                }
                self.buf.clear();
            }
            State::InSection => {
                let text = std::mem::take(&mut self.buf);
                self.section_text.push_str(&text);
            }
            State::Outside => {}
        }
        self.state = State::Outside;
        self.header = None;

        out.calls.append(&mut self.section_calls);
        let section_text = strip_tokens(&std::mem::take(&mut self.section_text));
        if !section_text.trim().is_empty() {
            out.texts.push(section_text);
        }

        // Last-chance recovery over whatever never resolved mid-stream.
        loop {
            match recovery::probe(&self.buf) {
                Probe::Parsed(rec) => {
                    push_clean_text(&mut out, &self.buf[..rec.text_end]);
                    if let Some(call) = rec.call {
                        out.calls.push(call);
                    }
                    self.buf.drain(..rec.consumed);
                }
                Probe::Withhold(_) | Probe::Clear => break,
            }
        }

        if !self.buf.is_empty() {
            let cleaned = strip_tokens(&self.buf);
            self.buf.clear();
            if !cleaned.is_empty() {
                out.texts.push(cleaned);
            }
        }
        out
    }

    /// Discard all buffered state, e.g. when a stream is abandoned.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Outside;
        self.header = None;
        self.section_calls.clear();
        self.section_text.clear();
    }

    fn overflow_flush(&mut self) -> Extraction {
        tracing::warn!(
            buffered = self.buf.len(),
            "markup buffer overflow, flushing raw text"
        );
        let mut out = Extraction::default();
        out.calls.append(&mut self.section_calls);
        let mut flushed = std::mem::take(&mut self.section_text);
        flushed.push_str(&self.buf);
        self.buf.clear();
        self.state = State::Outside;
        self.header = None;
        if !flushed.is_empty() {
            out.texts.push(flushed);
        }
        out
    }

    fn step_outside(&mut self, out: &mut Extraction) -> bool {
        if let Some(pos) = SECTION_BEGIN_FINDER.find(self.buf.as_bytes()) {
            let head = self.consume_through(pos, SECTION_BEGIN.len());
            push_clean_text(out, &head);
            self.state = State::InSection;
            return true;
        }

        match recovery::probe(&self.buf) {
            Probe::Parsed(rec) => {
                push_clean_text(out, &self.buf[..rec.text_end]);
                if let Some(call) = rec.call {
                    out.calls.push(call);
                }
                self.buf.drain(..rec.consumed);
                return true;
            }
            Probe::Withhold(_) => return false,
            Probe::Clear => {}
        }

        // Release only when the whole buffer is provably plain text. Any
        // stray token or trailing token fragment keeps everything buffered
        // until it resolves or the stream ends.
        if token_holdback(&self.buf).is_none() && !self.buf.is_empty() {
            out.texts.push(std::mem::take(&mut self.buf));
        }
        false
    }

    fn step_in_section(&mut self, out: &mut Extraction) -> bool {
        let bytes = self.buf.as_bytes();
        let call_pos = CALL_BEGIN_FINDER.find(bytes);
        let end_pos = SECTION_END_FINDER.find(bytes);
        match (call_pos, end_pos) {
            (Some(call), end) if end.is_none_or(|e| call < e) => {
                let head = self.consume_through(call, CALL_BEGIN.len());
                self.section_text.push_str(&head);
                self.state = State::InCall;
                true
            }
            (_, Some(end)) => {
                let head = self.consume_through(end, SECTION_END.len());
                self.section_text.push_str(&head);
                let text = strip_tokens(&std::mem::take(&mut self.section_text));
                if !text.trim().is_empty() {
                    out.texts.push(text);
                }
                out.calls.append(&mut self.section_calls);
                self.state = State::Outside;
                true
            }
            _ => false,
        }
    }

    fn step_in_call(&mut self) -> bool {
        let Some(pos) = ARG_BEGIN_FINDER.find(self.buf.as_bytes()) else {
            return false;
        };
        let header_text = self.consume_through(pos, ARG_BEGIN.len());
        match parse_call_header(&header_text) {
            Ok(header) => self.header = Some(header),
            Err(err) => {
                tracing::warn!(%err, header = %header_text.trim(), "dropping tool call with bad header");
                self.header = None;
            }
        }
        self.state = State::InArguments;
        true
    }

    fn step_in_arguments(&mut self) -> bool {
        let Some(pos) = CALL_END_FINDER.find(self.buf.as_bytes()) else {
            return false;
        };
        let args_text = self.consume_through(pos, CALL_END.len());
        self.finish_call(&args_text);
        self.state = State::InSection;
        true
    }

    fn finish_call(&mut self, args_text: &str) {
        let Some(header) = self.header.take() else {
            return;
        };
        match parse_arguments_lenient(&header.name, args_text) {
            Ok(args) => self.section_calls.push(ParsedToolCall {
                id: header.id,
                name: header.name,
                args,
            }),
            Err(err) => {
                tracing::warn!(name = %header.name, %err, "dropping tool call with malformed arguments");
            }
        }
    }

    /// Remove `[0..pos + token_len)` from the buffer, returning `[0..pos)`.
    fn consume_through(&mut self, pos: usize, token_len: usize) -> String {
        let tail = self.buf.split_off(pos + token_len);
        let mut head = std::mem::replace(&mut self.buf, tail);
        head.truncate(pos);
        head
    }
}

/// Earliest offset that must be withheld on account of the delimiter
/// tokens: a stray complete token, or a trailing prefix of one split at a
/// chunk boundary.
fn token_holdback(buf: &str) -> Option<usize> {
    let bytes = buf.as_bytes();
    let mut hold: Option<usize> = None;
    for finder in [
        &*CALL_BEGIN_FINDER,
        &*CALL_END_FINDER,
        &*ARG_BEGIN_FINDER,
        &*SECTION_END_FINDER,
    ] {
        if let Some(pos) = finder.find(bytes) {
            hold = min_opt(hold, Some(pos));
        }
    }
    min_opt(hold, token_tail_start(buf))
}

/// Start of a buffer-final fragment that is a proper prefix of one of the
/// delimiter tokens.
fn token_tail_start(buf: &str) -> Option<usize> {
    let bytes = buf.as_bytes();
    let scan_from = buf.len().saturating_sub(LONGEST_TOKEN - 1);
    let mut at = scan_from;
    while let Some(rel) = memchr(b'<', &bytes[at..]) {
        let pos = at + rel;
        let tail = &buf[pos..];
        if TOKENS
            .iter()
            .any(|token| token.len() > tail.len() && token.starts_with(tail))
        {
            return Some(pos);
        }
        at = pos + 1;
    }
    None
}

/// Emit released text with any stray delimiter tokens removed.
fn push_clean_text(out: &mut Extraction, raw: &str) {
    if raw.is_empty() {
        return;
    }
    let cleaned = strip_tokens(raw);
    if !cleaned.is_empty() {
        out.texts.push(cleaned);
    }
}

fn strip_tokens(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in TOKENS {
        if cleaned.contains(token) {
            cleaned = cleaned.replace(token, "");
        }
    }
    cleaned
}

#[cfg(test)]
#[path = "extractor_tests.rs"]
mod tests;
