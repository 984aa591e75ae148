use std::sync::LazyLock;

use memchr::memmem;
use regex_lite::Regex;

use crate::json_scan::{scan_object, ObjectScan};

use super::extractor::{ARG_BEGIN_FINDER, CALL_BEGIN, CALL_END_FINDER, SECTION_END};
use super::{min_opt, parse_arguments_lenient, parse_call_header, ParsedToolCall};

// Recovery strategies for tool-call markup that arrives without its section
// delimiters: reconstructed token fragments, bare `name:id{…}` calls,
// bracketed `[tool_call: name]` headers, and orphaned JSON blocks. Each
// strategy is a pure function over the buffer that either resolves a
// leading region, asks for it to be withheld, or declines; the buffer is
// never modified here.

/// `[namespace.]name:digits{` — the bare embedded-call dialect. The capture
/// groups are the function name (last path segment) and the numeric id.
static BARE_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z_][A-Za-z0-9_]*\.)*([A-Za-z_][A-Za-z0-9_]*):([0-9]+)\{")
        .expect("bare-call regex")
});

/// `[tool_call: name]` — the markdown-style header dialect.
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[tool_call:\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\]").expect("header regex")
});

/// A trailing `name:` or `name:123` with nothing after it — possibly the
/// head of a bare call split at a chunk boundary.
static BARE_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*:[0-9]*$")
        .expect("bare-tail regex")
});

const HEADER_LEAD: &str = "[tool_call:";

/// A region of the buffer resolved by one recovery strategy.
#[derive(Debug)]
pub(super) struct Recovered {
    /// The prefix `[0..text_end)` is plain text surrounding the markup.
    pub text_end: usize,
    /// Bytes consumed from the start of the buffer, markup included.
    pub consumed: usize,
    /// The parsed call, or `None` when the markup was recognized but the
    /// call itself had to be dropped.
    pub call: Option<ParsedToolCall>,
}

/// Verdict over the current buffer.
#[derive(Debug)]
pub(super) enum Probe {
    /// A strategy resolved a leading region.
    Parsed(Recovered),
    /// Ambiguous markup starts at this offset; text before it is safe.
    Withhold(usize),
    /// Nothing markup-shaped anywhere.
    Clear,
}

enum StratResult {
    Parsed { at: usize, rec: Recovered },
    Hold(usize),
    Miss,
}

/// Run the recovery strategies in priority order over the buffer.
///
/// When several strategies see something, the earliest-positioned finding
/// wins: an unresolved fragment ahead of a parseable region blocks it until
/// more bytes arrive.
pub(super) fn probe(buf: &str) -> Probe {
    let mut parsed: Option<(usize, Recovered)> = None;
    let mut hold: Option<usize> = None;

    for result in [
        reconstruct_tokens(buf),
        bare_call(buf),
        bracket_header(buf),
        orphaned_json(buf),
    ] {
        match result {
            StratResult::Parsed { at, rec } => {
                if parsed.as_ref().is_none_or(|(best, _)| at < *best) {
                    parsed = Some((at, rec));
                }
            }
            StratResult::Hold(at) => hold = min_opt(hold, Some(at)),
            StratResult::Miss => {}
        }
    }
    hold = min_opt(hold, dialect_fragment_start(buf));

    match (parsed, hold) {
        (Some((at, _)), Some(h)) if h < at => Probe::Withhold(h),
        (Some((_, rec)), _) => Probe::Parsed(rec),
        (None, Some(h)) => Probe::Withhold(h),
        (None, None) => Probe::Clear,
    }
}

/// True when the text contains a complete bare-call shape (including one
/// that ends right at its opening brace).
pub(super) fn bare_call_shape(text: &str) -> bool {
    BARE_CALL_RE.is_match(text)
}

/// Earliest offset of a trailing fragment that could grow into one of the
/// non-token dialects: a bare `name:digits` head or a partial
/// `[tool_call:` header.
pub(super) fn dialect_fragment_start(buf: &str) -> Option<usize> {
    let mut hold = BARE_TAIL_RE.find(buf).map(|m| m.start());
    let max = buf.len().min(HEADER_LEAD.len() - 1);
    for len in (1..=max).rev() {
        if buf.ends_with(&HEADER_LEAD[..len]) {
            hold = min_opt(hold, Some(buf.len() - len));
            break;
        }
    }
    hold
}

// -- strategy 1: reconstruct missing section/call tokens --------------------

fn reconstruct_tokens(buf: &str) -> StratResult {
    let bytes = buf.as_bytes();
    let Some(arg_pos) = ARG_BEGIN_FINDER.find(bytes) else {
        return StratResult::Miss;
    };

    // The `[namespace.]name:id` header sits directly in front of the token.
    let mut header_start = arg_pos;
    while header_start > 0 && is_header_byte(bytes[header_start - 1]) {
        header_start -= 1;
    }
    if header_start == arg_pos {
        // Token with no recognizable header; withhold, the terminal pass
        // strips whatever never resolves.
        return StratResult::Hold(arg_pos);
    }

    let args_from = arg_pos + super::extractor::ARG_BEGIN.len();
    let Some(end_rel) = CALL_END_FINDER.find(&bytes[args_from..]) else {
        return StratResult::Hold(header_start);
    };
    let args_end = args_from + end_rel;
    let mut consumed = args_end + super::extractor::CALL_END.len();
    if buf[consumed..].starts_with(SECTION_END) {
        consumed += SECTION_END.len();
    }

    // An orphaned call-begin token right before the header is markup too.
    let mut text_end = header_start;
    if buf[..text_end].ends_with(CALL_BEGIN) {
        text_end -= CALL_BEGIN.len();
    }

    let call = build_call(&buf[header_start..arg_pos], &buf[args_from..args_end]);
    StratResult::Parsed {
        at: text_end,
        rec: Recovered {
            text_end,
            consumed,
            call,
        },
    }
}

fn is_header_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'-')
}

fn build_call(header: &str, args_text: &str) -> Option<ParsedToolCall> {
    let header = match parse_call_header(header) {
        Ok(header) => header,
        Err(err) => {
            tracing::warn!(%err, "dropping reconstructed tool call");
            return None;
        }
    };
    match parse_arguments_lenient(&header.name, args_text) {
        Ok(args) => Some(ParsedToolCall {
            id: header.id,
            name: header.name,
            args,
        }),
        Err(err) => {
            tracing::warn!(name = %header.name, %err, "dropping reconstructed tool call");
            None
        }
    }
}

// -- strategy 2: bare `name:id{…}` ------------------------------------------

fn bare_call(buf: &str) -> StratResult {
    let Some(caps) = BARE_CALL_RE.captures(buf) else {
        return StratResult::Miss;
    };
    let matched = caps.get(0).expect("whole match");
    let brace = matched.end() - 1;
    match scan_object(buf.as_bytes(), brace) {
        ObjectScan::Complete(end) => {
            let name = caps[1].to_string();
            let id = caps[2].to_string();
            let call = match parse_arguments_lenient(&name, &buf[brace..end]) {
                Ok(args) => Some(ParsedToolCall {
                    id: Some(id),
                    name,
                    args,
                }),
                Err(err) => {
                    tracing::warn!(name = %caps[1].to_string(), %err, "dropping bare tool call");
                    None
                }
            };
            StratResult::Parsed {
                at: matched.start(),
                rec: Recovered {
                    text_end: matched.start(),
                    consumed: end,
                    call,
                },
            }
        }
        _ => StratResult::Hold(matched.start()),
    }
}

// -- strategy 3: `[tool_call: name]` header ---------------------------------

fn bracket_header(buf: &str) -> StratResult {
    let bytes = buf.as_bytes();
    let Some(lead) = memmem::find(bytes, HEADER_LEAD.as_bytes()) else {
        return StratResult::Miss;
    };
    let Some(caps) = HEADER_RE.captures(&buf[lead..]) else {
        // Header still open: could become valid with more bytes. Once a `]`
        // shows up without matching, it is just prose.
        return if buf[lead..].contains(']') {
            StratResult::Miss
        } else {
            StratResult::Hold(lead)
        };
    };
    let name = caps[1].to_string();
    let header_end = lead + caps.get(0).expect("whole match").end();

    let tail = buf[header_end..].trim_start();
    if tail.is_empty() {
        return StratResult::Hold(lead);
    }

    // Optional lone `json` language-tag line between header and object.
    let tail = if let Some(rest) = tail.strip_prefix("json") {
        match rest.chars().next() {
            None => return StratResult::Hold(lead),
            Some('\n' | '\r') => rest.trim_start(),
            Some(_) => tail,
        }
    } else if "json".starts_with(tail) {
        return StratResult::Hold(lead);
    } else {
        tail
    };

    let obj_off = buf.len() - tail.len();
    match scan_object(bytes, obj_off) {
        ObjectScan::Complete(end) => {
            let call = match parse_arguments_lenient(&name, &buf[obj_off..end]) {
                Ok(args) => Some(ParsedToolCall {
                    id: None,
                    name,
                    args,
                }),
                Err(err) => {
                    tracing::warn!(%err, "dropping bracket-header tool call");
                    None
                }
            };
            StratResult::Parsed {
                at: lead,
                rec: Recovered {
                    text_end: lead,
                    consumed: end,
                    call,
                },
            }
        }
        ObjectScan::Incomplete => StratResult::Hold(lead),
        // Header-looking prose with no JSON after it.
        ObjectScan::NotAnObject => StratResult::Miss,
    }
}

// -- strategy 4: orphaned JSON with inferred intent -------------------------

fn orphaned_json(buf: &str) -> StratResult {
    let bytes = buf.as_bytes();
    let mut search = 0;
    while let Some(rel) = memmem::find(&bytes[search..], b"json") {
        let pos = search + rel;
        search = pos + 4;

        // The tag must sit alone on its own line.
        let before = &buf[..pos];
        let line_start_ok = before
            .rfind('\n')
            .map_or(before.trim().is_empty(), |nl| before[nl + 1..].trim().is_empty());
        if !line_start_ok {
            continue;
        }

        let after = &buf[pos + 4..];
        let Some(line_end) = after.find('\n') else {
            if after.trim().is_empty() {
                return StratResult::Hold(pos);
            }
            continue;
        };
        if !after[..line_end].trim().is_empty() {
            continue;
        }

        let tail = after[line_end + 1..].trim_start();
        if tail.is_empty() {
            return StratResult::Hold(pos);
        }
        let obj_off = buf.len() - tail.len();
        match scan_object(bytes, obj_off) {
            ObjectScan::Complete(end) => {
                let args_text = &buf[obj_off..end];
                let call = match parse_arguments_lenient("", args_text) {
                    Ok(args) => {
                        let name = infer_call_name(&args);
                        Some(ParsedToolCall {
                            id: None,
                            name: name.to_string(),
                            args,
                        })
                    }
                    Err(err) => {
                        tracing::warn!(%err, "dropping orphaned-JSON tool call");
                        None
                    }
                };
                return StratResult::Parsed {
                    at: pos,
                    rec: Recovered {
                        text_end: pos,
                        consumed: end,
                        call,
                    },
                };
            }
            ObjectScan::Incomplete => return StratResult::Hold(pos),
            ObjectScan::NotAnObject => continue,
        }
    }
    StratResult::Miss
}

/// Best-effort intent inference for an orphaned JSON block, keyed on
/// argument shapes. Deliberately limited to the documented cases.
fn infer_call_name(args: &serde_json::Value) -> &'static str {
    let Some(map) = args.as_object() else {
        return "read_file";
    };
    if map.contains_key("todoList") || map.contains_key("todos") {
        "todo_write"
    } else if map.contains_key("filePath") || map.contains_key("content") {
        "write_file"
    } else if map.contains_key("command") {
        "run_shell_command"
    } else {
        "read_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_call_parses() {
        let buf = r#"before create_file:1{"path":"t.py"}after"#;
        match probe(buf) {
            Probe::Parsed(rec) => {
                assert_eq!(&buf[..rec.text_end], "before ");
                let call = rec.call.unwrap();
                assert_eq!(call.name, "create_file");
                assert_eq!(call.id.as_deref(), Some("1"));
                assert_eq!(call.args["path"], "t.py");
                assert_eq!(&buf[rec.consumed..], "after");
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_call_namespaced() {
        let buf = r#"functions.read_file:0{"path":"a"}"#;
        match probe(buf) {
            Probe::Parsed(rec) => {
                let call = rec.call.unwrap();
                assert_eq!(call.name, "read_file");
                assert_eq!(call.id.as_deref(), Some("0"));
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_call_incomplete_withholds() {
        let buf = r#"text create_file:1{"path":"#;
        match probe(buf) {
            Probe::Withhold(at) => assert_eq!(&buf[..at], "text "),
            other => panic!("expected Withhold, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_tail_without_brace_withholds() {
        let buf = "Creating create_file:1";
        match probe(buf) {
            Probe::Withhold(at) => assert_eq!(&buf[..at], "Creating "),
            other => panic!("expected Withhold, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_prose_is_clear() {
        assert!(matches!(probe("Nothing to see here."), Probe::Clear));
    }

    #[test]
    fn test_bracket_header_with_json_tag() {
        let buf = "see below\n[tool_call: write_file]\njson\n{\"filePath\":\"x\"} done";
        match probe(buf) {
            Probe::Parsed(rec) => {
                let call = rec.call.unwrap();
                assert_eq!(call.name, "write_file");
                assert!(call.id.is_none());
                assert_eq!(&buf[rec.consumed..], " done");
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_bracket_header_without_json_tag() {
        let buf = "[tool_call: run_shell_command] {\"command\":\"ls\"}";
        match probe(buf) {
            Probe::Parsed(rec) => {
                assert_eq!(rec.call.unwrap().name, "run_shell_command");
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_bracket_header_prose_is_clear() {
        // A closed bracket with no object after it is just prose.
        assert!(matches!(
            probe("[tool_call: example] is the syntax, by the way."),
            Probe::Clear
        ));
    }

    #[test]
    fn test_partial_header_withholds() {
        match probe("some text [tool_ca") {
            Probe::Withhold(at) => assert_eq!(at, "some text ".len()),
            other => panic!("expected Withhold, got {other:?}"),
        }
    }

    #[test]
    fn test_orphaned_json_infers_write_file() {
        let buf = "json\n{\"filePath\":\"a.txt\",\"content\":\"hi\"}";
        match probe(buf) {
            Probe::Parsed(rec) => assert_eq!(rec.call.unwrap().name, "write_file"),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_orphaned_json_infers_shell_and_todo() {
        match probe("json\n{\"command\":\"ls -la\"}") {
            Probe::Parsed(rec) => assert_eq!(rec.call.unwrap().name, "run_shell_command"),
            other => panic!("expected Parsed, got {other:?}"),
        }
        match probe("json\n{\"todos\":[]}") {
            Probe::Parsed(rec) => assert_eq!(rec.call.unwrap().name, "todo_write"),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_orphaned_json_fallback_name() {
        match probe("json\n{\"path\":\"a\"}") {
            Probe::Parsed(rec) => assert_eq!(rec.call.unwrap().name, "read_file"),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_json_word_in_prose_ignored() {
        assert!(matches!(
            probe("I like json as a format."),
            Probe::Clear
        ));
    }

    #[test]
    fn test_reconstructed_tokens() {
        let buf = format!(
            "lead functions.read_file:0{}{{\"path\":\"a\"}}{}",
            super::super::extractor::ARG_BEGIN,
            super::super::extractor::CALL_END,
        );
        match probe(&buf) {
            Probe::Parsed(rec) => {
                assert_eq!(&buf[..rec.text_end], "lead ");
                let call = rec.call.unwrap();
                assert_eq!(call.name, "read_file");
                assert_eq!(call.id.as_deref(), Some("0"));
                assert_eq!(rec.consumed, buf.len());
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_reconstructed_tokens_missing_end_withholds() {
        let buf = format!(
            "lead functions.read_file:0{}{{\"pa",
            super::super::extractor::ARG_BEGIN
        );
        match probe(&buf) {
            Probe::Withhold(at) => assert_eq!(&buf[..at], "lead "),
            other => panic!("expected Withhold, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_bare_args_drops_call_keeps_text() {
        let buf = "x broken:1{not json} y";
        match probe(buf) {
            Probe::Parsed(rec) => {
                assert!(rec.call.is_none());
                assert_eq!(&buf[..rec.text_end], "x ");
                assert_eq!(&buf[rec.consumed..], " y");
            }
            other => panic!("expected Parsed, got {other:?}"),
        }
    }
}
