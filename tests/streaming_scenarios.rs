use wirebridge::protocol::chat::{parse_chat_sse_line, ChatStreamChunk};
use wirebridge::protocol::content::{FinishReason, Part};
use wirebridge::stream::StreamingDecoder;

fn chunk_json(body: &str) -> ChatStreamChunk {
    serde_json::from_str(body).expect("chunk json")
}

fn text_chunk(content: &str) -> ChatStreamChunk {
    chunk_json(&serde_json::json!({
        "choices": [{"index": 0, "delta": {"content": content}}]
    }).to_string())
}

fn finish_chunk(reason: &str) -> ChatStreamChunk {
    chunk_json(&serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
    }).to_string())
}

#[test]
fn markup_section_split_across_chunks() {
    // "text", then a tool-call section split over two chunks, then stop.
    let mut decoder = StreamingDecoder::new();
    let mut texts: Vec<String> = Vec::new();
    let mut calls: Vec<(Option<String>, String, serde_json::Value)> = Vec::new();

    let chunks = [
        "text",
        "<|tool_calls_section_begin|><|tool_call_begin|>functions.read_file:0\
         <|tool_call_argument_begin|>{\"path\":\"a\"}",
        "<|tool_call_end|><|tool_calls_section_end|>",
    ];
    for content in chunks {
        for part in decoder.push_chunk(&text_chunk(content)).parts {
            match part {
                Part::Text(t) => texts.push(t),
                Part::FunctionCall { id, name, args } => calls.push((id, name, args)),
                _ => {}
            }
        }
    }
    let out = decoder.push_chunk(&finish_chunk("stop"));
    for part in out.parts {
        match part {
            Part::Text(t) => texts.push(t),
            Part::FunctionCall { id, name, args } => calls.push((id, name, args)),
            _ => {}
        }
    }

    assert_eq!(texts, ["text"]);
    assert_eq!(calls.len(), 1);
    let (id, name, args) = &calls[0];
    assert_eq!(id.as_deref(), Some("0"));
    assert_eq!(name, "read_file");
    assert_eq!(args["path"], "a");
    assert_eq!(out.finish_reason, Some(FinishReason::Stop));
}

#[test]
fn bare_call_with_text_on_both_sides() {
    let mut decoder = StreamingDecoder::new();
    let out =
        decoder.push_chunk(&text_chunk("Creating file: create_file:1{\"path\":\"test.py\"}Done!"));
    let texts: Vec<&str> = out
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["Creating file: ", "Done!"]);

    let out = decoder.push_chunk(&finish_chunk("stop"));
    assert_eq!(out.parts.len(), 1);
    match &out.parts[0] {
        Part::FunctionCall { id, name, args } => {
            assert_eq!(id.as_deref(), Some("1"));
            assert_eq!(name, "create_file");
            assert_eq!(args["path"], "test.py");
        }
        other => panic!("expected a call part, got {other:?}"),
    }
}

#[test]
fn nothing_markup_shaped_ever_reaches_the_client() {
    let full = "Okay. <|tool_calls_section_begin|><|tool_call_begin|>\
                functions.write_file:2<|tool_call_argument_begin|>\
                {\"path\":\"x\",\"content\":\"{}\"}<|tool_call_end|>\
                <|tool_calls_section_end|> Saved.";
    // Every possible split point of the stream into two chunks.
    for split in 1..full.len() {
        if !full.is_char_boundary(split) {
            continue;
        }
        let mut decoder = StreamingDecoder::new();
        let mut texts = String::new();
        let mut call_count = 0;
        for content in [&full[..split], &full[split..]] {
            for part in decoder.push_chunk(&text_chunk(content)).parts {
                if let Part::Text(t) = part {
                    assert!(!t.contains("<|"), "split {split}: leaked {t:?}");
                    texts.push_str(&t);
                }
            }
        }
        for part in decoder.push_chunk(&finish_chunk("stop")).parts {
            match part {
                Part::Text(t) => {
                    assert!(!t.contains("<|"), "split {split}: leaked {t:?} at end");
                    texts.push_str(&t);
                }
                Part::FunctionCall { .. } => call_count += 1,
                _ => {}
            }
        }
        assert_eq!(texts, "Okay.  Saved.", "split {split}");
        assert_eq!(call_count, 1, "split {split}");
    }
}

#[test]
fn terminal_flush_happens_exactly_once() {
    let mut decoder = StreamingDecoder::new();
    let _ = decoder.push_chunk(&text_chunk("run_shell_command:4{\"command\":\"ls\"}"));
    let first = decoder.push_chunk(&finish_chunk("stop"));
    assert_eq!(first.parts.len(), 1);

    let second = decoder.push_chunk(&finish_chunk("stop"));
    assert!(second.parts.is_empty());
    assert_eq!(second.finish_reason, Some(FinishReason::Stop));
}

#[test]
fn native_deltas_and_usage_from_sse_lines() {
    let lines = [
        r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Listing."}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_7","function":{"name":"run_shell_command","arguments":"{\"comm"}}]}}]}"#,
        ": keep-alive",
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"and\":\"ls\"}"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":9,"completion_tokens":4,"total_tokens":13}}"#,
        "data: [DONE]",
    ];

    let mut decoder = StreamingDecoder::new();
    let mut parts = Vec::new();
    let mut finish = None;
    let mut usage = None;
    for line in lines {
        let Some(chunk) = parse_chat_sse_line(line) else {
            continue;
        };
        let out = decoder.push_chunk(&chunk);
        parts.extend(out.parts);
        finish = finish.or(out.finish_reason);
        usage = usage.or(out.usage);
    }

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0], Part::Text("Listing.".into()));
    match &parts[1] {
        Part::FunctionCall { id, name, args } => {
            assert_eq!(id.as_deref(), Some("call_7"));
            assert_eq!(name, "run_shell_command");
            assert_eq!(args["command"], "ls");
        }
        other => panic!("expected a call part, got {other:?}"),
    }
    assert_eq!(finish, Some(FinishReason::Stop));
    assert_eq!(usage.unwrap().total_tokens, 13);
}

#[test]
fn truncated_stream_recovers_closed_object_at_terminal() {
    let mut decoder = StreamingDecoder::new();
    let _ = decoder.push_chunk(&text_chunk(
        "<|tool_calls_section_begin|><|tool_call_begin|>functions.todo_write:0\
         <|tool_call_argument_begin|>{\"todos\":[]}",
    ));
    // The backend hit its token limit before closing the section.
    let out = decoder.push_chunk(&finish_chunk("length"));
    assert_eq!(out.finish_reason, Some(FinishReason::MaxTokens));
    assert_eq!(out.parts.len(), 1);
    assert!(matches!(&out.parts[0], Part::FunctionCall { name, .. } if name == "todo_write"));
}

#[test]
fn abandoned_stream_state_does_not_bleed_into_next() {
    let mut decoder = StreamingDecoder::new();
    let _ = decoder.push_chunk(&text_chunk("<|tool_calls_section_begin|>partial"));
    decoder.reset();

    let out = decoder.push_chunk(&text_chunk("fresh text"));
    assert_eq!(out.parts, vec![Part::Text("fresh text".into())]);
    let out = decoder.push_chunk(&finish_chunk("stop"));
    assert!(out.parts.is_empty());
}
