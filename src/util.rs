/// Extract the JSON payload from one SSE line.
///
/// Returns `None` for empty lines, comments, `event:` lines, and the
/// `[DONE]` sentinel.
pub(crate) fn sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') || trimmed.starts_with("event:") {
        return None;
    }

    let payload = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_extraction() {
        assert_eq!(sse_data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn test_non_data_lines() {
        assert_eq!(sse_data_payload(""), None);
        assert_eq!(sse_data_payload(": keepalive"), None);
        assert_eq!(sse_data_payload("event: ping"), None);
        assert_eq!(sse_data_payload("data: [DONE]"), None);
    }
}
