/// Outcome of scanning for the end of a JSON object embedded in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectScan {
    /// A balanced object ends at this byte offset (exclusive).
    Complete(usize),
    /// The object is still open at the end of the input.
    Incomplete,
    /// The start offset does not point at `{`.
    NotAnObject,
}

/// Find the end of the JSON object starting at `start`.
///
/// Brace depth is tracked with full string awareness, so `}` inside string
/// literals (including after `\"` escapes) never closes the object. The
/// input around the object can be arbitrary prose; only the bytes from
/// `start` onward are inspected.
pub(crate) fn scan_object(bytes: &[u8], start: usize) -> ObjectScan {
    if bytes.get(start) != Some(&b'{') {
        return ObjectScan::NotAnObject;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return ObjectScan::Complete(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    ObjectScan::Incomplete
}
