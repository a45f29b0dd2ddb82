use crate::record::Record;

/// Upper bound, in bytes, of the `stderr` field sent to the coaching service.
pub const MAX_ERROR_TAIL_BYTES: usize = 32 * 1024;

/// Assemble a record from raw captured bytes. Never fails.
pub fn build(text: &str, exit_code: i32, captured: &[u8], cwd: &str) -> Record {
    let decoded = String::from_utf8_lossy(captured);
    Record {
        cwd: cwd.to_string(),
        last_command: text.to_string(),
        exit_code,
        error_tail: tail_truncate(&decoded, MAX_ERROR_TAIL_BYTES).to_string(),
    }
}

/// Keep the most recent `limit` bytes of `text`.
///
/// When the cut lands inside a multi-byte character the start moves forward to
/// the next character boundary, so the result may be up to three bytes shorter
/// than `limit` but is always valid UTF-8.
pub fn tail_truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
