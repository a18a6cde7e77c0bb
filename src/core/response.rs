//! Reply shaping for a line-oriented chat protocol
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0

/// Strip control characters and surrounding whitespace from a raw server line.
pub fn sanitize_line(raw: &str) -> String {
    raw.chars()
        .filter(|&c| c != '\0' && c != '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collapse a multi-line backend reply into a single protocol line.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate a reply to `max_len` bytes, preferring a word boundary (UTF-8 safe).
pub fn truncate_reply(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }

    let mut end = max_len - 3;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];

    // Break at the last space when it does not cost too much of the reply.
    match truncated.rfind(' ') {
        Some(space) if space * 10 >= max_len * 8 => format!("{}...", &truncated[..space]),
        _ => format!("{truncated}..."),
    }
}
