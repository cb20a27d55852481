pub const ELLIPSIS: &str = "...";

/// Cut `text` to at most `max_chars` characters, appending `...` when anything
/// was removed. Counts chars, never splits a code point.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{}", &text[..byte_index], ELLIPSIS),
        None => text.to_string(),
    }
}
