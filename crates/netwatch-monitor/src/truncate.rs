//! Middle-omission truncation for captured tool output.
//!
//! Error output from network tools is usually short, but a misbehaving binary
//! can dump megabytes of stderr. Only the start (invocation errors) and the
//! end (final diagnostic) are kept so the message stays storable and loggable.

/// Characters of stderr kept in [`crate::MonitorError::Failed`].
pub const MAX_STDERR_CHARS: usize = 2_000;

/// Shorten `text` to roughly `max_chars` characters by cutting out the middle.
///
/// Splits on `char` boundaries, never inside a UTF-8 sequence.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let keep = max_chars / 2;
    let head_end = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(idx, _)| idx);
    let tail_start = text
        .char_indices()
        .nth(total - keep)
        .map_or(text.len(), |(idx, _)| idx);

    format!(
        "{} [... {} chars omitted ...] {}",
        &text[..head_end],
        total - 2 * keep,
        &text[tail_start..]
    )
}
