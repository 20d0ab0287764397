//! Head/tail clamping of oversized tool results.
//!
//! Tool results are the single largest context consumer in any agent loop.
//! Clamping keeps the beginning (usually headers, the first matches) and
//! the end (usually the summary or error) of a result and replaces the
//! middle with [`ELISION_MARKER`].

/// Inserted where the middle of a clamped result was removed.
pub const ELISION_MARKER: &str = "\n[... truncated ...]\n";

/// Clamp `content` to roughly `char_cap` characters, keeping head and tail.
///
/// Returns `None` when the content already fits, or when clamping would not
/// make it shorter (caps smaller than the marker itself). Splits only on
/// char boundaries.
pub fn clamp_content(content: &str, char_cap: usize) -> Option<String> {
    let total = content.chars().count();
    if total <= char_cap {
        return None;
    }

    let keep = char_cap.saturating_sub(ELISION_MARKER.chars().count());
    let head_chars = keep.div_ceil(2);
    let tail_chars = keep - head_chars;

    let head_end = byte_offset(content, head_chars);
    let tail_start = byte_offset(content, total - tail_chars);

    let mut out = String::with_capacity(head_end + ELISION_MARKER.len() + content.len() - tail_start);
    out.push_str(content.get(..head_end).unwrap_or_default());
    out.push_str(ELISION_MARKER);
    out.push_str(content.get(tail_start..).unwrap_or_default());

    if out.chars().count() >= total {
        return None;
    }
    Some(out)
}

/// Byte offset of the `n`th char (or the end of the string).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_untouched() {
        assert_eq!(clamp_content("hello", 10), None);
        assert_eq!(clamp_content("hello", 5), None);
    }

    #[test]
    fn keeps_head_and_tail() {
        let content = format!("{}{}{}", "H".repeat(100), "m".repeat(1_000), "T".repeat(100));
        let clamped = clamp_content(&content, 200).unwrap();
        assert!(clamped.starts_with("HHHH"));
        assert!(clamped.ends_with("TTTT"));
        assert!(clamped.contains(ELISION_MARKER));
        assert_eq!(clamped.chars().count(), 200);
    }

    #[test]
    fn respects_char_boundaries() {
        let content = "é".repeat(500);
        let clamped = clamp_content(&content, 100).unwrap();
        assert!(clamped.starts_with('é'));
        assert!(clamped.ends_with('é'));
        assert_eq!(clamped.chars().count(), 100);
    }

    #[test]
    fn tiny_cap_never_grows_content() {
        // Content barely over a cap smaller than the marker: clamping would
        // not shrink it.
        let content = "x".repeat(12);
        assert_eq!(clamp_content(&content, 4), None);
    }

    #[test]
    fn zero_cap_reduces_to_marker() {
        let content = "x".repeat(500);
        assert_eq!(clamp_content(&content, 0).as_deref(), Some(ELISION_MARKER));
    }
}
