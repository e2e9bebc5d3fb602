//! C5 — incremental tokenizer utilities for the streaming kernel.
//!
//! `potential_start_index` answers the question the streaming parser asks on
//! every chunk: "does the *tail* of this buffer look like it could be the
//! beginning of `needle`, if more bytes are still coming?" This lets the
//! kernel hold back a suffix instead of emitting it as plain text and then
//! having to retract it once the rest of the tag arrives (§4.5).

/// Returns the byte offset within `haystack` where a prefix of `needle`
/// might begin — i.e. the earliest position such that `haystack[pos..]` is
/// a non-empty prefix of `needle`. Returns `None` if no suffix of
/// `haystack` is a prefix of `needle` (nothing to hold back).
///
/// Only ever consults the *last* `needle.len() - 1` bytes of `haystack`,
/// since a full match of `needle` itself is the caller's problem (it would
/// have already been consumed as a complete tag), not this function's.
pub fn potential_start_index(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || haystack.is_empty() {
        return None;
    }

    let max_check = (needle.len() - 1).min(haystack.len());
    // Try longest candidate suffix first so the earliest valid hold-back
    // point wins (we want to hold back as little as possible while still
    // being correct, i.e. the longest-prefix-of-needle still wins, which
    // means the earliest start byte).
    for suffix_len in (1..=max_check).rev() {
        let start = haystack.len() - suffix_len;
        if !haystack.is_char_boundary(start) {
            continue;
        }
        let suffix = &haystack[start..];
        if needle.starts_with(suffix) {
            return Some(start);
        }
    }
    None
}

/// Same question, but against a set of candidate needles (a protocol may
/// have several sentinel tags it could be about to see, e.g.
/// `<tool_call>` vs `<tool_response>`). Returns the earliest hold-back
/// point across all candidates.
pub fn potential_start_index_any(haystack: &str, needles: &[&str]) -> Option<usize> {
    needles
        .iter()
        .filter_map(|needle| potential_start_index(haystack, needle))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overlap_returns_none() {
        assert_eq!(potential_start_index("hello world", "<tool_call>"), None);
    }

    #[test]
    fn exact_partial_suffix_is_found() {
        assert_eq!(potential_start_index("text<tool_", "<tool_call>"), Some(4));
    }

    #[test]
    fn single_angle_bracket_suffix_is_found() {
        assert_eq!(potential_start_index("done<", "<tool_call>"), Some(4));
    }

    #[test]
    fn full_needle_present_is_not_this_functions_concern() {
        // A complete match isn't a "potential start" — it's a match. The
        // function still finds the longest partial overlap ending exactly
        // at the needle's own start, i.e. none, since the full string
        // isn't a *proper* prefix continuation beyond itself here there's
        // no trailing partial overlap after a complete tag.
        assert_eq!(potential_start_index("abc<tool_call>", "<tool_call>"), None);
    }

    #[test]
    fn multibyte_text_does_not_panic_on_char_boundary() {
        let haystack = "héllo <";
        assert_eq!(potential_start_index(haystack, "<tool_call>"), Some(haystack.len() - 1));
    }

    #[test]
    fn any_picks_the_earliest_hold_back_point() {
        let haystack = "abc<tool_";
        let needles = ["<tool_response>", "<tool_call>"];
        let idx = potential_start_index_any(haystack, &needles);
        assert_eq!(idx, Some(3));
    }
}
