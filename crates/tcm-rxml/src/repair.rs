//! C2 — heuristic repair pipeline run over raw XML-ish text before
//! tokenizing, to cope with the ways models actually misquote XML (§4.2).
//!
//! Each heuristic is a pure `String -> String` rewrite, applied in a fixed
//! order that matters: later heuristics assume earlier ones already ran
//! (e.g. `balance-tags` assumes `normalize-close-tags` already fixed up
//! `< /tag>` spacing, so it only has to reason about missing tags, not
//! malformed ones).

use once_cell::sync::Lazy;
use regex::Regex;

pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &str) -> String;
}

/// `<` followed by anything that isn't a valid tag opener (a name-start
/// char, `/`, `!`, or `?`) is almost certainly a stray less-than inside
/// text content, not a tag — escape it so the tokenizer treats it as text
/// rather than failing to find a matching `>`.
pub struct EscapeInvalidLt;

static INVALID_LT: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(?P<next>[^a-zA-Z_:/!?])").unwrap());

impl Heuristic for EscapeInvalidLt {
    fn name(&self) -> &'static str {
        "escape-invalid-lt"
    }

    fn apply(&self, input: &str) -> String {
        INVALID_LT
            .replace_all(input, "&lt;$next")
            .into_owned()
    }
}

/// Some models emit a tool's string argument wrapped twice, e.g.
/// `<command><command>ls -la</command></command>` — collapse an element
/// whose sole child is an identically-named element with no attributes of
/// its own into a single element.
pub struct DedupeShellStringTags;

static DOUBLE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?P<tag>[a-zA-Z_][a-zA-Z0-9_.:-]*)>\s*<(?P<inner>[a-zA-Z_][a-zA-Z0-9_.:-]*)>")
        .unwrap()
});

impl Heuristic for DedupeShellStringTags {
    fn name(&self) -> &'static str {
        "dedupe-shell-string-tags"
    }

    fn apply(&self, input: &str) -> String {
        let mut out = input.to_string();
        loop {
            let Some(caps) = DOUBLE_TAG.captures(&out) else {
                break;
            };
            let tag = caps.name("tag").unwrap().as_str();
            let inner = caps.name("inner").unwrap().as_str();
            if tag != inner {
                break;
            }
            let open_close = format!("</{tag}></{tag}>");
            if !out.contains(&open_close) {
                break;
            }
            let whole_open = caps.get(0).unwrap();
            let opener = format!("<{tag}>");
            out.replace_range(whole_open.start()..whole_open.end(), &opener);
            out = out.replacen(&open_close, &format!("</{tag}>"), 1);
        }
        out
    }
}

/// `< /tag>` and `</ tag >` — whitespace around the slash or before `>` in
/// a close tag. The tokenizer itself requires a tight `</tag>`; this
/// heuristic is where that tolerance actually lives (§4.1/§4.2 split).
pub struct NormalizeCloseTags;

static LOOSE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*/\s*([a-zA-Z_][a-zA-Z0-9_.:-]*)\s*>").unwrap());

impl Heuristic for NormalizeCloseTags {
    fn name(&self) -> &'static str {
        "normalize-close-tags"
    }

    fn apply(&self, input: &str) -> String {
        LOOSE_CLOSE.replace_all(input, "</$1>").into_owned()
    }
}

/// Append synthetic close tags for any still-open elements at the end of
/// the buffer, innermost first — used on non-streaming (complete-buffer)
/// input where an unbalanced tree means the model simply forgot a closer
/// rather than the stream being mid-flight.
pub struct BalanceTags;

impl Heuristic for BalanceTags {
    fn name(&self) -> &'static str {
        "balance-tags"
    }

    fn apply(&self, input: &str) -> String {
        let open_re = Regex::new(r"<([a-zA-Z_][a-zA-Z0-9_.:-]*)(?:[^>]*?)(/?)>").unwrap();
        let close_re = Regex::new(r"</([a-zA-Z_][a-zA-Z0-9_.:-]*)>").unwrap();

        let mut stack: Vec<String> = Vec::new();
        let mut events: Vec<(usize, bool, String)> = Vec::new();

        for caps in open_re.captures_iter(input) {
            let whole = caps.get(0).unwrap();
            let self_closing = !caps.get(2).unwrap().as_str().is_empty();
            if !self_closing {
                events.push((whole.start(), true, caps[1].to_string()));
            }
        }
        for caps in close_re.captures_iter(input) {
            let whole = caps.get(0).unwrap();
            events.push((whole.start(), false, caps[1].to_string()));
        }
        events.sort_by_key(|(pos, ..)| *pos);

        for (_, is_open, tag) in events {
            if is_open {
                stack.push(tag);
            } else if let Some(depth) = stack.iter().rposition(|t| t == &tag) {
                stack.truncate(depth);
            }
        }

        let mut out = input.to_string();
        for tag in stack.iter().rev() {
            out.push_str(&format!("</{tag}>"));
        }
        out
    }
}

/// If the schema tells us a top-level field is expected but the tag used
/// for it doesn't match any known schema property or alias, and exactly
/// one schema property remains otherwise unfilled, rename the stray tag to
/// match it. This is schema-aware, so it runs last and takes the target
/// tool's root schema as an argument rather than being a pure string
/// rewrite like the others.
pub fn repair_against_schema(input: &str, schema: &crate::schema::Schema<'_>) -> String {
    let tag_re = Regex::new(r"<([a-zA-Z_][a-zA-Z0-9_.:-]*)>").unwrap();
    let mut out = input.to_string();
    let Some(props) = schema.properties() else {
        return out;
    };
    let present: Vec<String> = tag_re
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect();
    let unmatched: Vec<&String> = present
        .iter()
        .filter(|t| !schema.has_property(t))
        .collect();
    let missing: Vec<&String> = props
        .keys()
        .filter(|k| !present.iter().any(|p| p == *k))
        .collect();

    if unmatched.len() == 1 && missing.len() == 1 {
        let stray = unmatched[0];
        let target = missing[0];
        out = out.replace(&format!("<{stray}>"), &format!("<{target}>"));
        out = out.replace(&format!("</{stray}>"), &format!("</{target}>"));
    }
    out
}

pub fn default_pipeline() -> Vec<Box<dyn Heuristic>> {
    vec![
        Box::new(EscapeInvalidLt),
        Box::new(DedupeShellStringTags),
        Box::new(NormalizeCloseTags),
        Box::new(BalanceTags),
    ]
}

/// Run the fixed-order pipeline over `input`, tracing each step at debug
/// level (C12's debug-logging convention) so a failed parse downstream can
/// be diagnosed from logs alone.
pub fn run_pipeline(input: &str, pipeline: &[Box<dyn Heuristic>]) -> String {
    let mut current = input.to_string();
    for heuristic in pipeline {
        let next = heuristic.apply(&current);
        if next != current {
            tracing::debug!(heuristic = heuristic.name(), "xml repair heuristic changed input");
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    #[test]
    fn escapes_lt_followed_by_non_tag_char() {
        let h = EscapeInvalidLt;
        assert_eq!(h.apply("a < b"), "a &lt; b");
        assert_eq!(h.apply("<tag>ok</tag>"), "<tag>ok</tag>");
    }

    #[test]
    fn normalizes_spaced_close_tags() {
        let h = NormalizeCloseTags;
        assert_eq!(h.apply("<a>x</ a >"), "<a>x</a>");
    }

    #[test]
    fn balances_unterminated_nested_tags() {
        let h = BalanceTags;
        assert_eq!(h.apply("<a><b>x"), "<a><b>x</b></a>");
    }

    #[test]
    fn dedupes_doubled_identical_wrapper_tag() {
        let h = DedupeShellStringTags;
        let out = h.apply("<command><command>ls -la</command></command>");
        assert_eq!(out, "<command>ls -la</command>");
    }

    #[test]
    fn repairs_stray_tag_against_schema_when_unambiguous() {
        let schema_val = json!({
            "type": "object",
            "properties": {"city": {"type": "string"}}
        });
        let schema = Schema::new(&schema_val);
        let out = repair_against_schema("<town>Paris</town>", &schema);
        assert_eq!(out, "<city>Paris</city>");
    }

    #[test]
    fn default_pipeline_runs_in_order_without_panicking() {
        let pipeline = default_pipeline();
        let out = run_pipeline("<a>< /a>", &pipeline);
        assert_eq!(out, "<a></a>");
    }
}
