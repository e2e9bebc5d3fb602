//! C7 — the non-streaming parser kernel: given one complete generation and
//! a protocol, split it into `ContentPart`s.
//!
//! The sentinel-scanning loop below is the non-streaming twin of C6's state
//! machine — simpler, since there's no incremental buffering to worry about,
//! but sharing the same "earliest tag wins, ties break alphabetically"
//! policy. When a protocol's sentinels never occur at all, `recover_free_form`
//! falls back to scanning for a bare JSON tool-call object the model emitted
//! without its usual wrapper (optionally inside a markdown code fence) —
//! grounded in the teacher's `streaming_parser`'s `find_json_object_end`/
//! code-fence-tracking idiom for recognising JSON-shaped output amid prose.

use crate::protocol::{tool_registry, Protocol, ToolRegistry};
use tcm_types::{ids::next_stable_id, ContentPart, ErrorEnvelope, MiddlewareError, OnError, ToolDescriptor};

/// Parse one complete generation with no error reporting — the form the
/// `Protocol` trait itself exposes (§4.9's `parseGeneratedText` contract has
/// no `onError` parameter).
pub fn parse(protocol: &dyn Protocol, text: &str, tools: &ToolRegistry) -> Vec<ContentPart> {
    parse_reporting(protocol, text, tools, &None)
}

/// The richer entry point `wrap_generate` (C11) calls directly, so a
/// malformed payload still reaches the caller's `onError` callback even
/// though the `Protocol` trait method itself can't carry one.
pub fn parse_reporting(
    protocol: &dyn Protocol,
    text: &str,
    tools: &ToolRegistry,
    on_error: &Option<OnError>,
) -> Vec<ContentPart> {
    let sentinels = protocol.open_sentinels(tools);
    if sentinels.is_empty() || !sentinels.iter().any(|s| text.contains(s.tag.as_str())) {
        if let Some(recovered) = recover_free_form(text, tools) {
            return recovered;
        }
        return vec![ContentPart::Text { text: text.to_string() }];
    }

    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        let found = sentinels
            .iter()
            .filter_map(|s| rest.find(s.tag.as_str()).map(|idx| (idx, s)))
            .min_by(|(idx_a, s_a), (idx_b, s_b)| idx_a.cmp(idx_b).then_with(|| s_a.tag.cmp(&s_b.tag)));

        let Some((idx, sentinel)) = found else {
            if !rest.is_empty() {
                parts.push(ContentPart::Text { text: rest.to_string() });
            }
            break;
        };

        if idx > 0 {
            parts.push(ContentPart::Text { text: rest[..idx].to_string() });
        }
        let after_open = &rest[idx + sentinel.tag.len()..];
        let close_tag = protocol.close_sentinel_for(&sentinel.tag);

        match after_open.find(close_tag.as_str()) {
            Some(close_idx) => {
                let payload = &after_open[..close_idx];
                match protocol.parse_payload(sentinel.tool_name.as_deref(), payload, tools) {
                    Ok(parsed) => {
                        parts.push(ContentPart::ToolCall {
                            tool_call_id: next_stable_id("call"),
                            tool_name: parsed.tool_name,
                            input: parsed.input_json,
                        });
                    }
                    Err(err) => {
                        let original = format!("{}{}{}", sentinel.tag, payload, close_tag);
                        err.notify(on_error, Some(original.clone()));
                        parts.push(error_text_part(&err, &original));
                    }
                }
                rest = &after_open[close_idx + close_tag.len()..];
            }
            None => {
                // Unterminated at end-of-text: no well-formed payload to
                // recover, surface the remainder as raw text (mirrors C6's
                // `finish()` unterminated-tag policy).
                parts.push(ContentPart::Text { text: rest[idx..].to_string() });
                rest = "";
            }
        }

        if rest.is_empty() {
            break;
        }
    }

    parts
}

fn error_text_part(err: &MiddlewareError, original_text: &str) -> ContentPart {
    let envelope = ErrorEnvelope::new(err, original_text);
    ContentPart::Text { text: envelope.to_json_string() }
}

/// §4.7's "free-form JSON recovery": a model that ignores its sentinel
/// entirely but still emits a recognisable `{"name": ..., "arguments": ...}`
/// object (optionally inside a ```json fence) still gets a `ContentPart::ToolCall`
/// rather than being left as unparsed text. Returns `None` when nothing
/// resembling a tool call is found, so the caller keeps the plain-text path.
fn recover_free_form(text: &str, tools: &ToolRegistry) -> Option<Vec<ContentPart>> {
    let (start, end, candidate) = find_candidate_json(text)?;
    let value: serde_json::Value = serde_json::from_str(&candidate)
        .ok()
        .or_else(|| json5::from_str(&candidate).ok())?;
    let (tool_name, input_json) = recognise_call(&value, tools)?;

    let mut parts = Vec::new();
    if start > 0 {
        parts.push(ContentPart::Text { text: text[..start].to_string() });
    }
    parts.push(ContentPart::ToolCall {
        tool_call_id: next_stable_id("call"),
        tool_name,
        input: input_json,
    });
    if end < text.len() {
        parts.push(ContentPart::Text { text: text[end..].to_string() });
    }
    Some(parts)
}

/// A JSON object either `{"name": ..., "arguments": {...}}` (the envelope
/// every JSON-in-tag protocol uses) or, when there's exactly one known tool,
/// a bare arguments object matching that tool's top-level properties.
fn recognise_call(value: &serde_json::Value, tools: &ToolRegistry) -> Option<(String, String)> {
    let obj = value.as_object()?;
    if let Some(name) = obj.get("name").and_then(|v| v.as_str()) {
        let arguments = obj.get("arguments").cloned().unwrap_or(serde_json::json!({}));
        let input_json = match tools.get(name) {
            Some(tool) => {
                let coerced = tcm_rxml::coerce_value(&arguments, tcm_rxml::Schema::new(&tool.input_schema));
                serde_json::to_string(&coerced).ok()?
            }
            None => serde_json::to_string(&arguments).ok()?,
        };
        return Some((name.to_string(), input_json));
    }

    if tools.len() == 1 {
        let (name, tool) = tools.iter().next().unwrap();
        let coerced = tcm_rxml::coerce_value(value, tcm_rxml::Schema::new(&tool.input_schema));
        let input_json = serde_json::to_string(&coerced).ok()?;
        return Some((name.clone(), input_json));
    }

    None
}

/// Locate the first balanced `{...}` span in `text`, preferring one found
/// inside a ```json fence if present. Brace-counting respects string
/// literals and escapes (ported from the teacher's fence/JSON-boundary
/// scanning idiom, generalised to also report the starting offset).
fn find_candidate_json(text: &str) -> Option<(usize, usize, String)> {
    if let Some(fence_start) = text.find("```") {
        let after_fence = &text[fence_start..];
        if let Some(nl) = after_fence.find('\n') {
            let body_start = fence_start + nl + 1;
            if let Some(close) = text[body_start..].find("```") {
                let body = &text[body_start..body_start + close];
                if let Some((rel_start, rel_end)) = find_balanced_object(body) {
                    return Some((body_start + rel_start, body_start + rel_end, body[rel_start..rel_end].to_string()));
                }
            }
        }
    }
    let (start, end) = find_balanced_object(text)?;
    Some((start, end, text[start..end].to_string()))
}

fn find_balanced_object(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in text[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::json_tag::JsonTagProtocol;
    use serde_json::json;

    fn tool(name: &str, schema: serde_json::Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: schema,
        }
    }

    #[test]
    fn splits_text_and_tool_call() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))]);
        let text = r#"before <tool_call>{"name":"calc","arguments":{"a":"3"}}</tool_call> after"#;
        let parts = parse(&protocol, text, &tools);
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text == "before "));
        assert!(matches!(&parts[1], ContentPart::ToolCall { tool_name, .. } if tool_name == "calc"));
        assert!(matches!(&parts[2], ContentPart::Text { text } if text == " after"));
    }

    #[test]
    fn plain_text_with_no_sentinel_passes_through() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[]);
        let parts = parse(&protocol, "just a plain answer", &tools);
        assert_eq!(parts, vec![ContentPart::Text { text: "just a plain answer".to_string() }]);
    }

    #[test]
    fn recovers_bare_json_call_with_no_sentinel() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))]);
        let text = r#"Sure, let me do that: {"name": "calc", "arguments": {"a": 3}} there you go"#;
        let parts = parse(&protocol, text, &tools);
        assert!(parts.iter().any(|p| matches!(p, ContentPart::ToolCall { tool_name, .. } if tool_name == "calc")));
    }

    #[test]
    fn recovers_bare_arguments_object_for_sole_tool() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))]);
        let text = r#"```json
{"a": "7"}
```"#;
        let parts = parse(&protocol, text, &tools);
        let call = parts.iter().find_map(|p| match p {
            ContentPart::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(call, Some(("calc".to_string(), r#"{"a":7}"#.to_string())));
    }

    #[test]
    fn malformed_payload_yields_error_envelope_text_and_notifies() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[]);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let on_error: OnError = Arc::new(move |_msg, _meta| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let text = "<tool_call>{bad}</tool_call>";
        let parts = parse_reporting(&protocol, text, &tools, &Some(on_error));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains("tool-call-middleware-error")));
    }
}
