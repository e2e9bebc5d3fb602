//! C8 — tool-input lifecycle emitter.
//!
//! Owns the incomplete-JSON-prefix policy: as a tool's payload streams in
//! byte by byte, this decides how much of it is safe to hand the consumer
//! as a `tool-input-delta` right now versus what must wait for more bytes
//! to arrive (so a consumer incrementally rendering tool input never sees
//! a value cut mid-string-literal or mid-escape).

use tcm_types::StreamPart;

/// Truncate `payload` at the longest prefix that is valid as an
/// *incomplete* JSON document — i.e. it may be missing closing
/// brackets/braces, but never ends inside a string literal, an escape
/// sequence, or a partially-written literal token (`tru`, `-12.`, etc).
pub fn incomplete_json_prefix(payload: &str) -> &str {
    let bytes = payload.as_bytes();
    let mut depth_stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut last_safe = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
                last_safe = i + 1;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
            }
            b'{' | b'[' => {
                depth_stack.push(b);
                last_safe = i + 1;
            }
            b'}' => {
                if depth_stack.last() == Some(&b'{') {
                    depth_stack.pop();
                }
                last_safe = i + 1;
            }
            b']' => {
                if depth_stack.last() == Some(&b'[') {
                    depth_stack.pop();
                }
                last_safe = i + 1;
            }
            b',' | b':' => {
                last_safe = i + 1;
            }
            b if b.is_ascii_whitespace() => {
                last_safe = i + 1;
            }
            b't' | b'f' | b'n' | b'-' | b'0'..=b'9' => {
                // Start of a literal token (true/false/null/number). Find
                // where it ends — the token is only safe to include once
                // we've seen a non-token character after it, since "tru"
                // isn't valid JSON yet.
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i], b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9' | b'a'..=b'z')
                {
                    i += 1;
                }
                let token = &payload[start..i];
                if matches!(token, "true" | "false" | "null")
                    || token.parse::<f64>().is_ok()
                {
                    last_safe = i;
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if in_string {
        // Mid-string: everything up through the last confirmed-safe
        // boundary is emittable; the partial string itself is withheld.
        &payload[..last_safe]
    } else {
        &payload[..last_safe.max(0).min(payload.len())]
    }
}

/// Per-tool-call streaming state: tracks how much of the payload has
/// already been handed to the consumer as `tool-input-delta`, so only the
/// new suffix is emitted on each tick.
#[derive(Debug, Default)]
pub struct ToolInputLifecycle {
    id: String,
    tool_name: String,
    emitted_prefix_len: usize,
    full_json_mode: bool,
}

impl ToolInputLifecycle {
    pub fn start(id: impl Into<String>, tool_name: impl Into<String>, full_json_mode: bool) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            emitted_prefix_len: 0,
            full_json_mode,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Called once when the tool-input segment opens; returns the
    /// `tool-input-start` event.
    pub fn start_event(&self) -> StreamPart {
        StreamPart::ToolInputStart {
            id: self.id.clone(),
            tool_name: self.tool_name.clone(),
        }
    }

    /// Called every time more payload bytes have accumulated. Returns a
    /// `tool-input-delta` event if there's new content safe to emit, or
    /// `None` if nothing new is safe yet.
    pub fn on_payload_grew(&mut self, accumulated_payload: &str) -> Option<StreamPart> {
        let safe_prefix = if self.full_json_mode {
            accumulated_payload
        } else {
            incomplete_json_prefix(accumulated_payload)
        };

        if safe_prefix.len() <= self.emitted_prefix_len {
            return None;
        }

        let delta = &safe_prefix[self.emitted_prefix_len..];
        self.emitted_prefix_len = safe_prefix.len();
        Some(StreamPart::ToolInputDelta {
            id: self.id.clone(),
            delta: delta.to_string(),
        })
    }

    /// Called once the closing sentinel has been seen and the payload has
    /// been fully parsed and schema-coerced. Emits the remainder between
    /// what's already streamed and the final coerced input, then the
    /// `tool-input-end` and `tool-call` events in order.
    pub fn finish(
        &mut self,
        final_raw_payload: &str,
        tool_call_id: impl Into<String>,
        coerced_input_json: String,
    ) -> Vec<StreamPart> {
        let mut out = Vec::with_capacity(3);
        if final_raw_payload.len() > self.emitted_prefix_len {
            out.push(StreamPart::ToolInputDelta {
                id: self.id.clone(),
                delta: final_raw_payload[self.emitted_prefix_len..].to_string(),
            });
        }
        out.push(StreamPart::ToolInputEnd { id: self.id.clone() });
        out.push(StreamPart::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: self.tool_name.clone(),
            input: coerced_input_json,
        });
        out
    }

    /// Called when the stream ends (or the buffer overflows) while still
    /// inside a tool payload: no `tool-call` is synthesised, only the
    /// closing `tool-input-end`.
    pub fn abandon(&self) -> StreamPart {
        StreamPart::ToolInputEnd { id: self.id.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_prefix_withholds_partial_literal() {
        assert_eq!(incomplete_json_prefix(r#"{"a":tru"#), r#"{"a":"#);
    }

    #[test]
    fn incomplete_prefix_withholds_partial_string() {
        assert_eq!(incomplete_json_prefix(r#"{"a":"hel"#), r#"{"a":"#);
    }

    #[test]
    fn incomplete_prefix_includes_completed_string() {
        assert_eq!(incomplete_json_prefix(r#"{"a":"hello""#), r#"{"a":"hello""#);
    }

    #[test]
    fn incomplete_prefix_includes_completed_number() {
        assert_eq!(incomplete_json_prefix(r#"{"a":12"#), r#"{"a":12"#);
    }

    #[test]
    fn incomplete_prefix_withholds_partial_number_exponent() {
        let prefix = incomplete_json_prefix(r#"{"a":1e"#);
        assert_eq!(prefix, r#"{"a":"#);
    }

    #[test]
    fn lifecycle_emits_only_new_suffix_each_tick() {
        let mut lc = ToolInputLifecycle::start("t1", "calc", false);
        let d1 = lc.on_payload_grew(r#"{"a":1"#).unwrap();
        assert!(matches!(d1, StreamPart::ToolInputDelta { ref delta, .. } if delta == r#"{"a":1"#));
        let d2 = lc.on_payload_grew(r#"{"a":12"#).unwrap();
        assert!(matches!(d2, StreamPart::ToolInputDelta { ref delta, .. } if delta == "2"));
    }

    #[test]
    fn finish_emits_remainder_end_and_call_in_order() {
        let mut lc = ToolInputLifecycle::start("t1", "calc", false);
        lc.on_payload_grew(r#"{"a":1"#);
        let events = lc.finish(r#"{"a":1}"#, "call-1", r#"{"a":1}"#.to_string());
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamPart::ToolInputDelta { .. }));
        assert!(matches!(events[1], StreamPart::ToolInputEnd { .. }));
        assert!(matches!(events[2], StreamPart::ToolCall { .. }));
    }
}
