//! C6 — the streaming parser kernel.
//!
//! `StreamParserState` is the synchronous core the test suite drives
//! directly: `push(delta) -> Vec<StreamPart>` plus `finish() -> Vec<StreamPart>`.
//! It is deliberately protocol-agnostic — every sentinel lookup and payload
//! parse is delegated to a `Protocol` implementation, the same split the
//! teacher draws between `StreamingToolParser`'s generic buffering and
//! `tool_dispatch`'s per-tool handling.

use crate::lifecycle::ToolInputLifecycle;
use crate::protocol::{tool_registry, Protocol, ToolRegistry};
use std::sync::Arc;
use tcm_types::{ids::next_stable_id, FinishReason, StreamPart, ToolCallMiddlewareOptions, ToolDescriptor, UnifiedFinishReason, Usage};
use tcm_rxml::potential_start_index_any;

enum Mode {
    Outside,
    InsideTool {
        open_tag: String,
        tool_name_hint: Option<String>,
        payload: String,
        lifecycle: Option<ToolInputLifecycle>,
    },
}

pub struct StreamParserState {
    protocol: Arc<dyn Protocol>,
    tools: ToolRegistry,
    options: ToolCallMiddlewareOptions,
    mode: Mode,
    buffer: String,
    text_id: Option<String>,
    saw_any_tool_call: bool,
    finished: bool,
    /// §3: a tool-call segment that's immediately followed by non-whitespace
    /// text gets a synthetic `"\n"` separator delta inserted before that
    /// text, since the source provided none. Set when a tool-call payload
    /// finishes parsing; resolved (and cleared) the next time text is about
    /// to be emitted, or cleared without emitting if another tool tag
    /// follows directly with no text in between.
    needs_separator: bool,
}

impl StreamParserState {
    pub fn new(protocol: Arc<dyn Protocol>, tool_list: Vec<ToolDescriptor>, options: ToolCallMiddlewareOptions) -> Self {
        Self {
            protocol,
            tools: tool_registry(&tool_list),
            options,
            mode: Mode::Outside,
            buffer: String::new(),
            text_id: None,
            saw_any_tool_call: false,
            finished: false,
            needs_separator: false,
        }
    }

    /// Feed one more chunk of upstream text through the state machine.
    pub fn push(&mut self, delta: &str) -> Vec<tcm_types::StreamPart> {
        self.buffer.push_str(delta);
        let mut out = Vec::new();
        loop {
            let progressed = match std::mem::replace(&mut self.mode, Mode::Outside) {
                Mode::Outside => self.step_outside(&mut out),
                inside @ Mode::InsideTool { .. } => {
                    self.mode = inside;
                    self.step_inside(&mut out)
                }
            };
            if !progressed {
                break;
            }
        }
        out
    }

    fn open_sentinels(&self) -> Vec<(String, Option<String>)> {
        self.protocol
            .open_sentinels(&self.tools)
            .into_iter()
            .map(|s| (s.tag, s.tool_name))
            .collect()
    }

    /// Returns `true` if it made progress and the caller should loop again.
    fn step_outside(&mut self, out: &mut Vec<StreamPart>) -> bool {
        let sentinels = self.open_sentinels();
        let tag_refs: Vec<&str> = sentinels.iter().map(|(t, _)| t.as_str()).collect();

        let earliest = find_earliest_tag(&self.buffer, &sentinels);
        match earliest {
            None => {
                let hold = potential_start_index_any(&self.buffer, &tag_refs);
                let emit_upto = hold.unwrap_or(self.buffer.len());
                if emit_upto > 0 {
                    let text: String = self.buffer.drain(..emit_upto).collect();
                    self.emit_text(out, &text);
                }
                self.mode = Mode::Outside;
                false
            }
            Some((idx, tag, hint)) => {
                if idx > 0 {
                    let text: String = self.buffer.drain(..idx).collect();
                    self.emit_text(out, &text);
                } else {
                    // Another tool tag follows directly with no text in
                    // between — no "adjacent text" to separate from.
                    self.needs_separator = false;
                }
                if let Some(id) = self.text_id.take() {
                    out.push(StreamPart::TextEnd { id });
                }
                // Drop the open tag itself from the buffer.
                self.buffer.drain(..tag.len());
                self.mode = Mode::InsideTool {
                    open_tag: tag,
                    tool_name_hint: hint,
                    payload: String::new(),
                    lifecycle: None,
                };
                true
            }
        }
    }

    fn step_inside(&mut self, out: &mut Vec<StreamPart>) -> bool {
        let Mode::InsideTool { open_tag, tool_name_hint, payload, lifecycle } = &mut self.mode else {
            unreachable!()
        };
        let close_tag = self.protocol.close_sentinel_for(open_tag);

        match self.buffer.find(close_tag.as_str()) {
            None => {
                let hold = potential_start_index(&self.buffer, &close_tag);
                let emit_upto = hold.unwrap_or(self.buffer.len());
                if emit_upto > 0 {
                    let chunk: String = self.buffer.drain(..emit_upto).collect();
                    payload.push_str(&chunk);
                }
                ensure_started(lifecycle, tool_name_hint, payload, self.protocol.as_ref(), out);
                if let Some(lc) = lifecycle {
                    if let Some(ev) = lc.on_payload_grew(payload) {
                        out.push(ev);
                    }
                }
                if payload.len() > self.options.max_buffered_payload_bytes {
                    self.abandon_overflow(out);
                }
                false
            }
            Some(close_idx) => {
                let tail: String = self.buffer.drain(..close_idx).collect();
                payload.push_str(&tail);
                self.buffer.drain(..close_tag.len());

                ensure_started(lifecycle, tool_name_hint, payload, self.protocol.as_ref(), out);

                let parse_result = self.protocol.parse_payload(
                    tool_name_hint.as_deref(),
                    payload,
                    &self.tools,
                );
                let open_tag = open_tag.clone();
                let raw_payload = payload.clone();
                let mut lc = lifecycle.take().unwrap_or_else(|| {
                    ToolInputLifecycle::start(
                        next_stable_id("tool"),
                        tool_name_hint.clone().unwrap_or_else(|| "unknown".to_string()),
                        !self.protocol.incremental_json_payload(),
                    )
                });

                match parse_result {
                    Ok(parsed) => {
                        self.saw_any_tool_call = true;
                        self.needs_separator = true;
                        let events = lc.finish(&raw_payload, next_stable_id("call"), parsed.input_json);
                        out.extend(events);
                    }
                    Err(err) => {
                        let original_text = format!("{open_tag}{raw_payload}{close_tag}");
                        err.notify(&self.options.on_error, Some(original_text.clone()));
                        out.push(lc.abandon());
                        if self.options.emit_raw_tool_call_text_on_error {
                            self.emit_text(out, &original_text);
                        }
                    }
                }

                self.mode = Mode::Outside;
                true
            }
        }
    }

    fn abandon_overflow(&mut self, out: &mut Vec<StreamPart>) {
        if let Mode::InsideTool { open_tag, payload, lifecycle, .. } = std::mem::replace(&mut self.mode, Mode::Outside) {
            let original = format!("{open_tag}{payload}");
            tcm_types::MiddlewareError::XmlRepair(format!(
                "tool payload exceeded maxBufferedPayloadBytes ({} bytes)",
                self.options.max_buffered_payload_bytes
            ))
            .notify(&self.options.on_error, Some(original.clone()));
            if let Some(lc) = lifecycle {
                out.push(lc.abandon());
            }
            if self.options.emit_raw_tool_call_text_on_error {
                self.emit_text(out, &original);
            }
        }
    }

    fn emit_text(&mut self, out: &mut Vec<StreamPart>, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.needs_separator {
            self.needs_separator = false;
            if !text.starts_with(char::is_whitespace) {
                self.open_text_segment(out);
                out.push(StreamPart::TextDelta {
                    id: self.text_id.clone().unwrap(),
                    delta: "\n".to_string(),
                });
            }
        }
        self.open_text_segment(out);
        out.push(StreamPart::TextDelta {
            id: self.text_id.clone().unwrap(),
            delta: text.to_string(),
        });
    }

    fn open_text_segment(&mut self, out: &mut Vec<StreamPart>) {
        if self.text_id.is_none() {
            let id = next_stable_id("text");
            out.push(StreamPart::TextStart { id: id.clone() });
            self.text_id = Some(id);
        }
    }

    /// Signal upstream completion: flush any open text segment, abandon an
    /// unterminated tool payload as raw text, and emit the terminal
    /// `finish` event. Idempotent after the first call.
    pub fn finish(&mut self, raw_finish_reason: &str, usage: Usage) -> Vec<StreamPart> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.finished = true;

        match std::mem::replace(&mut self.mode, Mode::Outside) {
            Mode::Outside => {}
            Mode::InsideTool { open_tag, payload, lifecycle, .. } => {
                let original = format!("{open_tag}{payload}");
                tcm_types::MiddlewareError::ToolCallParsing(
                    "stream ended with an unterminated tool-call tag".to_string(),
                )
                .notify(&self.options.on_error, Some(original.clone()));
                if let Some(lc) = lifecycle {
                    out.push(lc.abandon());
                }
                if self.options.emit_raw_tool_call_text_on_error || true {
                    // Unterminated-at-eof always surfaces as raw text per
                    // §4.6/§7(iv): there's no well-formed payload to drop.
                    self.emit_text(&mut out, &original);
                }
            }
        }

        if let Some(id) = self.text_id.take() {
            out.push(StreamPart::TextEnd { id });
        }

        let unified = if self.saw_any_tool_call {
            UnifiedFinishReason::ToolCalls
        } else {
            UnifiedFinishReason::from_raw(raw_finish_reason)
        };

        out.push(StreamPart::Finish {
            usage,
            finish_reason: FinishReason {
                unified,
                raw: raw_finish_reason.to_string(),
            },
        });
        out
    }
}

fn ensure_started(
    lifecycle: &mut Option<ToolInputLifecycle>,
    tool_name_hint: &Option<String>,
    payload: &str,
    protocol: &dyn Protocol,
    out: &mut Vec<StreamPart>,
) {
    if lifecycle.is_some() {
        return;
    }
    let resolved = tool_name_hint
        .clone()
        .or_else(|| protocol.resolve_tool_name_early(payload));
    if let Some(name) = resolved {
        let lc = ToolInputLifecycle::start(next_stable_id("tool"), name, !protocol.incremental_json_payload());
        out.push(lc.start_event());
        *lifecycle = Some(lc);
    }
}

fn potential_start_index(haystack: &str, needle: &str) -> Option<usize> {
    tcm_rxml::potential_start_index(haystack, needle)
}

/// Find the earliest occurrence, across every candidate sentinel, of that
/// sentinel's literal tag in `buffer`. Ties (identical earliest index) are
/// broken alphabetically by the sentinel's tag text, matching §9(ii)'s
/// "ordering is alphabetical by tool name" rule for morph-XML's per-tool
/// sentinels.
fn find_earliest_tag(buffer: &str, sentinels: &[(String, Option<String>)]) -> Option<(usize, String, Option<String>)> {
    let mut best: Option<(usize, &str, Option<String>)> = None;
    for (tag, hint) in sentinels {
        if let Some(idx) = buffer.find(tag.as_str()) {
            let better = match best {
                None => true,
                Some((best_idx, best_tag, _)) => idx < best_idx || (idx == best_idx && tag.as_str() < best_tag),
            };
            if better {
                best = Some((idx, tag.as_str(), hint.clone()));
            }
        }
    }
    best.map(|(idx, tag, hint)| (idx, tag.to_string(), hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::json_tag::JsonTagProtocol;
    use tcm_types::ToolDescriptor;

    fn hermes() -> Arc<dyn Protocol> {
        Arc::new(JsonTagProtocol::hermes())
    }

    fn parser(tools: Vec<ToolDescriptor>) -> StreamParserState {
        StreamParserState::new(hermes(), tools, ToolCallMiddlewareOptions::default())
    }

    fn tool(name: &str, schema: serde_json::Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: schema,
        }
    }

    #[test]
    fn split_open_tag_yields_single_tool_call_and_no_leaked_text() {
        let mut p = parser(vec![tool(
            "x",
            serde_json::json!({"type": "object", "properties": {"a": {"type": "integer"}}}),
        )]);
        let deltas = [
            "<tool",
            "_call>",
            r#"{"name":"x","arguments":{"a":1}}"#,
            "</tool_call>",
        ];
        let mut events = Vec::new();
        for d in deltas {
            events.extend(p.push(d));
        }
        events.extend(p.finish("stop", Usage::default()));

        let calls: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StreamPart::ToolCall { .. }))
            .collect();
        assert_eq!(calls.len(), 1);
        if let StreamPart::ToolCall { tool_name, input, .. } = calls[0] {
            assert_eq!(tool_name, "x");
            assert_eq!(input, r#"{"a":1}"#);
        }

        for e in &events {
            if let StreamPart::TextDelta { delta, .. } = e {
                assert!(!delta.contains("<tool_call>"));
            }
        }
    }

    #[test]
    fn text_around_tool_is_preserved() {
        let mut p = parser(vec![tool("n", serde_json::json!({"type": "object"}))]);
        let mut events = p.push("Hello ");
        events.extend(p.push(r#"<tool_call>{"name":"n","arguments":{}}</tool_call>"#));
        events.extend(p.push(" world"));
        events.extend(p.finish("stop", Usage::default()));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamPart::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert!(text.starts_with("Hello "));
        assert!(text.ends_with("world"));
    }

    #[test]
    fn separator_newline_inserted_when_no_whitespace_follows_tool_call() {
        let mut p = parser(vec![tool("n", serde_json::json!({"type": "object"}))]);
        let mut events = p.push(r#"<tool_call>{"name":"n","arguments":{}}</tool_call>world"#);
        events.extend(p.finish("stop", Usage::default()));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamPart::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "\nworld");
    }

    #[test]
    fn no_separator_inserted_between_two_adjacent_tool_calls() {
        let mut p = parser(vec![tool("n", serde_json::json!({"type": "object"}))]);
        let mut events = p.push(
            r#"<tool_call>{"name":"n","arguments":{}}</tool_call><tool_call>{"name":"n","arguments":{}}</tool_call>"#,
        );
        events.extend(p.finish("stop", Usage::default()));

        assert!(!events.iter().any(|e| matches!(e, StreamPart::TextDelta { .. })));
        let calls = events.iter().filter(|e| matches!(e, StreamPart::ToolCall { .. })).count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn malformed_json_payload_falls_back_to_text_with_on_error() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let error_count = Arc::new(AtomicUsize::new(0));
        let counter = error_count.clone();
        let mut opts = ToolCallMiddlewareOptions::default();
        opts.emit_raw_tool_call_text_on_error = true;
        opts.on_error = Some(Arc::new(move |_msg, meta| {
            assert_eq!(meta.source, Some(tcm_types::ErrorSource::ToolCallParsing));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let mut p = StreamParserState::new(hermes(), vec![], opts);
        let mut events = p.push("<tool_call>{bad}</tool_call>");
        events.extend(p.finish("stop", Usage::default()));

        assert!(!events.iter().any(|e| matches!(e, StreamPart::ToolCall { .. })));
        assert_eq!(error_count.load(Ordering::SeqCst), 1);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamPart::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "<tool_call>{bad}</tool_call>");
    }

    #[test]
    fn chunk_invariance_holds_across_granularities() {
        let full = r#"before <tool_call>{"name":"x","arguments":{"a":1}}</tool_call> after"#;
        let tools = vec![tool(
            "x",
            serde_json::json!({"type": "object", "properties": {"a": {"type": "integer"}}}),
        )];

        let run = |chunk_size: usize| {
            let mut p = parser(tools.clone());
            let mut events = Vec::new();
            if chunk_size == 0 {
                for ch in full.chars() {
                    events.extend(p.push(&ch.to_string()));
                }
            } else {
                let bytes = full.as_bytes();
                let mut i = 0;
                while i < bytes.len() {
                    let end = (i + chunk_size).min(bytes.len());
                    events.extend(p.push(&full[i..end]));
                    i = end;
                }
            }
            events.extend(p.finish("stop", Usage::default()));
            events
                .into_iter()
                .filter_map(|e| match e {
                    StreamPart::ToolCall { tool_name, input, .. } => Some((tool_name, input)),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(run(0), run(3));
        assert_eq!(run(0), run(7));
    }
}
