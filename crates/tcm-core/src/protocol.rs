//! The `Protocol` trait (C9's common capability surface) and the small
//! value types shared by every concrete protocol implementation.

use std::collections::HashMap;
use tcm_types::{ContentPart, MiddlewareError, ToolDescriptor};

pub type ToolRegistry = HashMap<String, ToolDescriptor>;

pub fn tool_registry(tools: &[ToolDescriptor]) -> ToolRegistry {
    tools.iter().map(|t| (t.name.clone(), t.clone())).collect()
}

/// The outcome of successfully parsing one complete tool-call payload.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub tool_name: String,
    /// The coerced arguments object, serialised to a JSON string (per §3,
    /// "`input` is always a JSON string encoding the coerced arguments
    /// object; empty arguments serialise to `\"{}\"`").
    pub input_json: String,
}

/// One candidate open-tag sentinel a protocol asks the streaming kernel to
/// watch for. `tool_name` is `Some` when the tag itself names the tool
/// (morph-XML); `None` when the name only emerges from the payload
/// (JSON-in-tag, UI-TARS).
#[derive(Debug, Clone)]
pub struct OpenSentinel {
    pub tag: String,
    pub tool_name: Option<String>,
}

pub trait Protocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sentinels the streaming/non-streaming scanners watch for, given the
    /// current tool registry (morph-XML has one sentinel per known tool
    /// name; JSON-in-tag and UI-TARS have one fixed sentinel regardless of
    /// the registry).
    fn open_sentinels(&self, tools: &ToolRegistry) -> Vec<OpenSentinel>;

    /// The close sentinel paired with a given open sentinel tag.
    fn close_sentinel_for(&self, open_tag: &str) -> String;

    /// Parse one complete payload (the text strictly between a matched
    /// open/close sentinel pair) into a tool name and coerced input.
    /// `tool_name_hint` is `Some` when the open sentinel already named the
    /// tool (morph-XML).
    fn parse_payload(
        &self,
        tool_name_hint: Option<&str>,
        payload: &str,
        tools: &ToolRegistry,
    ) -> Result<ParsedCall, MiddlewareError>;

    /// Attempt to resolve the tool name from a still-growing payload,
    /// before the close sentinel has arrived. Used by protocols whose
    /// sentinel doesn't name the tool (JSON-in-tag: the `"name"` field
    /// appears inside the JSON payload itself). Returns `None` until
    /// enough of the payload has streamed in to tell.
    fn resolve_tool_name_early(&self, _payload: &str) -> Option<String> {
        None
    }

    /// Whether the raw payload growing between sentinels is itself a JSON
    /// document — and so the C8 lifecycle emitter should apply the
    /// incomplete-JSON-prefix policy (§4.8) rather than emitting the
    /// accumulated payload verbatim on every tick. `true` for the
    /// JSON-in-tag protocols; `false` for XML-shaped payloads (morph-XML,
    /// UI-TARS), where "don't cut mid-token" has no JSON-specific meaning.
    fn incremental_json_payload(&self) -> bool {
        true
    }

    /// `formatTools`: system-prompt fragment describing the available
    /// tools in this protocol's textual convention.
    fn format_tools(&self, tools: &[ToolDescriptor]) -> String;

    /// `formatToolCall`: renders a `(tool_name, input_json)` pair as the
    /// assistant-turn text this protocol expects to see echoed back.
    fn format_tool_call(&self, tool_name: &str, input_json: &str) -> String;

    /// `formatToolResponse`: renders a tool result as the user-turn text
    /// this protocol expects to see in place of a native tool-result turn.
    fn format_tool_response(&self, tool_name: &str, result_text: &str) -> String;

    /// Non-streaming parse of a complete generation.
    fn parse_generated_text(&self, text: &str, tools: &ToolRegistry) -> Vec<ContentPart>;
}
