//! JSON-in-tag protocols (§4.9): a single sentinel pair wrapping a
//! `{"name": "...", "arguments": {...}}` JSON object. Hermes uses
//! `<tool_call>`/`</tool_call>`; Gemma's variant fences the same payload in
//! a markdown code block instead. Both share every other behaviour, so one
//! struct parameterised by its sentinel pair covers both.

use crate::protocol::{tool_registry, OpenSentinel, ParsedCall, Protocol, ToolRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tcm_rxml::{coerce_value, Schema};
use tcm_types::{MiddlewareError, ToolDescriptor};

static NAME_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""name"\s*:\s*"([^"]*)""#).unwrap());

pub struct JsonTagProtocol {
    name: &'static str,
    open_tag: &'static str,
    close_tag: &'static str,
}

impl JsonTagProtocol {
    pub fn hermes() -> Self {
        Self {
            name: "hermes-json",
            open_tag: "<tool_call>",
            close_tag: "</tool_call>",
        }
    }

    pub fn gemma() -> Self {
        Self {
            name: "gemma-json-mix",
            open_tag: "```tool_call",
            close_tag: "```",
        }
    }

    /// Tolerant parse: real JSON first, then relaxed JSON5 (single-quoted
    /// strings, trailing commas, comments — §4.9's "relaxed JSON" clause)
    /// for the models that write JS-object-literal-style payloads.
    fn parse_relaxed(payload: &str) -> Option<Value> {
        let trimmed = payload.trim();
        if let Ok(v) = serde_json::from_str(trimmed) {
            return Some(v);
        }
        json5::from_str(trimmed).ok()
    }
}

impl Protocol for JsonTagProtocol {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open_sentinels(&self, _tools: &ToolRegistry) -> Vec<OpenSentinel> {
        vec![OpenSentinel {
            tag: self.open_tag.to_string(),
            tool_name: None,
        }]
    }

    fn close_sentinel_for(&self, _open_tag: &str) -> String {
        self.close_tag.to_string()
    }

    fn resolve_tool_name_early(&self, payload: &str) -> Option<String> {
        // Lean on the incomplete-JSON-prefix machinery's sibling problem:
        // a growing `{"name": "foo", "argum` payload has a complete `name`
        // field long before the whole object is valid JSON, so a tolerant
        // one-field regex beats waiting for `parse_relaxed` to succeed.
        NAME_FIELD_RE
            .captures(payload)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn parse_payload(
        &self,
        _tool_name_hint: Option<&str>,
        payload: &str,
        tools: &ToolRegistry,
    ) -> Result<ParsedCall, MiddlewareError> {
        let value = Self::parse_relaxed(payload)
            .ok_or_else(|| MiddlewareError::ToolCallParsing(format!("not valid JSON: {payload}")))?;

        let Value::Object(obj) = &value else {
            return Err(MiddlewareError::ToolCallParsing(
                "tool-call payload is not a JSON object".to_string(),
            ));
        };

        let tool_name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| MiddlewareError::ToolCallParsing("payload missing a \"name\" field".to_string()))?
            .to_string();

        let arguments = obj.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));

        let input_json = match tools.get(&tool_name) {
            Some(tool) => {
                let schema_view = Schema::new(&tool.input_schema);
                let coerced = coerce_value(&arguments, schema_view);
                serde_json::to_string(&coerced)
                    .map_err(|e| MiddlewareError::SchemaCoercion(e.to_string()))?
            }
            None => serde_json::to_string(&arguments)
                .map_err(|e| MiddlewareError::SchemaCoercion(e.to_string()))?,
        };

        Ok(ParsedCall { tool_name, input_json })
    }

    fn format_tools(&self, tools: &[ToolDescriptor]) -> String {
        let registry = tool_registry(tools);
        let mut out = String::new();
        out.push_str(
            "You can call tools by responding with exactly one tool call, wrapped like this:\n",
        );
        out.push_str(&format!(
            "{}{{\"name\": \"TOOL_NAME\", \"arguments\": {{...}}}}{}\n\n",
            self.open_tag, self.close_tag
        ));
        out.push_str("Available tools:\n");
        let mut names: Vec<&String> = registry.keys().collect();
        names.sort();
        for name in names {
            let tool = &registry[name];
            out.push_str(&format!("- {name}"));
            if let Some(desc) = &tool.description {
                out.push_str(&format!(": {desc}"));
            }
            out.push('\n');
            out.push_str(&format!("  Parameters (JSON Schema): {}\n", tool.input_schema));
        }
        out
    }

    fn format_tool_call(&self, tool_name: &str, input_json: &str) -> String {
        let arguments: Value = serde_json::from_str(input_json).unwrap_or(Value::Object(Default::default()));
        let payload = serde_json::json!({ "name": tool_name, "arguments": arguments });
        format!("{}{}{}", self.open_tag, payload, self.close_tag)
    }

    fn format_tool_response(&self, tool_name: &str, result_text: &str) -> String {
        format!(
            "Tool \"{tool_name}\" returned:\n{result_text}\n"
        )
    }

    fn parse_generated_text(&self, text: &str, tools: &ToolRegistry) -> Vec<tcm_types::ContentPart> {
        crate::non_streaming::parse(self, text, tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: schema,
        }
    }

    #[test]
    fn parses_well_formed_payload_and_coerces_arguments() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[tool(
            "calc",
            json!({"type": "object", "properties": {"a": {"type": "integer"}}}),
        )]);
        let parsed = protocol
            .parse_payload(None, r#"{"name":"calc","arguments":{"a":"3"}}"#, &tools)
            .unwrap();
        assert_eq!(parsed.tool_name, "calc");
        assert_eq!(parsed.input_json, r#"{"a":3}"#);
    }

    #[test]
    fn tolerates_single_quoted_json5_payload() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[]);
        let parsed = protocol
            .parse_payload(None, "{name: 'calc', arguments: {a: 1,}}", &tools)
            .unwrap();
        assert_eq!(parsed.tool_name, "calc");
    }

    #[test]
    fn missing_name_field_is_an_error() {
        let protocol = JsonTagProtocol::hermes();
        let tools = tool_registry(&[]);
        let err = protocol.parse_payload(None, r#"{"arguments":{}}"#, &tools).unwrap_err();
        assert!(matches!(err, MiddlewareError::ToolCallParsing(_)));
    }

    #[test]
    fn resolves_tool_name_from_partial_payload() {
        let protocol = JsonTagProtocol::hermes();
        let hint = protocol.resolve_tool_name_early(r#"{"name": "calc", "argum"#);
        assert_eq!(hint, Some("calc".to_string()));
    }

    #[test]
    fn gemma_variant_uses_fenced_sentinels() {
        let protocol = JsonTagProtocol::gemma();
        let tools = tool_registry(&[]);
        let sentinels = protocol.open_sentinels(&tools);
        assert_eq!(sentinels[0].tag, "```tool_call");
        assert_eq!(protocol.close_sentinel_for(&sentinels[0].tag), "```");
    }
}
