//! Morph-XML (§4.9): each tool gets its own sentinel pair named after the
//! tool itself — `<search>...</search>`, `<read_file>...</read_file>` — with
//! the payload parsed as XML against that tool's input schema via
//! `tcm_rxml::facade`. The name is known the moment the open tag arrives, so
//! unlike the JSON-in-tag protocols there's no `resolve_tool_name_early`
//! guesswork: the tag *is* the name.

use crate::protocol::{tool_registry, OpenSentinel, ParsedCall, Protocol, ToolRegistry};
use serde_json::Value;
use tcm_rxml::{Schema, SchemaType};
use tcm_types::{MiddlewareError, ToolDescriptor};

pub struct XmlElementProtocol;

impl XmlElementProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XmlElementProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for XmlElementProtocol {
    fn name(&self) -> &'static str {
        "morph-xml"
    }

    fn open_sentinels(&self, tools: &ToolRegistry) -> Vec<OpenSentinel> {
        let mut names: Vec<&String> = tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| OpenSentinel {
                tag: format!("<{name}>"),
                tool_name: Some(name.clone()),
            })
            .collect()
    }

    fn close_sentinel_for(&self, open_tag: &str) -> String {
        let name = open_tag.trim_start_matches('<').trim_end_matches('>');
        format!("</{name}>")
    }

    fn incremental_json_payload(&self) -> bool {
        false
    }

    fn parse_payload(
        &self,
        tool_name_hint: Option<&str>,
        payload: &str,
        tools: &ToolRegistry,
    ) -> Result<ParsedCall, MiddlewareError> {
        let tool_name = tool_name_hint
            .ok_or_else(|| MiddlewareError::ToolCallParsing("morph-xml tool call missing a tag name".to_string()))?
            .to_string();

        let wrapped = format!("<{tool_name}>{payload}</{tool_name}>");
        let opts = tcm_rxml::ParseOptions::default();

        let value = match tools.get(&tool_name) {
            Some(tool) => tcm_rxml::parse(&wrapped, &tool_name, &tool.input_schema, &opts)
                .map_err(|e| e.into_middleware_error())?,
            None => tcm_rxml::parse_untyped(&wrapped, &tool_name, &opts)
                .map_err(|e| e.into_middleware_error())?,
        };

        let input_json = serde_json::to_string(&value).map_err(|e| MiddlewareError::SchemaCoercion(e.to_string()))?;
        Ok(ParsedCall { tool_name, input_json })
    }

    fn format_tools(&self, tools: &[ToolDescriptor]) -> String {
        let mut out = String::new();
        out.push_str("You can call tools by writing a single XML element named after the tool:\n\n");
        let registry = tool_registry(tools);
        let mut names: Vec<&String> = registry.keys().collect();
        names.sort();
        for name in names {
            let tool = &registry[name];
            out.push_str(&format!("- <{name}>"));
            if let Some(desc) = &tool.description {
                out.push_str(&format!(" — {desc}"));
            }
            out.push('\n');
            let example = example_value(Schema::new(&tool.input_schema));
            out.push_str(&format!("  {}\n", tcm_rxml::stringify(name, &example)));
        }
        out
    }

    fn format_tool_call(&self, tool_name: &str, input_json: &str) -> String {
        let value: Value = serde_json::from_str(input_json).unwrap_or(Value::Object(Default::default()));
        tcm_rxml::stringify(tool_name, &value)
    }

    fn format_tool_response(&self, tool_name: &str, result_text: &str) -> String {
        format!("<{tool_name}_result>{result_text}</{tool_name}_result>")
    }

    fn parse_generated_text(&self, text: &str, tools: &ToolRegistry) -> Vec<tcm_types::ContentPart> {
        crate::non_streaming::parse(self, text, tools)
    }
}

/// Build a placeholder value from a schema's shape for the `formatTools`
/// few-shot example — the exact values never matter, only that the element
/// nesting matches what `parse` later expects back.
fn example_value(schema: Schema<'_>) -> Value {
    match schema.schema_type() {
        SchemaType::Object => {
            let mut out = serde_json::Map::new();
            if let Some(props) = schema.properties() {
                for (key, child) in props {
                    out.insert(key.clone(), example_value(Schema::new(child)));
                }
            }
            Value::Object(out)
        }
        SchemaType::Array => {
            let item = schema.items().map(example_value).unwrap_or(Value::String("...".to_string()));
            Value::Array(vec![item])
        }
        SchemaType::Integer | SchemaType::Number => Value::String("0".to_string()),
        SchemaType::Boolean => Value::String("true".to_string()),
        _ => Value::String("...".to_string()),
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
    fn sentinel_tag_is_the_tool_name() {
        let protocol = XmlElementProtocol::new();
        let tools = tool_registry(&[tool("search", json!({"type": "object"}))]);
        let sentinels = protocol.open_sentinels(&tools);
        assert_eq!(sentinels.len(), 1);
        assert_eq!(sentinels[0].tag, "<search>");
        assert_eq!(sentinels[0].tool_name.as_deref(), Some("search"));
        assert_eq!(protocol.close_sentinel_for(&sentinels[0].tag), "</search>");
    }

    #[test]
    fn parses_payload_against_named_tool_schema() {
        let protocol = XmlElementProtocol::new();
        let tools = tool_registry(&[tool(
            "search",
            json!({"type": "object", "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}}}),
        )]);
        let parsed = protocol
            .parse_payload(Some("search"), "<query>cats</query><limit>5</limit>", &tools)
            .unwrap();
        assert_eq!(parsed.tool_name, "search");
        let value: Value = serde_json::from_str(&parsed.input_json).unwrap();
        assert_eq!(value["query"], json!("cats"));
        assert_eq!(value["limit"], json!(5));
    }

    #[test]
    fn unknown_tool_falls_back_to_untyped_parse() {
        let protocol = XmlElementProtocol::new();
        let tools = tool_registry(&[]);
        let parsed = protocol
            .parse_payload(Some("mystery"), "<a>1</a>", &tools)
            .unwrap();
        let value: Value = serde_json::from_str(&parsed.input_json).unwrap();
        assert_eq!(value["a"], json!("1"));
    }

    #[test]
    fn format_tool_call_round_trips_through_parse() {
        let protocol = XmlElementProtocol::new();
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let tools = tool_registry(&[tool("echo", schema)]);
        let rendered = protocol.format_tool_call("echo", r#"{"a":"hi"}"#);
        assert_eq!(rendered, "<echo><a>hi</a></echo>");
        let inner = rendered
            .trim_start_matches("<echo>")
            .trim_end_matches("</echo>");
        let parsed = protocol.parse_payload(Some("echo"), inner, &tools).unwrap();
        assert_eq!(parsed.input_json, r#"{"a":"hi"}"#);
    }
}
