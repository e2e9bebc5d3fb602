//! UI-TARS (§4.9): a single `<tool_call>...</tool_call>` sentinel (shared,
//! textually, with Hermes — the two are never active in the same call since
//! the protocol is fixed per-request by `ToolCallMiddlewareOptions`) wrapping
//! a pseudo-XML function-call form:
//! `<function=NAME><parameter=KEY>VALUE</parameter>...</function>`.
//! Repeated `<parameter=KEY>` entries with the same key become an array,
//! mirroring the morph-XML protocol's repeated-tag convention.

use crate::protocol::{tool_registry, OpenSentinel, ParsedCall, Protocol, ToolRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tcm_rxml::{coerce_value, Schema};
use tcm_types::{MiddlewareError, ToolDescriptor};

static FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<function=([^>]+)>(.*)</function>").unwrap());
static PARAMETER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<parameter=([^>]+)>(.*?)</parameter>").unwrap());
static EARLY_FUNCTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<function=([^>]+)>").unwrap());

pub struct UiTarsProtocol;

impl UiTarsProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UiTarsProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for UiTarsProtocol {
    fn name(&self) -> &'static str {
        "ui-tars"
    }

    fn open_sentinels(&self, _tools: &ToolRegistry) -> Vec<OpenSentinel> {
        vec![OpenSentinel {
            tag: "<tool_call>".to_string(),
            tool_name: None,
        }]
    }

    fn close_sentinel_for(&self, _open_tag: &str) -> String {
        "</tool_call>".to_string()
    }

    fn incremental_json_payload(&self) -> bool {
        false
    }

    fn resolve_tool_name_early(&self, payload: &str) -> Option<String> {
        EARLY_FUNCTION_RE
            .captures(payload)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    fn parse_payload(
        &self,
        _tool_name_hint: Option<&str>,
        payload: &str,
        tools: &ToolRegistry,
    ) -> Result<ParsedCall, MiddlewareError> {
        let captures = FUNCTION_RE
            .captures(payload)
            .ok_or_else(|| MiddlewareError::ToolCallParsing("no <function=...> element found".to_string()))?;
        let tool_name = captures[1].trim().to_string();
        let body = &captures[2];

        let mut map = Map::new();
        for param in PARAMETER_RE.captures_iter(body) {
            let key = param[1].trim().to_string();
            let value = Value::String(param[2].to_string());
            match map.get_mut(&key) {
                Some(Value::Array(arr)) => arr.push(value),
                Some(existing) => {
                    let prior = existing.clone();
                    *existing = Value::Array(vec![prior, value]);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        let naive = Value::Object(map);

        let input_json = match tools.get(&tool_name) {
            Some(tool) => {
                let coerced = coerce_value(&naive, Schema::new(&tool.input_schema));
                serde_json::to_string(&coerced).map_err(|e| MiddlewareError::SchemaCoercion(e.to_string()))?
            }
            None => serde_json::to_string(&naive).map_err(|e| MiddlewareError::SchemaCoercion(e.to_string()))?,
        };

        Ok(ParsedCall { tool_name, input_json })
    }

    fn format_tools(&self, tools: &[ToolDescriptor]) -> String {
        let mut out = String::new();
        out.push_str(
            "You can call tools using this form:\n<tool_call><function=TOOL_NAME><parameter=KEY>VALUE</parameter></function></tool_call>\n\nAvailable tools:\n",
        );
        let registry = tool_registry(tools);
        let mut names: Vec<&String> = registry.keys().collect();
        names.sort();
        for name in names {
            let tool = &registry[name];
            out.push_str(&format!("- {name}"));
            if let Some(desc) = &tool.description {
                out.push_str(&format!(": {desc}"));
            }
            out.push('\n');
            if let Some(props) = Schema::new(&tool.input_schema).properties() {
                let keys: Vec<&String> = props.keys().collect();
                out.push_str(&format!("  parameters: {keys:?}\n"));
            }
        }
        out
    }

    fn format_tool_call(&self, tool_name: &str, input_json: &str) -> String {
        let value: Value = serde_json::from_str(input_json).unwrap_or(Value::Object(Default::default()));
        let mut params = String::new();
        if let Value::Object(map) = &value {
            for (key, v) in map {
                match v {
                    Value::Array(items) => {
                        for item in items {
                            params.push_str(&format!("<parameter={key}>{}</parameter>", render_scalar(item)));
                        }
                    }
                    other => params.push_str(&format!("<parameter={key}>{}</parameter>", render_scalar(other))),
                }
            }
        }
        format!("<tool_call><function={tool_name}>{params}</function></tool_call>")
    }

    fn format_tool_response(&self, tool_name: &str, result_text: &str) -> String {
        format!("<tool_response name=\"{tool_name}\">{result_text}</tool_response>")
    }

    fn parse_generated_text(&self, text: &str, tools: &ToolRegistry) -> Vec<tcm_types::ContentPart> {
        crate::non_streaming::parse(self, text, tools)
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
