//! C11 — the three middleware entry points (§4.11) that glue C6-C10 into
//! the shape an `UpstreamModel` wrapper actually calls: `transform_params`
//! runs before generation, `wrap_generate`/`wrap_stream` wrap the two
//! generation modes.

use crate::non_streaming;
use crate::prompt_builder::build_prompt_messages;
use crate::protocol::{tool_registry, Protocol};
use crate::protocols::{JsonTagProtocol, UiTarsProtocol, XmlElementProtocol};
use crate::streaming::StreamParserState;
use crate::utils::trace_upstream_part;
use std::sync::Arc;
use tcm_types::{
    ContentPart, FinishReason, GenerateParams, GenerateResult, ProtocolKind, StreamPart, ToolCallMiddlewareOptions,
    ToolChoice, ToolDescriptor, UnifiedFinishReason, UpstreamError, UpstreamModel, UpstreamStream,
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

/// Resolve the configured `ProtocolKind` to its concrete implementation.
pub fn protocol_for(kind: ProtocolKind) -> Arc<dyn Protocol> {
    match kind {
        ProtocolKind::HermesJson => Arc::new(JsonTagProtocol::hermes()),
        ProtocolKind::GemmaJsonMix => Arc::new(JsonTagProtocol::gemma()),
        ProtocolKind::MorphXml => Arc::new(XmlElementProtocol::new()),
        ProtocolKind::UiTars => Arc::new(UiTarsProtocol::new()),
    }
}

/// `transformParams` (§4.11): runs the prompt builder (C10) over the
/// caller's params, clearing the outbound `tools`/`toolChoice` unless a
/// forced tool choice keeps the short-circuit path active downstream.
pub fn transform_params(params: GenerateParams, protocol: &dyn Protocol, options: &ToolCallMiddlewareOptions) -> GenerateParams {
    let tools = params.tools.clone().unwrap_or_default();
    let result = build_prompt_messages(protocol, &params.messages, &tools, &params.stop_sequences, options);
    for warning in &result.warnings {
        tracing::warn!(stop_sequence = %warning.stop_sequence, reason = %warning.reason, "incompatible stop sequence");
    }

    let short_circuit = matches!(params.tool_choice, Some(ToolChoice::Tool { .. }));

    GenerateParams {
        messages: result.messages,
        tools: if short_circuit { params.tools } else { None },
        tool_choice: if short_circuit { params.tool_choice } else { None },
        stop_sequences: params.stop_sequences,
        provider_options: params.provider_options,
    }
}

/// `wrapGenerate` (§4.11): await the upstream call, then run the first text
/// content part through C9's `parseGeneratedText`, concatenating the result
/// with whatever non-text parts the upstream already produced natively.
pub async fn wrap_generate(
    upstream: &dyn UpstreamModel,
    protocol: &dyn Protocol,
    params: GenerateParams,
    tools: Vec<ToolDescriptor>,
    options: &ToolCallMiddlewareOptions,
) -> Result<GenerateResult, UpstreamError> {
    let result = upstream.do_generate(params).await?;
    let registry = tool_registry(&tools);

    let mut out_content = Vec::with_capacity(result.content.len());
    let mut parsed_first_text = false;
    for part in result.content {
        match part {
            ContentPart::Text { text } if !parsed_first_text => {
                parsed_first_text = true;
                out_content.extend(non_streaming::parse_reporting(protocol, &text, &registry, &options.on_error));
            }
            other => out_content.push(other),
        }
    }

    let saw_tool_call = out_content.iter().any(|p| matches!(p, ContentPart::ToolCall { .. }));
    let finish_reason = if saw_tool_call {
        FinishReason::tool_calls(result.finish_reason.raw)
    } else {
        result.finish_reason
    };

    Ok(GenerateResult {
        content: out_content,
        finish_reason,
        usage: result.usage,
    })
}

/// `wrapStream` (§4.11). A forced `toolChoice` takes the short-circuit path
/// (§4.9): a single non-streaming upstream call, parsed once, synthesised
/// into a two-event `[tool-call, finish]` stream with no C6 state machine
/// involved at all. Otherwise the upstream stream is driven through C6
/// directly, tracing every inbound part first.
pub async fn wrap_stream(
    upstream: Arc<dyn UpstreamModel>,
    protocol: Arc<dyn Protocol>,
    params: GenerateParams,
    tools: Vec<ToolDescriptor>,
    options: ToolCallMiddlewareOptions,
) -> Result<UpstreamStream, UpstreamError> {
    if matches!(params.tool_choice, Some(ToolChoice::Tool { .. })) {
        return tool_choice_short_circuit(upstream.as_ref(), protocol.as_ref(), params, tools, &options).await;
    }

    let mut upstream_stream = upstream.do_stream(params).await?;
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut state = StreamParserState::new(protocol, tools, options);
        while let Some(item) = upstream_stream.next().await {
            match item {
                Ok(StreamPart::TextDelta { delta, .. }) => {
                    trace_upstream_part(&StreamPart::TextDelta {
                        id: "upstream".to_string(),
                        delta: delta.clone(),
                    });
                    for event in state.push(&delta) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(StreamPart::Finish { usage, finish_reason }) => {
                    for event in state.finish(&finish_reason.raw, usage) {
                        let _ = tx.send(Ok(event)).await;
                    }
                    return;
                }
                Ok(other) => {
                    trace_upstream_part(&other);
                    if tx.send(Ok(other)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });

    Ok(ReceiverStream::new(rx))
}

async fn tool_choice_short_circuit(
    upstream: &dyn UpstreamModel,
    protocol: &dyn Protocol,
    params: GenerateParams,
    tools: Vec<ToolDescriptor>,
    options: &ToolCallMiddlewareOptions,
) -> Result<UpstreamStream, UpstreamError> {
    let result = upstream.do_generate(params).await?;
    let registry = tool_registry(&tools);

    let raw_text: String = result
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    let parsed = non_streaming::parse_reporting(protocol, &raw_text, &registry, &options.on_error);
    let call = parsed.into_iter().find_map(|p| match p {
        ContentPart::ToolCall { tool_call_id, tool_name, input } => Some((tool_call_id, tool_name, input)),
        _ => None,
    });

    let (tx, rx) = mpsc::channel(2);
    if let Some((tool_call_id, tool_name, input)) = call {
        let _ = tx
            .send(Ok(StreamPart::ToolCall { tool_call_id, tool_name, input }))
            .await;
    }
    let _ = tx
        .send(Ok(StreamPart::Finish {
            usage: result.usage,
            finish_reason: FinishReason {
                unified: UnifiedFinishReason::ToolCalls,
                raw: result.finish_reason.raw,
            },
        }))
        .await;
    drop(tx);

    Ok(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tcm_types::mock::{MockStreamScript, MockUpstream};
    use tcm_types::{Message, Role};

    fn tool(name: &str, schema: serde_json::Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: schema,
        }
    }

    fn params(messages: Vec<Message>, tools: Option<Vec<ToolDescriptor>>, tool_choice: Option<ToolChoice>) -> GenerateParams {
        GenerateParams {
            messages,
            tools,
            tool_choice,
            stop_sequences: vec![],
            provider_options: None,
        }
    }

    #[test]
    fn transform_params_injects_tools_and_clears_outbound_tools() {
        let protocol = JsonTagProtocol::hermes();
        let tools = vec![tool("calc", json!({"type": "object"}))];
        let p = params(vec![Message::text(Role::User, "hi")], Some(tools), None);
        let out = transform_params(p, &protocol, &ToolCallMiddlewareOptions::default());
        assert!(out.tools.is_none());
        assert!(out.tool_choice.is_none());
        assert_eq!(out.messages[0].role, Role::System);
    }

    #[test]
    fn transform_params_keeps_tools_when_tool_choice_forces_one() {
        let protocol = JsonTagProtocol::hermes();
        let tools = vec![tool("calc", json!({"type": "object"}))];
        let tc = Some(ToolChoice::Tool { tool_name: "calc".to_string() });
        let p = params(vec![Message::text(Role::User, "hi")], Some(tools), tc.clone());
        let out = transform_params(p, &protocol, &ToolCallMiddlewareOptions::default());
        assert!(out.tools.is_some());
        assert_eq!(out.tool_choice, tc);
    }

    #[tokio::test]
    async fn wrap_generate_parses_tool_call_from_text() {
        let protocol = JsonTagProtocol::hermes();
        let tools = vec![tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))];
        let mock = MockUpstream::new().with_generate_text(r#"<tool_call>{"name":"calc","arguments":{"a":"3"}}</tool_call>"#);
        let result = wrap_generate(
            &mock,
            &protocol,
            params(vec![], None, None),
            tools,
            &ToolCallMiddlewareOptions::default(),
        )
        .await
        .unwrap();
        assert!(result.content.iter().any(|p| matches!(p, ContentPart::ToolCall { tool_name, .. } if tool_name == "calc")));
        assert_eq!(result.finish_reason.unified, UnifiedFinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn wrap_stream_drives_upstream_deltas_through_state_machine() {
        let protocol: Arc<dyn Protocol> = Arc::new(JsonTagProtocol::hermes());
        let tools = vec![tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))];
        let mock: Arc<dyn UpstreamModel> = Arc::new(
            MockUpstream::new().with_stream_script(MockStreamScript::text([
                "before ",
                r#"<tool_call>{"name":"calc","arguments":{"a":1}}</tool_call>"#,
                " after",
            ])),
        );
        let mut stream = wrap_stream(
            mock,
            protocol,
            params(vec![], None, None),
            tools,
            ToolCallMiddlewareOptions::default(),
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        assert!(events.iter().any(|e| matches!(e, StreamPart::ToolCall { tool_name, .. } if tool_name == "calc")));
        assert!(matches!(events.last(), Some(StreamPart::Finish { .. })));
    }

    #[tokio::test]
    async fn tool_choice_forces_short_circuit_two_event_stream() {
        let protocol: Arc<dyn Protocol> = Arc::new(JsonTagProtocol::hermes());
        let tools = vec![tool("calc", json!({"type": "object", "properties": {"a": {"type": "integer"}}}))];
        let mock: Arc<dyn UpstreamModel> = Arc::new(
            MockUpstream::new().with_generate_text(r#"{"name":"calc","arguments":{"a":5}}"#),
        );
        let tc = Some(ToolChoice::Tool { tool_name: "calc".to_string() });
        let mut stream = wrap_stream(
            mock,
            protocol,
            params(vec![], None, tc),
            tools,
            ToolCallMiddlewareOptions::default(),
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamPart::ToolCall { tool_name, .. } if tool_name == "calc"));
        assert!(matches!(&events[1], StreamPart::Finish { .. }));
    }

    #[tokio::test]
    async fn tool_choice_short_circuit_coerces_arguments_against_schema() {
        let protocol: Arc<dyn Protocol> = Arc::new(JsonTagProtocol::hermes());
        let tools = vec![tool(
            "calc",
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "boolean"}}}),
        )];
        let mock: Arc<dyn UpstreamModel> = Arc::new(
            MockUpstream::new()
                .with_generate_text(r#"{"name":"calc","arguments":{"a":"10","b":"false"}}"#),
        );
        let tc = Some(ToolChoice::Tool { tool_name: "calc".to_string() });
        let mut stream = wrap_stream(
            mock,
            protocol,
            params(vec![], None, tc),
            tools,
            ToolCallMiddlewareOptions::default(),
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamPart::ToolCall { tool_name, input, .. } => {
                assert_eq!(tool_name, "calc");
                assert_eq!(input, r#"{"a":10,"b":false}"#);
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        match &events[1] {
            StreamPart::Finish { finish_reason, .. } => {
                assert_eq!(finish_reason.unified, UnifiedFinishReason::ToolCalls);
                assert_eq!(finish_reason.raw, "stop");
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }
}
