//! C10 — the prompt builder (§4.10): rewrites the caller's message list into
//! the upstream's, folding tool schemas, tool calls, and tool results into
//! plain text the underlying model can actually generate and read back.

use crate::protocol::Protocol;
use tcm_types::{Message, MessagePart, Role, ToolCallMiddlewareOptions, ToolDescriptor};

/// §4.10 step 5: stop sequences that would truncate the model's output
/// before a sentinel closes are incompatible with this protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSequenceWarning {
    pub stop_sequence: String,
    pub reason: String,
}

pub struct PromptBuildResult {
    pub messages: Vec<Message>,
    pub warnings: Vec<StopSequenceWarning>,
}

/// Transform `messages` for the upstream call. `tools` is `None`/empty when
/// the caller supplied no tools for this generation — in that case the
/// message list passes through unchanged (step 1 has nothing to inject and
/// steps 2-3 have nothing to rewrite, since no tool calls or results can
/// exist without `tools` having been supplied on a prior turn either).
pub fn build_prompt_messages(
    protocol: &dyn Protocol,
    messages: &[Message],
    tools: &[ToolDescriptor],
    stop_sequences: &[String],
    _options: &ToolCallMiddlewareOptions,
) -> PromptBuildResult {
    let mut out: Vec<Message> = messages.iter().map(|m| rewrite_turn(protocol, m)).collect();

    if !tools.is_empty() {
        inject_tool_schemas(protocol, &mut out, tools);
    }

    let warnings = warn_incompatible_stop_sequences(protocol, stop_sequences);

    PromptBuildResult { messages: out, warnings }
}

/// Step 1: prepend (or merge into an existing leading) system message
/// describing the available tools in the protocol's textual convention.
fn inject_tool_schemas(protocol: &dyn Protocol, messages: &mut Vec<Message>, tools: &[ToolDescriptor]) {
    let fragment = protocol.format_tools(tools);
    match messages.first_mut() {
        Some(first) if first.role == Role::System => {
            let existing = first.text_content();
            first.content = vec![MessagePart::Text {
                text: format!("{fragment}\n\n{existing}"),
            }];
        }
        _ => {
            messages.insert(0, Message::text(Role::System, fragment));
        }
    }
}

/// Steps 2-3: assistant tool-call parts become text (via `formatToolCall`),
/// tool-result turns become user turns (via `formatToolResponse`). Adjacent
/// text fragments produced by this rewrite are joined with `\n` so a turn
/// that had multiple tool calls, or multiple tool results, still reads as
/// one contiguous block rather than several back-to-back turns.
fn rewrite_turn(protocol: &dyn Protocol, message: &Message) -> Message {
    match message.role {
        Role::Assistant => {
            let mut fragments = Vec::new();
            for part in &message.content {
                match part {
                    MessagePart::Text { text } => fragments.push(text.clone()),
                    MessagePart::ToolCall { tool_name, input, .. } => {
                        fragments.push(protocol.format_tool_call(tool_name, input));
                    }
                    MessagePart::ToolResult { .. } => {
                        // Not expected on an assistant turn; pass through as
                        // an empty fragment rather than panic on malformed
                        // caller input.
                    }
                }
            }
            Message {
                role: Role::Assistant,
                content: vec![MessagePart::Text { text: fragments.join("\n") }],
            }
        }
        Role::Tool => {
            let mut fragments = Vec::new();
            for part in &message.content {
                if let MessagePart::ToolResult { tool_name, output, .. } = part {
                    fragments.push(protocol.format_tool_response(tool_name, output));
                }
            }
            Message {
                role: Role::User,
                content: vec![MessagePart::Text { text: fragments.join("\n") }],
            }
        }
        Role::System | Role::User => message.clone(),
    }
}

/// Step 5: warn (rather than silently drop) when a caller-supplied stop
/// sequence would cut off this protocol's own sentinel mid-token — e.g. a
/// stop sequence of `"<tool"` under a JSON-in-tag protocol, which would
/// truncate generation before the tag could ever close.
pub fn warn_incompatible_stop_sequences(protocol: &dyn Protocol, stop_sequences: &[String]) -> Vec<StopSequenceWarning> {
    let registry_tags: Vec<String> = protocol
        .open_sentinels(&std::collections::HashMap::new())
        .into_iter()
        .map(|s| s.tag)
        .collect();
    let mut warnings = Vec::new();
    for stop in stop_sequences {
        if stop.is_empty() {
            continue;
        }
        let conflicts = registry_tags
            .iter()
            .any(|tag| tag.starts_with(stop.as_str()) || stop.starts_with(tag.as_str()));
        if conflicts {
            warnings.push(StopSequenceWarning {
                stop_sequence: stop.clone(),
                reason: format!(
                    "stop sequence {stop:?} may truncate generation before the {} protocol's tool-call sentinel closes",
                    protocol.name()
                ),
            });
        }
    }
    warnings
}
