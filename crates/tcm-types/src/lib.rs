//! Shared data model and upstream-model contract for the tool-call middleware.
//!
//! This crate has no opinion on how a tool call is framed in text (that is
//! `tcm-core`'s job) — it only fixes the shapes that flow across the seam:
//! the caller's messages and tools going out, and the `StreamPart`/
//! `ContentPart` events coming back.

mod error;
mod ids;
mod message;
mod options;
mod upstream;

pub mod mock;

pub use error::{ErrorEnvelope, ErrorMetadata, ErrorSource, MiddlewareError, OnError};
pub use ids::{next_stable_id, RegexCache};
pub use message::{Message, MessagePart, Role};
pub use options::{ProtocolKind, ToolCallMiddlewareOptions};
pub use upstream::{
    GenerateParams, GenerateResult, ToolChoice, UpstreamError, UpstreamModel, UpstreamStream,
};

use serde::{Deserialize, Serialize};

/// A tool's name, human description, and JSON-Schema input shape.
///
/// Immutable for the lifetime of one generation (§3 of the design doc).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Token usage for one generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Finish reason, normalised the way §6 requires: whenever a tool call was
/// emitted, `unified == ToolCalls`, but the provider's raw reason is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnifiedFinishReason {
    ToolCalls,
    Stop,
    Length,
    ContentFilter,
    Other,
}

impl UnifiedFinishReason {
    /// Normalise a provider's raw finish-reason string into the unified
    /// taxonomy. Callers that already know a tool call was emitted should
    /// use `ToolCalls` directly rather than calling this (§6: "whenever a
    /// tool call was emitted, unified=\"tool-calls\"").
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => UnifiedFinishReason::Stop,
            "length" | "max_tokens" => UnifiedFinishReason::Length,
            "content_filter" | "content-filter" => UnifiedFinishReason::ContentFilter,
            "tool_calls" | "tool-calls" | "tool_use" => UnifiedFinishReason::ToolCalls,
            _ => UnifiedFinishReason::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinishReason {
    pub unified: UnifiedFinishReason,
    pub raw: String,
}

impl FinishReason {
    pub fn stop() -> Self {
        Self {
            unified: UnifiedFinishReason::Stop,
            raw: "stop".to_string(),
        }
    }

    pub fn tool_calls(raw: impl Into<String>) -> Self {
        Self {
            unified: UnifiedFinishReason::ToolCalls,
            raw: raw.into(),
        }
    }
}

/// A single event in the streaming output of a generation.
///
/// Mirrors the `TextStreamPart` shape used throughout the Rust AI-SDK port
/// pack (tagged union, `type` discriminator, `camelCase` fields): a tagged
/// enum keeps the ordering invariants of §3 explicit in the type itself
/// rather than folding everything into a single struct with optional
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    #[serde(rename_all = "camelCase")]
    TextStart { id: String },
    #[serde(rename_all = "camelCase")]
    TextDelta { id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    TextEnd { id: String },

    #[serde(rename_all = "camelCase")]
    ToolInputStart { id: String, tool_name: String },
    #[serde(rename_all = "camelCase")]
    ToolInputDelta { id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    ToolInputEnd { id: String },

    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: String,
    },

    #[serde(rename_all = "camelCase")]
    Finish {
        usage: Usage,
        finish_reason: FinishReason,
    },

    /// A part from the upstream the middleware does not interpret; passed
    /// through untouched.
    Raw { value: serde_json::Value },
}

/// A single part of a non-streaming generation result (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_serializes_with_kebab_case_tag() {
        let part = StreamPart::TextDelta {
            id: "t1".to_string(),
            delta: "hi".to_string(),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "text-delta");
        assert_eq!(json["delta"], "hi");
    }

    #[test]
    fn finish_reason_tool_calls_keeps_raw() {
        let fr = FinishReason::tool_calls("tool_use");
        assert_eq!(fr.unified, UnifiedFinishReason::ToolCalls);
        assert_eq!(fr.raw, "tool_use");
    }

    #[test]
    fn tool_call_stream_part_round_trips() {
        let part = StreamPart::ToolCall {
            tool_call_id: "call_1".to_string(),
            tool_name: "calc".to_string(),
            input: "{}".to_string(),
        };
        let json = serde_json::to_string(&part).unwrap();
        let back: StreamPart = serde_json::from_str(&json).unwrap();
        assert_eq!(part, back);
    }
}
