//! The `toolCallMiddleware` provider-options sub-object (§6) and its
//! decoder — "the decoder is the single source of truth" for what
//! `originalTools` actually means, so every other component goes through
//! `decode_provider_options` rather than poking at the raw JSON itself.

use crate::error::{MiddlewareError, OnError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    HermesJson,
    GemmaJsonMix,
    MorphXml,
    UiTars,
}

impl Default for ProtocolKind {
    fn default() -> Self {
        ProtocolKind::HermesJson
    }
}

fn default_throw_on_duplicate_string_tags() -> bool {
    true
}

fn default_max_buffered_payload_bytes() -> usize {
    1024 * 1024
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMiddlewareOptions {
    #[serde(default)]
    pub protocol: ProtocolKind,

    /// The caller's tool schemas, as encoded by the caller-side SDK.
    /// `None` means "no tools were supplied for this generation".
    #[serde(default)]
    pub original_tools: Option<serde_json::Value>,

    /// On a malformed tool-call payload, re-emit the raw source text as a
    /// `text-delta` in addition to invoking `onError` (§4.6's ambiguity
    /// policy, option (a) vs (b)).
    #[serde(default)]
    pub emit_raw_tool_call_text_on_error: bool,

    #[serde(default = "default_throw_on_duplicate_string_tags")]
    pub throw_on_duplicate_string_tags: bool,

    #[serde(default = "default_max_buffered_payload_bytes")]
    pub max_buffered_payload_bytes: usize,

    /// Invoked on every recoverable error (§7): malformed payload, schema
    /// mismatch, duplicate string tag, unterminated tag at EOF. Not part
    /// of the wire format — provider options are plain JSON, this callback
    /// is wired up by the caller in Rust, not decoded from `originalTools`.
    #[serde(skip)]
    pub on_error: Option<OnError>,
}

impl std::fmt::Debug for ToolCallMiddlewareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallMiddlewareOptions")
            .field("protocol", &self.protocol)
            .field("original_tools", &self.original_tools)
            .field("emit_raw_tool_call_text_on_error", &self.emit_raw_tool_call_text_on_error)
            .field("throw_on_duplicate_string_tags", &self.throw_on_duplicate_string_tags)
            .field("max_buffered_payload_bytes", &self.max_buffered_payload_bytes)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Default for ToolCallMiddlewareOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::default(),
            original_tools: None,
            emit_raw_tool_call_text_on_error: false,
            throw_on_duplicate_string_tags: default_throw_on_duplicate_string_tags(),
            max_buffered_payload_bytes: default_max_buffered_payload_bytes(),
            on_error: None,
        }
    }
}

/// Decode the `toolCallMiddleware` sub-object of a call's provider options.
///
/// `None` input (no provider options supplied at all) is not an error — it
/// degrades to protocol defaults with no tools. A present-but-malformed
/// value is the only case that returns `Err`; callers are expected to
/// report it through `onError` and continue with an empty tool set (§6).
pub fn decode_provider_options(
    value: Option<&serde_json::Value>,
) -> Result<ToolCallMiddlewareOptions, MiddlewareError> {
    let Some(value) = value else {
        return Ok(ToolCallMiddlewareOptions::default());
    };
    let Some(sub) = value.get("toolCallMiddleware") else {
        return Ok(ToolCallMiddlewareOptions::default());
    };
    serde_json::from_value(sub.clone())
        .map_err(|e| MiddlewareError::DecodeProviderOptions(e.to_string()))
}
