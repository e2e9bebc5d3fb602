//! Error taxonomy exposed to the `onError` callback (§6/§7).
//!
//! The middleware never propagates these out of `wrap_stream`/`wrap_generate`
//! — every recovery path yields a well-formed event stream and reports what
//! happened through `onError` instead. `rxml`'s synchronous `parse`/
//! `stringify` API is the one place a `MiddlewareError` is actually returned
//! to the caller (see `tcm_rxml::error::RxmlError`, which wraps this taxonomy
//! for the cases it can throw).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    DecodeProviderOptions,
    ToolCallParsing,
    ToolChoiceParse,
    DuplicateStringTag,
    SchemaCoercion,
    XmlRepair,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::DecodeProviderOptions => "decode-provider-options",
            ErrorSource::ToolCallParsing => "tool-call-parsing",
            ErrorSource::ToolChoiceParse => "tool-choice-parse",
            ErrorSource::DuplicateStringTag => "duplicate-string-tag",
            ErrorSource::SchemaCoercion => "schema-coercion",
            ErrorSource::XmlRepair => "xml-repair",
        }
    }
}

/// Context handed to the `onError` callback alongside the human message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type OnError = Arc<dyn Fn(&str, ErrorMetadata) + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MiddlewareError {
    #[error("failed to decode provider options: {0}")]
    DecodeProviderOptions(String),
    #[error("failed to parse tool-call payload: {0}")]
    ToolCallParsing(String),
    #[error("failed to parse toolChoice payload: {0}")]
    ToolChoiceParse(String),
    #[error("duplicate top-level string tag: {0}")]
    DuplicateStringTag(String),
    #[error("schema coercion error: {0}")]
    SchemaCoercion(String),
    #[error("xml repair exhausted: {0}")]
    XmlRepair(String),
}

impl MiddlewareError {
    pub fn source(&self) -> ErrorSource {
        match self {
            MiddlewareError::DecodeProviderOptions(_) => ErrorSource::DecodeProviderOptions,
            MiddlewareError::ToolCallParsing(_) => ErrorSource::ToolCallParsing,
            MiddlewareError::ToolChoiceParse(_) => ErrorSource::ToolChoiceParse,
            MiddlewareError::DuplicateStringTag(_) => ErrorSource::DuplicateStringTag,
            MiddlewareError::SchemaCoercion(_) => ErrorSource::SchemaCoercion,
            MiddlewareError::XmlRepair(_) => ErrorSource::XmlRepair,
        }
    }

    /// Notify an optional `onError` callback, swallowing the case where none
    /// is configured (the common path — most callers don't wire one up).
    pub fn notify(&self, on_error: &Option<OnError>, original_text: Option<String>) {
        if let Some(cb) = on_error {
            cb(
                &self.to_string(),
                ErrorMetadata {
                    source: Some(self.source()),
                    original_text,
                    details: None,
                },
            );
        }
    }
}

/// The structured error envelope a consumer sees in place of a parsed tool
/// call, per §7: `{errorType, source, message, details, originalText}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error_type: String,
    pub source: ErrorSource,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub original_text: String,
}

impl ErrorEnvelope {
    pub fn new(error: &MiddlewareError, original_text: impl Into<String>) -> Self {
        Self {
            error_type: "tool-call-middleware-error".to_string(),
            source: error.source(),
            message: error.to_string(),
            details: None,
            original_text: original_text.into(),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
