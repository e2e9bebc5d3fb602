//! The upstream model contract (§6): the one thing this crate consumes
//! from the actual LLM transport. Mirrors `g3_providers::LLMProvider`'s
//! `complete`/`stream` split, trimmed to what the middleware needs.

use crate::{ContentPart, FinishReason, Message, StreamPart, ToolDescriptor, Usage};
use serde::{Deserialize, Serialize};

/// `toolChoice` forcing a specific tool short-circuits the middleware
/// (§4.9): no streaming parser is spun up at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ToolChoice {
    Auto,
    None,
    #[serde(rename_all = "camelCase")]
    Tool { tool_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub provider_options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResult {
    pub content: Vec<ContentPart>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

pub type UpstreamStream = tokio_stream::wrappers::ReceiverStream<Result<StreamPart, UpstreamError>>;

/// A transport-level error. Propagated unchanged by the middleware (§7) —
/// it never attempts to recover from a transport failure, only from
/// malformed *content* the transport successfully delivered.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct UpstreamError(Box<dyn std::error::Error + Send + Sync>);

impl UpstreamError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn from_message(msg: impl Into<String>) -> Self {
        #[derive(Debug, thiserror::Error)]
        #[error("{0}")]
        struct Msg(String);
        Self(Box::new(Msg(msg.into())))
    }
}

#[async_trait::async_trait]
pub trait UpstreamModel: Send + Sync {
    async fn do_generate(&self, params: GenerateParams) -> Result<GenerateResult, UpstreamError>;
    async fn do_stream(&self, params: GenerateParams) -> Result<UpstreamStream, UpstreamError>;
}
