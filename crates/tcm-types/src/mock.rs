//! A configurable mock upstream model for tests.
//!
//! Grounded directly in `g3_providers::mock::MockProvider`: a scripted
//! response queue that can simulate both the non-streaming and streaming
//! paths, with precise control over chunk boundaries so callers can test
//! chunk-invariance (§8, property 2).

use crate::{
    ContentPart, FinishReason, GenerateParams, GenerateResult, StreamPart, Usage, UpstreamError,
    UpstreamModel, UpstreamStream,
};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One scripted streaming response: a sequence of raw text deltas (exactly
/// as the transport would hand them to the middleware, split at whatever
/// granularity the test wants) followed by a finish.
#[derive(Debug, Clone, Default)]
pub struct MockStreamScript {
    pub deltas: Vec<String>,
    pub finish_reason_raw: String,
    pub usage: Usage,
}

impl MockStreamScript {
    pub fn text(deltas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            finish_reason_raw: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Split `text` into per-byte chunks — the finest possible granularity,
    /// used to exercise chunk-invariance at its most adversarial.
    pub fn per_byte(text: &str) -> Self {
        Self::text(text.chars().map(|c| c.to_string()))
    }
}

/// A mock `UpstreamModel` whose scripted responses are consumed in order,
/// one per call, the way `MockProvider` does.
pub struct MockUpstream {
    generate_script: Mutex<Vec<GenerateResult>>,
    stream_script: Mutex<Vec<MockStreamScript>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            generate_script: Mutex::new(Vec::new()),
            stream_script: Mutex::new(Vec::new()),
        }
    }

    pub fn with_generate_result(self, result: GenerateResult) -> Self {
        self.generate_script.lock().unwrap().push(result);
        self
    }

    pub fn with_generate_text(self, text: impl Into<String>) -> Self {
        self.with_generate_result(GenerateResult {
            content: vec![ContentPart::Text { text: text.into() }],
            finish_reason: FinishReason::stop(),
            usage: Usage::default(),
        })
    }

    pub fn with_stream_script(self, script: MockStreamScript) -> Self {
        self.stream_script.lock().unwrap().push(script);
        self
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UpstreamModel for MockUpstream {
    async fn do_generate(&self, _params: GenerateParams) -> Result<GenerateResult, UpstreamError> {
        let mut script = self.generate_script.lock().unwrap();
        if script.is_empty() {
            return Err(UpstreamError::from_message("no scripted generate result left"));
        }
        Ok(script.remove(0))
    }

    async fn do_stream(&self, _params: GenerateParams) -> Result<UpstreamStream, UpstreamError> {
        let script = {
            let mut scripts = self.stream_script.lock().unwrap();
            if scripts.is_empty() {
                return Err(UpstreamError::from_message("no scripted stream left"));
            }
            scripts.remove(0)
        };

        let (tx, rx) = mpsc::channel(script.deltas.len().max(1) + 1);
        tokio::spawn(async move {
            for delta in script.deltas {
                if tx
                    .send(Ok(StreamPart::TextDelta {
                        id: "mock-text".to_string(),
                        delta,
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(Ok(StreamPart::Finish {
                    usage: script.usage,
                    finish_reason: FinishReason {
                        unified: crate::UnifiedFinishReason::Stop,
                        raw: script.finish_reason_raw,
                    },
                }))
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn mock_generate_returns_scripted_text() {
        let mock = MockUpstream::new().with_generate_text("hello");
        let result = mock
            .do_generate(GenerateParams {
                messages: vec![],
                tools: None,
                tool_choice: None,
                stop_sequences: vec![],
                provider_options: None,
            })
            .await
            .unwrap();
        assert_eq!(result.content.len(), 1);
    }

    #[tokio::test]
    async fn mock_stream_yields_scripted_deltas_then_finish() {
        let mock = MockUpstream::new().with_stream_script(MockStreamScript::text(["a", "b"]));
        let mut stream = mock
            .do_stream(GenerateParams {
                messages: vec![],
                tools: None,
                tool_choice: None,
                stop_sequences: vec![],
                provider_options: None,
            })
            .await
            .unwrap();

        let mut parts = vec![];
        while let Some(part) = stream.next().await {
            parts.push(part.unwrap());
        }
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts.last(), Some(StreamPart::Finish { .. })));
    }
}
