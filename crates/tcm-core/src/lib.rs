//! Tool-call middleware kernel: streaming/non-streaming parsers, the
//! per-protocol wire conventions, the prompt builder, and the three
//! entry points (`transform_params`/`wrap_generate`/`wrap_stream`) a
//! language-model wrapper calls into.
//!
//! `tcm-types` fixes the shapes crossing the seam; `tcm-rxml` answers
//! "what JSON value does this XML-shaped text coerce to against this
//! schema"; this crate decides, per protocol, how tool calls are written
//! into and read back out of plain model text.

pub mod lifecycle;
pub mod middleware;
pub mod non_streaming;
pub mod prompt_builder;
pub mod protocol;
pub mod protocols;
pub mod streaming;
pub mod utils;

pub use lifecycle::ToolInputLifecycle;
pub use middleware::{protocol_for, transform_params, wrap_generate, wrap_stream};
pub use prompt_builder::{build_prompt_messages, PromptBuildResult, StopSequenceWarning};
pub use protocol::{tool_registry, OpenSentinel, ParsedCall, Protocol, ToolRegistry};
pub use protocols::{JsonTagProtocol, UiTarsProtocol, XmlElementProtocol};
pub use streaming::StreamParserState;
