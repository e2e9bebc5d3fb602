//! `tcm-rxml` — a tolerant XML tokenizer, heuristic repair pipeline, and
//! schema-aware value coercer.
//!
//! This crate has no knowledge of tool calls, streaming, or any particular
//! protocol: it answers one question, "given XML-shaped text that a model
//! may have gotten slightly wrong, and a JSON Schema describing what I
//! expect, what's the closest valid JSON value?" `tcm-core` is the only
//! consumer and owns every protocol-specific decision.

pub mod coerce;
pub mod error;
pub mod facade;
pub mod incremental;
pub mod repair;
pub mod schema;
pub mod tokenizer;
pub mod value_coerce;

pub use error::RxmlError;
pub use facade::{parse, parse_untyped, raw_inner, stringify, ParseOptions};
pub use incremental::{potential_start_index, potential_start_index_any};
pub use schema::{Schema, SchemaType};
pub use tokenizer::{tokenize, Element, Node, TokenizeOptions};
pub use value_coerce::{coerce_value, object_from_element};
