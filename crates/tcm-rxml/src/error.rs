//! Errors thrown by `rxml`'s synchronous surface (`parse`/`stringify`).
//!
//! Everywhere else in the middleware these are caught and folded into an
//! `onError` notification plus an `ErrorEnvelope` (§7) rather than
//! propagated — `tcm-core` never lets an `RxmlError` escape `wrap_stream`/
//! `wrap_generate`.

use tcm_types::MiddlewareError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RxmlError {
    #[error("xml parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// More than one top-level string-valued tag shares a name the schema
    /// expects to be unique (§4.2's duplicate-string-tag rule).
    #[error("duplicate string tag <{tag}>: first value {first:?}, second value {second:?}")]
    DuplicateStringTag {
        tag: String,
        first: String,
        second: String,
    },

    #[error("schema coercion failed for path {path}: {message}")]
    SchemaCoercion { path: String, message: String },

    #[error("heuristic repair pipeline exhausted after {attempts} attempts: {message}")]
    RepairExhausted { attempts: usize, message: String },
}

impl RxmlError {
    pub fn into_middleware_error(self) -> MiddlewareError {
        match self {
            RxmlError::Parse { message, .. } => MiddlewareError::ToolCallParsing(message),
            RxmlError::DuplicateStringTag { tag, first, second } => {
                MiddlewareError::DuplicateStringTag(format!(
                    "<{tag}>: first value {first:?}, second value {second:?}"
                ))
            }
            RxmlError::SchemaCoercion { path, message } => {
                MiddlewareError::SchemaCoercion(format!("{path}: {message}"))
            }
            RxmlError::RepairExhausted { message, .. } => MiddlewareError::XmlRepair(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_string_tag_maps_to_middleware_taxonomy() {
        let err = RxmlError::DuplicateStringTag {
            tag: "thought".to_string(),
            first: "a".to_string(),
            second: "b".to_string(),
        };
        let mw = err.into_middleware_error();
        assert_eq!(mw.source(), tcm_types::ErrorSource::DuplicateStringTag);
    }
}
