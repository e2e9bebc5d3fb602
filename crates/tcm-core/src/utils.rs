//! C12 odds and ends specific to `tcm-core` (the stable-id generator and
//! regex cache live in `tcm-types` since `tcm-rxml` needs them too).

use tcm_types::StreamPart;

/// The "debug-logging transform" §4.11 mentions piping the upstream stream
/// through before C9's parser: every raw part that arrives from upstream is
/// traced at debug level before the state machine sees it, the same way the
/// teacher logs each inbound provider event.
pub fn trace_upstream_part(part: &StreamPart) {
    tracing::debug!(?part, "upstream stream part");
}
