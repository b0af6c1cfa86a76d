//! Error types for flow composition and execution.

use crate::interrupter::NodeId;

/// Errors raised by the engine itself, as opposed to errors raised by a
/// node's own logic (which are carried as [`FlowError::Node`]).
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Misuse of the builder API: an unknown target id for `sendTo`, a join
    /// registered against an upstream extractor that was never added, a
    /// node added to more than one flow.
    #[error("composition error: {0}")]
    Composition(String),

    /// A directive (continue/break) named a target node id that does not
    /// exist on this flow or any ancestor it was propagated to.
    #[error("interrupter targeted unknown node {0:?}")]
    UnknownTarget(NodeId),

    /// A `Flow::exec` was invoked while a previous run had not returned.
    #[error("flow is not reentrant: a previous exec() has not returned")]
    Reentrant,

    /// A node raised an error during `extract`, `exec`, `qualify`, or
    /// `flush`. The engine performs no recovery: it marks the flow
    /// `exception`, flushes every loader reached so far with that status,
    /// and rethrows this error to the caller.
    #[error(transparent)]
    Node(#[from] anyhow::Error),
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;
