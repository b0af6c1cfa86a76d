//! The interrupt/continue/break directive protocol nodes use to steer
//! traversal.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier for a node, assigned when the node is added to a
/// [`crate::Flow`]. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    /// Mint a fresh, process-unique node id.
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Which way a directive alters traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Abort the inner walk for the current record only; the outer loop
    /// proceeds to the next record.
    Continue,
    /// Abort the inner walk and the outer extractor loop of the carrier
    /// flow. Sets the flow's terminal status to `dirty`.
    Break,
}

/// A directive produced by a node that alters traversal.
///
/// `target_node` names a node to unwind to: for `Continue`, traversal
/// resumes at that node (if it is downstream of where the directive was
/// raised this is equivalent to a forward jump); for `Break`, the outer loop
/// stops at/above that node. `None` means "the carrier flow only, no
/// specific resume point" — the common case.
///
/// `target_flow` marks that this directive is meant for an ancestor flow
/// (the branch case): the carrier flow re-raises it to its parent instead of
/// consuming it locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupter {
    pub kind: InterruptKind,
    pub target_node: Option<NodeId>,
    pub target_flow: Option<FlowId>,
}

impl Interrupter {
    /// A plain `continue`, confined to the carrier flow, no resume target.
    pub fn continue_() -> Self {
        Self {
            kind: InterruptKind::Continue,
            target_node: None,
            target_flow: None,
        }
    }

    /// A plain `break`, confined to the carrier flow.
    pub fn break_() -> Self {
        Self {
            kind: InterruptKind::Break,
            target_node: None,
            target_flow: None,
        }
    }

    /// A `continue` that unwinds to a specific node, possibly in an
    /// ancestor flow.
    pub fn continue_to(node: NodeId, flow: Option<FlowId>) -> Self {
        Self {
            kind: InterruptKind::Continue,
            target_node: Some(node),
            target_flow: flow,
        }
    }

    /// A `break` that unwinds to a specific node, possibly in an ancestor
    /// flow.
    pub fn break_to(node: NodeId, flow: Option<FlowId>) -> Self {
        Self {
            kind: InterruptKind::Break,
            target_node: Some(node),
            target_flow: flow,
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self.kind, InterruptKind::Break)
    }

    /// Whether this directive targets an ancestor flow other than `this_flow`.
    pub fn targets_ancestor(&self, this_flow: FlowId) -> bool {
        matches!(self.target_flow, Some(f) if f != this_flow)
    }
}

/// Stable identifier for a [`crate::Flow`] instance, used to route
/// directives that target an ancestor flow (the branch case). Assigned once
/// per `Flow::new()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(u64);

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

impl FlowId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// The uniform result type every node operation returns, per the engine's
/// design notes: a record value, a void (record unchanged), or an
/// interrupter directive.
#[derive(Debug)]
pub enum NodeSignal<R> {
    /// Replace the current record with this value for downstream nodes.
    Value(R),
    /// The node did not replace the record (non-returning loader, or a
    /// returning node choosing to pass the prior record through).
    Void,
    /// Abort/redirect traversal per the carried directive.
    Interrupt(Interrupter),
}

impl<R> NodeSignal<R> {
    pub fn value(record: R) -> Self {
        Self::Value(record)
    }
}
