//! Per-node run counters and the passive lifecycle callback hooks a flow
//! can be configured with.
//!
//! Counters are aggregated into a small structured record with a
//! human-readable `report()` string, for printing or logging a completed
//! run without reaching into per-node internals.

use std::collections::BTreeMap;

use crate::interrupter::NodeId;
use crate::status::FlowStatus;

/// Counters observed for a single node across one flow run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub seen: u64,
    pub continued: u64,
    pub broke: u64,
    pub errors: u64,
}

/// Aggregate statistics for one `Flow::exec` run.
#[derive(Debug, Clone, Default)]
pub struct FlowStats {
    pub per_node: BTreeMap<NodeId, NodeStats>,
    pub status: Option<FlowStatus>,
}

impl FlowStats {
    pub(crate) fn record_seen(&mut self, node: NodeId) {
        self.per_node.entry(node).or_default().seen += 1;
    }

    pub(crate) fn record_continue(&mut self, node: NodeId) {
        self.per_node.entry(node).or_default().continued += 1;
    }

    pub(crate) fn record_break(&mut self, node: NodeId) {
        self.per_node.entry(node).or_default().broke += 1;
    }

    pub(crate) fn record_error(&mut self, node: NodeId) {
        self.per_node.entry(node).or_default().errors += 1;
    }

    /// A human-readable multi-line summary, one line per node, in node id
    /// order, plus the terminal status if known.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if let Some(status) = self.status {
            lines.push(format!("status: {status}"));
        }
        for (node, s) in &self.per_node {
            lines.push(format!(
                "{node}: seen={} continued={} broke={} errors={}",
                s.seen, s.continued, s.broke, s.errors
            ));
        }
        lines.join("\n")
    }
}

/// Passive observer callbacks. They must never mutate records or alter
/// control flow. Each returns `anyhow::Result<()>` so a failing callback can
/// be folded into the same error path as a failing node, rather than
/// panicking the whole run.
pub struct Callbacks<R> {
    pub on_start: Option<Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>>,
    pub on_flow_progress: Option<Box<dyn Fn(&FlowStats) -> anyhow::Result<()> + Send + Sync>>,
    pub on_success: Option<Box<dyn Fn(&FlowStats) -> anyhow::Result<()> + Send + Sync>>,
    pub on_fail: Option<Box<dyn Fn(&crate::error::FlowError) -> anyhow::Result<()> + Send + Sync>>,
    _marker: std::marker::PhantomData<R>,
}

impl<R> Default for Callbacks<R> {
    fn default() -> Self {
        Self {
            on_start: None,
            on_flow_progress: None,
            on_success: None,
            on_fail: None,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Callbacks<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_flow_progress", &self.on_flow_progress.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .finish()
    }
}
