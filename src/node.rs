//! Node contracts: the capability traits every pipeline participant
//! implements one of.
//!
//! Dynamic dispatch over heterogeneous node kinds is modeled as a small
//! capability set, one trait per kind, rather than a class hierarchy: the
//! engine pattern-matches a tagged node-kind enum inside the inner walk and
//! dispatches to the right contract.

use async_trait::async_trait;

use crate::interrupter::NodeSignal;

/// A node that produces records in batches.
///
/// `extract` performs the batched pull and returns `true` iff records were
/// obtained. `drain_batch` hands back the records obtained by the most
/// recent `extract` call, consuming them from the extractor's internal
/// buffer.
#[async_trait]
pub trait Extractor<R>: Send + Sync {
    async fn extract(&mut self) -> anyhow::Result<bool>;

    fn drain_batch(&mut self) -> Vec<R>;

    /// Whether this extractor has reached the end of its configured range
    /// and will not produce more data even if called again. Extractors that
    /// follow an unbounded source (e.g. tailing a log) return `false`
    /// forever.
    fn is_finished(&self) -> bool {
        true
    }
}

/// A node that maps one record to another. A transformer's returned
/// `Value` replaces the current record for downstream nodes.
#[async_trait]
pub trait Transformer<R>: Send + Sync {
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>>;
}

/// A node that consumes records and eventually commits them. Loaders
/// typically return `NodeSignal::Void` and leave the record unchanged for
/// any downstream node, but may emit a directive (or even replace the
/// record, e.g. to attach a generated primary key) the same as a
/// transformer.
#[async_trait]
pub trait Loader<R>: Send + Sync {
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>>;

    /// Called exactly once per `Flow::exec` with a non-null `status` when
    /// invoked by the engine after the outer loop ends. A loader may
    /// additionally call its own internal flush during `exec` when a
    /// buffering threshold is reached; such self-flushes are not the
    /// engine's concern and are not represented by this trait method (the
    /// loader does so on its own before returning from `exec`).
    async fn flush(&mut self, status: Option<crate::status::FlowStatus>) -> anyhow::Result<()>;
}

/// A node whose `qualify` decides whether a record proceeds.
#[derive(Debug)]
pub enum Qualification {
    /// Continue with the record unchanged.
    Accept,
    /// Skip the remainder of the current record in the carrier flow only.
    Reject,
    /// An explicit directive, as specified by its fields.
    Interrupt(crate::interrupter::Interrupter),
}

#[async_trait]
pub trait Qualifier<R>: Send + Sync {
    async fn qualify(&mut self, record: &R) -> anyhow::Result<Qualification>;
}

/// A node that accumulates state across records and, once the source is
/// exhausted, may emit one final derived record.
#[async_trait]
pub trait Aggregator<R>: Send + Sync {
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>>;

    /// Invoked once when the outer extractor loop drains, before final
    /// loader flush. A `Some(record)` return value re-enters the walk at
    /// the node immediately after this aggregator.
    async fn finalize(&mut self) -> anyhow::Result<Option<R>> {
        Ok(None)
    }
}
