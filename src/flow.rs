//! The [`Flow`] driver: the outer extract loop, the inner per-record walk,
//! and the interrupt/continue/break resolution.
//!
//! Dynamic dispatch over heterogeneous node kinds is modeled as a tagged
//! `NodeKind` enum rather than a class hierarchy: `walk_from`
//! pattern-matches the entry at each index and dispatches to the node's own
//! capability trait (`node::Extractor`/`Transformer`/`Loader`/`Qualifier`/
//! `Aggregator`, or `join::JoinNode`).

use std::hash::Hash;

use tracing::{debug, trace, warn};

use crate::config::FlowConfig;
use crate::error::{FlowError, FlowResult};
use crate::interrupter::{FlowId, Interrupter, InterruptKind, NodeId, NodeSignal};
use crate::join::{Join, JoinNode, JoinableExtractor, OnClose};
use crate::node::{Aggregator, Extractor, Loader, Qualification, Qualifier, Transformer};
use crate::stats::{Callbacks, FlowStats};
use crate::status::FlowStatus;

enum NodeKind<R> {
    Extractor(Box<dyn Extractor<R>>),
    Transformer(Box<dyn Transformer<R>>),
    Loader(Box<dyn Loader<R>>),
    Qualifier(Box<dyn Qualifier<R>>),
    Join(Box<dyn JoinNode<R>>),
    Aggregator(Box<dyn Aggregator<R>>),
    Branch(Flow<R>, bool),
}

struct Entry<R> {
    id: NodeId,
    kind: NodeKind<R>,
}

/// What a top-level or branch `exec` produced.
#[derive(Debug)]
pub enum ExecOutcome<R> {
    /// A zero-extractor flow ran its linear chain and produced this value.
    Value(R),
    /// An extractor-driven flow ran to completion with this terminal
    /// status.
    Status(FlowStatus),
}

/// Outcome of walking the node list for one record, local to a single
/// `Flow` (no recursion through branch calls folded in yet).
enum WalkOutcome<R> {
    /// Reached the end of the node list; carries the final record value.
    Finished(R),
    /// A `continue` directive settled as confined to this flow; carries the
    /// record as of the point the directive was raised.
    LocalContinue(R),
    /// A `break` directive settled as confined to this flow.
    LocalBreak(R),
    /// The directive named a target this flow does not own; must propagate
    /// to whichever flow invoked this one as a branch.
    Bubble(Interrupter),
}

/// Outcome of running a `Flow` as a branch node inside a parent's walk.
enum BranchOutcome<R> {
    Value(R),
    Void,
    Bubble(Interrupter),
}

/// Ordered, executable pipeline of nodes.
///
/// `Flow<R>` is generic over any record type `R: Clone + Send + Sync +
/// 'static`; the crate additionally ships [`crate::record::Record`] for the
/// common semi-structured case.
pub struct Flow<R> {
    id: FlowId,
    nodes: Vec<Entry<R>>,
    extractor_positions: Vec<usize>,
    aggregator_positions: Vec<usize>,
    running: bool,
    last_stats: FlowStats,
    callbacks: Callbacks<R>,
    config: FlowConfig,
}

impl<R> Default for Flow<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Flow<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        Self {
            id: FlowId::next(),
            nodes: Vec::new(),
            extractor_positions: Vec::new(),
            aggregator_positions: Vec::new(),
            running: false,
            last_stats: FlowStats::default(),
            callbacks: Callbacks::default(),
            config,
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    fn push(&mut self, kind: NodeKind<R>) -> NodeId {
        let id = NodeId::next();
        self.nodes.push(Entry { id, kind });
        id
    }

    fn owns_extractor(&self, id: NodeId) -> bool {
        self.extractor_positions
            .iter()
            .any(|&p| self.nodes[p].id == id)
    }

    // ---- composition (builder) methods ---------------------------------

    /// Register an extractor. When `upstream` is given, this extractor is
    /// understood to be used once `upstream` drains; the from-chain is
    /// walked in registration order, so the association is validated here
    /// but the actual continuation behavior falls out of that order.
    pub fn from<E>(&mut self, extractor: E, upstream: Option<NodeId>) -> FlowResult<NodeId>
    where
        E: Extractor<R> + 'static,
    {
        if let Some(up) = upstream {
            if !self.owns_extractor(up) {
                return Err(FlowError::Composition(format!(
                    "from(): upstream {up} is not a registered extractor on this flow"
                )));
            }
        }
        let id = self.push(NodeKind::Extractor(Box::new(extractor)));
        self.extractor_positions.push(self.nodes.len() - 1);
        Ok(id)
    }

    /// Append a transformer.
    pub fn transform<T>(&mut self, transformer: T) -> FlowResult<NodeId>
    where
        T: Transformer<R> + 'static,
    {
        Ok(self.push(NodeKind::Transformer(Box::new(transformer))))
    }

    /// Append a loader.
    pub fn to<L>(&mut self, loader: L) -> FlowResult<NodeId>
    where
        L: Loader<R> + 'static,
    {
        Ok(self.push(NodeKind::Loader(Box::new(loader))))
    }

    /// Append a qualifier.
    pub fn qualify<Q>(&mut self, qualifier: Q) -> FlowResult<NodeId>
    where
        Q: Qualifier<R> + 'static,
    {
        Ok(self.push(NodeKind::Qualifier(Box::new(qualifier))))
    }

    /// Append a join. `upstream` must already be a registered extractor on
    /// this flow; `from_key` reads the join key out of the upstream record.
    pub fn join<K, E, F>(
        &mut self,
        joinable: E,
        upstream: NodeId,
        from_key: F,
        on_close: OnClose<R>,
    ) -> FlowResult<NodeId>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        E: JoinableExtractor<R, K> + 'static,
        F: Fn(&R) -> Option<K> + Send + Sync + 'static,
    {
        if !self.owns_extractor(upstream) {
            return Err(FlowError::Composition(format!(
                "join(): upstream {upstream} is not a registered extractor on this flow"
            )));
        }
        let node = Join::new(joinable, from_key, on_close);
        Ok(self.push(NodeKind::Join(Box::new(node))))
    }

    /// Append an aggregator: a node that accumulates state across records
    /// and may emit one derived record once the source is exhausted.
    pub fn aggregate<A>(&mut self, aggregator: A) -> FlowResult<NodeId>
    where
        A: Aggregator<R> + 'static,
    {
        let id = self.push(NodeKind::Aggregator(Box::new(aggregator)));
        self.aggregator_positions.push(self.nodes.len() - 1);
        Ok(id)
    }

    /// Embed a sub-flow as a node. Branch flows must be zero-extractor,
    /// seed-driven sub-pipelines: a branch is invoked once per upstream
    /// record with that record as its sole input, which only makes sense
    /// for a linear chain. `force_flush=true` flushes the branch's own
    /// loaders at the end of every invocation rather than deferring to the
    /// root flow's final flush.
    pub fn branch(&mut self, sub: Flow<R>, force_flush: bool) -> FlowResult<NodeId> {
        if !sub.extractor_positions.is_empty() {
            return Err(FlowError::Composition(
                "branch(): sub-flow must be zero-extractor (seed-driven); \
                 an extractor-bearing flow cannot be embedded as a branch"
                    .to_string(),
            ));
        }
        Ok(self.push(NodeKind::Branch(sub, force_flush)))
    }

    // ---- lifecycle callbacks -------------------------------------------
    //
    // Each hook returns `anyhow::Result<()>` rather than `()`: a callback
    // that fails is folded into the run's error path the same way a failing
    // node is, instead of panicking the task. `on_start` and
    // `on_flow_progress` run before the run's final flush, so a failure
    // there aborts the run and flushes loaders with `Exception`, exactly
    // like a failing node would. `on_success` and `on_fail` run after the
    // final flush has already happened (the run's outcome, and whatever
    // flush it triggered, is already fixed by the time they're called) so a
    // failure there is logged and swallowed rather than re-flushed - see
    // DESIGN.md for why a second flush isn't an option at that point.

    pub fn on_start(&mut self, f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> &mut Self {
        self.callbacks.on_start = Some(Box::new(f));
        self
    }

    pub fn on_flow_progress(
        &mut self,
        f: impl Fn(&FlowStats) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.callbacks.on_flow_progress = Some(Box::new(f));
        self
    }

    pub fn on_success(
        &mut self,
        f: impl Fn(&FlowStats) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.callbacks.on_success = Some(Box::new(f));
        self
    }

    pub fn on_fail(&mut self, f: impl Fn(&FlowError) -> anyhow::Result<()> + Send + Sync + 'static) -> &mut Self {
        self.callbacks.on_fail = Some(Box::new(f));
        self
    }

    /// Per-node counters and a human-readable report from the most recently
    /// completed run.
    pub fn get_stats(&self) -> &FlowStats {
        &self.last_stats
    }

    /// Inject a record at a specific node without going through earlier
    /// nodes. Provided for testing and cross-branch coordination.
    pub async fn send_to(&mut self, node_id: NodeId, record: R) -> FlowResult<ExecOutcome<R>> {
        let idx = self
            .nodes
            .iter()
            .position(|e| e.id == node_id)
            .ok_or(FlowError::UnknownTarget(node_id))?;
        let mut stats = FlowStats::default();
        let outcome = self.walk_from(idx, record, &mut stats).await;
        match outcome {
            Ok(WalkOutcome::Finished(r) | WalkOutcome::LocalContinue(r) | WalkOutcome::LocalBreak(r)) => {
                Ok(ExecOutcome::Value(r))
            }
            Ok(WalkOutcome::Bubble(i)) => Err(FlowError::UnknownTarget(i.target_node.unwrap_or(node_id))),
            Err(e) => Err(e),
        }
    }

    // ---- execution ------------------------------------------------------

    /// Run the flow. Zero-extractor flows require `param` (the seed record)
    /// and return `ExecOutcome::Value`; extractor-driven flows ignore
    /// `param` and return `ExecOutcome::Status`.
    ///
    /// A flow is reentrant-unsafe: a new run may begin only after the
    /// previous one returned.
    pub async fn exec(&mut self, param: Option<R>) -> FlowResult<ExecOutcome<R>> {
        if self.running {
            return Err(FlowError::Reentrant);
        }
        self.running = true;
        let result = self.exec_inner(param).await;
        self.running = false;
        result
    }

    async fn exec_inner(&mut self, param: Option<R>) -> FlowResult<ExecOutcome<R>> {
        if let Some(cb) = &self.callbacks.on_start {
            if let Err(e) = cb() {
                let _ = self.flush_all(FlowStatus::Exception).await;
                let err = FlowError::Node(e);
                self.run_on_fail(&err);
                return Err(err);
            }
        }
        let outcome = if self.extractor_positions.is_empty() {
            self.exec_linear(param).await
        } else {
            self.exec_extractor_driven().await
        };
        match &outcome {
            Ok(_) => {
                if let Some(cb) = &self.callbacks.on_success {
                    if let Err(e) = cb(&self.last_stats) {
                        warn!(flow = %self.id, error = %e, "on_success callback failed after the run's own flush already completed");
                    }
                }
            }
            Err(e) => {
                self.run_on_fail(e);
            }
        }
        outcome
    }

    /// Invoke `on_fail` if configured. Runs after the run's own final flush
    /// has already happened, so a failure here has no flush to retrigger;
    /// it is logged and swallowed rather than compounded into the result.
    fn run_on_fail(&self, err: &FlowError) {
        if let Some(cb) = &self.callbacks.on_fail {
            if let Err(e) = cb(err) {
                warn!(flow = %self.id, error = %e, "on_fail callback itself failed");
            }
        }
    }

    async fn exec_linear(&mut self, param: Option<R>) -> FlowResult<ExecOutcome<R>> {
        let seed = param.ok_or_else(|| {
            FlowError::Composition("zero-extractor flow exec() requires a seed record".to_string())
        })?;
        let mut stats = FlowStats::default();
        let walked = self.walk_from(0, seed, &mut stats).await;
        let result = match walked {
            Ok(WalkOutcome::Finished(r)) => {
                stats.status = Some(FlowStatus::Clean);
                self.flush_all(FlowStatus::Clean).await?;
                Ok(ExecOutcome::Value(r))
            }
            Ok(WalkOutcome::LocalContinue(r)) => {
                stats.status = Some(FlowStatus::Clean);
                self.flush_all(FlowStatus::Clean).await?;
                Ok(ExecOutcome::Value(r))
            }
            Ok(WalkOutcome::LocalBreak(r)) => {
                stats.status = Some(FlowStatus::Dirty);
                self.flush_all(FlowStatus::Dirty).await?;
                Ok(ExecOutcome::Value(r))
            }
            Ok(WalkOutcome::Bubble(i)) => {
                stats.status = Some(FlowStatus::Exception);
                let _ = self.flush_all(FlowStatus::Exception).await;
                Err(FlowError::UnknownTarget(i.target_node.unwrap_or_else(|| {
                    warn!(flow = %self.id, "untargeted directive escaped the outermost flow");
                    NodeId::next()
                })))
            }
            Err(e) => {
                stats.status = Some(FlowStatus::Exception);
                let _ = self.flush_all(FlowStatus::Exception).await;
                Err(e)
            }
        };
        self.last_stats = stats;
        result
    }

    async fn exec_extractor_driven(&mut self) -> FlowResult<ExecOutcome<R>> {
        let mut stats = FlowStats::default();
        let mut status = FlowStatus::Clean;
        let positions = self.extractor_positions.clone();

        'outer: for ext_idx in positions {
            loop {
                let has_more = match &mut self.nodes[ext_idx].kind {
                    NodeKind::Extractor(e) => e.extract().await,
                    _ => unreachable!("extractor_positions only indexes Extractor entries"),
                };
                let has_more = match has_more {
                    Ok(v) => v,
                    Err(e) => {
                        status = FlowStatus::Exception;
                        stats.status = Some(status);
                        let _ = self.flush_all(status).await;
                        self.last_stats = stats;
                        return Err(FlowError::Node(e));
                    }
                };
                if !has_more {
                    let finished = matches!(&self.nodes[ext_idx].kind, NodeKind::Extractor(e) if e.is_finished());
                    if finished {
                        break;
                    }
                    trace!(flow = %self.id, node = %self.nodes[ext_idx].id, "extractor idle, sleeping before retry");
                    tokio::time::sleep(self.config.idle_extractor_sleep()).await;
                    continue;
                }
                let batch = match &mut self.nodes[ext_idx].kind {
                    NodeKind::Extractor(e) => e.drain_batch(),
                    _ => unreachable!(),
                };
                for record in batch {
                    match self.walk_from(ext_idx + 1, record, &mut stats).await {
                        Ok(WalkOutcome::Finished(_) | WalkOutcome::LocalContinue(_)) => {}
                        Ok(WalkOutcome::LocalBreak(_)) => {
                            status = FlowStatus::Dirty;
                            break 'outer;
                        }
                        Ok(WalkOutcome::Bubble(i)) => {
                            status = FlowStatus::Exception;
                            stats.status = Some(status);
                            let _ = self.flush_all(status).await;
                            self.last_stats = stats;
                            return Err(FlowError::UnknownTarget(
                                i.target_node.unwrap_or(self.nodes[ext_idx].id),
                            ));
                        }
                        Err(e) => {
                            status = FlowStatus::Exception;
                            stats.status = Some(status);
                            let _ = self.flush_all(status).await;
                            self.last_stats = stats;
                            return Err(e);
                        }
                    }
                    if let Some(cb) = &self.callbacks.on_flow_progress {
                        if let Err(e) = cb(&stats) {
                            status = FlowStatus::Exception;
                            stats.status = Some(status);
                            let _ = self.flush_all(status).await;
                            self.last_stats = stats;
                            return Err(FlowError::Node(e));
                        }
                    }
                }
            }
        }

        if let Err(e) = self.finalize_aggregators(&mut stats, &mut status).await {
            stats.status = Some(FlowStatus::Exception);
            let _ = self.flush_all(FlowStatus::Exception).await;
            self.last_stats = stats;
            return Err(e);
        }

        stats.status = Some(status);
        self.flush_all(status).await?;
        self.last_stats = stats;
        debug!(flow = %self.id, %status, "flow run complete");
        Ok(ExecOutcome::Status(status))
    }

    async fn finalize_aggregators(
        &mut self,
        stats: &mut FlowStats,
        status: &mut FlowStatus,
    ) -> FlowResult<()> {
        let positions = self.aggregator_positions.clone();
        for pos in positions {
            let produced = match &mut self.nodes[pos].kind {
                NodeKind::Aggregator(a) => a.finalize().await.map_err(FlowError::Node)?,
                _ => unreachable!("aggregator_positions only indexes Aggregator entries"),
            };
            let Some(record) = produced else { continue };
            match self.walk_from(pos + 1, record, stats).await? {
                WalkOutcome::Finished(_) | WalkOutcome::LocalContinue(_) => {}
                WalkOutcome::LocalBreak(_) => *status = FlowStatus::Dirty,
                WalkOutcome::Bubble(i) => {
                    return Err(FlowError::UnknownTarget(
                        i.target_node.unwrap_or(self.nodes[pos].id),
                    ))
                }
            }
        }
        Ok(())
    }

    // ---- the inner walk -------------------------------------------------

    async fn walk_from(&mut self, start: usize, mut record: R, stats: &mut FlowStats) -> FlowResult<WalkOutcome<R>> {
        let len = self.nodes.len();
        let mut idx = start;
        while idx < len {
            let node_id = self.nodes[idx].id;
            match &mut self.nodes[idx].kind {
                NodeKind::Extractor(_) => {
                    // A from-chain extractor encountered mid-walk does not
                    // pull; it is only driven by the outer loop when it is
                    // the active root.
                }
                NodeKind::Transformer(t) => {
                    stats.record_seen(node_id);
                    let prev = record.clone();
                    match t.exec(record).await {
                        Ok(NodeSignal::Value(v)) => record = v,
                        Ok(NodeSignal::Void) => record = prev,
                        Ok(NodeSignal::Interrupt(i)) => return self.settle(i, prev, stats, node_id),
                        Err(e) => {
                            stats.record_error(node_id);
                            return Err(FlowError::Node(e));
                        }
                    }
                }
                NodeKind::Loader(l) => {
                    stats.record_seen(node_id);
                    let prev = record.clone();
                    match l.exec(record).await {
                        Ok(NodeSignal::Value(v)) => record = v,
                        Ok(NodeSignal::Void) => record = prev,
                        Ok(NodeSignal::Interrupt(i)) => return self.settle(i, prev, stats, node_id),
                        Err(e) => {
                            stats.record_error(node_id);
                            return Err(FlowError::Node(e));
                        }
                    }
                }
                NodeKind::Qualifier(q) => {
                    stats.record_seen(node_id);
                    match q.qualify(&record).await {
                        Ok(Qualification::Accept) => {}
                        Ok(Qualification::Reject) => {
                            return self.settle(Interrupter::continue_(), record, stats, node_id)
                        }
                        Ok(Qualification::Interrupt(i)) => return self.settle(i, record, stats, node_id),
                        Err(e) => {
                            stats.record_error(node_id);
                            return Err(FlowError::Node(e));
                        }
                    }
                }
                NodeKind::Join(j) => {
                    stats.record_seen(node_id);
                    let prev = record.clone();
                    match j.apply(record).await {
                        Ok(NodeSignal::Value(v)) => record = v,
                        Ok(NodeSignal::Void) => record = prev,
                        Ok(NodeSignal::Interrupt(i)) => return self.settle(i, prev, stats, node_id),
                        Err(e) => {
                            stats.record_error(node_id);
                            return Err(FlowError::Node(e));
                        }
                    }
                }
                NodeKind::Aggregator(a) => {
                    stats.record_seen(node_id);
                    let prev = record.clone();
                    match a.exec(record).await {
                        Ok(NodeSignal::Value(v)) => record = v,
                        Ok(NodeSignal::Void) => record = prev,
                        Ok(NodeSignal::Interrupt(i)) => return self.settle(i, prev, stats, node_id),
                        Err(e) => {
                            stats.record_error(node_id);
                            return Err(FlowError::Node(e));
                        }
                    }
                }
                NodeKind::Branch(sub, force_flush) => {
                    stats.record_seen(node_id);
                    let force_flush = *force_flush;
                    let branch_result = sub.run_as_branch(record.clone()).await;
                    let outcome = match branch_result {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            if force_flush {
                                let _ = sub.flush_all(FlowStatus::Exception).await;
                            }
                            return Err(e);
                        }
                    };
                    match outcome {
                        BranchOutcome::Value(v) => {
                            record = v;
                            if force_flush {
                                sub.flush_all(FlowStatus::Clean).await?;
                            }
                        }
                        BranchOutcome::Void => {
                            if force_flush {
                                let status = sub
                                    .last_stats
                                    .status
                                    .unwrap_or(FlowStatus::Clean);
                                sub.flush_all(status).await?;
                            }
                        }
                        BranchOutcome::Bubble(i) => return self.settle(i, record, stats, node_id),
                    }
                }
            }
            idx += 1;
        }
        Ok(WalkOutcome::Finished(record))
    }

    /// Run this flow as a branch: a single seeded walk with no outer
    /// extractor loop. A `continue`/`break` directive that settles as
    /// confined to this flow (i.e., not targeting an ancestor) produces no
    /// value for the parent: it is treated as an implicit successful return
    /// from the branch with no effect on the parent.
    async fn run_as_branch(&mut self, seed: R) -> FlowResult<BranchOutcome<R>> {
        if self.running {
            return Err(FlowError::Reentrant);
        }
        self.running = true;
        let mut stats = FlowStats::default();
        let walked = self.walk_from(0, seed, &mut stats).await;
        let outcome = match walked {
            Ok(WalkOutcome::Finished(r)) => {
                stats.status = Some(FlowStatus::Clean);
                Ok(BranchOutcome::Value(r))
            }
            Ok(WalkOutcome::LocalContinue(_)) => {
                stats.status = Some(FlowStatus::Clean);
                Ok(BranchOutcome::Void)
            }
            Ok(WalkOutcome::LocalBreak(_)) => {
                stats.status = Some(FlowStatus::Dirty);
                Ok(BranchOutcome::Void)
            }
            Ok(WalkOutcome::Bubble(i)) => Ok(BranchOutcome::Bubble(i)),
            Err(e) => {
                stats.status = Some(FlowStatus::Exception);
                Err(e)
            }
        };
        self.last_stats = stats;
        self.running = false;
        outcome
    }

    /// Decide whether an interrupter raised (or bubbled up from a branch)
    /// settles as confined to this flow, or must keep propagating to
    /// whichever flow invoked this one.
    fn settle(&self, i: Interrupter, record: R, stats: &mut FlowStats, node_id: NodeId) -> FlowResult<WalkOutcome<R>> {
        if self.targets_elsewhere(&i) {
            return Ok(WalkOutcome::Bubble(i));
        }
        match i.kind {
            InterruptKind::Continue => {
                stats.record_continue(node_id);
                Ok(WalkOutcome::LocalContinue(record))
            }
            InterruptKind::Break => {
                stats.record_break(node_id);
                Ok(WalkOutcome::LocalBreak(record))
            }
        }
    }

    /// `true` iff the directive names a target (node or flow) this flow
    /// does not own, and so must keep bubbling to an ancestor.
    fn targets_elsewhere(&self, i: &Interrupter) -> bool {
        if let Some(tf) = i.target_flow {
            return tf != self.id;
        }
        match i.target_node {
            Some(nid) => !self.nodes.iter().any(|e| e.id == nid),
            None => false,
        }
    }

    /// Final flush: every loader's `flush(Some(status))`, in composition
    /// order, recursing into branch sub-flows unless they are marked
    /// `force_flush` (those already flush at the end of each of their own
    /// invocations, so a second call here would double-flush them).
    async fn flush_all(&mut self, status: FlowStatus) -> FlowResult<()> {
        for entry in &mut self.nodes {
            match &mut entry.kind {
                NodeKind::Loader(l) => l.flush(Some(status)).await.map_err(FlowError::Node)?,
                NodeKind::Branch(sub, force_flush) if !*force_flush => {
                    Box::pin(sub.flush_all(status)).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
