//! flowline - a general-purpose extract-transform-load flow execution engine.
//!
//! A `Flow` is an ordered list of nodes records are pushed through one at a
//! time: extractors pull batches, transformers reshape, qualifiers filter,
//! joins enrich against a secondary extractor, loaders accumulate and
//! commit, and a `Flow` itself can be embedded as a branch node inside
//! another `Flow`. See [`flow::Flow`] for the driver and
//! [`interrupter::Interrupter`] for the continue/break control protocol
//! nodes use to steer traversal.
//!
//! The engine is single-threaded and cooperative: node trait methods are
//! `async fn` so I/O-bound extractors/loaders can await without blocking a
//! thread, but the engine performs no concurrent dispatch of its own - one
//! node's method always runs to completion before the next begins.

pub mod config;
pub mod error;
pub mod flow;
pub mod interrupter;
pub mod join;
pub mod node;
pub mod nodes;
pub mod record;
pub mod stats;
pub mod status;

pub use config::FlowConfig;
pub use error::{FlowError, FlowResult};
pub use flow::{ExecOutcome, Flow};
pub use interrupter::{FlowId, InterruptKind, Interrupter, NodeId, NodeSignal};
pub use join::{JoinableExtractor, MapJoinExtractor, OnClose};
pub use node::{Aggregator, Extractor, Loader, Qualification, Qualifier, Transformer};
pub use record::Record;
pub use stats::{Callbacks, FlowStats, NodeStats};
pub use status::FlowStatus;

#[cfg(test)]
mod tests {
    //! End-to-end scenarios exercised against the public API rather than
    //! internals.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::join::OnClose;
    use crate::node::{Loader, Qualification};
    use crate::nodes::{FnQualifier, FnTransformer, VecExtractor, VecLoader};
    use crate::record::{record_map, Record};
    use crate::status::FlowStatus;
    use crate::{ExecOutcome, Flow, Interrupter, NodeSignal};
    use async_trait::async_trait;

    #[tokio::test]
    async fn identity_flow_doubles_and_loads_in_order() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut flow: Flow<i64> = Flow::new();
        flow.from(VecExtractor::new(vec![1, 2, 3], 10), None).unwrap();
        flow.transform(FnTransformer::new(|x: i64| x * 2)).unwrap();
        let loader = VecLoader::new(sink.clone());
        flow.to(loader).unwrap();

        let outcome = flow.exec(None).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Status(FlowStatus::Clean)));
        assert_eq!(*sink.lock().unwrap(), vec![2, 4, 6]);
    }

    fn id_key(r: &Record) -> Option<i64> {
        r.get("id").and_then(Record::as_i64)
    }

    fn merge(upstream: &Record, joined: &Record) -> Record {
        Record::shallow_merge(upstream, joined)
    }

    #[tokio::test]
    async fn inner_join_drops_non_matching_records() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut flow: Flow<Record> = Flow::new();
        let ext_id = flow
            .from(
                VecExtractor::new(
                    vec![
                        record_map([("id", 1.into()), ("a", 10.into())]),
                        record_map([("id", 2.into()), ("a", 20.into())]),
                        record_map([("id", 3.into()), ("a", 30.into())]),
                    ],
                    10,
                ),
                None,
            )
            .unwrap();

        let mut index = HashMap::new();
        index.insert(1i64, record_map([("b", 100.into())]));
        index.insert(3i64, record_map([("b", 300.into())]));
        flow.join(
            crate::join::MapJoinExtractor::new(index),
            ext_id,
            id_key,
            OnClose::inner(merge),
        )
        .unwrap();
        flow.to(VecLoader::new(sink.clone())).unwrap();

        let outcome = flow.exec(None).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Status(FlowStatus::Clean)));
        let got = sink.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].get("id"), Some(&Record::Int(1)));
        assert_eq!(got[0].get("b"), Some(&Record::Int(100)));
        assert_eq!(got[1].get("id"), Some(&Record::Int(3)));
    }

    #[tokio::test]
    async fn left_join_merges_default_on_miss() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut flow: Flow<Record> = Flow::new();
        let ext_id = flow
            .from(
                VecExtractor::new(
                    vec![
                        record_map([("id", 1.into()), ("a", 10.into())]),
                        record_map([("id", 2.into()), ("a", 20.into())]),
                        record_map([("id", 3.into()), ("a", 30.into())]),
                    ],
                    10,
                ),
                None,
            )
            .unwrap();

        let mut index = HashMap::new();
        index.insert(1i64, record_map([("b", 100.into())]));
        index.insert(3i64, record_map([("b", 300.into())]));
        flow.join(
            crate::join::MapJoinExtractor::new(index),
            ext_id,
            id_key,
            OnClose::left(merge, record_map([("b", Record::Null)])),
        )
        .unwrap();
        flow.to(VecLoader::new(sink.clone())).unwrap();

        flow.exec(None).await.unwrap();
        let got = sink.lock().unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[1].get("id"), Some(&Record::Int(2)));
        assert_eq!(got[1].get("b"), Some(&Record::Null));
    }

    #[tokio::test]
    async fn qualified_branch_filters_independently_of_main_loader() {
        let main_sink = Arc::new(Mutex::new(Vec::new()));
        let branch_sink = Arc::new(Mutex::new(Vec::new()));

        let mut branch: Flow<Record> = Flow::new();
        branch
            .qualify(FnQualifier::new(|r: &Record| {
                r.get("lvl").and_then(Record::as_i64).unwrap_or(0) > 9
            }))
            .unwrap();
        let branch_loader = VecLoader::new(branch_sink.clone());
        branch.to(branch_loader).unwrap();

        let mut main: Flow<Record> = Flow::new();
        main.from(
            VecExtractor::new(
                vec![
                    record_map([("lvl", 3.into())]),
                    record_map([("lvl", 10.into())]),
                    record_map([("lvl", 7.into())]),
                    record_map([("lvl", 12.into())]),
                ],
                10,
            ),
            None,
        )
        .unwrap();
        main.branch(branch, false).unwrap();
        main.to(VecLoader::new(main_sink.clone())).unwrap();

        let outcome = main.exec(None).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Status(FlowStatus::Clean)));
        assert_eq!(main_sink.lock().unwrap().len(), 4);
        let branched = branch_sink.lock().unwrap();
        assert_eq!(branched.len(), 2);
        assert_eq!(branched[0].get("lvl"), Some(&Record::Int(10)));
        assert_eq!(branched[1].get("lvl"), Some(&Record::Int(12)));
    }

    /// A loader that breaks, targeting an ancestor node id, on a chosen
    /// record value.
    struct BreakingLoader {
        target: crate::NodeId,
        break_on: i64,
    }

    #[async_trait]
    impl Loader<Record> for BreakingLoader {
        async fn exec(&mut self, record: Record) -> anyhow::Result<NodeSignal<Record>> {
            if record.get("lvl").and_then(Record::as_i64) == Some(self.break_on) {
                return Ok(NodeSignal::Interrupt(Interrupter::break_to(self.target, None)));
            }
            Ok(NodeSignal::Void)
        }

        async fn flush(&mut self, _status: Option<FlowStatus>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn break_with_target_in_ancestor_terminates_that_ancestor() {
        struct LoggingLoader(Arc<Mutex<Vec<FlowStatus>>>);
        #[async_trait]
        impl Loader<Record> for LoggingLoader {
            async fn exec(&mut self, record: Record) -> anyhow::Result<NodeSignal<Record>> {
                Ok(NodeSignal::Value(record))
            }
            async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
                self.0.lock().unwrap().push(status.unwrap());
                Ok(())
            }
        }

        let flush_log = Arc::new(Mutex::new(Vec::new()));

        let mut a: Flow<Record> = Flow::new();
        a.from(
            VecExtractor::new(
                vec![record_map([("lvl", 1.into())]), record_map([("lvl", 2.into())])],
                10,
            ),
            None,
        )
        .unwrap();
        let t1 = a.transform(FnTransformer::new(|r: Record| r)).unwrap();

        let mut b: Flow<Record> = Flow::new();
        b.to(BreakingLoader { target: t1, break_on: 1 }).unwrap();

        a.branch(b, false).unwrap();
        a.to(LoggingLoader(flush_log.clone())).unwrap();

        let outcome = a.exec(None).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Status(FlowStatus::Dirty)));
        assert_eq!(*flush_log.lock().unwrap(), vec![FlowStatus::Dirty]);
    }

    #[tokio::test]
    async fn flush_on_exception_reaches_every_reached_loader() {
        struct FailingLoader;
        #[async_trait]
        impl Loader<i64> for FailingLoader {
            async fn exec(&mut self, record: i64) -> anyhow::Result<NodeSignal<i64>> {
                if record == 3 {
                    anyhow::bail!("boom at record 3");
                }
                Ok(NodeSignal::Void)
            }
            async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
                assert_eq!(status, Some(FlowStatus::Exception));
                Ok(())
            }
        }

        struct TrackedLoader(Arc<Mutex<Vec<FlowStatus>>>, Arc<Mutex<Vec<i64>>>);
        #[async_trait]
        impl Loader<i64> for TrackedLoader {
            async fn exec(&mut self, record: i64) -> anyhow::Result<NodeSignal<i64>> {
                self.1.lock().unwrap().push(record);
                Ok(NodeSignal::Void)
            }
            async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
                self.0.lock().unwrap().push(status.unwrap());
                Ok(())
            }
        }

        let flush_log = Arc::new(Mutex::new(Vec::new()));
        let l1_seen = Arc::new(Mutex::new(Vec::new()));
        let mut flow: Flow<i64> = Flow::new();
        flow.from(VecExtractor::new(vec![1, 2, 3, 4], 10), None).unwrap();
        flow.to(TrackedLoader(flush_log.clone(), l1_seen.clone())).unwrap();
        flow.to(FailingLoader).unwrap();

        let err = flow.exec(None).await.unwrap_err();
        assert!(matches!(err, crate::FlowError::Node(_)));
        assert_eq!(*l1_seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*flush_log.lock().unwrap(), vec![FlowStatus::Exception]);
    }

    #[tokio::test]
    async fn reject_qualifier_drops_record_in_carrier_flow_only() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut flow: Flow<i64> = Flow::new();
        flow.from(VecExtractor::new(vec![1, 2, 3, 4], 10), None).unwrap();
        flow.qualify(FnQualifier::new(|x: &i64| x % 2 == 0)).unwrap();
        flow.to(VecLoader::new(sink.clone())).unwrap();

        flow.exec(None).await.unwrap();
        assert_eq!(*sink.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn flow_is_reentrant_safe_across_sequential_runs() {
        let mut flow: Flow<i64> = Flow::new();
        flow.from(VecExtractor::new(vec![1], 10), None).unwrap();
        flow.to(VecLoader::new(Arc::new(Mutex::new(Vec::new())))).unwrap();
        flow.exec(None).await.unwrap();
        flow.exec(None).await.unwrap();
    }

    #[test]
    fn qualifier_reject_is_not_accept() {
        assert!(matches!(Qualification::Reject, Qualification::Reject));
    }

    /// A loader that records every `flush` call it receives and fails
    /// `exec` on one chosen record value.
    struct RecordingLoader {
        sink: Arc<Mutex<Vec<i64>>>,
        flushes: Arc<Mutex<Vec<Option<FlowStatus>>>>,
        fail_on: i64,
    }

    #[async_trait]
    impl Loader<i64> for RecordingLoader {
        async fn exec(&mut self, record: i64) -> anyhow::Result<NodeSignal<i64>> {
            if record == self.fail_on {
                anyhow::bail!("branch loader failed on {record}");
            }
            self.sink.lock().unwrap().push(record);
            Ok(NodeSignal::Void)
        }

        async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
            self.flushes.lock().unwrap().push(status);
            Ok(())
        }
    }

    #[tokio::test]
    async fn force_flush_branch_flushes_once_per_upstream_record() {
        let branch_sink = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(Mutex::new(Vec::new()));

        let mut branch: Flow<i64> = Flow::new();
        branch
            .to(RecordingLoader {
                sink: branch_sink.clone(),
                flushes: flushes.clone(),
                fail_on: i64::MIN,
            })
            .unwrap();

        let mut main: Flow<i64> = Flow::new();
        main.from(VecExtractor::new(vec![1, 2, 3], 10), None).unwrap();
        main.branch(branch, true).unwrap();

        let outcome = main.exec(None).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Status(FlowStatus::Clean)));
        assert_eq!(*branch_sink.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            *flushes.lock().unwrap(),
            vec![Some(FlowStatus::Clean), Some(FlowStatus::Clean), Some(FlowStatus::Clean)]
        );
    }

    #[tokio::test]
    async fn force_flush_branch_still_flushes_when_an_invocation_errors() {
        let branch_sink = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(Mutex::new(Vec::new()));

        let mut branch: Flow<i64> = Flow::new();
        branch
            .to(RecordingLoader {
                sink: branch_sink.clone(),
                flushes: flushes.clone(),
                fail_on: 2,
            })
            .unwrap();

        let mut main: Flow<i64> = Flow::new();
        main.from(VecExtractor::new(vec![1, 2, 3], 10), None).unwrap();
        main.branch(branch, true).unwrap();

        let err = main.exec(None).await.unwrap_err();
        assert!(matches!(err, crate::FlowError::Node(_)));
        // Record 1 ran the branch to completion normally (flush Clean); record
        // 2's branch invocation raised, and its loader's flush must still be
        // called, with the exception status, by the branch itself - nothing
        // else will ever call it once the error has propagated past this
        // point.
        assert_eq!(*branch_sink.lock().unwrap(), vec![1]);
        assert_eq!(
            *flushes.lock().unwrap(),
            vec![Some(FlowStatus::Clean), Some(FlowStatus::Exception)]
        );
    }

    #[tokio::test]
    async fn failing_on_flow_progress_callback_aborts_the_run_as_a_node_error() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let flush_log = Arc::new(Mutex::new(Vec::new()));

        struct LoggingLoader(Arc<Mutex<Vec<FlowStatus>>>);
        #[async_trait]
        impl Loader<i64> for LoggingLoader {
            async fn exec(&mut self, record: i64) -> anyhow::Result<NodeSignal<i64>> {
                Ok(NodeSignal::Value(record))
            }
            async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
                self.0.lock().unwrap().push(status.unwrap());
                Ok(())
            }
        }

        let mut flow: Flow<i64> = Flow::new();
        flow.from(VecExtractor::new(vec![1, 2, 3], 10), None).unwrap();
        flow.to(VecLoader::new(sink.clone())).unwrap();
        flow.to(LoggingLoader(flush_log.clone())).unwrap();
        flow.on_flow_progress(|_stats| anyhow::bail!("progress callback refused to continue"));

        let err = flow.exec(None).await.unwrap_err();
        assert!(matches!(err, crate::FlowError::Node(_)));
        assert_eq!(*sink.lock().unwrap(), vec![1]);
        assert_eq!(*flush_log.lock().unwrap(), vec![FlowStatus::Exception]);
    }
}
