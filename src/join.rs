//! The join operator: enriching an upstream record with fields from a
//! secondary extractor keyed by a field value.
//!
//! A joinable extractor maintains a map from join-key to fetched record for
//! its current batch, rebuilt whenever the batch advances. From the
//! engine's perspective this is opaque: it only calls `lookup`, which is
//! free to trigger a fetch-and-reindex when the current map can't answer
//! the key.

use async_trait::async_trait;
use std::hash::Hash;

use crate::interrupter::{Interrupter, NodeSignal};

/// A secondary extractor queried by join key rather than pulled in batches
/// by the outer loop.
///
/// Composite extraction keys are permitted internally (the extractor may
/// fetch its batch filtered on several columns) but the lookup key `K` used
/// here must be a single value, unique within the current batch.
#[async_trait]
pub trait JoinableExtractor<R, K>: Send + Sync
where
    K: Eq + Hash + Clone + Send + Sync,
{
    /// Look up `key`. If the current batch's index is empty or does not
    /// contain `key`, the implementation should fetch and index the next
    /// batch before answering (filtered or widened however it sees fit) and
    /// only return `Ok(None)` once it believes no further batch could
    /// contain the key.
    async fn lookup(&mut self, key: &K) -> anyhow::Result<Option<R>>;
}

/// The `onClose` configuration for a join: how to read the join key out of
/// the upstream record, how to merge a hit, and an optional default record
/// that turns the join into a left join.
pub struct OnClose<R> {
    pub merge: Box<dyn Fn(&R, &R) -> R + Send + Sync>,
    pub default: Option<R>,
}

impl<R> OnClose<R> {
    pub fn inner(merge: impl Fn(&R, &R) -> R + Send + Sync + 'static) -> Self {
        Self {
            merge: Box::new(merge),
            default: None,
        }
    }

    pub fn left(merge: impl Fn(&R, &R) -> R + Send + Sync + 'static, default: R) -> Self {
        Self {
            merge: Box::new(merge),
            default: Some(default),
        }
    }
}

/// Type-erased join-node contract, used so a `Flow` can hold joins keyed on
/// different `K` types in one node list.
#[async_trait]
pub(crate) trait JoinNode<R>: Send + Sync {
    async fn apply(&mut self, record: R) -> anyhow::Result<NodeSignal<R>>;
}

pub(crate) struct Join<R, K, E, F>
where
    E: JoinableExtractor<R, K>,
    F: Fn(&R) -> Option<K> + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
{
    extractor: E,
    from_key: F,
    on_close: OnClose<R>,
    _marker: std::marker::PhantomData<K>,
}

impl<R, K, E, F> Join<R, K, E, F>
where
    E: JoinableExtractor<R, K>,
    F: Fn(&R) -> Option<K> + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
{
    pub(crate) fn new(extractor: E, from_key: F, on_close: OnClose<R>) -> Self {
        Self {
            extractor,
            from_key,
            on_close,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R, K, E, F> JoinNode<R> for Join<R, K, E, F>
where
    R: Send + Sync + 'static,
    E: JoinableExtractor<R, K>,
    F: Fn(&R) -> Option<K> + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
{
    async fn apply(&mut self, record: R) -> anyhow::Result<NodeSignal<R>> {
        let Some(key) = (self.from_key)(&record) else {
            // No key on the upstream record: treat as a miss.
            return Ok(self.miss(&record));
        };

        match self.extractor.lookup(&key).await? {
            Some(joined) => {
                let merged = (self.on_close.merge)(&record, &joined);
                Ok(NodeSignal::Value(merged))
            }
            None => Ok(self.miss(&record)),
        }
    }
}

impl<R, K, E, F> Join<R, K, E, F>
where
    E: JoinableExtractor<R, K>,
    F: Fn(&R) -> Option<K> + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
{
    fn miss(&self, record: &R) -> NodeSignal<R> {
        match &self.on_close.default {
            Some(default) => NodeSignal::Value((self.on_close.merge)(record, default)),
            None => NodeSignal::Interrupt(Interrupter::continue_()),
        }
    }
}

/// A trivial in-memory joinable extractor: wraps a pre-fetched `HashMap`. It
/// never needs to fetch further batches, so `lookup` is a pure map read.
/// Useful for tests and for small reference tables that fit in memory.
pub struct MapJoinExtractor<R, K> {
    index: std::collections::HashMap<K, R>,
}

impl<R, K> MapJoinExtractor<R, K>
where
    K: Eq + Hash,
{
    pub fn new(index: std::collections::HashMap<K, R>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl<R, K> JoinableExtractor<R, K> for MapJoinExtractor<R, K>
where
    R: Clone + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync,
{
    async fn lookup(&mut self, key: &K) -> anyhow::Result<Option<R>> {
        Ok(self.index.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{record_map, Record};

    fn merge(upstream: &Record, joined: &Record) -> Record {
        Record::shallow_merge(upstream, joined)
    }

    #[tokio::test]
    async fn inner_join_drops_misses() {
        let mut index = std::collections::HashMap::new();
        index.insert(1i64, record_map([("b", 100.into())]));
        index.insert(3i64, record_map([("b", 300.into())]));

        let mut join: Join<Record, i64, _, _> = Join::new(
            MapJoinExtractor::new(index),
            |r: &Record| r.get("id").and_then(Record::as_i64),
            OnClose::inner(merge),
        );

        let hit = join
            .apply(record_map([("id", 1.into()), ("a", 10.into())]))
            .await
            .unwrap();
        assert!(matches!(hit, NodeSignal::Value(r) if r.get("b") == Some(&Record::Int(100))));

        let miss = join
            .apply(record_map([("id", 2.into()), ("a", 20.into())]))
            .await
            .unwrap();
        assert!(matches!(
            miss,
            NodeSignal::Interrupt(i) if !i.is_break() && i.target_node.is_none()
        ));
    }

    #[tokio::test]
    async fn left_join_merges_default_on_miss() {
        let mut index = std::collections::HashMap::new();
        index.insert(1i64, record_map([("b", 100.into())]));

        let mut join: Join<Record, i64, _, _> = Join::new(
            MapJoinExtractor::new(index),
            |r: &Record| r.get("id").and_then(Record::as_i64),
            OnClose::left(merge, record_map([("b", Record::Null)])),
        );

        let miss = join
            .apply(record_map([("id", 2.into()), ("a", 20.into())]))
            .await
            .unwrap();
        match miss {
            NodeSignal::Value(r) => assert_eq!(r.get("b"), Some(&Record::Null)),
            _ => panic!("expected a merged default record"),
        }
    }
}
