//! Minimal, illustrative node implementations: an in-memory batched
//! extractor, an in-memory appending loader, and closure-backed
//! transformer/qualifier wrappers.
//!
//! These exist only to make the engine testable and demonstrable without
//! pulling in a concrete CSV/line/database collaborator: cycle through
//! predefined in-memory data, no real I/O.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::interrupter::NodeSignal;
use crate::node::{Extractor, Loader, Qualification, Qualifier, Transformer};
use crate::status::FlowStatus;

/// A batched extractor over a fixed in-memory `Vec<R>`. Each `extract()`
/// call pulls up to `batch_size` records; `is_finished()` reports `true`
/// once the vector is exhausted, matching a bounded source.
pub struct VecExtractor<R> {
    remaining: std::vec::IntoIter<R>,
    batch_size: usize,
    pending: Vec<R>,
}

impl<R> VecExtractor<R> {
    pub fn new(records: Vec<R>, batch_size: usize) -> Self {
        Self {
            remaining: records.into_iter(),
            batch_size: batch_size.max(1),
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl<R: Send + Sync> Extractor<R> for VecExtractor<R> {
    async fn extract(&mut self) -> anyhow::Result<bool> {
        self.pending.clear();
        for _ in 0..self.batch_size {
            match self.remaining.next() {
                Some(r) => self.pending.push(r),
                None => break,
            }
        }
        Ok(!self.pending.is_empty())
    }

    fn drain_batch(&mut self) -> Vec<R> {
        std::mem::take(&mut self.pending)
    }

    fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.remaining.len() == 0
    }
}

/// A loader that appends every record it sees to a shared, clonable
/// `Vec<R>`, useful for asserting what a flow produced in tests. Flush is a
/// no-op: there is no internal buffer to drain.
pub struct VecLoader<R> {
    sink: Arc<Mutex<Vec<R>>>,
    flush_count: Arc<Mutex<u32>>,
}

impl<R> VecLoader<R> {
    pub fn new(sink: Arc<Mutex<Vec<R>>>) -> Self {
        Self {
            sink,
            flush_count: Arc::new(Mutex::new(0)),
        }
    }

    /// How many times `flush` has been called on this loader so far.
    pub fn flush_count(&self) -> u32 {
        *self.flush_count.lock().expect("flush_count mutex poisoned")
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Loader<R> for VecLoader<R> {
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>> {
        self.sink.lock().expect("sink mutex poisoned").push(record);
        Ok(NodeSignal::Void)
    }

    async fn flush(&mut self, _status: Option<FlowStatus>) -> anyhow::Result<()> {
        *self.flush_count.lock().expect("flush_count mutex poisoned") += 1;
        Ok(())
    }
}

/// A loader that buffers records and flushes them to a shared `Vec<R>` in
/// bulk once `threshold` records have accumulated, or when the engine calls
/// the final `flush`. Demonstrates a loader that self-flushes mid-run once a
/// batch-insert threshold is reached.
pub struct BufferingLoader<R> {
    sink: Arc<Mutex<Vec<R>>>,
    buffer: Vec<R>,
    threshold: usize,
}

impl<R> BufferingLoader<R> {
    pub fn new(sink: Arc<Mutex<Vec<R>>>, threshold: usize) -> Self {
        Self {
            sink,
            buffer: Vec::new(),
            threshold: threshold.max(1),
        }
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Loader<R> for BufferingLoader<R> {
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.threshold {
            self.flush(None).await?;
        }
        Ok(NodeSignal::Void)
    }

    async fn flush(&mut self, status: Option<FlowStatus>) -> anyhow::Result<()> {
        if status == Some(FlowStatus::Exception) {
            self.buffer.clear();
            return Ok(());
        }
        let mut sink = self.sink.lock().expect("sink mutex poisoned");
        sink.append(&mut self.buffer);
        Ok(())
    }
}

/// Wraps a plain closure as a [`Transformer`].
pub struct FnTransformer<R, F> {
    f: F,
    _marker: std::marker::PhantomData<R>,
}

impl<R, F> FnTransformer<R, F>
where
    F: Fn(R) -> R + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R, F> Transformer<R> for FnTransformer<R, F>
where
    R: Send + Sync + 'static,
    F: Fn(R) -> R + Send + Sync,
{
    async fn exec(&mut self, record: R) -> anyhow::Result<NodeSignal<R>> {
        Ok(NodeSignal::Value((self.f)(record)))
    }
}

/// Wraps a plain closure as a [`Qualifier`]. The closure returns `true` to
/// accept the record, `false` to reject it.
pub struct FnQualifier<R, F> {
    f: F,
    _marker: std::marker::PhantomData<R>,
}

impl<R, F> FnQualifier<R, F>
where
    F: Fn(&R) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R, F> Qualifier<R> for FnQualifier<R, F>
where
    R: Send + Sync + 'static,
    F: Fn(&R) -> bool + Send + Sync,
{
    async fn qualify(&mut self, record: &R) -> anyhow::Result<Qualification> {
        if (self.f)(record) {
            Ok(Qualification::Accept)
        } else {
            Ok(Qualification::Reject)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vec_extractor_batches_then_finishes() {
        let mut ext = VecExtractor::new(vec![1, 2, 3, 4, 5], 2);
        assert!(ext.extract().await.unwrap());
        assert_eq!(ext.drain_batch(), vec![1, 2]);
        assert!(!ext.is_finished());

        assert!(ext.extract().await.unwrap());
        assert_eq!(ext.drain_batch(), vec![3, 4]);

        assert!(ext.extract().await.unwrap());
        assert_eq!(ext.drain_batch(), vec![5]);
        assert!(ext.is_finished());

        assert!(!ext.extract().await.unwrap());
    }

    #[tokio::test]
    async fn vec_loader_tracks_flush_count() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut loader = VecLoader::new(sink.clone());
        loader.exec(1).await.unwrap();
        loader.exec(2).await.unwrap();
        loader.flush(Some(FlowStatus::Clean)).await.unwrap();
        assert_eq!(*sink.lock().unwrap(), vec![1, 2]);
        assert_eq!(loader.flush_count(), 1);
    }

    #[tokio::test]
    async fn buffering_loader_self_flushes_at_threshold() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut loader = BufferingLoader::new(sink.clone(), 2);
        loader.exec(1).await.unwrap();
        assert!(sink.lock().unwrap().is_empty());
        loader.exec(2).await.unwrap();
        assert_eq!(*sink.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn buffering_loader_discards_on_exception() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut loader = BufferingLoader::new(sink.clone(), 10);
        loader.exec(1).await.unwrap();
        loader.flush(Some(FlowStatus::Exception)).await.unwrap();
        assert!(sink.lock().unwrap().is_empty());
    }
}
