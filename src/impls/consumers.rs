//! Concrete consumer implementations.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::error::{Error, Result};
use crate::traits::Consumer;

/// How a consumer's input ended, as far as it was told.
#[derive(Debug, Clone, Default)]
pub enum Termination {
    /// Still open
    #[default]
    Open,
    /// Upstream finished normally
    Finished,
    /// Upstream failed with this error
    Aborted(Error),
}

struct Collected<T> {
    items: Vec<T>,
    termination: Termination,
    finish_calls: usize,
    abort_calls: usize,
}

/// A consumer that collects items into a vector.
///
/// Clones share the same storage, so a test keeps one handle and hands the
/// other to a pipe. Writes after `finish` or `abort` are rejected.
pub struct CollectConsumer<T> {
    state: Arc<TokioMutex<Collected<T>>>,
    limit: Option<usize>,
}

impl<T: Send + 'static> CollectConsumer<T> {
    /// Create a new collect consumer
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokioMutex::new(Collected {
                items: Vec::new(),
                termination: Termination::Open,
                finish_calls: 0,
                abort_calls: 0,
            })),
            limit: None,
        }
    }

    /// Reject every write once `limit` items are stored, as a saturated sink would
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Get a snapshot of the collected items
    pub async fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.state.lock().await.items.clone()
    }

    /// How the input ended
    pub async fn termination(&self) -> Termination {
        self.state.lock().await.termination.clone()
    }

    /// Total number of `finish` and `abort` calls received
    pub async fn terminal_calls(&self) -> usize {
        let state = self.state.lock().await;
        state.finish_calls + state.abort_calls
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer for CollectConsumer<T> {
    type Item = T;

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        let mut state = self.state.lock().await;
        if !matches!(state.termination, Termination::Open) {
            return Err(Error::sink_rejection("write after close"));
        }
        if let Some(limit) = self.limit {
            if state.items.len() >= limit {
                return Err(Error::sink_rejection(format!(
                    "capacity of {} items exceeded",
                    limit
                )));
            }
        }
        state.items.push(item);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.finish_calls += 1;
        if matches!(state.termination, Termination::Open) {
            state.termination = Termination::Finished;
        }
        Ok(())
    }

    async fn abort(&mut self, error: Error) -> Result<()> {
        let mut state = self.state.lock().await;
        state.abort_calls += 1;
        if matches!(state.termination, Termination::Open) {
            state.termination = Termination::Aborted(error);
        }
        Ok(())
    }
}

impl<T: Send + 'static> Default for CollectConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            limit: self.limit,
        }
    }
}

/// A consumer that counts items
pub struct CountConsumer<T> {
    count: Arc<TokioMutex<usize>>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> CountConsumer<T> {
    /// Create a new count consumer
    pub fn new() -> Self {
        Self {
            count: Arc::new(TokioMutex::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Get the current count
    pub async fn count(&self) -> usize {
        *self.count.lock().await
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer for CountConsumer<T> {
    type Item = T;

    async fn consume(&mut self, _item: Self::Item) -> Result<()> {
        let mut count = self.count.lock().await;
        *count += 1;
        Ok(())
    }
}

impl<T> Default for CountConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count.clone(),
            _phantom: PhantomData,
        }
    }
}

/// Helper function to create a simple consumer from a function
pub fn consumer_from_fn<F, Fut, T>(f: F) -> FnConsumer<F, T>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    FnConsumer {
        f,
        closed: false,
        _phantom: PhantomData,
    }
}

/// A consumer created from a function
pub struct FnConsumer<F, T> {
    f: F,
    closed: bool,
    _phantom: PhantomData<fn(T)>,
}

#[async_trait]
impl<F, Fut, T> Consumer for FnConsumer<F, T>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        if self.closed {
            return Err(Error::sink_rejection("write after close"));
        }
        (self.f)(item).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    async fn abort(&mut self, _error: Error) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_rejects_writes_after_finish() {
        let mut sink = CollectConsumer::new();
        sink.consume(1).await.unwrap();
        sink.finish().await.unwrap();

        let err = sink.consume(2).await.unwrap_err();
        assert!(err.is_sink_rejection());
        assert_eq!(sink.items().await, vec![1]);
        assert!(matches!(sink.termination().await, Termination::Finished));
    }

    #[tokio::test]
    async fn collect_limit_simulates_saturation() {
        let mut sink = CollectConsumer::with_limit(2);
        sink.consume("a").await.unwrap();
        sink.consume("b").await.unwrap();
        assert!(sink.consume("c").await.unwrap_err().is_sink_rejection());
    }

    #[tokio::test]
    async fn first_terminal_signal_sticks() {
        let mut sink = CollectConsumer::<u8>::new();
        sink.abort(Error::custom("boom")).await.unwrap();
        sink.finish().await.unwrap();
        assert!(matches!(sink.termination().await, Termination::Aborted(_)));
        assert_eq!(sink.terminal_calls().await, 2);
    }

    #[tokio::test]
    async fn fn_consumer_closes() {
        let seen = Arc::new(TokioMutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let mut sink = consumer_from_fn(move |x: u32| {
            let seen = sink_seen.clone();
            async move {
                seen.lock().await.push(x);
                Ok(())
            }
        });
        sink.consume(7).await.unwrap();
        sink.finish().await.unwrap();
        assert!(sink.consume(8).await.is_err());
        assert_eq!(*seen.lock().await, vec![7]);
    }

    #[tokio::test]
    async fn count_consumer_counts() {
        let counter = CountConsumer::new();
        let mut handle = counter.clone();
        for i in 0..4 {
            handle.consume(i).await.unwrap();
        }
        assert_eq!(counter.count().await, 4);
    }
}
