//! Source adapters.
//!
//! Everything here satisfies the [`Producer`] contract: nothing starts
//! before the first pull, and timer-backed sources release their timers
//! through their cancel hook.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use futures_core::Stream;
use tokio_stream::StreamExt;

use crate::error::{Error, Result};
use crate::push::{Controller, PushProducer};
use crate::time::{Timer, TokioTimer};
use crate::token::{CancelReason, CancellationToken};
use crate::traits::Producer;

pub mod event;

pub use event::{from_event, AddListener, EventListener, Handler, ListenerId, ListenerTarget, OnOff};

/// A producer that yields the items of an iterator.
pub struct IterProducer<I> {
    iter: Option<I>,
}

impl<I> IterProducer<I> {
    /// Create a new iterator producer
    pub fn new(iter: I) -> Self {
        Self { iter: Some(iter) }
    }
}

#[async_trait]
impl<I> Producer for IterProducer<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        let next = self.iter.as_mut().and_then(Iterator::next);
        if next.is_none() {
            self.iter = None;
        }
        Ok(next)
    }

    async fn cancel(&mut self, _reason: CancelReason) -> Result<()> {
        self.iter = None;
        Ok(())
    }
}

/// Emit the given items in order, then complete.
pub fn of<T: Send + 'static>(items: Vec<T>) -> IterProducer<std::vec::IntoIter<T>> {
    IterProducer::new(items.into_iter())
}

/// Emit everything an iterator yields, then complete.
pub fn from_iter<I>(iter: I) -> IterProducer<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send + 'static,
{
    IterProducer::new(iter.into_iter())
}

/// Emit every value of a range.
pub fn range<T>(range: Range<T>) -> IterProducer<Range<T>>
where
    Range<T>: Iterator<Item = T> + Send,
    T: Send + 'static,
{
    IterProducer::new(range)
}

/// Complete without emitting.
pub fn empty<T: Send + 'static>() -> IterProducer<std::iter::Empty<T>> {
    IterProducer::new(std::iter::empty())
}

/// A producer that never emits and never completes.
pub struct Never<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

/// Never emit, never complete.
pub fn never<T: Send + 'static>() -> Never<T> {
    Never {
        _marker: std::marker::PhantomData,
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for Never<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        futures::future::pending().await
    }
}

/// A producer that fails on the first pull.
pub struct ThrowError<T> {
    error: Option<Error>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

/// Fail with `error` on the first pull.
pub fn throw_error<T: Send + 'static>(error: Error) -> ThrowError<T> {
    ThrowError {
        error: Some(error),
        _marker: std::marker::PhantomData,
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for ThrowError<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

/// A producer that emits a future's output once.
pub struct FutureProducer<T> {
    future: Option<BoxFuture<'static, Result<T>>>,
}

/// Emit the resolved value of `future` and complete, or fail with its error.
///
/// The future is not polled before the first pull.
pub fn from_future<F, T>(future: F) -> FutureProducer<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    FutureProducer {
        future: Some(future.boxed()),
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for FutureProducer<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        let Some(future) = self.future.as_mut() else {
            return Ok(None);
        };
        let output = future.await;
        self.future = None;
        output.map(Some)
    }

    async fn cancel(&mut self, _reason: CancelReason) -> Result<()> {
        self.future = None;
        Ok(())
    }
}

/// A producer over a `futures` stream.
pub struct StreamProducer<T> {
    stream: Option<BoxStream<'static, T>>,
}

/// Emit every item of `stream`.
pub fn from_stream<S>(stream: S) -> StreamProducer<S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    StreamProducer {
        stream: Some(Box::pin(stream)),
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for StreamProducer<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let next = stream.next().await;
        if next.is_none() {
            self.stream = None;
        }
        Ok(next)
    }

    async fn cancel(&mut self, _reason: CancelReason) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}

/// Emit `0, 1, 2, ...`, one every `period`, starting one period after the
/// first pull.
pub fn interval(period: Duration) -> PushProducer<u64> {
    interval_with_timer(period, TokioTimer)
}

/// [`interval`] driven by a specific timer.
pub fn interval_with_timer<Tm: Timer>(period: Duration, timer: Tm) -> PushProducer<u64> {
    timer_with(period, Some(period), timer)
}

/// Emit `0` after `delay`. With a `period`, keep emitting `1, 2, ...` every
/// `period` afterwards; without one, complete after the first emission.
pub fn timer(delay: Duration, period: Option<Duration>) -> PushProducer<u64> {
    timer_with(delay, period, TokioTimer)
}

/// [`timer`] driven by a specific timer.
pub fn timer_with<Tm: Timer>(
    delay: Duration,
    period: Option<Duration>,
    timer: Tm,
) -> PushProducer<u64> {
    let stop = CancellationToken::new();
    let hook = stop.clone();

    PushProducer::new(move |ctl: &Controller<u64>| {
        if period.is_some_and(|p| p.is_zero()) {
            return Err(Error::configuration("timer period must be non-zero"));
        }
        let ctl = ctl.clone();
        tokio::spawn(async move {
            let mut wait = delay;
            let mut next = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    _ = timer.sleep(wait) => {}
                }
                if ctl.enqueue(next).is_err() {
                    return;
                }
                next += 1;
                match period {
                    Some(period) => wait = period,
                    None => {
                        ctl.close();
                        return;
                    }
                }
            }
        });
        Ok(())
    })
    .on_cancel(move |reason| {
        hook.cancel(reason);
    })
}
