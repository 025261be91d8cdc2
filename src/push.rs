//! Controller-driven producers.
//!
//! [`PushProducer`] adapts callback-style sources (timers, listeners,
//! sockets) to the pull-based [`Producer`] trait. The creator supplies a
//! `start` callback that receives a [`Controller`], an optional `pull`
//! callback invoked whenever the buffer is empty and downstream asks for an
//! item, and an optional cancel hook that releases whatever `start` acquired.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::token::CancelReason;
use crate::traits::Producer;

/// Lifecycle of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Created, never pulled
    Idle,
    /// `start` ran, nothing emitted yet
    Started,
    /// At least one item emitted
    Active,
    /// Ended gracefully
    Closed,
    /// Ended with an error
    Errored,
    /// Torn down from downstream
    Cancelled,
}

impl ProducerState {
    /// Whether the producer can no longer emit.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProducerState::Closed | ProducerState::Errored | ProducerState::Cancelled
        )
    }
}

enum Signal<T> {
    Item(T),
    Close,
    Error(Error),
}

/// Handle a push source uses to emit into its producer.
///
/// Cloneable and thread-safe so it can be moved into timer tasks and event
/// handlers. Everything after `close`, `error` or a cancellation is
/// rejected.
pub struct Controller<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for Controller<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Controller<T> {
    /// Emit an item.
    pub fn enqueue(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(Error::sink_rejection("enqueue after close"));
        }
        self.tx
            .send(Signal::Item(item))
            .map_err(|_| Error::sink_rejection("producer dropped"))
    }

    /// End the stream gracefully. Later calls are ignored.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Signal::Close);
        }
    }

    /// End the stream with an error. Ignored after the stream has ended.
    pub fn error(&self, error: Error) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Signal::Error(error));
        }
    }

    /// Whether the stream has ended or been cancelled.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

type StartFn<T> = Box<dyn FnOnce(&Controller<T>) -> Result<()> + Send>;
type PullFn<T> = Box<dyn FnMut(&Controller<T>) -> Result<()> + Send>;
type CancelFn = Box<dyn FnOnce(CancelReason) + Send>;

/// A producer fed through a [`Controller`].
///
/// ```rust
/// use sluice::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let mut producer = PushProducer::new(|ctl: &Controller<u32>| {
///     ctl.enqueue(1)?;
///     ctl.enqueue(2)?;
///     ctl.close();
///     Ok(())
/// });
/// assert_eq!(producer.produce().await?, Some(1));
/// assert_eq!(producer.produce().await?, Some(2));
/// assert_eq!(producer.produce().await?, None);
/// # Ok(())
/// # }
/// ```
pub struct PushProducer<T> {
    start: Option<StartFn<T>>,
    pull: Option<PullFn<T>>,
    on_cancel: Option<CancelFn>,
    controller: Controller<T>,
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    state: ProducerState,
}

impl<T: Send + 'static> PushProducer<T> {
    /// Create a producer whose `start` runs on the first pull.
    pub fn new<S>(start: S) -> Self
    where
        S: FnOnce(&Controller<T>) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            start: Some(Box::new(start)),
            pull: None,
            on_cancel: None,
            controller: Controller {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
            state: ProducerState::Idle,
        }
    }

    /// Called whenever the buffer is empty and an item is requested.
    pub fn on_pull<F>(mut self, pull: F) -> Self
    where
        F: FnMut(&Controller<T>) -> Result<()> + Send + 'static,
    {
        self.pull = Some(Box::new(pull));
        self
    }

    /// Teardown hook. Runs at most once, and only if `start` ran: on
    /// cancellation, when `start` or `pull` fails, or when a started producer
    /// is dropped before it ended.
    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(CancelReason) + Send + 'static,
    {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProducerState {
        self.state
    }

    fn accept(&mut self, signal: Signal<T>) -> Result<Option<T>> {
        match signal {
            Signal::Item(item) => {
                self.state = ProducerState::Active;
                Ok(Some(item))
            }
            Signal::Close => {
                self.state = ProducerState::Closed;
                Ok(None)
            }
            Signal::Error(error) => {
                self.state = ProducerState::Errored;
                Err(error)
            }
        }
    }

    fn fail(&mut self, error: Error) -> Result<Option<T>> {
        self.state = ProducerState::Errored;
        self.release(CancelReason::Requested(Some("source failed".into())));
        Err(error)
    }
}

impl<T> PushProducer<T> {
    fn release(&mut self, reason: CancelReason) {
        self.controller.closed.store(true, Ordering::Release);
        self.rx.close();
        if let Some(hook) = self.on_cancel.take() {
            #[cfg(feature = "tracing")]
            tracing::trace!(reason = reason.label(), "running push source teardown");
            hook(reason);
        }
    }
}

impl<T> Drop for PushProducer<T> {
    fn drop(&mut self) {
        if matches!(self.state, ProducerState::Started | ProducerState::Active) {
            self.release(CancelReason::Requested(Some("producer dropped".into())));
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for PushProducer<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if self.state.is_terminal() {
            return Ok(None);
        }

        if let Some(start) = self.start.take() {
            self.state = ProducerState::Started;
            if let Err(error) = start(&self.controller) {
                return self.fail(error);
            }
        }

        match self.rx.try_recv() {
            Ok(signal) => return self.accept(signal),
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.state = ProducerState::Closed;
                return Ok(None);
            }
        }

        if let Some(pull) = self.pull.as_mut() {
            if let Err(error) = pull(&self.controller) {
                return self.fail(error);
            }
        }

        match self.rx.recv().await {
            Some(signal) => self.accept(signal),
            None => {
                self.state = ProducerState::Closed;
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        match self.state {
            ProducerState::Idle => {
                // Never started, so there is nothing to release.
                self.start = None;
                self.state = ProducerState::Cancelled;
            }
            ProducerState::Started | ProducerState::Active => {
                self.state = ProducerState::Cancelled;
                self.release(reason);
            }
            _ => {}
        }
        Ok(())
    }
}
