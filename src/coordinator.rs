//! Coordinators: operators that own several concurrently running pipes.
//!
//! A [`Coordinated`] producer is the output side of such an operator. On the
//! first pull it spawns a driver task that writes into a stage, and it keeps
//! the driver's token: cancelling the producer fires the token and waits for
//! the driver, so every teardown hook the driver owns has run by the time
//! `cancel` returns.
//!
//! [`FanIn`] is the driver-side helper for multi-source combinators. It runs
//! one pipe task per source and funnels what they see into one channel of
//! index-tagged [`Event`]s.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{Error, Result};
use crate::pipeline::{pipe, PipeOptions, PipeOutcome};
use crate::stage::{stage_with_token, StageReader, StageWriter};
use crate::telemetry;
use crate::token::{CancelReason, CancellationToken};
use crate::traits::{BoxProducer, Consumer, Producer};

/// Sizing for the channels inside a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperatorConfig {
    /// Items buffered between the driver and whoever pulls the output
    pub capacity: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

impl OperatorConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output buffer size
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Reject configurations no coordinator can run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration("capacity must be at least 1"));
        }
        Ok(())
    }
}

/// How a driver loop ended.
#[derive(Debug)]
pub enum Exit {
    /// Every input ran to completion, or the operator decided it was done
    Completed,
    /// The driver token fired, or downstream stopped accepting items
    Stopped(CancelReason),
    /// An input failed
    Failed(Error),
}

impl Exit {
    /// Reason to hand the inputs that are still running.
    pub fn teardown_reason(&self) -> CancelReason {
        match self {
            Exit::Completed => CancelReason::Finished,
            Exit::Stopped(reason) => reason.clone(),
            Exit::Failed(_) => CancelReason::SiblingFailed,
        }
    }

    /// Classify an error returned by a sub-pipe writing into `out`.
    ///
    /// A rejected write means downstream went away, which is a stop rather
    /// than a failure of the input.
    pub fn from_sub_pipe<T: Send + 'static>(
        error: Error,
        out: &StageWriter<T>,
        token: &CancellationToken,
    ) -> Self {
        if let Some(reason) = token.reason() {
            return Exit::Stopped(reason);
        }
        if out.is_closed() && error.is_sink_rejection() {
            return Exit::Stopped(CancelReason::DownstreamRejected);
        }
        Exit::Failed(error)
    }
}

/// Write one item downstream, mapping a rejection to the reason the driver
/// should stop with.
pub async fn emit<T: Send + 'static>(
    out: &mut StageWriter<T>,
    token: &CancellationToken,
    item: T,
) -> std::result::Result<(), CancelReason> {
    match out.consume(item).await {
        Ok(()) => Ok(()),
        Err(_) => Err(token.reason().unwrap_or(CancelReason::DownstreamRejected)),
    }
}

type Driver<T> =
    Box<dyn FnOnce(StageWriter<T>, CancellationToken) -> BoxFuture<'static, Exit> + Send>;

/// The output of a coordinating operator.
pub struct Coordinated<T> {
    name: &'static str,
    driver: Option<(Driver<T>, StageWriter<T>)>,
    reader: StageReader<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Coordinated<T> {
    /// Wrap a driver. It is spawned on the first pull and must return once
    /// its token fires, after tearing down everything it started.
    pub fn new<F, Fut>(name: &'static str, config: OperatorConfig, driver: F) -> Self
    where
        F: FnOnce(StageWriter<T>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Exit> + Send + 'static,
    {
        let (writer, reader) = stage_with_token(config.capacity, CancellationToken::new());
        Self {
            name,
            driver: Some((Box::new(move |w, t| driver(w, t).boxed()), writer)),
            reader,
            handle: None,
        }
    }

    /// Name the operator was created with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn start(&mut self) {
        let Some((driver, mut writer)) = self.driver.take() else {
            return;
        };
        let token = self.reader.token().clone();
        let name = self.name;

        #[cfg(feature = "tracing")]
        tracing::debug!(operator = name, "starting driver");

        self.handle = Some(tokio::spawn(async move {
            let exit = driver(writer.clone(), token).await;

            #[cfg(feature = "tracing")]
            tracing::debug!(operator = name, exit = ?exit, "driver finished");

            match exit {
                Exit::Completed => {
                    let _ = writer.finish().await;
                }
                Exit::Stopped(reason) if reason.is_error() => {
                    let _ = writer.abort(Error::Cancelled(reason)).await;
                }
                Exit::Stopped(_) => {
                    let _ = writer.finish().await;
                }
                Exit::Failed(error) => {
                    telemetry::record_fail_fast(name);
                    let _ = writer.abort(error).await;
                }
            }
        }));
    }
}

impl<T> fmt::Debug for Coordinated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinated")
            .field("name", &self.name)
            .field("started", &self.handle.is_some())
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for Coordinated<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        self.start();
        self.reader.produce().await
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        // An unstarted driver owns nothing that needs releasing.
        self.driver = None;
        self.reader.cancel(reason).await?;
        if let Some(handle) = self.handle.take() {
            if let Err(_error) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::warn!(operator = self.name, error = %_error, "driver task did not finish cleanly");
            }
        }
        Ok(())
    }
}

/// What a fan-in source did, tagged with its index.
#[derive(Debug)]
pub enum Event<T> {
    /// The source emitted an item
    Item(usize, T),
    /// The source completed
    Done(usize),
    /// The source failed
    Failed(usize, Error),
    /// The source was cancelled by the coordinator
    Stopped(usize),
}

struct Tagged<T> {
    index: usize,
    tx: mpsc::Sender<Event<T>>,
}

#[async_trait]
impl<T: Send + 'static> Consumer for Tagged<T> {
    type Item = T;

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        self.tx.send(Event::Item(self.index, item)).await?;
        Ok(())
    }
}

/// One pipe task per source, merged into one event channel.
///
/// Events of one source arrive in the order that source produced them, and
/// its terminal event always comes last.
pub struct FanIn<T> {
    events: mpsc::Receiver<Event<T>>,
    tokens: Vec<CancellationToken>,
    group: CancellationToken,
    tasks: JoinSet<()>,
}

impl<T: Send + 'static> FanIn<T> {
    /// Start piping every source. Each source gets a token derived from
    /// `parent`, so firing `parent` stops them all.
    pub fn spawn(
        sources: Vec<BoxProducer<T>>,
        parent: &CancellationToken,
        capacity: usize,
    ) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let group = parent.child_token();
        let mut tokens = Vec::with_capacity(sources.len());
        let mut tasks = JoinSet::new();

        for (index, source) in sources.into_iter().enumerate() {
            let token = group.child_token();
            tokens.push(token.clone());
            let tx = tx.clone();
            tasks.spawn(async move {
                let sink = Tagged {
                    index,
                    tx: tx.clone(),
                };
                let outcome = pipe(source, sink, PipeOptions::shared(token.clone())).await;
                let event = match outcome {
                    Ok(PipeOutcome::Completed) => Event::Done(index),
                    _ if token.is_cancelled() => Event::Stopped(index),
                    Ok(PipeOutcome::Cancelled(_)) => Event::Stopped(index),
                    Err(error) => Event::Failed(index, error),
                };
                // Nobody listens once the coordinator has shut down.
                let _ = tx.send(event).await;
            });
        }

        Self {
            events,
            tokens,
            group,
            tasks,
        }
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether there are no sources at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Next event, or `None` once every source has reported its end.
    pub async fn next(&mut self) -> Option<Event<T>> {
        self.events.recv().await
    }

    /// Cancel one source.
    pub fn cancel(&self, index: usize, reason: CancelReason) {
        if let Some(token) = self.tokens.get(index) {
            token.cancel(reason);
        }
    }

    /// Cancel every source except `keep`.
    pub fn cancel_except(&self, keep: usize, reason: CancelReason) {
        for (index, token) in self.tokens.iter().enumerate() {
            if index != keep {
                token.cancel(reason.clone());
            }
        }
    }

    /// Cancel whatever is still running and wait for every pipe task, so all
    /// cancel hooks have run when this returns.
    pub async fn shutdown(&mut self, reason: CancelReason) {
        #[cfg(feature = "tracing")]
        tracing::trace!(reason = reason.label(), sources = self.len(), "shutting down fan-in");

        self.group.cancel(reason);
        self.events.close();
        while self.tasks.join_next().await.is_some() {}
    }
}
