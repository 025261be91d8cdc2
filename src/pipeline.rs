//! Pipe binding and execution.
//!
//! [`pipe`] drains a producer into a consumer, wiring completion downstream
//! and cancellation upstream. [`Pipeline`] is the builder form of the same
//! operation.

use crate::error::{Error, Result};
use crate::telemetry;
use crate::token::{CancelReason, CancellationToken};
use crate::traits::{Consumer, Processor, Producer, ProducerExt, Through};

/// Options for a pipe binding. The default propagates everything.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipeOptions {
    /// Token whose firing tears the pipe down
    #[cfg_attr(feature = "serde", serde(skip))]
    pub signal: Option<CancellationToken>,
    /// Do not finish the consumer when the producer ends
    pub prevent_close: bool,
    /// Do not cancel the producer when the token fires or a write fails
    pub prevent_cancel: bool,
    /// Do not abort the consumer when the producer fails
    pub prevent_abort: bool,
}

impl PipeOptions {
    /// Full propagation, no token
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }

    /// Set whether natural completion closes the consumer
    pub fn prevent_close(mut self, prevent: bool) -> Self {
        self.prevent_close = prevent;
        self
    }

    /// Set whether cancellation reaches the producer
    pub fn prevent_cancel(mut self, prevent: bool) -> Self {
        self.prevent_cancel = prevent;
        self
    }

    /// Set whether producer errors reach the consumer
    pub fn prevent_abort(mut self, prevent: bool) -> Self {
        self.prevent_abort = prevent;
        self
    }

    /// Options for a sub-pipe writing into a shared downstream: the owning
    /// coordinator decides when to close or fail that downstream.
    pub(crate) fn shared(token: CancellationToken) -> Self {
        Self::new()
            .signal(token)
            .prevent_close(true)
            .prevent_abort(true)
    }
}

/// How a pipe ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeOutcome {
    /// The producer ran to its natural end
    Completed,
    /// The token fired for a non-error reason
    Cancelled(CancelReason),
}

/// Drain `producer` into `consumer`.
///
/// Resolves to `Ok` on natural end or on a normal stop, and to `Err` with
/// the first failure otherwise: a source error, a write rejection, or a
/// cancellation whose reason [`is_error`](CancelReason::is_error). The
/// producer's cancel hook runs at most once per pipe.
pub async fn pipe<P, C>(mut producer: P, mut consumer: C, options: PipeOptions) -> Result<PipeOutcome>
where
    P: Producer,
    C: Consumer<Item = P::Item>,
{
    let token = options.signal.clone().unwrap_or_default();

    if let Err(error) = consumer.start().await {
        #[cfg(feature = "tracing")]
        tracing::debug!(%error, "consumer failed to start");
        if !options.prevent_cancel {
            cancel_quietly(&mut producer, CancelReason::DownstreamRejected).await;
        }
        return Err(error);
    }

    loop {
        let next = tokio::select! {
            biased;
            reason = token.cancelled() => {
                return teardown(&mut producer, &mut consumer, &options, reason).await;
            }
            next = producer.produce() => next,
        };

        match next {
            Ok(Some(item)) => {
                let written = tokio::select! {
                    biased;
                    reason = token.cancelled() => {
                        return teardown(&mut producer, &mut consumer, &options, reason).await;
                    }
                    written = consumer.consume(item) => written,
                };
                if let Err(error) = written {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%error, "consumer rejected write, cancelling producer");
                    if !options.prevent_cancel {
                        cancel_quietly(&mut producer, CancelReason::DownstreamRejected).await;
                    }
                    return Err(error);
                }
            }
            Ok(None) => {
                if !options.prevent_close {
                    consumer.finish().await?;
                }
                return Ok(PipeOutcome::Completed);
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%error, "producer failed");
                if !options.prevent_abort {
                    abort_quietly(&mut consumer, error.clone()).await;
                }
                return Err(error);
            }
        }
    }
}

async fn teardown<P, C>(
    producer: &mut P,
    consumer: &mut C,
    options: &PipeOptions,
    reason: CancelReason,
) -> Result<PipeOutcome>
where
    P: Producer,
    C: Consumer<Item = P::Item>,
{
    #[cfg(feature = "tracing")]
    tracing::trace!(reason = reason.label(), "pipe cancelled");

    if !options.prevent_cancel {
        cancel_quietly(producer, reason.clone()).await;
    }

    if reason.is_error() {
        if !options.prevent_abort {
            abort_quietly(consumer, Error::Cancelled(reason.clone())).await;
        }
        return Err(Error::Cancelled(reason));
    }
    Ok(PipeOutcome::Cancelled(reason))
}

/// Cancel the producer while another outcome is already being reported. A
/// failing hook is logged and otherwise ignored.
async fn cancel_quietly<P: Producer>(producer: &mut P, reason: CancelReason) {
    telemetry::record_cancellation(&reason);
    if let Err(_error) = producer.cancel(reason).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %_error, "producer cancel hook failed");
    }
}

async fn abort_quietly<C: Consumer>(consumer: &mut C, error: Error) {
    if let Err(_error) = consumer.abort(error).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %_error, "consumer abort failed");
    }
}

/// Pipe with default options, treating a normal stop as success.
pub async fn pipe_to_end<P, C>(producer: P, consumer: C) -> Result<()>
where
    P: Producer,
    C: Consumer<Item = P::Item>,
{
    pipe(producer, consumer, PipeOptions::default())
        .await
        .map(|_| ())
}

/// Builder over [`pipe`].
///
/// ```rust
/// use sluice::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let sink = CollectConsumer::new();
/// let outcome = Pipeline::new(range(1..4).map(|x| x * 2))
///     .prevent_close(false)
///     .sink(sink.clone())
///     .await?;
/// assert_eq!(outcome, PipeOutcome::Completed);
/// assert_eq!(sink.items().await, vec![2, 4, 6]);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<P> {
    producer: P,
    options: PipeOptions,
}

impl<P> Pipeline<P>
where
    P: Producer,
{
    /// Create a new pipeline
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            options: PipeOptions::default(),
        }
    }

    /// Replace all pipe options at once
    pub fn options(mut self, options: PipeOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a cancellation token
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.options.signal = Some(token);
        self
    }

    /// Set whether natural completion closes the sink
    pub fn prevent_close(mut self, prevent: bool) -> Self {
        self.options.prevent_close = prevent;
        self
    }

    /// Set whether cancellation reaches the producer
    pub fn prevent_cancel(mut self, prevent: bool) -> Self {
        self.options.prevent_cancel = prevent;
        self
    }

    /// Set whether producer errors reach the sink
    pub fn prevent_abort(mut self, prevent: bool) -> Self {
        self.options.prevent_abort = prevent;
        self
    }

    /// Add a processor stage
    pub fn through<R>(self, processor: R) -> Pipeline<Through<P, R>>
    where
        R: Processor<Input = P::Item> + 'static,
    {
        Pipeline {
            producer: self.producer.through(processor),
            options: self.options,
        }
    }

    /// Run the pipeline into a consumer
    pub async fn sink<C>(self, consumer: C) -> Result<PipeOutcome>
    where
        C: Consumer<Item = P::Item>,
    {
        pipe(self.producer, consumer, self.options).await
    }
}

/// Extension trait for creating pipelines
pub trait PipelineExt: Producer + Sized {
    /// Start a pipeline from this producer
    fn into_pipeline(self) -> Pipeline<Self> {
        Pipeline::new(self)
    }
}

impl<P: Producer> PipelineExt for P {}
