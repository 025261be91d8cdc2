//! Operators that coordinate more than one activity.
//!
//! Every operator here returns a [`Coordinated`] producer: nothing runs until
//! it is first pulled, and cancelling it tears down every source, inner
//! producer and timer it started before the cancel call returns.

use std::time::Duration;

use crate::coordinator::{emit, Coordinated, Event, Exit, FanIn};
use crate::error::{Error, Result};
use crate::stage::StageWriter;
use crate::time::Timer;
use crate::token::CancellationToken;
use crate::traits::{BoxProducer, Producer, ProducerExt};

pub mod combine;
pub mod flatten;
pub mod gate;
pub mod timing;

pub use combine::{
    combine_latest, combine_latest2, concat, merge, merge_with_config, race, with_latest_from,
    zip, zip2,
};
pub use flatten::{concat_map, merge_map, merge_map_with_limit, switch_map};
pub use gate::{skip_until, take_until};
pub use timing::{
    audit, audit_time, audit_time_with_timer, debounce, debounce_with_timer,
    sample, sample_time, sample_time_with_timer, throttle, throttle_with_timer, timeout,
    timeout_with_timer, ThrottleConfig,
};

/// What a fan-in step decided after looking at one event.
pub(crate) enum Step<U> {
    /// Emit these and keep going
    Continue(Vec<U>),
    /// Emit these, then complete
    Complete(Vec<U>),
    /// Fail the output
    Fail(Error),
}

impl<U> Step<U> {
    pub(crate) fn skip() -> Self {
        Step::Continue(Vec::new())
    }

    pub(crate) fn emit(item: U) -> Self {
        Step::Continue(vec![item])
    }
}

/// Run `sources` through a [`FanIn`], letting `step` turn events into output.
///
/// The output completes once every source has ended, unless `step` decides
/// earlier. Sources still running at that point are cancelled with the
/// reason matching how the operator ended.
pub(crate) async fn drive_fan_in<T, U, S>(
    sources: Vec<BoxProducer<T>>,
    capacity: usize,
    mut out: StageWriter<U>,
    token: CancellationToken,
    mut step: S,
) -> Exit
where
    T: Send + 'static,
    U: Send + 'static,
    S: FnMut(&FanIn<T>, Event<T>) -> Step<U> + Send,
{
    let mut fan = FanIn::spawn(sources, &token, capacity);

    let exit = 'events: loop {
        let event = tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            event = fan.next() => event,
        };
        let Some(event) = event else {
            break Exit::Completed;
        };

        let (items, complete) = match step(&fan, event) {
            Step::Continue(items) => (items, false),
            Step::Complete(items) => (items, true),
            Step::Fail(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%error, "fan-in source failed, cancelling siblings");
                break Exit::Failed(error);
            }
        };
        for item in items {
            if let Err(reason) = emit(&mut out, &token, item).await {
                break 'events Exit::Stopped(reason);
            }
        }
        if complete {
            break Exit::Completed;
        }
    };

    fan.shutdown(exit.teardown_reason()).await;
    exit
}

/// Operator methods on every producer.
///
/// ```rust
/// use sluice::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let sink = CollectConsumer::new();
/// let doubled = range(0..3).concat_map(|x| of(vec![x, x]));
/// pipe_to_end(doubled, sink.clone()).await?;
/// assert_eq!(sink.items().await, vec![0, 0, 1, 1, 2, 2]);
/// # Ok(())
/// # }
/// ```
pub trait OperatorExt: Producer + Sized + 'static {
    /// See [`switch_map`]
    fn switch_map<F, Q>(self, project: F) -> Coordinated<Q::Item>
    where
        F: FnMut(Self::Item) -> Q + Send + 'static,
        Q: Producer + 'static,
    {
        flatten::switch_map(self, project)
    }

    /// See [`concat_map`]
    fn concat_map<F, Q>(self, project: F) -> Coordinated<Q::Item>
    where
        F: FnMut(Self::Item) -> Q + Send + 'static,
        Q: Producer + 'static,
    {
        flatten::concat_map(self, project)
    }

    /// See [`merge_map`]
    fn merge_map<F, Q>(self, project: F) -> Coordinated<Q::Item>
    where
        F: FnMut(Self::Item) -> Q + Send + 'static,
        Q: Producer + 'static,
    {
        flatten::merge_map(self, project)
    }

    /// See [`merge_map_with_limit`]
    fn merge_map_with_limit<F, Q>(self, project: F, limit: usize) -> Result<Coordinated<Q::Item>>
    where
        F: FnMut(Self::Item) -> Q + Send + 'static,
        Q: Producer + 'static,
    {
        flatten::merge_map_with_limit(self, project, limit)
    }

    /// Merge with one other producer of the same item type
    fn merge_with<Q>(self, other: Q) -> Coordinated<Self::Item>
    where
        Q: Producer<Item = Self::Item> + 'static,
    {
        combine::merge(vec![self.boxed(), other.boxed()])
    }

    /// See [`with_latest_from`]
    fn with_latest_from<Q>(self, other: Q) -> Coordinated<(Self::Item, Q::Item)>
    where
        Q: Producer + 'static,
        Q::Item: Clone,
    {
        combine::with_latest_from(self, other)
    }

    /// See [`take_until`]
    fn take_until<N>(self, notifier: N) -> Coordinated<Self::Item>
    where
        N: Producer + 'static,
    {
        gate::take_until(self, notifier)
    }

    /// See [`skip_until`]
    fn skip_until<N>(self, notifier: N) -> Coordinated<Self::Item>
    where
        N: Producer + 'static,
    {
        gate::skip_until(self, notifier)
    }

    /// See [`debounce`]
    fn debounce(self, quiet: Duration) -> Coordinated<Self::Item> {
        timing::debounce(self, quiet)
    }

    /// See [`throttle`]
    fn throttle(self, window: Duration, config: ThrottleConfig) -> Coordinated<Self::Item> {
        timing::throttle(self, window, config)
    }

    /// See [`audit_time`]
    fn audit_time(self, window: Duration) -> Coordinated<Self::Item> {
        timing::audit_time(self, window)
    }

    /// See [`audit`]
    fn audit<F, N>(self, notifier: F) -> Coordinated<Self::Item>
    where
        F: FnMut(&Self::Item) -> N + Send + 'static,
        N: Producer + 'static,
    {
        timing::audit(self, notifier)
    }

    /// See [`sample`]
    fn sample<N>(self, notifier: N) -> Coordinated<Self::Item>
    where
        Self::Item: Clone,
        N: Producer + 'static,
    {
        timing::sample(self, notifier)
    }

    /// See [`sample_time`]
    fn sample_time(self, period: Duration) -> Coordinated<Self::Item>
    where
        Self::Item: Clone,
    {
        timing::sample_time(self, period)
    }

    /// See [`timeout`]
    fn timeout(self, limit: Duration) -> Coordinated<Self::Item> {
        timing::timeout(self, limit)
    }

    /// [`debounce`] on a specific timer
    fn debounce_with_timer<Tm: Timer>(self, quiet: Duration, timer: Tm) -> Coordinated<Self::Item> {
        timing::debounce_with_timer(self, quiet, timer)
    }
}

impl<P: Producer + 'static> OperatorExt for P {}
