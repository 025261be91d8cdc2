//! Timing-gated operators.
//!
//! Each one holds a pending-value slot and at most one armed timer. The
//! timer lives inside the driver, so it is cleared whenever the driver
//! returns: on completion, on failure and on cancellation alike. Only
//! [`debounce`] and trailing [`throttle`] deliver a still-pending value when
//! upstream completes.
//!
//! Every operator has a `*_with_timer` form taking the [`Timer`] to wait on;
//! the plain forms use [`TokioTimer`].

use std::pin::Pin;
use std::time::Duration;

use futures::future::OptionFuture;

use crate::coordinator::{emit, Coordinated, Exit, OperatorConfig};
use crate::error::Error;
use crate::sources::interval_with_timer;
use crate::stage::StageWriter;
use crate::time::{Timer, TokioTimer};
use crate::token::{CancelReason, CancellationToken};
use crate::traits::Producer;

/// Leading/trailing behavior for [`throttle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleConfig {
    /// Emit the item that opens a window
    pub leading: bool,
    /// Emit the last item suppressed inside a window when it closes
    pub trailing: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: false,
        }
    }
}

impl ThrottleConfig {
    /// Leading only
    pub fn new() -> Self {
        Self::default()
    }

    /// Set leading emission
    pub fn leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }

    /// Set trailing emission
    pub fn trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }
}

type Armed<Tm> = Option<Pin<Box<<Tm as Timer>::Sleep>>>;

fn arm<Tm: Timer>(timer: &Tm, after: Duration) -> Armed<Tm> {
    Some(Box::pin(timer.sleep(after)))
}

/// Cancel upstream unless it already ended, then hand back the exit.
async fn release<P: Producer>(upstream: &mut P, upstream_done: bool, exit: Exit) -> Exit {
    if !upstream_done {
        let _ = upstream.cancel(exit.teardown_reason()).await;
    }
    exit
}

/// Emit the latest item once `quiet` has passed without a newer one.
///
/// A value still pending when upstream completes is emitted before the
/// output completes.
pub fn debounce<P>(upstream: P, quiet: Duration) -> Coordinated<P::Item>
where
    P: Producer + 'static,
{
    debounce_with_timer(upstream, quiet, TokioTimer)
}

/// [`debounce`] on a specific timer.
pub fn debounce_with_timer<P, Tm>(upstream: P, quiet: Duration, timer: Tm) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    Tm: Timer,
{
    Coordinated::new("debounce", OperatorConfig::default(), move |out, token| {
        drive_debounce(upstream, quiet, timer, out, token)
    })
}

async fn drive_debounce<P, Tm>(
    mut upstream: P,
    quiet: Duration,
    timer: Tm,
    mut out: StageWriter<P::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    Tm: Timer,
{
    let mut pending: Option<P::Item> = None;
    let mut deadline: Armed<Tm> = None;
    let mut upstream_done = false;

    let exit = loop {
        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            Some(()) = OptionFuture::from(deadline.as_mut()) => {
                deadline = None;
                if let Some(item) = pending.take() {
                    if let Err(reason) = emit(&mut out, &token, item).await {
                        break Exit::Stopped(reason);
                    }
                }
            }
            next = upstream.produce() => match next {
                Ok(Some(item)) => {
                    pending = Some(item);
                    deadline = arm(&timer, quiet);
                }
                Ok(None) => {
                    upstream_done = true;
                    if let Some(item) = pending.take() {
                        if let Err(reason) = emit(&mut out, &token, item).await {
                            break Exit::Stopped(reason);
                        }
                    }
                    break Exit::Completed;
                }
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    release(&mut upstream, upstream_done, exit).await
}

/// Rate-limit to one emission per `window`.
///
/// With `leading`, the item that opens a window is emitted at once. With
/// `trailing`, the last item suppressed inside a window is emitted when the
/// window closes, which opens the next window; a trailing item still held
/// when upstream completes is emitted before completion.
pub fn throttle<P>(upstream: P, window: Duration, config: ThrottleConfig) -> Coordinated<P::Item>
where
    P: Producer + 'static,
{
    throttle_with_timer(upstream, window, config, TokioTimer)
}

/// [`throttle`] on a specific timer.
pub fn throttle_with_timer<P, Tm>(
    upstream: P,
    window: Duration,
    config: ThrottleConfig,
    timer: Tm,
) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    Tm: Timer,
{
    Coordinated::new("throttle", OperatorConfig::default(), move |out, token| {
        drive_throttle(upstream, window, config, timer, out, token)
    })
}

async fn drive_throttle<P, Tm>(
    mut upstream: P,
    window: Duration,
    config: ThrottleConfig,
    timer: Tm,
    mut out: StageWriter<P::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    Tm: Timer,
{
    let mut trailing: Option<P::Item> = None;
    let mut open: Armed<Tm> = None;
    let mut upstream_done = false;

    let exit = loop {
        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            Some(()) = OptionFuture::from(open.as_mut()) => {
                open = None;
                if let Some(item) = trailing.take() {
                    open = arm(&timer, window);
                    if let Err(reason) = emit(&mut out, &token, item).await {
                        break Exit::Stopped(reason);
                    }
                }
            }
            next = upstream.produce() => match next {
                Ok(Some(item)) => {
                    if open.is_none() {
                        open = arm(&timer, window);
                        if config.leading {
                            if let Err(reason) = emit(&mut out, &token, item).await {
                                break Exit::Stopped(reason);
                            }
                        } else if config.trailing {
                            trailing = Some(item);
                        }
                    } else if config.trailing {
                        trailing = Some(item);
                    }
                }
                Ok(None) => {
                    upstream_done = true;
                    if let Some(item) = trailing.take() {
                        if let Err(reason) = emit(&mut out, &token, item).await {
                            break Exit::Stopped(reason);
                        }
                    }
                    break Exit::Completed;
                }
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    release(&mut upstream, upstream_done, exit).await
}

/// When an item arrives and no window is running, start a `window` timer;
/// when it fires, emit the latest item. A value pending at completion is
/// dropped.
pub fn audit_time<P>(upstream: P, window: Duration) -> Coordinated<P::Item>
where
    P: Producer + 'static,
{
    audit_time_with_timer(upstream, window, TokioTimer)
}

/// [`audit_time`] on a specific timer.
pub fn audit_time_with_timer<P, Tm>(upstream: P, window: Duration, timer: Tm) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    Tm: Timer,
{
    Coordinated::new("audit_time", OperatorConfig::default(), move |mut out, token| async move {
        let mut upstream = upstream;
        let mut pending: Option<P::Item> = None;
        let mut gate: Armed<Tm> = None;
        let mut upstream_done = false;

        let exit = loop {
            tokio::select! {
                biased;
                reason = token.cancelled() => break Exit::Stopped(reason),
                Some(()) = OptionFuture::from(gate.as_mut()) => {
                    gate = None;
                    if let Some(item) = pending.take() {
                        if let Err(reason) = emit(&mut out, &token, item).await {
                            break Exit::Stopped(reason);
                        }
                    }
                }
                next = upstream.produce() => match next {
                    Ok(Some(item)) => {
                        pending = Some(item);
                        if gate.is_none() {
                            gate = arm(&timer, window);
                        }
                    }
                    Ok(None) => {
                        upstream_done = true;
                        break Exit::Completed;
                    }
                    Err(error) => {
                        upstream_done = true;
                        break Exit::Failed(error);
                    }
                }
            }
        };

        release(&mut upstream, upstream_done, exit).await
    })
}

/// Like [`audit_time`], but the window is a producer built from the item
/// that opened it; the window closes on that producer's first item.
pub fn audit<P, F, N>(upstream: P, notifier: F) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    F: FnMut(&P::Item) -> N + Send + 'static,
    N: Producer + 'static,
{
    Coordinated::new("audit", OperatorConfig::default(), move |out, token| {
        drive_audit(upstream, notifier, out, token)
    })
}

async fn drive_audit<P, F, N>(
    mut upstream: P,
    mut notifier: F,
    mut out: StageWriter<P::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    F: FnMut(&P::Item) -> N + Send + 'static,
    N: Producer + 'static,
{
    let mut pending: Option<P::Item> = None;
    let mut gate: Option<N> = None;
    let mut upstream_done = false;

    let exit = loop {
        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            Some(signal) = OptionFuture::from(gate.as_mut().map(|window| window.produce())) => {
                let closed = gate.take();
                match signal {
                    Ok(Some(_)) => {
                        if let Some(mut closed) = closed {
                            let _ = closed.cancel(CancelReason::Finished).await;
                        }
                        if let Some(item) = pending.take() {
                            if let Err(reason) = emit(&mut out, &token, item).await {
                                break Exit::Stopped(reason);
                            }
                        }
                    }
                    // A window that ends silently just lets the next item open another.
                    Ok(None) => {}
                    Err(error) => break Exit::Failed(error),
                }
            }
            next = upstream.produce() => match next {
                Ok(Some(item)) => {
                    if gate.is_none() {
                        gate = Some(notifier(&item));
                    }
                    pending = Some(item);
                }
                Ok(None) => {
                    upstream_done = true;
                    break Exit::Completed;
                }
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    if let Some(mut gate) = gate.take() {
        let _ = gate.cancel(exit.teardown_reason()).await;
    }
    release(&mut upstream, upstream_done, exit).await
}

/// Emit the latest upstream item whenever `notifier` emits. The same item is
/// repeated on every tick until a newer one arrives; ticks before the first
/// item are ignored. Completes with upstream.
pub fn sample<P, N>(upstream: P, notifier: N) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    P::Item: Clone,
    N: Producer + 'static,
{
    Coordinated::new("sample", OperatorConfig::default(), move |out, token| {
        drive_sample(upstream, notifier, out, token)
    })
}

/// [`sample`] on a fixed period.
pub fn sample_time<P>(upstream: P, period: Duration) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    P::Item: Clone,
{
    sample_time_with_timer(upstream, period, TokioTimer)
}

/// [`sample_time`] on a specific timer.
pub fn sample_time_with_timer<P, Tm>(upstream: P, period: Duration, timer: Tm) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    P::Item: Clone,
    Tm: Timer,
{
    sample(upstream, interval_with_timer(period, timer))
}

async fn drive_sample<P, N>(
    mut upstream: P,
    mut notifier: N,
    mut out: StageWriter<P::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    P::Item: Clone,
    N: Producer + 'static,
{
    let mut latest: Option<P::Item> = None;
    let mut upstream_done = false;
    let mut notifier_done = false;

    let exit = loop {
        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            next = upstream.produce() => match next {
                Ok(Some(item)) => latest = Some(item),
                Ok(None) => {
                    upstream_done = true;
                    break Exit::Completed;
                }
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            },
            tick = notifier.produce(), if !notifier_done => match tick {
                Ok(Some(_)) => {
                    if let Some(item) = latest.clone() {
                        if let Err(reason) = emit(&mut out, &token, item).await {
                            break Exit::Stopped(reason);
                        }
                    }
                }
                Ok(None) => notifier_done = true,
                Err(error) => {
                    notifier_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    if !notifier_done {
        let _ = notifier.cancel(exit.teardown_reason()).await;
    }
    release(&mut upstream, upstream_done, exit).await
}

/// Fail with [`Error::Timeout`] when no item arrives within `limit` of the
/// first pull or of the previous item.
pub fn timeout<P>(upstream: P, limit: Duration) -> Coordinated<P::Item>
where
    P: Producer + 'static,
{
    timeout_with_timer(upstream, limit, TokioTimer)
}

/// [`timeout`] on a specific timer.
pub fn timeout_with_timer<P, Tm>(upstream: P, limit: Duration, timer: Tm) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    Tm: Timer,
{
    Coordinated::new("timeout", OperatorConfig::default(), move |mut out, token| async move {
        let mut upstream = upstream;
        let mut upstream_done = false;
        let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);

        let exit = loop {
            tokio::select! {
                biased;
                reason = token.cancelled() => break Exit::Stopped(reason),
                next = upstream.produce() => match next {
                    Ok(Some(item)) => {
                        if let Err(reason) = emit(&mut out, &token, item).await {
                            break Exit::Stopped(reason);
                        }
                    }
                    Ok(None) => {
                        upstream_done = true;
                        break Exit::Completed;
                    }
                    Err(error) => {
                        upstream_done = true;
                        break Exit::Failed(error);
                    }
                },
                () = timer.sleep(limit) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(limit_ms, "no item within limit");
                    break Exit::Failed(Error::timeout(limit_ms));
                }
            }
        };

        release(&mut upstream, upstream_done, exit).await
    })
}
