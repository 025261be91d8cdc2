//! Flattening operators: each upstream item is mapped to an inner producer
//! whose items are forwarded downstream.
//!
//! The three operators share their plumbing and differ only in how many
//! inners may run at once:
//!
//! - [`switch_map`] keeps at most one, cancelling the current inner with
//!   [`CancelReason::Superseded`] when a new upstream item arrives.
//! - [`concat_map`] runs inners one after another and does not pull upstream
//!   while an inner is running.
//! - [`merge_map`] runs all of them concurrently, optionally bounded by
//!   [`merge_map_with_limit`].
//!
//! Every inner pipe writes straight into the operator's output stage with a
//! token derived from the driver token, so cancelling the output reaches
//! every running inner.

use futures::future::{BoxFuture, OptionFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

use crate::coordinator::{Coordinated, Exit, OperatorConfig};
use crate::error::{Error, Result};
use crate::pipeline::{pipe, PipeOptions, PipeOutcome};
use crate::stage::StageWriter;
use crate::token::{CancelReason, CancellationToken};
use crate::traits::Producer;

type InnerPipe = BoxFuture<'static, Result<PipeOutcome>>;

fn inner_pipe<Q>(inner: Q, out: &StageWriter<Q::Item>, token: CancellationToken) -> InnerPipe
where
    Q: Producer + 'static,
{
    pipe(inner, out.clone(), PipeOptions::shared(token)).boxed()
}

/// Map each item to an inner producer and forward only the newest inner.
///
/// Completes once upstream has completed and the last inner has drained.
/// An inner error cancels upstream and fails the output.
pub fn switch_map<P, F, Q>(upstream: P, project: F) -> Coordinated<Q::Item>
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    Coordinated::new("switch_map", OperatorConfig::default(), move |out, token| {
        drive_switch(upstream, project, out, token)
    })
}

async fn drive_switch<P, F, Q>(
    mut upstream: P,
    mut project: F,
    out: StageWriter<Q::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    let mut current: Option<(CancellationToken, InnerPipe)> = None;
    let mut upstream_done = false;

    let exit = loop {
        if upstream_done && current.is_none() {
            break Exit::Completed;
        }

        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            Some(result) = OptionFuture::from(current.as_mut().map(|(_, inner)| inner)) => {
                current = None;
                if let Err(error) = result {
                    break Exit::from_sub_pipe(error, &out, &token);
                }
            }
            next = upstream.produce(), if !upstream_done => match next {
                Ok(Some(item)) => {
                    if let Some((inner_token, inner)) = current.take() {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("switch_map superseding active inner");
                        inner_token.cancel(CancelReason::Superseded);
                        let _ = inner.await;
                    }
                    let inner_token = token.child_token();
                    current = Some((inner_token.clone(), inner_pipe(project(item), &out, inner_token)));
                }
                Ok(None) => upstream_done = true,
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    let reason = exit.teardown_reason();
    if let Some((inner_token, inner)) = current.take() {
        inner_token.cancel(reason.clone());
        let _ = inner.await;
    }
    if !upstream_done {
        let _ = upstream.cancel(reason).await;
    }
    exit
}

/// Map each item to an inner producer and forward the inners one at a time,
/// in upstream order.
pub fn concat_map<P, F, Q>(upstream: P, project: F) -> Coordinated<Q::Item>
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    Coordinated::new("concat_map", OperatorConfig::default(), move |out, token| {
        drive_concat(upstream, project, out, token)
    })
}

async fn drive_concat<P, F, Q>(
    mut upstream: P,
    mut project: F,
    out: StageWriter<Q::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    let mut upstream_done = false;

    let exit = loop {
        let next = tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            next = upstream.produce() => next,
        };

        match next {
            Ok(Some(item)) => {
                let inner = project(item);
                let outcome = pipe(inner, out.clone(), PipeOptions::shared(token.child_token())).await;
                if let Err(error) = outcome {
                    break Exit::from_sub_pipe(error, &out, &token);
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
    };

    if !upstream_done {
        let _ = upstream.cancel(exit.teardown_reason()).await;
    }
    exit
}

/// Map each item to an inner producer and forward every inner concurrently.
///
/// Completes once upstream has completed and no inner is active. The first
/// inner error cancels every other inner and upstream with
/// [`CancelReason::SiblingFailed`] before it is reported.
pub fn merge_map<P, F, Q>(upstream: P, project: F) -> Coordinated<Q::Item>
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    Coordinated::new("merge_map", OperatorConfig::default(), move |out, token| {
        drive_merge(upstream, project, None, out, token)
    })
}

/// [`merge_map`] with at most `limit` inners active. Upstream is not pulled
/// while the limit is reached.
pub fn merge_map_with_limit<P, F, Q>(
    upstream: P,
    project: F,
    limit: usize,
) -> Result<Coordinated<Q::Item>>
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    if limit == 0 {
        return Err(Error::configuration("merge_map limit must be at least 1"));
    }
    Ok(Coordinated::new(
        "merge_map",
        OperatorConfig::default(),
        move |out, token| drive_merge(upstream, project, Some(limit), out, token),
    ))
}

async fn drive_merge<P, F, Q>(
    mut upstream: P,
    mut project: F,
    limit: Option<usize>,
    out: StageWriter<Q::Item>,
    token: CancellationToken,
) -> Exit
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Q + Send + 'static,
    Q: Producer + 'static,
{
    let group = token.child_token();
    let mut inners: FuturesUnordered<InnerPipe> = FuturesUnordered::new();
    let mut upstream_done = false;

    let exit = loop {
        if upstream_done && inners.is_empty() {
            break Exit::Completed;
        }
        let has_room = limit.map_or(true, |limit| inners.len() < limit);

        tokio::select! {
            biased;
            reason = token.cancelled() => break Exit::Stopped(reason),
            Some(result) = inners.next(), if !inners.is_empty() => {
                if let Err(error) = result {
                    break Exit::from_sub_pipe(error, &out, &token);
                }
            }
            next = upstream.produce(), if !upstream_done && has_room => match next {
                Ok(Some(item)) => {
                    inners.push(inner_pipe(project(item), &out, group.child_token()));
                }
                Ok(None) => upstream_done = true,
                Err(error) => {
                    upstream_done = true;
                    break Exit::Failed(error);
                }
            }
        }
    };

    let reason = exit.teardown_reason();
    #[cfg(feature = "tracing")]
    tracing::debug!(active = inners.len(), reason = reason.label(), "merge_map tearing down inners");
    group.cancel(reason.clone());
    while inners.next().await.is_some() {}
    if !upstream_done {
        let _ = upstream.cancel(reason).await;
    }
    exit
}
