//! Multi-source combinators.
//!
//! Most of these subscribe to their sources through a
//! [`FanIn`](crate::coordinator::FanIn); [`zip`] pulls its sources itself so
//! it can pace them. All are fail-fast: the first source error cancels
//! every other source with
//! [`SiblingFailed`](crate::token::CancelReason::SiblingFailed) and is then
//! reported once. Interleaving between sources follows arrival order only.

use futures::future::Either;
use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::coordinator::{emit, Coordinated, Event, Exit, OperatorConfig};
use crate::error::Result;
use crate::operators::{drive_fan_in, Step};
use crate::pipeline::{pipe, PipeOptions};
use crate::stage::StageWriter;
use crate::token::{CancelReason, CancellationToken};
use crate::traits::{BoxProducer, Producer, ProducerExt};

/// Forward every item of every source. Completes when all sources have.
pub fn merge<T: Send + 'static>(sources: Vec<BoxProducer<T>>) -> Coordinated<T> {
    build_merge(sources, OperatorConfig::default())
}

/// [`merge`] with explicit sizing.
pub fn merge_with_config<T: Send + 'static>(
    sources: Vec<BoxProducer<T>>,
    config: OperatorConfig,
) -> Result<Coordinated<T>> {
    config.validate()?;
    Ok(build_merge(sources, config))
}

fn build_merge<T: Send + 'static>(
    sources: Vec<BoxProducer<T>>,
    config: OperatorConfig,
) -> Coordinated<T> {
    Coordinated::new("merge", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, |_, event| match event {
            Event::Item(_, item) => Step::emit(item),
            Event::Failed(_, error) => Step::Fail(error),
            Event::Done(_) | Event::Stopped(_) => Step::skip(),
        })
    })
}

/// Forward the sources one after another. A source is not started before
/// the previous one has completed.
pub fn concat<T: Send + 'static>(sources: Vec<BoxProducer<T>>) -> Coordinated<T> {
    Coordinated::new("concat", OperatorConfig::default(), move |out, token| async move {
        for source in sources {
            let outcome = pipe(source, out.clone(), PipeOptions::shared(token.child_token())).await;
            if let Err(error) = outcome {
                return Exit::from_sub_pipe(error, &out, &token);
            }
            if let Some(reason) = token.reason() {
                return Exit::Stopped(reason);
            }
        }
        Exit::Completed
    })
}

/// Emit one row per index across all sources, paced by the slowest.
///
/// Sources are pulled in lockstep: a source is asked for its next item only
/// once the current row has been emitted, so at most one item per source is
/// held. Completes as soon as any source ends, cancelling the others with
/// [`CancelReason::Finished`]; cells already pulled for the unfinished row
/// are dropped.
pub fn zip<T: Send + 'static>(sources: Vec<BoxProducer<T>>) -> Coordinated<Vec<T>> {
    Coordinated::new("zip", OperatorConfig::default(), move |out, token| {
        drive_zip(sources, out, token, Some)
    })
}

/// Two-source [`zip`] producing tuples.
pub fn zip2<A, B>(left: A, right: B) -> Coordinated<(A::Item, B::Item)>
where
    A: Producer + 'static,
    B: Producer + 'static,
{
    let sources = tagged(left, right);
    Coordinated::new("zip", OperatorConfig::default(), move |out, token| {
        drive_zip(sources, out, token, |mut row| {
            let right = row.pop()?;
            let left = row.pop()?;
            match (left, right) {
                (Either::Left(a), Either::Right(b)) => Some((a, b)),
                _ => None,
            }
        })
    })
}

async fn drive_zip<T, R, F>(
    mut sources: Vec<BoxProducer<T>>,
    mut out: StageWriter<R>,
    token: CancellationToken,
    mut build: F,
) -> Exit
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnMut(Vec<T>) -> Option<R> + Send,
{
    if sources.is_empty() {
        return Exit::Completed;
    }
    let mut row: Vec<Option<T>> = sources.iter().map(|_| None).collect();
    let mut ended = vec![false; sources.len()];

    let exit = loop {
        let stop = {
            let mut pulls: FuturesUnordered<_> = sources
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| row[*index].is_none())
                .map(|(index, source)| async move { (index, source.produce().await) })
                .collect();

            loop {
                let next = tokio::select! {
                    biased;
                    reason = token.cancelled() => break Some(Exit::Stopped(reason)),
                    next = pulls.next() => next,
                };
                match next {
                    None => break None,
                    Some((index, Ok(Some(item)))) => row[index] = Some(item),
                    Some((index, Ok(None))) => {
                        ended[index] = true;
                        break Some(Exit::Completed);
                    }
                    Some((index, Err(error))) => {
                        ended[index] = true;
                        break Some(Exit::Failed(error));
                    }
                }
            }
        };
        if let Some(exit) = stop {
            break exit;
        }

        let cells: Vec<T> = row.iter_mut().filter_map(Option::take).collect();
        if let Some(item) = build(cells) {
            if let Err(reason) = emit(&mut out, &token, item).await {
                break Exit::Stopped(reason);
            }
        }
    };

    let reason = exit.teardown_reason();
    for (source, ended) in sources.iter_mut().zip(ended) {
        if !ended {
            let _ = source.cancel(reason.clone()).await;
        }
    }
    exit
}

/// Emit a snapshot of every source's latest value whenever any source emits,
/// once each source has emitted at least once.
///
/// A source that completes without ever emitting completes the output
/// immediately, since no snapshot could ever be produced.
pub fn combine_latest<T>(sources: Vec<BoxProducer<T>>) -> Coordinated<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let config = OperatorConfig::default();
    let mut slots: Vec<Option<T>> = (0..sources.len()).map(|_| None).collect();

    Coordinated::new("combine_latest", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, move |_, event| match event {
            Event::Item(index, item) => {
                slots[index] = Some(item);
                if slots.iter().all(Option::is_some) {
                    Step::emit(slots.iter().flatten().cloned().collect())
                } else {
                    Step::skip()
                }
            }
            Event::Done(index) if slots[index].is_none() => Step::Complete(Vec::new()),
            Event::Done(_) | Event::Stopped(_) => Step::skip(),
            Event::Failed(_, error) => Step::Fail(error),
        })
    })
}

/// Two-source [`combine_latest`] producing tuples.
pub fn combine_latest2<A, B>(left: A, right: B) -> Coordinated<(A::Item, B::Item)>
where
    A: Producer + 'static,
    B: Producer + 'static,
    A::Item: Clone,
    B::Item: Clone,
{
    let config = OperatorConfig::default();
    let sources = tagged(left, right);
    let mut latest_left: Option<A::Item> = None;
    let mut latest_right: Option<B::Item> = None;

    Coordinated::new("combine_latest", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, move |_, event| {
            match event {
                Event::Item(_, Either::Left(item)) => latest_left = Some(item),
                Event::Item(_, Either::Right(item)) => latest_right = Some(item),
                Event::Done(0) if latest_left.is_none() => return Step::Complete(Vec::new()),
                Event::Done(1) if latest_right.is_none() => return Step::Complete(Vec::new()),
                Event::Done(_) | Event::Stopped(_) => return Step::skip(),
                Event::Failed(_, error) => return Step::Fail(error),
            }
            match (&latest_left, &latest_right) {
                (Some(a), Some(b)) => Step::emit((a.clone(), b.clone())),
                _ => Step::skip(),
            }
        })
    })
}

/// Forward only the source that emits first; the others are cancelled with
/// [`CancelReason::Lost`] as soon as a winner is known.
pub fn race<T: Send + 'static>(sources: Vec<BoxProducer<T>>) -> Coordinated<T> {
    let config = OperatorConfig::default();
    let mut winner: Option<usize> = None;

    Coordinated::new("race", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, move |fan, event| match event {
            Event::Item(index, item) => match winner {
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(winner = index, "race decided");
                    winner = Some(index);
                    fan.cancel_except(index, CancelReason::Lost);
                    Step::emit(item)
                }
                Some(won) if won == index => Step::emit(item),
                // A loser's item can still be in flight when the race is decided.
                Some(_) => Step::skip(),
            },
            Event::Done(index) if winner == Some(index) => Step::Complete(Vec::new()),
            Event::Failed(index, error) if winner.map_or(true, |won| won == index) => {
                Step::Fail(error)
            }
            Event::Done(_) | Event::Failed(..) | Event::Stopped(_) => Step::skip(),
        })
    })
}

/// Pair each upstream item with the latest value of `other`.
///
/// Upstream items that arrive before `other` has emitted are dropped. The
/// output completes with upstream; `other` completing changes nothing.
pub fn with_latest_from<P, Q>(upstream: P, other: Q) -> Coordinated<(P::Item, Q::Item)>
where
    P: Producer + 'static,
    Q: Producer + 'static,
    Q::Item: Clone,
{
    let config = OperatorConfig::default();
    let sources = tagged(upstream, other);
    let mut latest: Option<Q::Item> = None;

    Coordinated::new("with_latest_from", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, move |_, event| match event {
            Event::Item(_, Either::Left(item)) => match &latest {
                Some(value) => Step::emit((item, value.clone())),
                None => Step::skip(),
            },
            Event::Item(_, Either::Right(value)) => {
                latest = Some(value);
                Step::skip()
            }
            Event::Done(0) => Step::Complete(Vec::new()),
            Event::Failed(_, error) => Step::Fail(error),
            Event::Done(_) | Event::Stopped(_) => Step::skip(),
        })
    })
}

/// Box two differently typed producers into fan-in sources: index 0 carries
/// `Left` items, index 1 carries `Right` items.
pub(crate) fn tagged<A, B>(left: A, right: B) -> Vec<BoxProducer<Either<A::Item, B::Item>>>
where
    A: Producer + 'static,
    B: Producer + 'static,
{
    vec![
        left.map(|item| Either::Left(item)).boxed(),
        right.map(|item| Either::Right(item)).boxed(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::consumers::CollectConsumer;
    use crate::pipeline::pipe_to_end;
    use crate::sources::{empty, of, range};

    #[tokio::test]
    async fn concat_keeps_source_order() {
        let sink = CollectConsumer::new();
        let out = concat(vec![range(0..2).boxed(), of(vec![7, 8]).boxed()]);
        pipe_to_end(out, sink.clone()).await.unwrap();
        assert_eq!(sink.items().await, vec![0, 1, 7, 8]);
    }

    #[tokio::test]
    async fn zip_of_nothing_completes() {
        let sink = CollectConsumer::<Vec<u8>>::new();
        pipe_to_end(zip(Vec::new()), sink.clone()).await.unwrap();
        assert!(sink.items().await.is_empty());
    }

    #[tokio::test]
    async fn zip_rows_follow_index() {
        let sink = CollectConsumer::new();
        let out = zip(vec![range(0..3).boxed(), range(10..12).boxed()]);
        pipe_to_end(out, sink.clone()).await.unwrap();
        assert_eq!(sink.items().await, vec![vec![0, 10], vec![1, 11]]);
    }

    #[tokio::test]
    async fn combine_latest_completes_when_a_source_is_empty() {
        let sink = CollectConsumer::new();
        let out = combine_latest(vec![empty::<u8>().boxed(), crate::sources::never().boxed()]);
        pipe_to_end(out, sink.clone()).await.unwrap();
        assert!(sink.items().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_merge_config_is_rejected() {
        let built = merge_with_config(vec![of(vec![1]).boxed()], OperatorConfig::new().capacity(0));
        assert!(built.is_err());
    }
}
