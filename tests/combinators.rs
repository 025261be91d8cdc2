//! Multi-source combinators

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice::impls::consumers::Termination;
use sluice::prelude::*;
use tokio::time::Instant;

type Reasons = Arc<Mutex<Vec<CancelReason>>>;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Emits each item at its offset from the first pull and closes after the
/// last one unless `stay_open` is set. Cancel reasons land in `reasons`.
fn scripted<T: Send + 'static>(
    script: Vec<(u64, T)>,
    stay_open: bool,
    reasons: Reasons,
) -> PushProducer<T> {
    PushProducer::new(move |ctl: &Controller<T>| {
        let ctl = ctl.clone();
        let origin = Instant::now();
        tokio::spawn(async move {
            for (at, item) in script {
                tokio::time::sleep_until(origin + ms(at)).await;
                if ctl.enqueue(item).is_err() {
                    return;
                }
            }
            if !stay_open {
                ctl.close();
            }
        });
        Ok(())
    })
    .on_cancel(move |reason| reasons.lock().unwrap().push(reason))
}

#[tokio::test]
async fn test_zip2_pairs_by_index() {
    let sink = CollectConsumer::new();
    pipe_to_end(zip2(of(vec![1, 2, 3]), of(vec!['a', 'b'])), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![(1, 'a'), (2, 'b')]);
}

#[tokio::test(start_paused = true)]
async fn test_zip2_completes_without_draining_endless_side() {
    let sink = CollectConsumer::new();
    let counting = interval(ms(10)).map(|i| i + 1);
    pipe_to_end(zip2(counting, of(vec!['a', 'b'])), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![(1, 'a'), (2, 'b')]);
    assert!(matches!(sink.termination().await, Termination::Finished));
}

#[tokio::test(start_paused = true)]
async fn test_zip2_paces_fast_side_by_slow_side() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = pulls.clone();
    let fast = PushProducer::new(|_: &Controller<u64>| Ok(())).on_pull(move |ctl| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        ctl.enqueue(n as u64)
    });
    let slow = interval(ms(50)).take(3);

    let sink = CollectConsumer::new();
    pipe_to_end(zip2(fast, slow), sink.clone()).await.unwrap();

    assert_eq!(sink.items().await, vec![(0, 0), (1, 1), (2, 2)]);
    // One pull per row, plus at most one for the row cut short by completion.
    assert!(pulls.load(Ordering::SeqCst) <= 4);
}

#[tokio::test(start_paused = true)]
async fn test_combine_latest2_waits_for_both_sides() {
    let idle = Reasons::default();
    let left = scripted(vec![(0, 1)], true, idle.clone());
    let right = interval(ms(10)).take(2).map(|i| (i + 1) * 10);

    let sink = CollectConsumer::new();
    pipe_to_end(combine_latest2(left, right).take(2), sink.clone())
        .await
        .unwrap();

    assert_eq!(sink.items().await, vec![(1, 10), (1, 20)]);
    // The idle side was still open and gets released when the output is done.
    assert_eq!(*idle.lock().unwrap(), vec![CancelReason::Finished]);
}

#[tokio::test(start_paused = true)]
async fn test_merge_failure_cancels_every_sibling() {
    let reasons = Reasons::default();
    let mut sources: Vec<BoxProducer<u32>> = (0..3)
        .map(|i| scripted(vec![(0, i)], true, reasons.clone()).boxed())
        .collect();
    sources.push(
        from_future(async {
            tokio::time::sleep(ms(10)).await;
            Err::<u32, _>(Error::custom("source 3 failed"))
        })
        .boxed(),
    );

    let sink = CollectConsumer::new();
    let err = pipe_to_end(merge(sources), sink.clone()).await.unwrap_err();

    assert_eq!(err.to_string(), "source 3 failed");
    assert_eq!(
        *reasons.lock().unwrap(),
        vec![CancelReason::SiblingFailed; 3]
    );
    let mut items = sink.items().await;
    items.sort();
    assert_eq!(items, vec![0, 1, 2]);
    assert!(matches!(sink.termination().await, Termination::Aborted(_)));
}

#[tokio::test(start_paused = true)]
async fn test_merge_interleaves_by_arrival() {
    let quiet = Reasons::default();
    let odd = scripted(vec![(10, 1), (30, 3)], false, quiet.clone());
    let even = scripted(vec![(20, 2), (40, 4)], false, quiet.clone());

    let sink = CollectConsumer::new();
    pipe_to_end(odd.merge_with(even), sink.clone()).await.unwrap();

    assert_eq!(sink.items().await, vec![1, 2, 3, 4]);
    assert!(quiet.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_race_cancels_losers() {
    let slow_reasons = Reasons::default();
    let fast_reasons = Reasons::default();
    let slow = scripted(vec![(30, "slow")], false, slow_reasons.clone());
    let fast = scripted(vec![(10, "fast")], false, fast_reasons.clone());

    let sink = CollectConsumer::new();
    pipe_to_end(race(vec![slow.boxed(), fast.boxed()]), sink.clone())
        .await
        .unwrap();

    assert_eq!(sink.items().await, vec!["fast"]);
    assert_eq!(*slow_reasons.lock().unwrap(), vec![CancelReason::Lost]);
    assert!(fast_reasons.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_with_latest_from_pairs_with_newest_value() {
    let quiet = Reasons::default();
    let upstream = scripted(vec![(0, 1), (20, 2), (40, 3)], false, quiet.clone());
    let other = scripted(vec![(10, 'x'), (30, 'y')], false, quiet.clone());

    let sink = CollectConsumer::new();
    pipe_to_end(upstream.with_latest_from(other), sink.clone())
        .await
        .unwrap();

    // The first item arrives before `other` has a value and is dropped.
    assert_eq!(sink.items().await, vec![(2, 'x'), (3, 'y')]);
}

#[tokio::test(start_paused = true)]
async fn test_concat_starts_next_source_after_previous_completes() {
    let origin = Instant::now();
    let started = Arc::new(Mutex::new(None));
    let mark = started.clone();
    let second = PushProducer::new(move |ctl: &Controller<u64>| {
        *mark.lock().unwrap() = Some(origin.elapsed());
        ctl.enqueue(99)?;
        ctl.close();
        Ok(())
    });

    let sink = CollectConsumer::new();
    let out = concat(vec![timer(ms(25), None).boxed(), second.boxed()]);
    pipe_to_end(out, sink.clone()).await.unwrap();

    assert_eq!(sink.items().await, vec![0, 99]);
    let started = started.lock().unwrap().unwrap();
    assert!(started >= ms(25));
}

#[tokio::test(start_paused = true)]
async fn test_take_until_cancels_upstream_as_finished() {
    let reasons = Reasons::default();
    let upstream = scripted(vec![(0, 1), (10, 2), (50, 3)], false, reasons.clone());

    let sink = CollectConsumer::new();
    pipe_to_end(upstream.take_until(timer(ms(30), None)), sink.clone())
        .await
        .unwrap();

    assert_eq!(sink.items().await, vec![1, 2]);
    assert_eq!(*reasons.lock().unwrap(), vec![CancelReason::Finished]);
}
