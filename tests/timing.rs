//! Time-based operators, driven by tokio's paused clock

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use sluice::impls::consumers::Termination;
use sluice::prelude::*;
use tokio::time::Instant;

/// Emits each item at its offset in milliseconds from the first pull, then
/// closes right after the last one.
fn scripted<T: Send + 'static>(script: Vec<(u64, T)>) -> PushProducer<T> {
    PushProducer::new(move |ctl: &Controller<T>| {
        let ctl = ctl.clone();
        let origin = Instant::now();
        tokio::spawn(async move {
            for (at, item) in script {
                tokio::time::sleep_until(origin + Duration::from_millis(at)).await;
                if ctl.enqueue(item).is_err() {
                    return;
                }
            }
            ctl.close();
        });
        Ok(())
    })
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Doubles each item after a 10ms pause.
struct SlowDouble;

#[async_trait]
impl Processor for SlowDouble {
    type Input = u64;
    type Output = u64;

    async fn process(&mut self, item: u64) -> Result<Vec<u64>> {
        tokio::time::sleep(ms(10)).await;
        Ok(vec![item * 2])
    }
}

/// Counts sleeps that are armed and not yet dropped.
#[derive(Clone, Debug, Default)]
struct CountingTimer {
    live: Arc<AtomicUsize>,
}

struct CountedSleep {
    inner: Pin<Box<tokio::time::Sleep>>,
    live: Arc<AtomicUsize>,
}

impl Future for CountedSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.as_mut().poll(cx)
    }
}

impl Drop for CountedSleep {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Timer for CountingTimer {
    type Sleep = CountedSleep;

    fn sleep(&self, duration: Duration) -> CountedSleep {
        self.live.fetch_add(1, Ordering::SeqCst);
        CountedSleep {
            inner: Box::pin(tokio::time::sleep(duration)),
            live: self.live.clone(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_debounce_emits_after_quiet_period() {
    let origin = Instant::now();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let sink = consumer_from_fn(move |x: i32| {
        log.lock().unwrap().push((x, origin.elapsed()));
        async { Ok(()) }
    });

    let source = scripted(vec![(0, 1), (20, 2), (40, 3), (100, 4)]);
    pipe_to_end(source.debounce(ms(50)), sink).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 3);
    assert!(seen[0].1 >= ms(90) && seen[0].1 < ms(100));
    // The last value is flushed when the source completes.
    assert_eq!(seen[1].0, 4);
    assert!(seen[1].1 >= ms(100) && seen[1].1 < ms(140));
}

#[tokio::test(start_paused = true)]
async fn test_throttle_leading_and_trailing() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (20, 2), (40, 3), (60, 4), (80, 5)]);
    let config = ThrottleConfig::new().leading(true).trailing(true);
    pipe_to_end(source.throttle(ms(50), config), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![1, 3, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_leading_only() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (20, 2), (40, 3), (60, 4), (80, 5)]);
    pipe_to_end(source.throttle(ms(50), ThrottleConfig::default()), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![1, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_trailing_only() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (20, 2), (40, 3), (60, 4), (80, 5)]);
    let config = ThrottleConfig::new().leading(false).trailing(true);
    pipe_to_end(throttle(source, ms(50), config), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![3, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_audit_time_drops_value_pending_at_completion() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (10, 2), (30, 3), (70, 4), (75, 5)]);
    pipe_to_end(source.audit_time(ms(25)), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_sample_on_notifier() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (10, 2), (30, 3), (60, 4)]);
    let ticks = scripted(vec![(15, ()), (20, ()), (40, ())]);
    pipe_to_end(sample(source, ticks), sink.clone()).await.unwrap();
    // The tick at 20ms reports 2 again since nothing newer arrived.
    assert_eq!(sink.items().await, vec![2, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_sample_repeats_while_source_is_quiet() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (100, 2)]);
    let ticks = scripted(vec![(10, ()), (20, ()), (30, ())]);
    pipe_to_end(source.sample(ticks), sink.clone()).await.unwrap();
    assert_eq!(sink.items().await, vec![1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_on_slow_item() {
    let sink = CollectConsumer::new();
    let source = scripted(vec![(0, 1), (30, 2), (200, 3)]);
    let err = pipe_to_end(source.timeout(ms(100)), sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { duration_ms: 100 }));
    assert_eq!(sink.items().await, vec![1, 2]);
    assert!(matches!(sink.termination().await, Termination::Aborted(_)));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_timer_ticks() {
    let origin = Instant::now();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let sink = consumer_from_fn(move |tick: u64| {
        log.lock().unwrap().push((tick, origin.elapsed()));
        async { Ok(()) }
    });

    pipe_to_end(timer(ms(20), Some(ms(10))).take(3), sink)
        .await
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    let ticks: Vec<u64> = seen.iter().map(|(tick, _)| *tick).collect();
    assert_eq!(ticks, vec![0, 1, 2]);
    assert!(seen[0].1 >= ms(20));
    assert!(seen[2].1 >= ms(40));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_armed_debounce_timer() {
    let timer = CountingTimer::default();
    let live = timer.live.clone();
    let token = CancellationToken::new();
    let sink = CollectConsumer::new();

    // Ticks every 10ms keep re-arming a 50ms deadline that never fires.
    let run = tokio::spawn(pipe(
        debounce_with_timer(interval(ms(10)), ms(50), timer),
        sink.clone(),
        PipeOptions::new().signal(token.clone()),
    ));

    tokio::time::sleep(ms(35)).await;
    assert_eq!(live.load(Ordering::SeqCst), 1);

    token.cancel(CancelReason::requested());
    let outcome = run.await.unwrap().unwrap();
    assert!(matches!(outcome, PipeOutcome::Cancelled(_)));
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(sink.items().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_zero_period_interval_is_rejected() {
    let sink = CollectConsumer::new();
    let err = pipe_to_end(interval(Duration::ZERO), sink).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_keeps_items_from_slow_stage() {
    // Each output lands 10ms after the last, so every one outlives the 5ms
    // quiet window even though the window expires mid-processing.
    let sink = CollectConsumer::new();
    let staged = of(vec![1u64, 2, 3]).through(SlowDouble);
    pipe_to_end(staged.debounce(ms(5)), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![2, 4, 6]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_over_slow_stage() {
    let sink = CollectConsumer::new();
    let staged = of(vec![1u64, 2, 3]).through(SlowDouble);
    pipe_to_end(staged.timeout(ms(15)), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.items().await, vec![2, 4, 6]);

    let sink = CollectConsumer::new();
    let staged = of(vec![1u64, 2]).through(SlowDouble);
    let err = pipe_to_end(staged.timeout(ms(5)), sink.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { duration_ms: 5 }));
    assert!(sink.items().await.is_empty());
}
