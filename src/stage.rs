//! Bounded stage channel: a consumer on one side, a producer on the other.
//!
//! A stage is how an operator that runs its own activity (a coordinator
//! driver, a push source) hands items to whoever pulls from it. The writer
//! side suspends while `capacity` items are buffered, which is what carries
//! back-pressure upstream. Cancelling the reader closes the writer and fires
//! the stage token the writer's owner listens on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::token::{CancelReason, CancellationToken};
use crate::traits::{Consumer, Producer};

enum Frame<T> {
    Item(T),
    Error(Error),
    Close,
}

struct Shared {
    closed: AtomicBool,
    token: CancellationToken,
}

/// Create a stage with room for `capacity` in-flight items.
pub fn stage<T: Send + 'static>(capacity: usize) -> Result<(StageWriter<T>, StageReader<T>)> {
    if capacity == 0 {
        return Err(Error::configuration("stage capacity must be at least 1"));
    }
    Ok(stage_with_token(capacity, CancellationToken::new()))
}

pub(crate) fn stage_with_token<T: Send + 'static>(
    capacity: usize,
    token: CancellationToken,
) -> (StageWriter<T>, StageReader<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        closed: AtomicBool::new(false),
        token,
    });
    (
        StageWriter {
            tx,
            shared: shared.clone(),
        },
        StageReader {
            rx,
            shared,
            done: false,
        },
    )
}

/// Input side of a stage. Clones write into the same stage; closing through
/// any clone closes them all.
pub struct StageWriter<T> {
    tx: mpsc::Sender<Frame<T>>,
    shared: Arc<Shared>,
}

impl<T> Clone for StageWriter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> StageWriter<T> {
    /// Token fired when the reader side is cancelled or dropped.
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Whether further writes will be rejected.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.shared.token.is_cancelled()
    }

    async fn close_with(&self, frame: Frame<T>) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The reader may already be gone; nothing left to tell it then.
        let _ = self.tx.send(frame).await;
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer for StageWriter<T> {
    type Item = T;

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        if self.is_closed() {
            return Err(Error::sink_rejection("stage closed"));
        }
        self.tx.send(Frame::Item(item)).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.close_with(Frame::Close).await;
        Ok(())
    }

    async fn abort(&mut self, error: Error) -> Result<()> {
        self.close_with(Frame::Error(error)).await;
        Ok(())
    }
}

/// Output side of a stage.
pub struct StageReader<T> {
    rx: mpsc::Receiver<Frame<T>>,
    shared: Arc<Shared>,
    done: bool,
}

impl<T> StageReader<T> {
    /// Token shared with the writer side.
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for StageReader<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame::Item(item)) => Ok(Some(item)),
            Some(Frame::Error(error)) => {
                self.done = true;
                Err(error)
            }
            Some(Frame::Close) | None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        self.done = true;
        self.shared.closed.store(true, Ordering::Release);
        self.shared.token.cancel(reason);
        self.rx.close();
        Ok(())
    }
}

impl<T> Drop for StageReader<T> {
    fn drop(&mut self) {
        if !self.done {
            self.shared.closed.store(true, Ordering::Release);
            self.shared
                .token
                .cancel(CancelReason::Requested(Some("reader dropped".into())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        assert!(matches!(stage::<u8>(0), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn items_then_close() {
        let (mut writer, mut reader) = stage(4).unwrap();
        writer.consume(1).await.unwrap();
        writer.consume(2).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(reader.produce().await.unwrap(), Some(1));
        assert_eq!(reader.produce().await.unwrap(), Some(2));
        assert_eq!(reader.produce().await.unwrap(), None);
        assert!(writer.consume(3).await.unwrap_err().is_sink_rejection());
    }

    #[tokio::test]
    async fn abort_surfaces_after_buffered_items() {
        let (mut writer, mut reader) = stage(4).unwrap();
        writer.consume("a").await.unwrap();
        writer.abort(Error::custom("boom")).await.unwrap();

        assert_eq!(reader.produce().await.unwrap(), Some("a"));
        assert_eq!(reader.produce().await.unwrap_err().to_string(), "boom");
        assert_eq!(reader.produce().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_stage_suspends_writer() {
        let (mut writer, mut reader) = stage(1).unwrap();
        writer.consume(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(10), writer.consume(2)).await;
        assert!(blocked.is_err());

        assert_eq!(reader.produce().await.unwrap(), Some(1));
        writer.consume(3).await.unwrap();
        assert_eq!(reader.produce().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn cancelling_reader_fires_token_and_rejects_writes() {
        let (mut writer, mut reader) = stage(2).unwrap();
        reader.cancel(CancelReason::requested()).await.unwrap();

        assert_eq!(writer.token().reason(), Some(CancelReason::requested()));
        assert!(writer.consume(1).await.unwrap_err().is_sink_rejection());
        assert_eq!(reader.produce().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropping_reader_fires_token() {
        let (writer, reader) = stage::<u8>(2).unwrap();
        drop(reader);
        assert!(writer.token().is_cancelled());
        assert!(writer.is_closed());
    }
}
