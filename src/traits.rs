//! The pull protocol shared by every source, operator and sink.
//!
//! This module defines the three-party protocol every operator speaks: a
//! [`Producer`] hands out items when asked, a [`Consumer`] accepts them one at
//! a time, and a [`Processor`] sits between the two as the body of a Stage.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::token::CancelReason;

/// Pull side of the protocol: yields one item per call.
///
/// Producers are lazy: nothing runs until the first call to
/// [`produce`](Producer::produce). `produce` must be cancel-safe, since pipes
/// race it against cancellation tokens and drop the losing future.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sluice::error::Result;
/// use sluice::traits::Producer;
///
/// /// Hands out the lines of a buffered document, then ends.
/// struct Lines {
///     remaining: std::vec::IntoIter<String>,
/// }
///
/// #[async_trait]
/// impl Producer for Lines {
///     type Item = String;
///
///     async fn produce(&mut self) -> Result<Option<String>> {
///         Ok(self.remaining.next())
///     }
/// }
/// ```
#[async_trait]
pub trait Producer: Send {
    /// Item yielded by each successful pull.
    type Item: Send + 'static;

    /// Produce the next item, `None` once the producer is exhausted, or the
    /// producer's terminal error.
    async fn produce(&mut self) -> Result<Option<Self::Item>>;

    /// Teardown hook run when downstream stops reading before natural
    /// completion. Implementations must tolerate being called more than once.
    async fn cancel(&mut self, _reason: CancelReason) -> Result<()> {
        Ok(())
    }
}

/// Type-erased producer, the form coordinators store their sources in.
pub type BoxProducer<T> = Box<dyn Producer<Item = T> + Send>;

#[async_trait]
impl<P> Producer for Box<P>
where
    P: Producer + ?Sized,
{
    type Item = P::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        (**self).produce().await
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        (**self).cancel(reason).await
    }
}

/// Push side of the protocol: accepts items one at a time.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sluice::error::{Error, Result};
/// use sluice::traits::Consumer;
///
/// /// Keeps a running byte total and refuses anything past `budget`.
/// struct ByteBudget {
///     used: usize,
///     budget: usize,
/// }
///
/// #[async_trait]
/// impl Consumer for ByteBudget {
///     type Item = Vec<u8>;
///
///     async fn consume(&mut self, chunk: Vec<u8>) -> Result<()> {
///         if self.used + chunk.len() > self.budget {
///             return Err(Error::custom("byte budget exceeded"));
///         }
///         self.used += chunk.len();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer: Send {
    /// Item accepted by [`consume`](Consumer::consume).
    type Item: Send + 'static;

    /// Called once by [`pipe`](crate::pipeline::pipe) before the first item.
    /// An error ends the pipe before the producer is pulled.
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Accept a single item. An error means the item was not taken and the
    /// upstream pipe must stop.
    async fn consume(&mut self, item: Self::Item) -> Result<()>;

    /// Upstream ended normally. No more items follow.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the upstream producer failed.
    async fn abort(&mut self, _error: Error) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<C> Consumer for Box<C>
where
    C: Consumer + ?Sized,
{
    type Item = C::Item;

    async fn start(&mut self) -> Result<()> {
        (**self).start().await
    }

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        (**self).consume(item).await
    }

    async fn finish(&mut self) -> Result<()> {
        (**self).finish().await
    }

    async fn abort(&mut self, error: Error) -> Result<()> {
        (**self).abort(error).await
    }
}

/// Stage body: turns each input into zero or more outputs.
///
/// Attach one to a producer with [`ProducerExt::through`] to get a Stage.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sluice::error::Result;
/// use sluice::traits::Processor;
///
/// /// Splits text chunks on whitespace.
/// struct Words;
///
/// #[async_trait]
/// impl Processor for Words {
///     type Input = String;
///     type Output = String;
///
///     async fn process(&mut self, chunk: String) -> Result<Vec<String>> {
///         Ok(chunk.split_whitespace().map(str::to_owned).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Handle one input. An empty Vec swallows the item.
    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;

    /// Flush whatever is still buffered once upstream ends.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }
}

/// Extension trait for composing producers.
pub trait ProducerExt: Producer + Sized {
    /// Map items through a function
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        F: FnMut(Self::Item) -> U + Send,
        U: Send + 'static,
    {
        Map { producer: self, f }
    }

    /// Filter items with a predicate
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        F: FnMut(&Self::Item) -> bool + Send,
    {
        Filter {
            producer: self,
            predicate,
        }
    }

    /// Take only the first n items, then cancel upstream
    fn take(self, n: usize) -> Take<Self> {
        Take {
            producer: self,
            remaining: n,
            released: false,
        }
    }

    /// Run every item through a processor
    fn through<R>(self, processor: R) -> Through<Self, R>
    where
        R: Processor<Input = Self::Item> + 'static,
    {
        Through {
            producer: self,
            processor: Some(processor),
            in_flight: None,
            pending: std::collections::VecDeque::new(),
            upstream_done: false,
        }
    }

    /// Hand this producer to an operator constructor, so free-function
    /// operators chain like methods.
    fn pipe_through<P, F>(self, operator: F) -> P
    where
        F: FnOnce(Self) -> P,
        P: Producer,
    {
        operator(self)
    }

    /// Erase the concrete producer type
    fn boxed(self) -> BoxProducer<Self::Item>
    where
        Self: 'static,
    {
        Box::new(self)
    }

    /// Bridge into a `futures` stream. The stream ends after the first error.
    fn into_stream(self) -> futures::stream::BoxStream<'static, Result<Self::Item>>
    where
        Self: 'static,
    {
        Box::pin(futures::stream::unfold(Some(self), |state| async move {
            let mut producer = state?;
            match producer.produce().await {
                Ok(Some(item)) => Some((Ok(item), Some(producer))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        }))
    }
}

impl<P: Producer> ProducerExt for P {}

/// Extension trait for consumers
pub trait ConsumerExt: Consumer + Sized {
    /// Create a consumer that applies a function to each item before consuming
    fn contramap<F, T>(self, f: F) -> Contramap<Self, F, T>
    where
        F: FnMut(T) -> Self::Item + Send,
        T: Send + 'static,
    {
        Contramap {
            consumer: self,
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<C: Consumer> ConsumerExt for C {}

pub struct Map<P, F> {
    pub(crate) producer: P,
    pub(crate) f: F,
}

pub struct Filter<P, F> {
    pub(crate) producer: P,
    pub(crate) predicate: F,
}

pub struct Take<P> {
    pub(crate) producer: P,
    pub(crate) remaining: usize,
    pub(crate) released: bool,
}

/// A processor call that owns the processor until it resolves, so a dropped
/// `produce` can pick it up again on the next pull.
pub(crate) type ProcessStep<R> = futures::future::BoxFuture<
    'static,
    (R, Result<Vec<<R as Processor>::Output>>),
>;

pub struct Through<P, R: Processor> {
    pub(crate) producer: P,
    pub(crate) processor: Option<R>,
    pub(crate) in_flight: Option<ProcessStep<R>>,
    pub(crate) pending: std::collections::VecDeque<R::Output>,
    pub(crate) upstream_done: bool,
}

pub struct Contramap<C, F, T> {
    pub(crate) consumer: C,
    pub(crate) f: F,
    pub(crate) _phantom: std::marker::PhantomData<fn(T)>,
}
