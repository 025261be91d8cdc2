//! Producer and consumer impls for the adapters built by `ProducerExt` and
//! `ConsumerExt`. Every producer adapter forwards `cancel` to its source.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::token::CancelReason;
use crate::traits::{
    Consumer, Contramap, Filter, Map, ProcessStep, Processor, Producer, Take, Through,
};

#[async_trait]
impl<P, F, U> Producer for Map<P, F>
where
    P: Producer,
    F: FnMut(P::Item) -> U + Send,
    U: Send + 'static,
{
    type Item = U;

    async fn produce(&mut self) -> Result<Option<U>> {
        let next = self.producer.produce().await?;
        Ok(next.map(&mut self.f))
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        self.producer.cancel(reason).await
    }
}

#[async_trait]
impl<P, F> Producer for Filter<P, F>
where
    P: Producer,
    F: FnMut(&P::Item) -> bool + Send,
{
    type Item = P::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        while let Some(item) = self.producer.produce().await? {
            if (self.predicate)(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        self.producer.cancel(reason).await
    }
}

#[async_trait]
impl<P> Producer for Take<P>
where
    P: Producer,
{
    type Item = P::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if self.remaining == 0 {
            // Upstream may be infinite; let go of it once we are done with it.
            if !self.released {
                self.released = true;
                self.producer.cancel(CancelReason::Finished).await?;
            }
            return Ok(None);
        }

        match self.producer.produce().await? {
            Some(item) => {
                self.remaining -= 1;
                Ok(Some(item))
            }
            None => {
                self.released = true;
                self.remaining = 0;
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.producer.cancel(reason).await
    }
}

#[async_trait]
impl<P, R> Producer for Through<P, R>
where
    P: Producer,
    R: Processor<Input = P::Item> + 'static,
{
    type Item = R::Output;

    // Cancel-safe: the input is handed to `in_flight` with no await in
    // between, and a dropped call resumes that step instead of re-pulling.
    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        loop {
            if let Some(output) = self.pending.pop_front() {
                return Ok(Some(output));
            }

            if let Some(step) = self.in_flight.as_mut() {
                let (processor, outputs) = step.await;
                self.in_flight = None;
                self.processor = Some(processor);
                self.pending.extend(outputs?);
                continue;
            }

            if self.upstream_done {
                return Ok(None);
            }

            let next = self.producer.produce().await?;
            let Some(mut processor) = self.processor.take() else {
                return Ok(None);
            };
            let step: ProcessStep<R> = match next {
                Some(input) => Box::pin(async move {
                    let outputs = processor.process(input).await;
                    (processor, outputs)
                }),
                None => {
                    self.upstream_done = true;
                    Box::pin(async move {
                        let outputs = processor.finish().await;
                        (processor, outputs)
                    })
                }
            };
            self.in_flight = Some(step);
        }
    }

    async fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        self.pending.clear();
        self.in_flight = None;
        self.upstream_done = true;
        self.producer.cancel(reason).await
    }
}

#[async_trait]
impl<C, F, T> Consumer for Contramap<C, F, T>
where
    C: Consumer,
    F: FnMut(T) -> C::Item + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn start(&mut self) -> Result<()> {
        self.consumer.start().await
    }

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        let item = (self.f)(item);
        self.consumer.consume(item).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.consumer.finish().await
    }

    async fn abort(&mut self, error: Error) -> Result<()> {
        self.consumer.abort(error).await
    }
}
