//! Operators gated by a second producer.

use futures::future::Either;

use crate::coordinator::{Coordinated, Event, OperatorConfig};
use crate::operators::combine::tagged;
use crate::operators::{drive_fan_in, Step};
use crate::token::CancelReason;
use crate::traits::Producer;

/// Forward upstream items until `notifier` emits, then cancel upstream with
/// [`CancelReason::Finished`] and complete. A notifier that completes
/// without emitting leaves upstream running.
pub fn take_until<P, N>(upstream: P, notifier: N) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    N: Producer + 'static,
{
    let config = OperatorConfig::default();
    let sources = tagged(upstream, notifier);

    Coordinated::new("take_until", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, |_, event| match event {
            Event::Item(_, Either::Left(item)) => Step::emit(item),
            Event::Item(_, Either::Right(_)) | Event::Done(0) => Step::Complete(Vec::new()),
            Event::Failed(_, error) => Step::Fail(error),
            Event::Done(_) | Event::Stopped(_) => Step::skip(),
        })
    })
}

/// Drop upstream items until `notifier` emits, then forward the rest. The
/// notifier is cancelled once it has emitted.
pub fn skip_until<P, N>(upstream: P, notifier: N) -> Coordinated<P::Item>
where
    P: Producer + 'static,
    N: Producer + 'static,
{
    let config = OperatorConfig::default();
    let sources = tagged(upstream, notifier);
    let mut open = false;

    Coordinated::new("skip_until", config, move |out, token| {
        drive_fan_in(sources, config.capacity, out, token, move |fan, event| match event {
            Event::Item(_, Either::Left(item)) if open => Step::emit(item),
            Event::Item(_, Either::Left(_)) => Step::skip(),
            Event::Item(index, Either::Right(_)) => {
                if !open {
                    open = true;
                    fan.cancel(index, CancelReason::Finished);
                }
                Step::skip()
            }
            Event::Done(0) => Step::Complete(Vec::new()),
            Event::Failed(_, error) => Step::Fail(error),
            Event::Done(_) | Event::Stopped(_) => Step::skip(),
        })
    })
}
