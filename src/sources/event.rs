//! Event-listener sources.
//!
//! Emitters come with one of three registration styles. [`ListenerTarget`]
//! names the style once, when the source is built, and [`from_event`] turns
//! the registration into a producer whose cancel hook removes the listener.

use std::sync::{Arc, OnceLock};

use crate::push::{Controller, PushProducer};

/// Callback handed to an emitter.
pub type Handler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// `on` / `off` registration.
pub trait OnOff<E>: Send + Sync {
    fn on(&self, event: &str, handler: Handler<E>) -> ListenerId;
    fn off(&self, event: &str, id: ListenerId);
}

/// `add_listener` / `remove_listener` registration.
pub trait AddListener<E>: Send + Sync {
    fn add_listener(&self, event: &str, handler: Handler<E>) -> ListenerId;
    fn remove_listener(&self, event: &str, id: ListenerId);
}

/// `add_event_listener` / `remove_event_listener` registration.
pub trait EventListener<E>: Send + Sync {
    fn add_event_listener(&self, event: &str, handler: Handler<E>) -> ListenerId;
    fn remove_event_listener(&self, event: &str, id: ListenerId);
}

/// An emitter together with the registration style it speaks.
pub enum ListenerTarget<E> {
    OnOff(Arc<dyn OnOff<E>>),
    AddListener(Arc<dyn AddListener<E>>),
    EventListener(Arc<dyn EventListener<E>>),
}

impl<E> ListenerTarget<E> {
    pub fn on_off<T: OnOff<E> + 'static>(target: T) -> Self {
        ListenerTarget::OnOff(Arc::new(target))
    }

    pub fn add_listener<T: AddListener<E> + 'static>(target: T) -> Self {
        ListenerTarget::AddListener(Arc::new(target))
    }

    pub fn event_listener<T: EventListener<E> + 'static>(target: T) -> Self {
        ListenerTarget::EventListener(Arc::new(target))
    }

    fn attach(&self, event: &str, handler: Handler<E>) -> ListenerId {
        match self {
            ListenerTarget::OnOff(target) => target.on(event, handler),
            ListenerTarget::AddListener(target) => target.add_listener(event, handler),
            ListenerTarget::EventListener(target) => target.add_event_listener(event, handler),
        }
    }

    fn detach(&self, event: &str, id: ListenerId) {
        match self {
            ListenerTarget::OnOff(target) => target.off(event, id),
            ListenerTarget::AddListener(target) => target.remove_listener(event, id),
            ListenerTarget::EventListener(target) => target.remove_event_listener(event, id),
        }
    }
}

/// Emit every `event` the target fires. Never completes on its own; the
/// listener is registered on the first pull and removed on cancel or when
/// the started producer is dropped.
pub fn from_event<E: Send + 'static>(
    target: ListenerTarget<E>,
    event: impl Into<String>,
) -> PushProducer<E> {
    let target = Arc::new(target);
    let event: Arc<str> = Arc::from(event.into());
    let attached = Arc::new(OnceLock::new());

    let (start_target, start_event, start_attached) =
        (target.clone(), event.clone(), attached.clone());

    PushProducer::new(move |ctl: &Controller<E>| {
        let ctl = ctl.clone();
        let handler: Handler<E> = Arc::new(move |value| {
            // Late events after cancellation have nowhere to go.
            let _ = ctl.enqueue(value);
        });
        let id = start_target.attach(&start_event, handler);
        let _ = start_attached.set(id);
        Ok(())
    })
    .on_cancel(move |_reason| {
        if let Some(id) = attached.get() {
            target.detach(&event, *id);
        }
    })
}
