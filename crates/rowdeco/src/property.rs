//! Reactive properties.
//!
//! A [`Property`] is a "current value plus change notifications" cell. Decoration inputs
//! arrive as plain values, futures or streams ([`Input`]) and are normalized into a
//! property, so the rest of the engine only ever deals with one shape.
//!
//! Delivery is synchronous and strictly ordered: a value set from inside a subscriber
//! callback is queued until every subscriber has seen the previous value.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures_channel::oneshot;
use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::{LocalBoxStream, Stream, StreamExt};

use crate::event_loop::{EventLoop, TaskHandle};

/// A value source a caller can hand to the engine.
pub enum Input<T> {
    Value(T),
    Future(LocalBoxFuture<'static, T>),
    Stream(LocalBoxStream<'static, T>),
}

impl<T> Input<T> {
    pub fn value(value: T) -> Self {
        Input::Value(value)
    }

    pub fn future(future: impl Future<Output = T> + 'static) -> Self {
        Input::Future(future.boxed_local())
    }

    pub fn stream(stream: impl Stream<Item = T> + 'static) -> Self {
        Input::Stream(stream.boxed_local())
    }
}

impl<T: 'static> Input<T> {
    /// Applies `map` to every value the input will produce.
    pub fn map<R: 'static>(self, map: impl Fn(T) -> R + 'static) -> Input<R> {
        match self {
            Input::Value(value) => Input::Value(map(value)),
            Input::Future(future) => Input::future(future.map(map)),
            Input::Stream(stream) => Input::stream(stream.map(map)),
        }
    }
}

impl<T> From<T> for Input<T> {
    fn from(value: T) -> Self {
        Input::Value(value)
    }
}

/// RAII handle: dropping it unsubscribes.
///
/// # Example
/// ```ignore
/// let name = Property::constant("inbox".to_string());
/// let subscription = name.subscribe(|value| println!("{value}"));
/// drop(subscription); // no more callbacks
/// ```
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Keep the subscription alive for as long as the property lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Subscriber<T> {
    id: u64,
    callback: Rc<dyn Fn(&T)>,
}

struct PropertyInner<T> {
    current: RefCell<Option<T>>,
    subscribers: RefCell<Vec<Subscriber<T>>>,
    next_subscriber: Cell<u64>,
    delivering: Cell<bool>,
    queued: RefCell<VecDeque<T>>,
    ended: Cell<bool>,
    /// Task feeding a future or stream input.
    feed: RefCell<Option<TaskHandle>>,
    /// Subscriptions on the properties this one is derived from.
    upstream: RefCell<Vec<Subscription>>,
}

/// A reactive cell with an optional current value.
pub struct Property<T> {
    inner: Rc<PropertyInner<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Property<T> {
    /// A property without a value yet.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                current: RefCell::new(None),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(0),
                delivering: Cell::new(false),
                queued: RefCell::new(VecDeque::new()),
                ended: Cell::new(false),
                feed: RefCell::new(None),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn constant(value: T) -> Self {
        let property = Self::new();
        *property.inner.current.borrow_mut() = Some(value);
        property
    }

    /// Normalize an [`Input`]. Futures and streams are driven by a task on `event_loop`
    /// that lives as long as the property.
    pub fn from_input(input: Input<T>, event_loop: &EventLoop) -> Self {
        match input {
            Input::Value(value) => Self::constant(value),
            Input::Future(future) => {
                let property = Self::new();
                let weak = Rc::downgrade(&property.inner);
                let task = event_loop.spawn(async move {
                    let value = future.await;
                    if let Some(inner) = weak.upgrade() {
                        Property { inner }.set(value);
                    }
                });
                *property.inner.feed.borrow_mut() = Some(task);
                property
            }
            Input::Stream(mut stream) => {
                let property = Self::new();
                let weak = Rc::downgrade(&property.inner);
                let task = event_loop.spawn(async move {
                    while let Some(value) = stream.next().await {
                        let Some(inner) = weak.upgrade() else {
                            return;
                        };
                        Property { inner }.set(value);
                    }
                });
                *property.inner.feed.borrow_mut() = Some(task);
                property
            }
        }
    }

    pub fn get(&self) -> Option<T> {
        self.inner.current.borrow().clone()
    }

    pub fn has_value(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Store `value` and notify every subscriber. Ignored once the property ended.
    pub fn set(&self, value: T) {
        if self.inner.ended.get() {
            return;
        }
        if self.inner.delivering.get() {
            self.inner.queued.borrow_mut().push_back(value);
            return;
        }
        self.inner.delivering.set(true);
        let mut next = Some(value);
        while let Some(value) = next {
            *self.inner.current.borrow_mut() = Some(value.clone());
            self.deliver(&value);
            next = self.inner.queued.borrow_mut().pop_front();
        }
        self.inner.delivering.set(false);
    }

    fn deliver(&self, value: &T) {
        let subscribers: Vec<(u64, Rc<dyn Fn(&T)>)> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|subscriber| (subscriber.id, Rc::clone(&subscriber.callback)))
            .collect();
        for (id, callback) in subscribers {
            // A callback earlier in this round may have unsubscribed a later one.
            if self.inner.ended.get() || !self.is_subscribed(id) {
                continue;
            }
            callback(value);
        }
    }

    fn is_subscribed(&self, id: u64) -> bool {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|subscriber| subscriber.id == id)
    }

    /// Receive the current value (if any) right away, then every later value.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        let callback: Rc<dyn Fn(&T)> = Rc::new(callback);
        if !self.inner.ended.get() {
            self.inner.subscribers.borrow_mut().push(Subscriber {
                id,
                callback: Rc::clone(&callback),
            });
        }
        let current = self.get();
        if let Some(value) = current {
            callback(&value);
        }

        let weak: Weak<PropertyInner<T>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = {
                    let mut subscribers = inner.subscribers.borrow_mut();
                    subscribers
                        .iter()
                        .position(|subscriber| subscriber.id == id)
                        .map(|index| subscribers.remove(index))
                };
                drop(removed);
            }
        })
    }

    /// Stop delivering. Drops subscribers, the feeding task and upstream subscriptions.
    pub fn end(&self) {
        if self.inner.ended.replace(true) {
            return;
        }
        let subscribers = std::mem::take(&mut *self.inner.subscribers.borrow_mut());
        let feed = self.inner.feed.borrow_mut().take();
        let upstream = std::mem::take(&mut *self.inner.upstream.borrow_mut());
        drop(subscribers);
        drop(feed);
        drop(upstream);
    }

    /// A property that holds `combine(self, other)` whenever both sides have a value and
    /// recomputes on every change of either side.
    pub fn combine_latest<U, R>(
        &self,
        other: &Property<U>,
        combine: impl Fn(&T, &U) -> R + 'static,
    ) -> Property<R>
    where
        U: Clone + 'static,
        R: Clone + 'static,
    {
        let combined = Property::<R>::new();
        let combine = Rc::new(combine);
        // Both subscriptions deliver the current value on subscribe; emit once afterwards.
        let priming = Rc::new(Cell::new(true));

        let left = {
            let target = Rc::downgrade(&combined.inner);
            let other = other.clone();
            let combine = Rc::clone(&combine);
            let priming = Rc::clone(&priming);
            self.subscribe(move |left: &T| {
                if priming.get() {
                    return;
                }
                if let (Some(inner), Some(right)) = (target.upgrade(), other.get()) {
                    Property { inner }.set(combine(left, &right));
                }
            })
        };
        let right = {
            let target = Rc::downgrade(&combined.inner);
            let this = self.clone();
            let combine = Rc::clone(&combine);
            let priming = Rc::clone(&priming);
            other.subscribe(move |right: &U| {
                if priming.get() {
                    return;
                }
                if let (Some(inner), Some(left)) = (target.upgrade(), this.get()) {
                    Property { inner }.set(combine(&left, right));
                }
            })
        };
        combined.inner.upstream.borrow_mut().extend([left, right]);
        priming.set(false);

        if let (Some(left), Some(right)) = (self.get(), other.get()) {
            combined.set(combine(&left, &right));
        }
        combined
    }

    pub fn map<R: Clone + 'static>(&self, map: impl Fn(&T) -> R + 'static) -> Property<R> {
        let mapped = Property::<R>::new();
        let target = Rc::downgrade(&mapped.inner);
        let subscription = self.subscribe(move |value| {
            if let Some(inner) = target.upgrade() {
                Property { inner }.set(map(value));
            }
        });
        mapped.inner.upstream.borrow_mut().push(subscription);
        mapped
    }

    /// Resolves with the current value, or with the first one set later. Yields `None`
    /// when the property ends without ever getting a value.
    pub fn first_value(&self) -> impl Future<Output = Option<T>> + 'static {
        let current = self.get();
        let (sender, receiver) = oneshot::channel::<T>();
        let subscription = if current.is_none() {
            let sender = RefCell::new(Some(sender));
            Some(self.subscribe(move |value: &T| {
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(value.clone());
                }
            }))
        } else {
            None
        };
        async move {
            if let Some(value) = current {
                return Some(value);
            }
            let received = receiver.await.ok();
            drop(subscription);
            received
        }
    }
}
