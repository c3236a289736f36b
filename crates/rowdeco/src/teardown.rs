//! Single-fire stop signal.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use pin_project::pin_project;

#[derive(Clone, Default)]
pub struct Teardown {
    inner: Rc<TeardownInner>,
}

#[derive(Default)]
struct TeardownInner {
    fired: Cell<bool>,
    callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
    wakers: RefCell<Vec<Waker>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.get()
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        if self.inner.fired.replace(true) {
            return false;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Runs immediately when the signal already fired.
    pub fn on_fire(&self, callback: impl FnOnce() + 'static) {
        if self.is_fired() {
            callback();
        } else {
            self.inner.callbacks.borrow_mut().push(Box::new(callback));
        }
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.inner.wakers.borrow_mut();
        if !wakers.iter().any(|known| known.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    /// Resolves once the signal fired.
    pub fn fired(&self) -> Fired {
        Fired {
            teardown: self.clone(),
        }
    }

    /// Races `future` against this signal. Yields `None` when the signal wins.
    pub fn guard<F: Future>(&self, future: F) -> Until<F> {
        Until {
            future,
            teardown: self.clone(),
        }
    }
}

pub struct Fired {
    teardown: Teardown,
}

impl Future for Fired {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.teardown.is_fired() {
            Poll::Ready(())
        } else {
            self.teardown.register(cx.waker());
            Poll::Pending
        }
    }
}

#[pin_project]
pub struct Until<F> {
    #[pin]
    future: F,
    teardown: Teardown,
}

impl<F: Future> Future for Until<F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.teardown.is_fired() {
            return Poll::Ready(None);
        }
        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Some(output));
        }
        this.teardown.register(cx.waker());
        Poll::Pending
    }
}
