//! Turns child-list churn inside a row into a refresh property.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::event_loop::EventLoop;
use crate::host::{ChildChange, ChildObserver, Host, NodeRef};
use crate::property::Property;

/// Counter bumped once per burst of host mutations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTick(pub u64);

pub struct RefreshNotifier {
    inner: Rc<RefreshInner>,
}

struct RefreshInner {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    row: NodeRef,
    property: RefCell<Option<Property<RefreshTick>>>,
    observer: RefCell<Option<ChildObserver>>,
    scheduled: Cell<bool>,
    stopped: Cell<bool>,
}

impl RefreshNotifier {
    pub fn new(host: Rc<dyn Host>, event_loop: EventLoop, row: NodeRef) -> Self {
        Self {
            inner: Rc::new(RefreshInner {
                host,
                event_loop,
                row,
                property: RefCell::new(None),
                observer: RefCell::new(None),
                scheduled: Cell::new(false),
                stopped: Cell::new(false),
            }),
        }
    }

    /// Starts at tick 0. The host observer is connected on the first call.
    pub fn property(&self) -> Property<RefreshTick> {
        if let Some(property) = self.inner.property.borrow().as_ref() {
            return property.clone();
        }
        let property = Property::constant(RefreshTick(0));
        if self.inner.stopped.get() {
            property.end();
            return property;
        }
        *self.inner.property.borrow_mut() = Some(property.clone());

        let weak: Weak<RefreshInner> = Rc::downgrade(&self.inner);
        let observer = ChildObserver::observe(
            &self.inner.host,
            self.inner.row,
            true,
            Rc::new(move |changes: &[ChildChange]| {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule(changes.len());
                }
            }),
        );
        *self.inner.observer.borrow_mut() = Some(observer);
        property
    }

    pub fn is_observing(&self) -> bool {
        self.inner.observer.borrow().is_some()
    }

    /// Disconnects the observer and ends the property. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        let observer = self.inner.observer.borrow_mut().take();
        drop(observer);
        let property = self.inner.property.borrow_mut().take();
        if let Some(property) = property {
            property.end();
        }
    }
}

impl RefreshInner {
    fn schedule(self: Rc<Self>, changes: usize) {
        log::trace!("row {:?} saw {changes} child-list changes", self.row);
        if self.stopped.get() || self.scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(&self);
        self.event_loop.queue_microtask(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.scheduled.set(false);
            if inner.stopped.get() {
                return;
            }
            let property = inner.property.borrow().clone();
            if let Some(property) = property {
                let RefreshTick(tick) = property.get().unwrap_or_default();
                property.set(RefreshTick(tick + 1));
            }
        });
    }
}

impl Drop for RefreshNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTree;
    use crate::testing::{FakeHost, RowSpec};

    fn setup() -> (EventLoop, Rc<FakeHost>, NodeRef, RefreshNotifier) {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let list = host.add_list();
        let row = host.add_row(list, RowSpec::new("Hello", "3:00 PM", "Alice"));
        let notifier = RefreshNotifier::new(host.clone(), event_loop.clone(), row);
        (event_loop, host, row, notifier)
    }

    #[test]
    fn observer_is_connected_lazily() {
        let (_event_loop, host, _row, notifier) = setup();
        assert!(!notifier.is_observing());
        assert_eq!(host.observer_count(), 0);

        let property = notifier.property();
        assert_eq!(property.get(), Some(RefreshTick(0)));
        assert_eq!(host.observer_count(), 1);

        let _again = notifier.property();
        assert_eq!(host.observer_count(), 1);
    }

    #[test]
    fn a_burst_of_changes_is_one_tick() {
        let (event_loop, host, row, notifier) = setup();
        let property = notifier.property();
        let subject = host.subject_node(row).unwrap();
        let cell = host.parent(subject).unwrap();
        for _ in 0..3 {
            let node = host.create_element("span");
            host.insert(cell, node, None);
        }
        event_loop.run_until_idle();
        assert_eq!(property.get(), Some(RefreshTick(1)));

        host.remove(subject);
        event_loop.run_until_idle();
        assert_eq!(property.get(), Some(RefreshTick(2)));
    }

    #[test]
    fn stop_disconnects_and_ends() {
        let (event_loop, host, row, notifier) = setup();
        let property = notifier.property();
        notifier.stop();
        assert_eq!(host.observer_count(), 0);
        assert!(property.is_ended());

        host.remove(host.subject_node(row).unwrap());
        event_loop.run_until_idle();
        assert_eq!(property.get(), Some(RefreshTick(0)));
        assert!(notifier.property().is_ended());
    }
}
