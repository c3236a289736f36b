//! Children of an element as a stream of (child, removal signal) pairs.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event_loop::EventLoop;
use crate::host::{ChildChange, ChildObserver, Host, NodeRef};
use crate::teardown::Teardown;

/// A child of the watched element. `removal` fires once the child leaves the element or
/// the watch stops.
#[derive(Clone)]
pub struct ChildEvent {
    pub element: NodeRef,
    pub removal: Teardown,
}

/// Keeps the watch alive; dropping it stops the watch.
pub struct ChildWatch {
    inner: Rc<WatchInner>,
}

struct WatchInner {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    diagnostics: Diagnostics,
    parent: NodeRef,
    on_child: Box<dyn Fn(ChildEvent)>,
    removals: RefCell<BTreeMap<NodeRef, Teardown>>,
    observer: RefCell<Option<ChildObserver>>,
    ended: Cell<bool>,
}

/// Reports every current child of `parent`, then every child added later.
///
/// Nothing is reported synchronously: the initial children arrive in a microtask, so the
/// caller can finish wiring things up first.
pub fn watch_children(
    host: &Rc<dyn Host>,
    event_loop: &EventLoop,
    diagnostics: &Diagnostics,
    parent: NodeRef,
    on_child: impl Fn(ChildEvent) + 'static,
) -> ChildWatch {
    let inner = Rc::new(WatchInner {
        host: Rc::clone(host),
        event_loop: event_loop.clone(),
        diagnostics: diagnostics.clone(),
        parent,
        on_child: Box::new(on_child),
        removals: RefCell::new(BTreeMap::new()),
        observer: RefCell::new(None),
        ended: Cell::new(false),
    });
    let weak = Rc::downgrade(&inner);
    event_loop.queue_microtask(move || {
        if let Some(inner) = weak.upgrade() {
            inner.start();
        }
    });
    ChildWatch { inner }
}

impl WatchInner {
    fn start(self: Rc<Self>) {
        if self.ended.get() {
            return;
        }
        let weak: Weak<WatchInner> = Rc::downgrade(&self);
        let observer = ChildObserver::observe(
            &self.host,
            self.parent,
            false,
            Rc::new(move |changes: &[ChildChange]| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(changes);
                }
            }),
        );
        *self.observer.borrow_mut() = Some(observer);

        // Snapshot first: callbacks may add or remove children while we report.
        let children = self.host.children(self.parent);
        for child in children {
            if self.ended.get() {
                return;
            }
            self.added(child);
        }
    }

    /// Removals of a batch go first, so a replaced child is gone before its successor
    /// shows up. Children added and removed within one batch are never reported.
    fn apply(&self, changes: &[ChildChange]) {
        let mut removed = Vec::new();
        let mut added: Vec<NodeRef> = Vec::new();
        for change in changes {
            for child in &change.removed {
                match added.iter().position(|pending| pending == child) {
                    Some(index) => {
                        added.remove(index);
                    }
                    None => removed.push(*child),
                }
            }
            added.extend(change.added.iter().copied());
        }
        for child in removed {
            self.removed(child);
        }
        for child in added {
            if self.ended.get() {
                return;
            }
            self.added(child);
        }
    }

    fn added(&self, element: NodeRef) {
        let removal = Teardown::new();
        let previous = self
            .removals
            .borrow_mut()
            .insert(element, removal.clone());
        if let Some(previous) = previous {
            previous.fire();
        }
        (self.on_child)(ChildEvent { element, removal });
    }

    fn removed(&self, child: NodeRef) {
        let removal = self.removals.borrow_mut().remove(&child);
        match removal {
            Some(removal) => {
                removal.fire();
            }
            None => self.diagnostics.error(Diagnostic::UnknownChildRemoved {
                parent: self.parent,
                child,
            }),
        }
    }
}

impl ChildWatch {
    /// Stops watching. Outstanding removal signals fire one microtask later, never
    /// synchronously.
    pub fn stop(&self) {
        if self.inner.ended.replace(true) {
            return;
        }
        let observer = self.inner.observer.borrow_mut().take();
        drop(observer);
        let removals = std::mem::take(&mut *self.inner.removals.borrow_mut());
        self.inner.event_loop.queue_microtask(move || {
            for removal in removals.into_values() {
                removal.fire();
            }
        });
    }

    pub fn tracked(&self) -> usize {
        self.inner.removals.borrow().len()
    }
}

impl Drop for ChildWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTree;
    use crate::testing::FakeHost;

    struct Fixture {
        event_loop: EventLoop,
        host: Rc<FakeHost>,
        diagnostics: Diagnostics,
        parent: NodeRef,
    }

    fn fixture(children: usize) -> (Fixture, Vec<NodeRef>) {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let diagnostics = Diagnostics::new(event_loop.clone());
        let parent = host.add_list();
        let nodes = (0..children)
            .map(|_| {
                let node = host.create_element("div");
                host.insert(parent, node, None);
                node
            })
            .collect();
        event_loop.run_until_idle();
        (
            Fixture {
                event_loop,
                host,
                diagnostics,
                parent,
            },
            nodes,
        )
    }

    fn watch(fixture: &Fixture, on_child: impl Fn(ChildEvent) + 'static) -> ChildWatch {
        let host: Rc<dyn Host> = fixture.host.clone();
        watch_children(
            &host,
            &fixture.event_loop,
            &fixture.diagnostics,
            fixture.parent,
            on_child,
        )
    }

    #[test]
    fn reports_existing_then_added_children() {
        let (fixture, nodes) = fixture(2);
        let (child1, child2) = (nodes[0], nodes[1]);
        let child3 = fixture.host.create_element("div");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _watch = {
            let seen = Rc::clone(&seen);
            let host = fixture.host.clone();
            let parent = fixture.parent;
            watch(&fixture, move |event| {
                seen.borrow_mut().push(event.element);
                if event.element == child1 {
                    let host = host.clone();
                    event.removal.on_fire(move || host.insert(parent, child3, None));
                }
            })
        };
        assert!(seen.borrow().is_empty());

        fixture.event_loop.run_until_idle();
        assert_eq!(*seen.borrow(), vec![child1, child2]);

        fixture.host.remove(child1);
        fixture.event_loop.run_until_idle();
        assert_eq!(*seen.borrow(), vec![child1, child2, child3]);
        assert!(fixture.diagnostics.is_empty());
    }

    #[test]
    fn stopping_fires_removals_one_microtask_later() {
        let (fixture, nodes) = fixture(1);
        let child2 = fixture.host.create_element("div");
        let removals = Rc::new(RefCell::new(Vec::new()));
        let watch = {
            let removals = Rc::clone(&removals);
            watch(&fixture, move |event| {
                let removals = Rc::clone(&removals);
                let element = event.element;
                event.removal.on_fire(move || removals.borrow_mut().push(element));
            })
        };
        fixture.event_loop.run_until_idle();
        fixture.host.insert(fixture.parent, child2, None);
        fixture.event_loop.run_until_idle();
        assert_eq!(watch.tracked(), 2);

        watch.stop();
        assert!(removals.borrow().is_empty());
        assert_eq!(fixture.host.observer_count(), 0);

        fixture.event_loop.run_until_idle();
        let mut removed = removals.borrow().clone();
        removed.sort();
        let mut expected = vec![nodes[0], child2];
        expected.sort();
        assert_eq!(removed, expected);
    }

    #[test]
    fn children_added_during_the_initial_report_are_not_missed() {
        let (fixture, nodes) = fixture(1);
        let child2 = fixture.host.create_element("div");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _watch = {
            let seen = Rc::clone(&seen);
            let host = fixture.host.clone();
            let parent = fixture.parent;
            let first = nodes[0];
            watch(&fixture, move |event| {
                seen.borrow_mut().push(event.element);
                if event.element == first {
                    host.insert(parent, child2, None);
                }
            })
        };
        fixture.event_loop.run_until_idle();
        assert_eq!(*seen.borrow(), vec![nodes[0], child2]);
    }

    #[test]
    fn children_removed_during_the_initial_report_are_not_missed() {
        let (fixture, nodes) = fixture(2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let removed = Rc::new(Cell::new(false));
        let _watch = {
            let seen = Rc::clone(&seen);
            let removed = Rc::clone(&removed);
            let host = fixture.host.clone();
            let first = nodes[0];
            watch(&fixture, move |event| {
                seen.borrow_mut().push(event.element);
                if event.element == first {
                    let removed = Rc::clone(&removed);
                    event.removal.on_fire(move || removed.set(true));
                    host.remove(first);
                }
            })
        };
        fixture.event_loop.run_until_idle();
        assert_eq!(*seen.borrow(), nodes);
        assert!(removed.get());
    }

    #[test]
    fn transient_children_are_skipped() {
        let (fixture, _nodes) = fixture(0);
        let seen = Rc::new(Cell::new(0));
        let watch = {
            let seen = Rc::clone(&seen);
            watch(&fixture, move |_| seen.set(seen.get() + 1))
        };
        fixture.event_loop.run_until_idle();

        let stray = fixture.host.create_element("div");
        fixture.host.insert(fixture.parent, stray, None);
        fixture.host.remove(stray);
        fixture.event_loop.run_until_idle();
        assert_eq!(seen.get(), 0);
        assert_eq!(watch.tracked(), 0);
        assert!(fixture.diagnostics.is_empty());
    }

    #[test]
    fn replacement_removes_before_it_adds() {
        let (fixture, nodes) = fixture(1);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _watch = {
            let log = Rc::clone(&log);
            watch(&fixture, move |event| {
                log.borrow_mut().push(format!("add {:?}", event.element));
                let log = Rc::clone(&log);
                let element = event.element;
                event
                    .removal
                    .on_fire(move || log.borrow_mut().push(format!("remove {element:?}")));
            })
        };
        fixture.event_loop.run_until_idle();

        let successor = fixture.host.create_element("div");
        fixture.host.insert(fixture.parent, successor, Some(nodes[0]));
        fixture.host.remove(nodes[0]);
        fixture.event_loop.run_until_idle();
        assert_eq!(
            *log.borrow(),
            vec![
                format!("add {:?}", nodes[0]),
                format!("remove {:?}", nodes[0]),
                format!("add {successor:?}"),
            ]
        );
    }

    #[test]
    fn unknown_removals_are_reported() {
        let (fixture, _nodes) = fixture(0);
        let watch = watch(&fixture, |_| {});
        fixture.event_loop.run_until_idle();

        watch.inner.apply(&[ChildChange {
            target: fixture.parent,
            added: Vec::new(),
            removed: vec![NodeRef(999)],
        }]);
        assert_eq!(
            fixture.diagnostics.reported(),
            vec![Diagnostic::UnknownChildRemoved {
                parent: fixture.parent,
                child: NodeRef(999),
            }]
        );
    }
}
