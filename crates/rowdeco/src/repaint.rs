//! Coalesces forced repaints.

use std::cell::RefCell;
use std::rc::Rc;

use crate::event_loop::EventLoop;
use crate::host::{Host, NodeRef};

/// Collects repaint requests until the next microtask and flushes them in one host call.
#[derive(Clone)]
pub struct RepaintBatcher {
    inner: Rc<RepaintInner>,
}

struct RepaintInner {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    pending: RefCell<Vec<NodeRef>>,
}

impl RepaintBatcher {
    pub fn new(host: Rc<dyn Host>, event_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(RepaintInner {
                host,
                event_loop,
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn request(&self, node: NodeRef) {
        let first = {
            let mut pending = self.inner.pending.borrow_mut();
            if pending.contains(&node) {
                return;
            }
            pending.push(node);
            pending.len() == 1
        };
        if first {
            let inner = Rc::clone(&self.inner);
            self.inner.event_loop.queue_microtask(move || {
                let nodes = std::mem::take(&mut *inner.pending.borrow_mut());
                if !nodes.is_empty() {
                    log::trace!("forcing repaint of {} nodes", nodes.len());
                    inner.host.force_repaint(&nodes);
                }
            });
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }
}
