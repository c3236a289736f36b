//! Row views for every row of a list container.

use std::rc::Rc;

use crate::child_stream::{ChildEvent, ChildWatch, watch_children};
use crate::engine::RowEngine;
use crate::host::NodeRef;
use crate::row_view::RowView;

/// Dropping the watcher stops it; views of rows still in the list are destroyed a
/// microtask later.
pub struct RowListWatcher {
    watch: ChildWatch,
}

impl RowListWatcher {
    pub(crate) fn new(
        engine: &RowEngine,
        container: NodeRef,
        on_row: impl Fn(RowView) + 'static,
    ) -> Self {
        let binder = engine.clone();
        let on_row = Rc::new(on_row);
        let watch = watch_children(
            engine.host(),
            engine.event_loop(),
            engine.diagnostics(),
            container,
            move |ChildEvent { element, removal }| {
                if !binder.host().is_row(element) {
                    log::trace!("ignoring non-row child {element:?} of {container:?}");
                    return;
                }
                let view = match binder.bind_row(element) {
                    Ok(view) => view,
                    Err(error) => {
                        log::debug!("could not bind {element:?}: {error}");
                        return;
                    }
                };
                let ended = view.clone();
                removal.on_fire(move || ended.destroy());
                on_row(view);
            },
        );
        Self { watch }
    }

    pub fn stop(&self) {
        self.watch.stop();
    }

    /// Children currently tracked, rows or not.
    pub fn tracked(&self) -> usize {
        self.watch.tracked()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::event_loop::EventLoop;
    use crate::host::HostTree;
    use crate::testing::{FakeHost, RowSpec};

    #[test]
    fn rows_are_bound_and_destroyed_with_the_list() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let engine = RowEngine::new(host.clone(), event_loop.clone());
        let list = host.add_list();
        let first = host.add_row(list, RowSpec::new("Hello", "3:00 PM", "Alice").thread("t1"));
        let spacer = host.create_element("div");
        host.insert(list, spacer, None);

        let views = Rc::new(RefCell::new(Vec::new()));
        let watcher = {
            let views = Rc::clone(&views);
            engine.watch_list(list, move |view| views.borrow_mut().push(view))
        };
        event_loop.run_until_idle();
        assert_eq!(views.borrow().len(), 1);
        assert_eq!(views.borrow()[0].element(), first);
        assert_eq!(watcher.tracked(), 2);

        let second = host.add_row(list, RowSpec::new("Other", "4:00 PM", "Bob").thread("t2"));
        event_loop.run_until_idle();
        assert_eq!(views.borrow().len(), 2);
        assert_eq!(views.borrow()[1].element(), second);

        host.remove_row(first);
        event_loop.run_until_idle();
        assert!(views.borrow()[0].is_destroyed());
        assert!(!views.borrow()[1].is_destroyed());

        drop(watcher);
        assert!(!views.borrow()[1].is_destroyed());
        event_loop.run_until_idle();
        assert!(views.borrow()[1].is_destroyed());
    }
}
