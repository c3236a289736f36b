//! Diagnostics sink.
//!
//! Every diagnostic goes to the `log` facade and is also kept in memory, so callers
//! (and tests) can tell how often something went wrong without scraping log output.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::decoration::DecorationKind;
use crate::error::ExtractionError;
use crate::event_loop::EventLoop;
use crate::host::NodeRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("failed to read row markup: {0}")]
    ExtractionFailed(ExtractionError),
    #[error("row {element:?} never became ready after {attempts} attempts")]
    NeverReady { element: NodeRef, attempts: usize },
    #[error("`{operation}` called on a destroyed row view")]
    DestroyedRowView { operation: &'static str },
    #[error("row {row:?} has no place to insert a {kind:?} decoration")]
    MissingInsertionPoint { row: NodeRef, kind: DecorationKind },
    #[error("could not find removal signal for child {child:?} of {parent:?}")]
    UnknownChildRemoved { parent: NodeRef, child: NodeRef },
}

#[derive(Clone)]
pub struct Diagnostics {
    inner: Rc<DiagnosticsInner>,
}

struct DiagnosticsInner {
    event_loop: EventLoop,
    reported: RefCell<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(DiagnosticsInner {
                event_loop,
                reported: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn warn(&self, diagnostic: Diagnostic) {
        log::warn!("{diagnostic}");
        self.inner.reported.borrow_mut().push(diagnostic);
    }

    pub fn error(&self, diagnostic: Diagnostic) {
        log::error!("{diagnostic}");
        self.inner.reported.borrow_mut().push(diagnostic);
    }

    /// Reports from a later microtask so the failure never surfaces inside the code path
    /// that happened to trigger it.
    pub fn report_async(&self, diagnostic: Diagnostic) {
        let this = self.clone();
        self.inner
            .event_loop
            .queue_microtask(move || this.error(diagnostic));
    }

    pub fn reported(&self) -> Vec<Diagnostic> {
        self.inner.reported.borrow().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.inner
            .reported
            .borrow()
            .iter()
            .filter(|diagnostic| predicate(diagnostic))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.reported.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_reports_wait_for_the_microtask_checkpoint() {
        let event_loop = EventLoop::new();
        let diagnostics = Diagnostics::new(event_loop.clone());

        diagnostics.report_async(Diagnostic::ExtractionFailed(ExtractionError::Detached(
            NodeRef(7),
        )));
        assert!(diagnostics.is_empty());

        event_loop.run_until_idle();
        assert_eq!(
            diagnostics.count(|d| matches!(d, Diagnostic::ExtractionFailed(_))),
            1
        );
    }

    #[test]
    fn synchronous_reports_are_recorded_in_order() {
        let diagnostics = Diagnostics::new(EventLoop::new());
        diagnostics.warn(Diagnostic::DestroyedRowView { operation: "add_label" });
        diagnostics.warn(Diagnostic::DestroyedRowView { operation: "subject" });

        assert_eq!(
            diagnostics.reported(),
            vec![
                Diagnostic::DestroyedRowView { operation: "add_label" },
                Diagnostic::DestroyedRowView { operation: "subject" },
            ]
        );
    }
}
