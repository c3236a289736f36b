//! Process-wide engine state.

use std::rc::Rc;

use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::RowViewError;
use crate::event_loop::EventLoop;
use crate::host::{Host, NodeRef};
use crate::identity::IdentityResolver;
use crate::list::RowListWatcher;
use crate::pool::PoolRegistry;
use crate::repaint::RepaintBatcher;
use crate::row_view::RowView;

/// Everything row views share: the host, the event loop, the identity cache and the
/// decoration pools. Cheap to clone.
#[derive(Clone)]
pub struct RowEngine {
    inner: Rc<EngineInner>,
}

struct EngineInner {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    diagnostics: Diagnostics,
    resolver: IdentityResolver,
    pools: PoolRegistry,
    repaint: RepaintBatcher,
    config: EngineConfig,
}

impl RowEngine {
    pub fn new(host: Rc<dyn Host>, event_loop: EventLoop) -> Self {
        Self::with_config(host, event_loop, EngineConfig::default())
    }

    pub fn with_config(host: Rc<dyn Host>, event_loop: EventLoop, config: EngineConfig) -> Self {
        let diagnostics = Diagnostics::new(event_loop.clone());
        Self {
            inner: Rc::new(EngineInner {
                resolver: IdentityResolver::new(Rc::clone(&host), diagnostics.clone()),
                pools: PoolRegistry::new(Rc::clone(&host), event_loop.clone()),
                repaint: RepaintBatcher::new(Rc::clone(&host), event_loop.clone()),
                host,
                event_loop,
                diagnostics,
                config,
            }),
        }
    }

    pub fn host(&self) -> &Rc<dyn Host> {
        &self.inner.host
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.inner.resolver
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.inner.pools
    }

    pub fn repaint(&self) -> &RepaintBatcher {
        &self.inner.repaint
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Binds a new row view to `element`.
    pub fn bind_row(&self, element: NodeRef) -> Result<RowView, RowViewError> {
        if !self.inner.host.is_row(element) {
            return Err(RowViewError::NotARow(element));
        }
        Ok(RowView::bind(self, element))
    }

    /// Binds a view to every row that appears under `container` and destroys it when the
    /// row leaves.
    pub fn watch_list(
        &self,
        container: NodeRef,
        on_row: impl Fn(RowView) + 'static,
    ) -> RowListWatcher {
        RowListWatcher::new(self, container, on_row)
    }
}
