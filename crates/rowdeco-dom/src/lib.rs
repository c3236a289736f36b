//! Browser host for `rowdeco`.
//!
//! [`DomHost`] implements the engine's host traits on the live page, the driver runs the
//! engine's event loop on zoon tasks and timers, and [`ConsoleLogger`] sends `log`
//! records to the browser console. Only [`MarkupSelectors`] exists off wasm.

pub mod selectors;

pub use selectors::MarkupSelectors;

#[cfg(target_arch = "wasm32")]
mod driver;
#[cfg(target_arch = "wasm32")]
mod logger;
#[cfg(target_arch = "wasm32")]
mod markup;
#[cfg(target_arch = "wasm32")]
mod tree;

#[cfg(target_arch = "wasm32")]
pub use driver::event_loop;
#[cfg(target_arch = "wasm32")]
pub use logger::{ConsoleLogger, init_logger};
#[cfg(target_arch = "wasm32")]
pub use tree::DomHost;

/// A host for the current page and an engine running on it.
///
/// `None` outside a browser window.
#[cfg(target_arch = "wasm32")]
pub fn start(
    selectors: MarkupSelectors,
    config: rowdeco::EngineConfig,
) -> Option<(std::rc::Rc<DomHost>, rowdeco::RowEngine)> {
    let host = DomHost::new(selectors)?;
    let engine = rowdeco::RowEngine::with_config(host.clone(), event_loop(), config);
    Some((host, engine))
}
