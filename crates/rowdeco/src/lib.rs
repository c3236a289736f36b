//! Row identity resolution and decoration lifecycle for host lists that re-render their
//! rows at will.
//!
//! The host hands out opaque [`NodeRef`]s through the [`Host`] traits. A [`RowEngine`]
//! binds a [`RowView`] to each row; callers decorate the view and the engine keeps the
//! decorations applied while the host mutates or replaces the row underneath.

pub mod child_stream;
pub mod config;
pub mod counts;
pub mod decoration;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod host;
pub mod identity;
pub mod list;
pub mod pool;
pub mod property;
pub mod refresh;
pub mod repaint;
pub mod row_view;
pub mod scope;
pub mod teardown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::EngineConfig;
pub use decoration::{
    AttachmentIconDescriptor, ButtonCallback, ButtonDescriptor, ButtonEvent, DateDescriptor,
    DecorationKind, ImageDescriptor, LabelDescriptor,
};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use engine::RowEngine;
pub use error::{ExtractionError, PoolError, RowViewError};
pub use event_loop::{EventLoop, TaskHandle, Wakeup};
pub use host::{Host, HostTree, NodeRef, ProbeChannel, RowMarkup, Widgets};
pub use identity::{IdentityResolver, ThreadId, ThreadMetadata};
pub use list::RowListWatcher;
pub use property::{Input, Property, Subscription};
pub use row_view::{RowView, RowViewId};
