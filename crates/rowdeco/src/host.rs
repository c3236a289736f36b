//! Contracts between the engine and the host page.
//!
//! The engine never touches markup directly. It sees the host through four traits:
//! [`HostTree`] for generic tree manipulation, [`RowMarkup`] for the host's row
//! conventions, [`ProbeChannel`] for the click-and-capture identity probe and
//! [`Widgets`] for dropdowns. [`Host`] bundles them for `Rc<dyn Host>`.
//!
//! Host calls must not re-enter the engine synchronously. Child-list notifications in
//! particular are delivered later, in batches, the way `MutationObserver` does it.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Opaque handle to a node in the host tree. Never assume it stays attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DropdownId(pub u64);

/// One child-list mutation of an observed node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildChange {
    pub target: NodeRef,
    pub added: Vec<NodeRef>,
    pub removed: Vec<NodeRef>,
}

pub type ChildCallback = Rc<dyn Fn(&[ChildChange])>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostEvent {
    Click,
}

pub trait HostTree {
    fn create_element(&self, tag: &str) -> NodeRef;
    fn set_text(&self, node: NodeRef, text: &str);
    fn attribute(&self, node: NodeRef, name: &str) -> Option<String>;
    /// `None` removes the attribute.
    fn set_attribute(&self, node: NodeRef, name: &str, value: Option<&str>);
    /// `None` removes the style property.
    fn set_style(&self, node: NodeRef, property: &str, value: Option<&str>);
    fn set_class(&self, node: NodeRef, class: &str, enabled: bool);
    fn has_class(&self, node: NodeRef, class: &str) -> bool;
    /// Moves `child` under `parent`, before `before` or at the end.
    fn insert(&self, parent: NodeRef, child: NodeRef, before: Option<NodeRef>);
    /// Detaches `node` from its parent. The node stays usable.
    fn remove(&self, node: NodeRef);
    fn parent(&self, node: NodeRef) -> Option<NodeRef>;
    fn children(&self, node: NodeRef) -> Vec<NodeRef>;
    /// Inclusive: a node contains itself.
    fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool;
    fn is_connected(&self, node: NodeRef) -> bool;
    /// With `subtree`, changes anywhere below `node` are reported, not just its own
    /// child list.
    fn observe_children(&self, node: NodeRef, subtree: bool, callback: ChildCallback)
    -> ObserverId;
    fn disconnect(&self, observer: ObserverId);
    fn listen(&self, node: NodeRef, event: HostEvent, callback: Rc<dyn Fn()>) -> ListenerId;
    fn unlisten(&self, listener: ListenerId);
    /// Work around hosts that fail to repaint images swapped inside rows.
    fn force_repaint(&self, nodes: &[NodeRef]);
}

/// What the engine needs to fingerprint a row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMetadata {
    pub subject: String,
    pub time_label: String,
    pub participants: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub email_address: String,
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Labels,
    Buttons,
    Images,
    AttachmentIcons,
}

/// Where to put a decoration: under `parent`, before `before` or at the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertionPoint {
    pub parent: NodeRef,
    pub before: Option<NodeRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateCell {
    pub container: NodeRef,
    /// The host's own date label, if it rendered one.
    pub original: Option<NodeRef>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowLayout {
    #[default]
    Horizontal,
    /// Multi-line rows; decorations are not supported there.
    Vertical,
}

pub trait RowMarkup {
    fn is_row(&self, node: NodeRef) -> bool;
    fn layout(&self, row: NodeRef) -> RowLayout;
    fn metadata(&self, row: NodeRef) -> Result<RowMetadata, ExtractionError>;
    fn insertion_point(&self, row: NodeRef, slot: Slot) -> Option<InsertionPoint>;
    fn date_cell(&self, row: NodeRef) -> Option<DateCell>;
    fn date_string(&self, row: NodeRef) -> Result<String, ExtractionError>;
    /// Raw participants markup, including draft markers and message counts.
    fn participants_html(&self, row: NodeRef) -> Result<String, ExtractionError>;
    /// Every participant that carries an email address, in display order.
    fn contacts(&self, row: NodeRef) -> Vec<Contact>;
    fn is_selected(&self, row: NodeRef) -> bool;
    /// A node the host keeps across re-renders of this row, if there is one.
    fn pool_anchor(&self, row: NodeRef) -> Option<NodeRef>;
}

pub trait ProbeChannel {
    /// The row that currently carries the keyboard cursor, or the first row of the list.
    fn current_selection(&self, row: NodeRef) -> Option<NodeRef>;
    /// Simulate the interaction that makes the host reveal the row's navigation URL.
    /// Moves the cursor to `row` as a side effect.
    fn probe_navigation(&self, row: NodeRef) -> Option<String>;
}

pub trait Widgets {
    fn open_dropdown(&self, anchor: NodeRef) -> DropdownId;
    fn close_dropdown(&self, dropdown: DropdownId);
    /// Dropdowns also close on their own, e.g. on an outside click.
    fn dropdown_is_open(&self, dropdown: DropdownId) -> bool;
}

pub trait Host: HostTree + RowMarkup + ProbeChannel + Widgets {}

impl<T: HostTree + RowMarkup + ProbeChannel + Widgets> Host for T {}

/// RAII wrapper around [`HostTree::observe_children`].
pub struct ChildObserver {
    host: Rc<dyn Host>,
    id: ObserverId,
}

impl ChildObserver {
    pub fn observe(
        host: &Rc<dyn Host>,
        node: NodeRef,
        subtree: bool,
        callback: ChildCallback,
    ) -> Self {
        let id = host.observe_children(node, subtree, callback);
        Self {
            host: Rc::clone(host),
            id,
        }
    }
}

impl Drop for ChildObserver {
    fn drop(&mut self) {
        self.host.disconnect(self.id);
    }
}
