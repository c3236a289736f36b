//! Decoration descriptors and the records that render them.
//!
//! A record owns the host nodes of one decoration plus whatever it needs to update them
//! cheaply (last applied values, open dropdown, click listener). Records outlive the row
//! view that created them: they sit in a [`DecorationPool`](crate::pool::DecorationPool)
//! and are re-rendered into whichever row claims them next.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::host::{DropdownId, Host, HostEvent, ListenerId, NodeRef, Slot};
use crate::identity::ThreadId;
use crate::repaint::RepaintBatcher;
use crate::row_view::{RowView, WeakRowView};

/// Every node the engine inserts carries this class.
pub const DECORATION_CLASS: &str = "rowdeco-decoration";
/// Marks a host date label hidden behind a date override.
pub const HIDDEN_INLINE_CLASS: &str = "rowdeco-hidden-inline";
/// Set on a row while one of its button dropdowns is open.
pub const DROPDOWN_ACTIVE_CLASS: &str = "rowdeco-dropdown-active";
/// Order attribute read when inserting images among their siblings.
pub const ORDER_HINT_ATTRIBUTE: &str = "data-order-hint";

const BLANK_IMAGE: &str = "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DecorationKind {
    Label,
    Button,
    Image,
    AttachmentIcon,
    DateOverride,
}

impl DecorationKind {
    pub const ALL: [DecorationKind; 5] = [
        DecorationKind::Label,
        DecorationKind::Button,
        DecorationKind::Image,
        DecorationKind::AttachmentIcon,
        DecorationKind::DateOverride,
    ];

    /// At most one claimed record of a singleton kind per row group.
    pub fn is_singleton(self) -> bool {
        matches!(self, DecorationKind::DateOverride)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn class_name(self) -> &'static str {
        match self {
            DecorationKind::Label => "rowdeco-label",
            DecorationKind::Button => "rowdeco-button",
            DecorationKind::Image => "rowdeco-image",
            DecorationKind::AttachmentIcon => "rowdeco-attachment-icon",
            DecorationKind::DateOverride => "rowdeco-date",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Descriptors
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelDescriptor {
    pub title: String,
    pub foreground_color: Option<String>,
    pub background_color: Option<String>,
    pub icon_url: Option<String>,
}

impl LabelDescriptor {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// What a button click handler receives.
pub struct ButtonEvent {
    pub row: Option<RowView>,
    /// Identity of the row if it was already resolved; clicking never probes.
    pub thread_id: Option<ThreadId>,
    /// Set when the click opened the button's dropdown.
    pub dropdown: Option<DropdownId>,
}

pub type ButtonCallback = Rc<dyn Fn(ButtonEvent)>;

#[derive(Clone, Default)]
pub struct ButtonDescriptor {
    pub icon_url: Option<String>,
    pub icon_class: Option<String>,
    pub has_dropdown: bool,
    pub on_click: Option<ButtonCallback>,
}

impl fmt::Debug for ButtonDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonDescriptor")
            .field("icon_url", &self.icon_url)
            .field("icon_class", &self.icon_class)
            .field("has_dropdown", &self.has_dropdown)
            .field("on_click", &self.on_click.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDescriptor {
    pub image_url: String,
    pub image_class: Option<String>,
    pub tooltip: Option<String>,
    pub order_hint: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentIconDescriptor {
    pub icon_url: Option<String>,
    pub icon_class: Option<String>,
    pub tooltip: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateDescriptor {
    pub text: String,
    pub tooltip: Option<String>,
    pub text_color: Option<String>,
}

/// A descriptor of any kind.
#[derive(Clone, Debug)]
pub enum DecorationValue {
    Label(LabelDescriptor),
    Button(ButtonDescriptor),
    Image(ImageDescriptor),
    AttachmentIcon(AttachmentIconDescriptor),
    Date(DateDescriptor),
}

impl DecorationValue {
    pub fn kind(&self) -> DecorationKind {
        match self {
            DecorationValue::Label(_) => DecorationKind::Label,
            DecorationValue::Button(_) => DecorationKind::Button,
            DecorationValue::Image(_) => DecorationKind::Image,
            DecorationValue::AttachmentIcon(_) => DecorationKind::AttachmentIcon,
            DecorationValue::Date(_) => DecorationKind::DateOverride,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════

/// Everything a record needs to render into a row.
pub struct RenderCx<'a> {
    pub host: &'a Rc<dyn Host>,
    pub row: NodeRef,
    pub owner: &'a WeakRowView,
    pub repaint: &'a RepaintBatcher,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// The row has no place for this decoration right now.
    MissingInsertionPoint,
}

pub struct LabelRecord {
    node: NodeRef,
    text: NodeRef,
    icon: Option<NodeRef>,
    applied: Option<LabelDescriptor>,
}

pub struct ButtonRecord {
    node: NodeRef,
    icon: Option<NodeRef>,
    icon_class: Option<String>,
    listener: Option<ListenerId>,
    state: Rc<ButtonState>,
}

/// Shared with the click listener.
struct ButtonState {
    node: NodeRef,
    descriptor: RefCell<Option<ButtonDescriptor>>,
    row: Cell<Option<NodeRef>>,
    owner: RefCell<WeakRowView>,
    dropdown: Cell<Option<DropdownId>>,
}

pub struct ImageRecord {
    node: NodeRef,
    image_class: Option<String>,
    url: Option<String>,
}

pub struct AttachmentIconRecord {
    node: NodeRef,
    icon_class: Option<String>,
    tooltip: Option<String>,
    url: Option<String>,
}

pub struct DateOverrideRecord {
    node: NodeRef,
    /// Host date label currently hidden by this override.
    original: Option<NodeRef>,
    applied: Option<DateDescriptor>,
}

pub enum DecorationRecord {
    Label(LabelRecord),
    Button(ButtonRecord),
    Image(ImageRecord),
    AttachmentIcon(AttachmentIconRecord),
    DateOverride(DateOverrideRecord),
}

fn decoration_node(host: &dyn Host, tag: &str, kind: DecorationKind) -> NodeRef {
    let node = host.create_element(tag);
    host.set_class(node, DECORATION_CLASS, true);
    host.set_class(node, kind.class_name(), true);
    node
}

/// Inserts `node` under `parent` unless it is already there.
fn ensure_child(host: &dyn Host, parent: NodeRef, node: NodeRef, before: Option<NodeRef>) -> bool {
    if host.parent(node) == Some(parent) {
        return false;
    }
    host.insert(parent, node, before);
    true
}

fn show(host: &dyn Host, node: NodeRef) {
    host.set_style(node, "display", None);
}

fn hide(host: &dyn Host, node: NodeRef) {
    host.set_style(node, "display", Some("none"));
}

/// Swap a caller-supplied class, removing the previous one.
fn swap_class(host: &dyn Host, node: NodeRef, applied: &mut Option<String>, next: Option<&String>) {
    if applied.as_ref() == next {
        return;
    }
    if let Some(old) = applied.take() {
        host.set_class(node, &old, false);
    }
    if let Some(new) = next {
        host.set_class(node, new, true);
        *applied = Some(new.clone());
    }
}

fn order_hint(host: &dyn Host, node: NodeRef) -> Option<i32> {
    host.attribute(node, ORDER_HINT_ATTRIBUTE)
        .and_then(|value| value.parse::<i32>().ok())
}

/// First sibling under `parent` whose order hint sorts after `hint`.
fn insert_before_for_order(host: &dyn Host, parent: NodeRef, node: NodeRef, hint: i32) -> Option<NodeRef> {
    host.children(parent)
        .into_iter()
        .find(|child| *child != node && order_hint(host, *child).is_some_and(|other| other > hint))
}

/// `node` sits under `parent`, after every sibling hinted lower, before every sibling
/// hinted higher and before `anchor`. Equal hints keep their current order.
fn is_in_order(host: &dyn Host, parent: NodeRef, node: NodeRef, hint: i32, anchor: Option<NodeRef>) -> bool {
    let children = host.children(parent);
    let Some(index) = children.iter().position(|child| *child == node) else {
        return false;
    };
    let (preceding, following) = (&children[..index], &children[index + 1..]);
    preceding
        .iter()
        .all(|child| order_hint(host, *child).is_none_or(|other| other <= hint))
        && following
            .iter()
            .all(|child| order_hint(host, *child).is_none_or(|other| other >= hint))
        && anchor.is_none_or(|anchor| following.contains(&anchor))
}

fn restore_original_date(host: &dyn Host, original: NodeRef) {
    host.set_style(original, "display", None);
    host.set_class(original, HIDDEN_INLINE_CLASS, false);
}

fn close_dropdown(host: &dyn Host, state: &ButtonState) {
    if let Some(dropdown) = state.dropdown.take() {
        host.close_dropdown(dropdown);
        if let Some(row) = state.row.get() {
            host.set_class(row, DROPDOWN_ACTIVE_CLASS, false);
        }
    }
}

fn on_button_click(host: &dyn Host, state: &ButtonState) {
    let Some(descriptor) = state.descriptor.borrow().clone() else {
        return;
    };
    let row = state.row.get();
    let mut opened = None;
    if descriptor.has_dropdown {
        if let Some(open) = state.dropdown.take() {
            if host.dropdown_is_open(open) {
                host.close_dropdown(open);
                if let Some(row) = row {
                    host.set_class(row, DROPDOWN_ACTIVE_CLASS, false);
                }
                return;
            }
        }
        let dropdown = host.open_dropdown(state.node);
        state.dropdown.set(Some(dropdown));
        if let Some(row) = row {
            host.set_class(row, DROPDOWN_ACTIVE_CLASS, true);
        }
        opened = Some(dropdown);
    }
    if let Some(on_click) = descriptor.on_click {
        let owner = state.owner.borrow().upgrade();
        on_click(ButtonEvent {
            thread_id: owner.as_ref().and_then(RowView::known_thread_id),
            row: owner,
            dropdown: opened,
        });
    }
}

impl DecorationRecord {
    pub fn create(kind: DecorationKind, host: &Rc<dyn Host>) -> Self {
        let h: &dyn Host = host.as_ref();
        match kind {
            DecorationKind::Label => {
                let node = decoration_node(h, "span", kind);
                let text = h.create_element("span");
                h.set_class(text, "rowdeco-label-text", true);
                h.insert(node, text, None);
                DecorationRecord::Label(LabelRecord {
                    node,
                    text,
                    icon: None,
                    applied: None,
                })
            }
            DecorationKind::Button => {
                let node = decoration_node(h, "span", kind);
                let state = Rc::new(ButtonState {
                    node,
                    descriptor: RefCell::new(None),
                    row: Cell::new(None),
                    owner: RefCell::new(WeakRowView::default()),
                    dropdown: Cell::new(None),
                });
                let listener = {
                    let weak_host: Weak<dyn Host> = Rc::downgrade(host);
                    let state = Rc::clone(&state);
                    h.listen(
                        node,
                        HostEvent::Click,
                        Rc::new(move || {
                            if let Some(host) = weak_host.upgrade() {
                                on_button_click(host.as_ref(), &state);
                            }
                        }),
                    )
                };
                DecorationRecord::Button(ButtonRecord {
                    node,
                    icon: None,
                    icon_class: None,
                    listener: Some(listener),
                    state,
                })
            }
            DecorationKind::Image => DecorationRecord::Image(ImageRecord {
                node: decoration_node(h, "img", kind),
                image_class: None,
                url: None,
            }),
            DecorationKind::AttachmentIcon => {
                let node = decoration_node(h, "img", kind);
                h.set_attribute(node, "src", Some(BLANK_IMAGE));
                DecorationRecord::AttachmentIcon(AttachmentIconRecord {
                    node,
                    icon_class: None,
                    tooltip: None,
                    url: None,
                })
            }
            DecorationKind::DateOverride => DecorationRecord::DateOverride(DateOverrideRecord {
                node: decoration_node(h, "span", kind),
                original: None,
                applied: None,
            }),
        }
    }

    pub fn kind(&self) -> DecorationKind {
        match self {
            DecorationRecord::Label(_) => DecorationKind::Label,
            DecorationRecord::Button(_) => DecorationKind::Button,
            DecorationRecord::Image(_) => DecorationKind::Image,
            DecorationRecord::AttachmentIcon(_) => DecorationKind::AttachmentIcon,
            DecorationRecord::DateOverride(_) => DecorationKind::DateOverride,
        }
    }

    /// The outermost node this record inserts into rows.
    pub fn node(&self) -> NodeRef {
        match self {
            DecorationRecord::Label(record) => record.node,
            DecorationRecord::Button(record) => record.node,
            DecorationRecord::Image(record) => record.node,
            DecorationRecord::AttachmentIcon(record) => record.node,
            DecorationRecord::DateOverride(record) => record.node,
        }
    }

    /// Idempotent: rendering the same value twice leaves the tree as it was.
    pub fn render(
        &mut self,
        cx: &RenderCx<'_>,
        value: &DecorationValue,
    ) -> Result<RenderOutcome, PoolError> {
        let host: &dyn Host = cx.host.as_ref();
        match (self, value) {
            (DecorationRecord::Label(record), DecorationValue::Label(descriptor)) => {
                Ok(record.render(host, cx.row, descriptor))
            }
            (DecorationRecord::Button(record), DecorationValue::Button(descriptor)) => {
                Ok(record.render(host, cx, descriptor))
            }
            (DecorationRecord::Image(record), DecorationValue::Image(descriptor)) => {
                Ok(record.render(host, cx, descriptor))
            }
            (DecorationRecord::AttachmentIcon(record), DecorationValue::AttachmentIcon(descriptor)) => {
                Ok(record.render(host, cx.row, descriptor))
            }
            (DecorationRecord::DateOverride(record), DecorationValue::Date(descriptor)) => {
                Ok(record.render(host, cx.row, descriptor))
            }
            (record, value) => Err(PoolError::KindMismatch {
                expected: record.kind(),
                found: value.kind(),
            }),
        }
    }

    /// The value went away: take the nodes out of the row.
    pub fn detach(&mut self, host: &dyn Host) {
        self.release_side_effects(host);
        host.remove(self.node());
    }

    /// The owning view ended: make the nodes invisible but leave them where they are, so
    /// a successor can reclaim them without a visible gap.
    pub fn hide(&mut self, host: &dyn Host) {
        self.release_side_effects(host);
        hide(host, self.node());
    }

    /// Permanently drop the record's nodes and listeners.
    pub fn discard(&mut self, host: &dyn Host) {
        self.release_side_effects(host);
        if let DecorationRecord::Button(record) = self {
            if let Some(listener) = record.listener.take() {
                host.unlisten(listener);
            }
        }
        host.remove(self.node());
    }

    fn release_side_effects(&mut self, host: &dyn Host) {
        match self {
            DecorationRecord::Button(record) => {
                close_dropdown(host, &record.state);
                *record.state.owner.borrow_mut() = WeakRowView::default();
            }
            DecorationRecord::DateOverride(record) => {
                if let Some(original) = record.original.take() {
                    restore_original_date(host, original);
                }
            }
            DecorationRecord::Label(_)
            | DecorationRecord::Image(_)
            | DecorationRecord::AttachmentIcon(_) => {}
        }
    }
}

impl LabelRecord {
    fn render(&mut self, host: &dyn Host, row: NodeRef, descriptor: &LabelDescriptor) -> RenderOutcome {
        let Some(point) = host.insertion_point(row, Slot::Labels) else {
            return RenderOutcome::MissingInsertionPoint;
        };
        ensure_child(host, point.parent, self.node, point.before);
        show(host, self.node);
        if self.applied.as_ref() == Some(descriptor) {
            return RenderOutcome::Rendered;
        }
        host.set_text(self.text, &descriptor.title);
        host.set_attribute(self.node, "title", Some(&descriptor.title));
        host.set_style(self.node, "color", descriptor.foreground_color.as_deref());
        host.set_style(self.node, "background-color", descriptor.background_color.as_deref());
        match (&descriptor.icon_url, self.icon) {
            (Some(url), icon) => {
                let icon = icon.unwrap_or_else(|| {
                    let icon = host.create_element("img");
                    host.set_class(icon, "rowdeco-label-icon", true);
                    host.insert(self.node, icon, Some(self.text));
                    icon
                });
                host.set_attribute(icon, "src", Some(url));
                self.icon = Some(icon);
            }
            (None, Some(icon)) => {
                host.remove(icon);
                self.icon = None;
            }
            (None, None) => {}
        }
        self.applied = Some(descriptor.clone());
        RenderOutcome::Rendered
    }
}

impl ButtonRecord {
    fn render(&mut self, host: &dyn Host, cx: &RenderCx<'_>, descriptor: &ButtonDescriptor) -> RenderOutcome {
        let Some(point) = host.insertion_point(cx.row, Slot::Buttons) else {
            return RenderOutcome::MissingInsertionPoint;
        };
        if !descriptor.has_dropdown {
            close_dropdown(host, &self.state);
        }
        if self.state.row.get() != Some(cx.row) {
            close_dropdown(host, &self.state);
            self.state.row.set(Some(cx.row));
        }
        *self.state.descriptor.borrow_mut() = Some(descriptor.clone());
        *self.state.owner.borrow_mut() = cx.owner.clone();

        ensure_child(host, point.parent, self.node, point.before);
        show(host, self.node);

        match &descriptor.icon_url {
            Some(url) => {
                let icon = *self.icon.get_or_insert_with(|| {
                    let icon = host.create_element("img");
                    host.set_class(icon, "rowdeco-button-icon", true);
                    icon
                });
                ensure_child(host, self.node, icon, None);
                if host.attribute(icon, "src").as_deref() != Some(url.as_str()) {
                    host.set_attribute(icon, "src", Some(url));
                }
                swap_class(host, icon, &mut self.icon_class, descriptor.icon_class.as_ref());
            }
            None => {
                if let Some(icon) = self.icon.take() {
                    host.remove(icon);
                }
                self.icon_class = None;
            }
        }
        RenderOutcome::Rendered
    }
}

impl ImageRecord {
    fn render(&mut self, host: &dyn Host, cx: &RenderCx<'_>, descriptor: &ImageDescriptor) -> RenderOutcome {
        let Some(point) = host.insertion_point(cx.row, Slot::Images) else {
            return RenderOutcome::MissingInsertionPoint;
        };
        let hint_text = descriptor.order_hint.to_string();
        if host.attribute(self.node, ORDER_HINT_ATTRIBUTE).as_deref() != Some(hint_text.as_str()) {
            host.set_attribute(self.node, ORDER_HINT_ATTRIBUTE, Some(&hint_text));
        }
        let hint = descriptor.order_hint;
        let moved = !is_in_order(host, point.parent, self.node, hint, point.before);
        if moved {
            let before = insert_before_for_order(host, point.parent, self.node, hint).or(point.before);
            host.insert(point.parent, self.node, before);
        }
        show(host, self.node);
        host.set_attribute(self.node, "title", descriptor.tooltip.as_deref());
        swap_class(host, self.node, &mut self.image_class, descriptor.image_class.as_ref());

        let url_changed = self.url.as_deref() != Some(descriptor.image_url.as_str());
        if url_changed {
            host.set_attribute(self.node, "src", Some(&descriptor.image_url));
            self.url = Some(descriptor.image_url.clone());
        }
        if url_changed || moved {
            cx.repaint.request(cx.row);
        }
        RenderOutcome::Rendered
    }
}

impl AttachmentIconRecord {
    fn render(
        &mut self,
        host: &dyn Host,
        row: NodeRef,
        descriptor: &AttachmentIconDescriptor,
    ) -> RenderOutcome {
        let Some(point) = host.insertion_point(row, Slot::AttachmentIcons) else {
            return RenderOutcome::MissingInsertionPoint;
        };
        ensure_child(host, point.parent, self.node, point.before);
        show(host, self.node);
        swap_class(host, self.node, &mut self.icon_class, descriptor.icon_class.as_ref());
        if self.tooltip != descriptor.tooltip {
            host.set_attribute(self.node, "title", descriptor.tooltip.as_deref());
            self.tooltip = descriptor.tooltip.clone();
        }
        if self.url != descriptor.icon_url {
            let background = descriptor.icon_url.as_ref().map(|url| format!("url({url})"));
            host.set_style(self.node, "background-image", background.as_deref());
            self.url = descriptor.icon_url.clone();
        }
        RenderOutcome::Rendered
    }
}

impl DateOverrideRecord {
    fn render(&mut self, host: &dyn Host, row: NodeRef, descriptor: &DateDescriptor) -> RenderOutcome {
        let Some(cell) = host.date_cell(row) else {
            return RenderOutcome::MissingInsertionPoint;
        };
        if self.original != cell.original {
            if let Some(previous) = self.original.take() {
                restore_original_date(host, previous);
            }
            self.original = cell.original;
        }
        if let Some(original) = self.original {
            host.set_class(original, HIDDEN_INLINE_CLASS, true);
            host.set_style(original, "display", Some("none"));
        }
        ensure_child(host, cell.container, self.node, None);
        show(host, self.node);
        if self.applied.as_ref() == Some(descriptor) {
            return RenderOutcome::Rendered;
        }
        host.set_text(self.node, &descriptor.text);
        host.set_attribute(self.node, "title", descriptor.tooltip.as_deref());
        host.set_attribute(self.node, "aria-label", descriptor.tooltip.as_deref());
        host.set_style(self.node, "color", descriptor.text_color.as_deref());
        self.applied = Some(descriptor.clone());
        RenderOutcome::Rendered
    }
}
