//! In-memory host for tests.
//!
//! `FakeHost` models just enough of a list page: a tree of elements, rows with a
//! subject/date/participants layout, a keyboard cursor the identity probe moves around,
//! batched child-list notifications delivered through the [`EventLoop`], click listeners,
//! dropdowns and a repaint log.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use crate::error::ExtractionError;
use crate::event_loop::EventLoop;
use crate::host::{
    ChildCallback, ChildChange, Contact, DateCell, DropdownId, HostEvent, HostTree,
    InsertionPoint, ListenerId, NodeRef, ObserverId, ProbeChannel, RowLayout, RowMarkup,
    RowMetadata, Slot, Widgets,
};

/// Description of a row to render.
#[derive(Clone, Debug, Default)]
pub struct RowSpec {
    pub subject: String,
    pub time_label: String,
    pub participants: String,
    pub thread_id: Option<String>,
    pub participants_html: Option<String>,
    pub contacts: Vec<Contact>,
    pub layout: RowLayout,
    pub anchor: Option<NodeRef>,
}

impl RowSpec {
    pub fn new(subject: &str, time_label: &str, participants: &str) -> Self {
        Self {
            subject: subject.to_string(),
            time_label: time_label.to_string(),
            participants: participants.to_string(),
            ..Self::default()
        }
    }

    pub fn thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self
    }

    pub fn anchor(mut self, anchor: NodeRef) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn vertical(mut self) -> Self {
        self.layout = RowLayout::Vertical;
        self
    }

    pub fn participants_html(mut self, html: &str) -> Self {
        self.participants_html = Some(html.to_string());
        self
    }

    pub fn contact(mut self, email_address: &str, name: Option<&str>) -> Self {
        self.contacts.push(Contact {
            email_address: email_address.to_string(),
            name: name.map(str::to_string),
        });
        self
    }
}

#[derive(Default)]
struct FakeNode {
    tag: String,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
    attributes: BTreeMap<String, String>,
    classes: BTreeSet<String>,
    styles: BTreeMap<String, String>,
    text: String,
}

#[derive(Clone, Copy)]
struct RowCells {
    labels: NodeRef,
    subject: NodeRef,
    buttons: NodeRef,
    images: NodeRef,
    attachments: NodeRef,
    date: NodeRef,
    date_label: NodeRef,
}

struct FakeRow {
    spec: RowSpec,
    cells: RowCells,
    interactive: bool,
    selected: bool,
    probe_url: Option<String>,
}

struct Observer {
    target: NodeRef,
    subtree: bool,
    callback: ChildCallback,
}

struct Listener {
    node: NodeRef,
    event: HostEvent,
    callback: Rc<dyn Fn()>,
}

struct FakeState {
    document: NodeRef,
    next_id: u64,
    nodes: HashMap<NodeRef, FakeNode>,
    rows: HashMap<NodeRef, FakeRow>,
    cursor: Option<NodeRef>,
    probes: Vec<NodeRef>,
    observers: BTreeMap<u64, Observer>,
    pending: BTreeMap<u64, Vec<ChildChange>>,
    flush_scheduled: bool,
    listeners: BTreeMap<u64, Listener>,
    open_dropdowns: BTreeMap<u64, NodeRef>,
    dropdowns_opened: usize,
    repaints: Vec<Vec<NodeRef>>,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create(&mut self, tag: &str) -> NodeRef {
        let node = NodeRef(self.next_id());
        self.nodes.insert(
            node,
            FakeNode {
                tag: tag.to_string(),
                ..FakeNode::default()
            },
        );
        node
    }

    fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.nodes.get(&candidate).and_then(|n| n.parent);
        }
        false
    }

    /// Queues the change for every interested observer. Returns whether a flush must be
    /// scheduled.
    fn record(&mut self, target: NodeRef, added: Vec<NodeRef>, removed: Vec<NodeRef>) -> bool {
        let interested: Vec<u64> = self
            .observers
            .iter()
            .filter(|(_, observer)| {
                observer.target == target
                    || (observer.subtree && self.contains(observer.target, target))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &interested {
            self.pending.entry(*id).or_default().push(ChildChange {
                target,
                added: added.clone(),
                removed: removed.clone(),
            });
        }
        if interested.is_empty() || self.flush_scheduled {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    fn detach(&mut self, node: NodeRef) -> bool {
        let Some(parent) = self.nodes.get(&node).and_then(|n| n.parent) else {
            return false;
        };
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| *child != node);
        }
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = None;
        }
        self.record(parent, Vec::new(), vec![node])
    }

    fn attach(&mut self, parent: NodeRef, child: NodeRef, before: Option<NodeRef>) -> bool {
        let mut flush = self.detach(child);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            let index = before
                .and_then(|before| parent_node.children.iter().position(|c| *c == before))
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(index, child);
        }
        if let Some(n) = self.nodes.get_mut(&child) {
            n.parent = Some(parent);
        }
        flush |= self.record(parent, vec![child], Vec::new());
        flush
    }

    fn build_row(&mut self, spec: RowSpec) -> (NodeRef, FakeRow) {
        let row = self.create("tr");
        let cell = |state: &mut FakeState, tag: &str, parent: NodeRef| {
            let node = state.create(tag);
            state.nodes.entry(parent).or_default().children.push(node);
            if let Some(n) = state.nodes.get_mut(&node) {
                n.parent = Some(parent);
            }
            node
        };
        let buttons = cell(self, "td", row);
        let images = cell(self, "td", row);
        let labels = cell(self, "td", row);
        let subject = cell(self, "span", labels);
        let attachments = cell(self, "td", row);
        let date = cell(self, "td", row);
        let date_label = cell(self, "span", date);
        if let Some(n) = self.nodes.get_mut(&subject) {
            n.text = spec.subject.clone();
        }
        if let Some(n) = self.nodes.get_mut(&date_label) {
            n.text = spec.time_label.clone();
        }
        let fake_row = FakeRow {
            spec,
            cells: RowCells {
                labels,
                subject,
                buttons,
                images,
                attachments,
                date,
                date_label,
            },
            interactive: true,
            selected: false,
            probe_url: None,
        };
        (row, fake_row)
    }

    fn text(&self, node: NodeRef) -> Option<String> {
        self.nodes.get(&node).map(|n| n.text.clone())
    }

    fn descendants(&self, root: NodeRef, out: &mut Vec<NodeRef>) {
        if let Some(node) = self.nodes.get(&root) {
            for child in &node.children {
                out.push(*child);
                self.descendants(*child, out);
            }
        }
    }
}

pub struct FakeHost {
    this: Weak<FakeHost>,
    event_loop: EventLoop,
    state: RefCell<FakeState>,
}

impl FakeHost {
    pub fn new(event_loop: &EventLoop) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let mut state = FakeState {
                document: NodeRef(0),
                next_id: 0,
                nodes: HashMap::new(),
                rows: HashMap::new(),
                cursor: None,
                probes: Vec::new(),
                observers: BTreeMap::new(),
                pending: BTreeMap::new(),
                flush_scheduled: false,
                listeners: BTreeMap::new(),
                open_dropdowns: BTreeMap::new(),
                dropdowns_opened: 0,
                repaints: Vec::new(),
            };
            state.document = state.create("body");
            FakeHost {
                this: this.clone(),
                event_loop: event_loop.clone(),
                state: RefCell::new(state),
            }
        })
    }

    fn schedule_flush(&self, needed: bool) {
        if !needed {
            return;
        }
        let this = self.this.clone();
        self.event_loop.queue_microtask(move || {
            if let Some(host) = this.upgrade() {
                host.flush();
            }
        });
    }

    fn flush(&self) {
        let batches: Vec<(ChildCallback, Vec<ChildChange>)> = {
            let mut state = self.state.borrow_mut();
            state.flush_scheduled = false;
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .filter_map(|(id, changes)| {
                    state
                        .observers
                        .get(&id)
                        .map(|observer| (Rc::clone(&observer.callback), changes))
                })
                .collect()
        };
        for (callback, changes) in batches {
            callback(&changes);
        }
    }

    pub fn document(&self) -> NodeRef {
        self.state.borrow().document
    }

    /// A new list container attached to the document.
    pub fn add_list(&self) -> NodeRef {
        let mut state = self.state.borrow_mut();
        let list = state.create("tbody");
        let document = state.document;
        let flush = state.attach(document, list, None);
        drop(state);
        self.schedule_flush(flush);
        list
    }

    /// A detached node the host keeps around, usable as a pool anchor.
    pub fn add_anchor(&self) -> NodeRef {
        self.state.borrow_mut().create("div")
    }

    pub fn add_row(&self, list: NodeRef, spec: RowSpec) -> NodeRef {
        self.insert_row(list, spec, None)
    }

    pub fn insert_row(&self, list: NodeRef, spec: RowSpec, before: Option<NodeRef>) -> NodeRef {
        let mut state = self.state.borrow_mut();
        let (row, fake_row) = state.build_row(spec);
        state.rows.insert(row, fake_row);
        let flush = state.attach(list, row, before);
        drop(state);
        self.schedule_flush(flush);
        row
    }

    /// Re-render: a fresh element for the same row takes the old one's place.
    pub fn replace_row(&self, old: NodeRef, spec: RowSpec) -> Option<NodeRef> {
        let list = self.parent(old)?;
        let row = self.insert_row(list, spec, Some(old));
        self.remove(old);
        Some(row)
    }

    pub fn remove_row(&self, row: NodeRef) {
        self.remove(row);
    }

    /// Simulates the host re-rendering a row's cells: every node the row did not render
    /// itself is dropped from the subtree.
    pub fn strip_foreign_nodes(&self, row: NodeRef) {
        let foreign: Vec<NodeRef> = {
            let state = self.state.borrow();
            let Some(fake_row) = state.rows.get(&row) else {
                return;
            };
            let cells = fake_row.cells;
            let own = [
                cells.labels,
                cells.subject,
                cells.buttons,
                cells.images,
                cells.attachments,
                cells.date,
                cells.date_label,
            ];
            let mut all = Vec::new();
            state.descendants(row, &mut all);
            all.into_iter()
                .filter(|node| !own.contains(node))
                .filter(|node| {
                    state
                        .nodes
                        .get(node)
                        .and_then(|n| n.parent)
                        .is_some_and(|parent| own.contains(&parent) || parent == row)
                })
                .collect()
        };
        for node in foreign {
            self.remove(node);
        }
    }

    /// Removes the subject element, breaking metadata extraction for the row.
    pub fn break_markup(&self, row: NodeRef) {
        let subject = self.state.borrow().rows.get(&row).map(|r| r.cells.subject);
        if let Some(subject) = subject {
            self.remove(subject);
        }
    }

    pub fn set_interactive(&self, row: NodeRef, interactive: bool) {
        if let Some(fake_row) = self.state.borrow_mut().rows.get_mut(&row) {
            fake_row.interactive = interactive;
        }
    }

    pub fn set_probe_url(&self, row: NodeRef, url: &str) {
        if let Some(fake_row) = self.state.borrow_mut().rows.get_mut(&row) {
            fake_row.probe_url = Some(url.to_string());
        }
    }

    pub fn set_selected(&self, row: NodeRef, selected: bool) {
        if let Some(fake_row) = self.state.borrow_mut().rows.get_mut(&row) {
            fake_row.selected = selected;
        }
    }

    pub fn set_cursor(&self, row: Option<NodeRef>) {
        self.state.borrow_mut().cursor = row;
    }

    pub fn cursor(&self) -> Option<NodeRef> {
        self.state.borrow().cursor
    }

    /// Every row the probe was run on, in order (restores included).
    pub fn probes(&self) -> Vec<NodeRef> {
        self.state.borrow().probes.clone()
    }

    pub fn subject_node(&self, row: NodeRef) -> Option<NodeRef> {
        self.state.borrow().rows.get(&row).map(|r| r.cells.subject)
    }

    pub fn date_label_node(&self, row: NodeRef) -> Option<NodeRef> {
        self.state.borrow().rows.get(&row).map(|r| r.cells.date_label)
    }

    pub fn text(&self, node: NodeRef) -> Option<String> {
        self.state.borrow().text(node)
    }

    pub fn tag(&self, node: NodeRef) -> Option<String> {
        self.state.borrow().nodes.get(&node).map(|n| n.tag.clone())
    }

    pub fn style(&self, node: NodeRef, property: &str) -> Option<String> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.styles.get(property).cloned())
    }

    /// Descendants of `root` carrying `class`, in document order.
    pub fn find_by_class(&self, root: NodeRef, class: &str) -> Vec<NodeRef> {
        let state = self.state.borrow();
        let mut all = Vec::new();
        state.descendants(root, &mut all);
        all.into_iter()
            .filter(|node| {
                state
                    .nodes
                    .get(node)
                    .is_some_and(|n| n.classes.contains(class))
            })
            .collect()
    }

    /// Like [`FakeHost::find_by_class`], skipping nodes hidden with `display: none`.
    pub fn visible_by_class(&self, root: NodeRef, class: &str) -> Vec<NodeRef> {
        self.find_by_class(root, class)
            .into_iter()
            .filter(|node| self.style(*node, "display").as_deref() != Some("none"))
            .collect()
    }

    /// Dispatch a click to every listener on `node`.
    pub fn click(&self, node: NodeRef) {
        let callbacks: Vec<Rc<dyn Fn()>> = self
            .state
            .borrow()
            .listeners
            .values()
            .filter(|listener| listener.node == node && listener.event == HostEvent::Click)
            .map(|listener| Rc::clone(&listener.callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub fn observer_count(&self) -> usize {
        self.state.borrow().observers.len()
    }

    pub fn open_dropdowns(&self) -> usize {
        self.state.borrow().open_dropdowns.len()
    }

    /// Close every dropdown the way an outside click would.
    pub fn dismiss_dropdowns(&self) {
        self.state.borrow_mut().open_dropdowns.clear();
    }

    pub fn dropdowns_opened(&self) -> usize {
        self.state.borrow().dropdowns_opened
    }

    pub fn repaints(&self) -> Vec<Vec<NodeRef>> {
        self.state.borrow().repaints.clone()
    }
}

impl HostTree for FakeHost {
    fn create_element(&self, tag: &str) -> NodeRef {
        self.state.borrow_mut().create(tag)
    }

    fn set_text(&self, node: NodeRef, text: &str) {
        if let Some(n) = self.state.borrow_mut().nodes.get_mut(&node) {
            n.text = text.to_string();
        }
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: NodeRef, name: &str, value: Option<&str>) {
        if let Some(n) = self.state.borrow_mut().nodes.get_mut(&node) {
            match value {
                Some(value) => {
                    n.attributes.insert(name.to_string(), value.to_string());
                }
                None => {
                    n.attributes.remove(name);
                }
            }
        }
    }

    fn set_style(&self, node: NodeRef, property: &str, value: Option<&str>) {
        if let Some(n) = self.state.borrow_mut().nodes.get_mut(&node) {
            match value {
                Some(value) => {
                    n.styles.insert(property.to_string(), value.to_string());
                }
                None => {
                    n.styles.remove(property);
                }
            }
        }
    }

    fn set_class(&self, node: NodeRef, class: &str, enabled: bool) {
        if let Some(n) = self.state.borrow_mut().nodes.get_mut(&node) {
            if enabled {
                n.classes.insert(class.to_string());
            } else {
                n.classes.remove(class);
            }
        }
    }

    fn has_class(&self, node: NodeRef, class: &str) -> bool {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .is_some_and(|n| n.classes.contains(class))
    }

    fn insert(&self, parent: NodeRef, child: NodeRef, before: Option<NodeRef>) {
        let flush = self.state.borrow_mut().attach(parent, child, before);
        self.schedule_flush(flush);
    }

    fn remove(&self, node: NodeRef) {
        let flush = self.state.borrow_mut().detach(node);
        self.schedule_flush(flush);
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.state.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        self.state.borrow().contains(ancestor, node)
    }

    fn is_connected(&self, node: NodeRef) -> bool {
        let state = self.state.borrow();
        state.contains(state.document, node)
    }

    fn observe_children(
        &self,
        node: NodeRef,
        subtree: bool,
        callback: ChildCallback,
    ) -> ObserverId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.observers.insert(
            id,
            Observer {
                target: node,
                subtree,
                callback,
            },
        );
        ObserverId(id)
    }

    fn disconnect(&self, observer: ObserverId) {
        let removed = {
            let mut state = self.state.borrow_mut();
            state.pending.remove(&observer.0);
            state.observers.remove(&observer.0)
        };
        drop(removed);
    }

    fn listen(&self, node: NodeRef, event: HostEvent, callback: Rc<dyn Fn()>) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.listeners.insert(
            id,
            Listener {
                node,
                event,
                callback,
            },
        );
        ListenerId(id)
    }

    fn unlisten(&self, listener: ListenerId) {
        let removed = self.state.borrow_mut().listeners.remove(&listener.0);
        drop(removed);
    }

    fn force_repaint(&self, nodes: &[NodeRef]) {
        self.state.borrow_mut().repaints.push(nodes.to_vec());
    }
}

impl RowMarkup for FakeHost {
    fn is_row(&self, node: NodeRef) -> bool {
        self.state.borrow().rows.contains_key(&node)
    }

    fn layout(&self, row: NodeRef) -> RowLayout {
        self.state
            .borrow()
            .rows
            .get(&row)
            .map(|r| r.spec.layout)
            .unwrap_or_default()
    }

    fn metadata(&self, row: NodeRef) -> Result<RowMetadata, ExtractionError> {
        let state = self.state.borrow();
        let fake_row = state
            .rows
            .get(&row)
            .ok_or(ExtractionError::Detached(row))?;
        if !state.contains(row, fake_row.cells.subject) {
            return Err(ExtractionError::MissingField {
                row,
                field: "subject",
            });
        }
        Ok(RowMetadata {
            subject: state.text(fake_row.cells.subject).unwrap_or_default(),
            time_label: state.text(fake_row.cells.date_label).unwrap_or_default(),
            participants: fake_row.spec.participants.clone(),
        })
    }

    fn insertion_point(&self, row: NodeRef, slot: Slot) -> Option<InsertionPoint> {
        let state = self.state.borrow();
        let cells = state.rows.get(&row)?.cells;
        let point = match slot {
            Slot::Labels => InsertionPoint {
                parent: cells.labels,
                before: Some(cells.subject),
            },
            Slot::Buttons => InsertionPoint {
                parent: cells.buttons,
                before: None,
            },
            Slot::Images => InsertionPoint {
                parent: cells.images,
                before: None,
            },
            Slot::AttachmentIcons => InsertionPoint {
                parent: cells.attachments,
                before: None,
            },
        };
        let before_is_child = point.before.is_none_or(|before| {
            state.nodes.get(&before).and_then(|n| n.parent) == Some(point.parent)
        });
        (state.contains(row, point.parent) && before_is_child).then_some(point)
    }

    fn date_cell(&self, row: NodeRef) -> Option<DateCell> {
        let state = self.state.borrow();
        let cells = state.rows.get(&row)?.cells;
        if !state.contains(row, cells.date) {
            return None;
        }
        Some(DateCell {
            container: cells.date,
            original: state
                .contains(cells.date, cells.date_label)
                .then_some(cells.date_label),
        })
    }

    fn date_string(&self, row: NodeRef) -> Result<String, ExtractionError> {
        let state = self.state.borrow();
        let cells = state
            .rows
            .get(&row)
            .ok_or(ExtractionError::Detached(row))?
            .cells;
        if !state.contains(row, cells.date_label) {
            return Err(ExtractionError::MissingField { row, field: "date" });
        }
        Ok(state.text(cells.date_label).unwrap_or_default())
    }

    fn participants_html(&self, row: NodeRef) -> Result<String, ExtractionError> {
        let state = self.state.borrow();
        let fake_row = state
            .rows
            .get(&row)
            .ok_or(ExtractionError::Detached(row))?;
        Ok(fake_row
            .spec
            .participants_html
            .clone()
            .unwrap_or_else(|| fake_row.spec.participants.clone()))
    }

    fn contacts(&self, row: NodeRef) -> Vec<Contact> {
        self.state
            .borrow()
            .rows
            .get(&row)
            .map(|r| r.spec.contacts.clone())
            .unwrap_or_default()
    }

    fn is_selected(&self, row: NodeRef) -> bool {
        self.state
            .borrow()
            .rows
            .get(&row)
            .is_some_and(|r| r.selected)
    }

    fn pool_anchor(&self, row: NodeRef) -> Option<NodeRef> {
        self.state.borrow().rows.get(&row)?.spec.anchor
    }
}

impl ProbeChannel for FakeHost {
    fn current_selection(&self, row: NodeRef) -> Option<NodeRef> {
        let state = self.state.borrow();
        if let Some(cursor) = state.cursor {
            if state.contains(state.document, cursor) {
                return Some(cursor);
            }
        }
        let list = state.nodes.get(&row)?.parent?;
        state
            .nodes
            .get(&list)?
            .children
            .iter()
            .copied()
            .find(|child| state.rows.contains_key(child))
    }

    fn probe_navigation(&self, row: NodeRef) -> Option<String> {
        let mut state = self.state.borrow_mut();
        state.probes.push(row);
        state.cursor = Some(row);
        let fake_row = state.rows.get(&row)?;
        if !fake_row.interactive {
            return None;
        }
        if let Some(url) = &fake_row.probe_url {
            return Some(url.clone());
        }
        fake_row
            .spec
            .thread_id
            .as_ref()
            .map(|id| format!("https://mail.example.com/mail/u/0/?ui=2&view=btop&th={id}"))
    }
}

impl Widgets for FakeHost {
    fn open_dropdown(&self, anchor: NodeRef) -> DropdownId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.open_dropdowns.insert(id, anchor);
        state.dropdowns_opened += 1;
        DropdownId(id)
    }

    fn close_dropdown(&self, dropdown: DropdownId) {
        self.state.borrow_mut().open_dropdowns.remove(&dropdown.0);
    }

    fn dropdown_is_open(&self, dropdown: DropdownId) -> bool {
        self.state.borrow().open_dropdowns.contains_key(&dropdown.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn child_changes_are_batched_until_the_microtask() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let list = host.add_list();
        let batches = Rc::new(Cell::new(0));
        let changes = Rc::new(Cell::new(0));
        let _observer = {
            let batches = Rc::clone(&batches);
            let changes = Rc::clone(&changes);
            host.observe_children(
                list,
                false,
                Rc::new(move |records: &[ChildChange]| {
                    batches.set(batches.get() + 1);
                    changes.set(changes.get() + records.len());
                }),
            )
        };

        host.add_row(list, RowSpec::new("a", "1:00 PM", "A"));
        host.add_row(list, RowSpec::new("b", "2:00 PM", "B"));
        assert_eq!(batches.get(), 0);

        event_loop.run_until_idle();
        assert_eq!(batches.get(), 1);
        assert_eq!(changes.get(), 2);
    }

    #[test]
    fn subtree_observers_see_nested_changes() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let list = host.add_list();
        let row = host.add_row(list, RowSpec::new("a", "1:00 PM", "A"));
        event_loop.run_until_idle();

        let seen = Rc::new(Cell::new(0));
        let shallow = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        host.observe_children(row, true, Rc::new(move |_| counter.set(counter.get() + 1)));
        let counter = Rc::clone(&shallow);
        host.observe_children(row, false, Rc::new(move |_| counter.set(counter.get() + 1)));

        let span = host.create_element("span");
        let subject = host.subject_node(row).unwrap();
        host.insert(host.parent(subject).unwrap(), span, Some(subject));
        event_loop.run_until_idle();
        assert_eq!(seen.get(), 1);
        assert_eq!(shallow.get(), 0);
    }

    #[test]
    fn probe_moves_the_cursor_and_reports_thread_url() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let list = host.add_list();
        let first = host.add_row(list, RowSpec::new("a", "1:00 PM", "A").thread("t1"));
        let second = host.add_row(list, RowSpec::new("b", "2:00 PM", "B").thread("t2"));

        assert_eq!(host.current_selection(second), Some(first));
        let url = host.probe_navigation(second).unwrap();
        assert!(url.ends_with("th=t2"));
        assert_eq!(host.cursor(), Some(second));

        host.set_interactive(first, false);
        assert_eq!(host.probe_navigation(first), None);
        assert_eq!(host.probes(), vec![second, first]);
    }

    #[test]
    fn strip_foreign_nodes_keeps_row_markup() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let list = host.add_list();
        let row = host.add_row(list, RowSpec::new("a", "1:00 PM", "A"));
        let point = host.insertion_point(row, Slot::Labels).unwrap();
        let label = host.create_element("span");
        host.set_class(label, "extra", true);
        host.insert(point.parent, label, point.before);
        assert_eq!(host.find_by_class(row, "extra"), vec![label]);

        host.strip_foreign_nodes(row);
        assert!(host.find_by_class(row, "extra").is_empty());
        assert!(host.metadata(row).is_ok());
    }
}
