//! `HostTree` on top of the live DOM.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use js_sys::Reflect;
use rowdeco::host::{ChildCallback, ChildChange, HostEvent, ListenerId, ObserverId};
use rowdeco::{HostTree, NodeRef};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, HtmlElement, MutationObserver, MutationObserverInit, MutationRecord, Window};

use crate::selectors::MarkupSelectors;

/// Expando property carrying an element's `NodeRef` id.
const NODE_ID_KEY: &str = "__rowdecoNodeId";

/// Table size that triggers the first pruning pass.
const MIN_PRUNE_AT: usize = 1024;

thread_local! {
    /// Shared by every host on the page, since the ids live on the elements.
    static NEXT_NODE_ID: Cell<u64> = const { Cell::new(0) };
}

fn next_node_id() -> u64 {
    NEXT_NODE_ID.with(|next| {
        let id = next.get() + 1;
        next.set(id);
        id
    })
}

struct NodeTable {
    elements: HashMap<NodeRef, Element>,
    /// Created by the engine; kept even while detached so pooled decorations survive.
    pinned: HashSet<NodeRef>,
    prune_at: usize,
}

impl NodeTable {
    /// Forgets detached host elements. Their ids stay on the elements, so an element
    /// seen again maps back to the same `NodeRef`.
    fn prune(&mut self) {
        let pinned = &self.pinned;
        self.elements
            .retain(|node, element| pinned.contains(node) || element.is_connected());
        self.prune_at = MIN_PRUNE_AT.max(self.elements.len() * 2);
    }
}

struct ObserverEntry {
    observer: MutationObserver,
    _callback: Closure<dyn FnMut(js_sys::Array, MutationObserver)>,
}

struct ListenerEntry {
    element: Element,
    event: &'static str,
    callback: Closure<dyn FnMut(web_sys::Event)>,
}

pub(crate) struct Dropdown {
    pub(crate) container: Element,
    pub(crate) anchor: Element,
}

/// The browser page as a rowdeco host.
pub struct DomHost {
    pub(crate) this: Weak<DomHost>,
    pub(crate) window: Window,
    pub(crate) document: Document,
    pub(crate) selectors: MarkupSelectors,
    table: RefCell<NodeTable>,
    observers: RefCell<HashMap<ObserverId, ObserverEntry>>,
    listeners: RefCell<HashMap<ListenerId, ListenerEntry>>,
    pub(crate) dropdowns: RefCell<HashMap<u64, Dropdown>>,
    pub(crate) outside_click: RefCell<Option<Closure<dyn FnMut(web_sys::Event)>>>,
    next_handle: Cell<u64>,
}

impl DomHost {
    /// `None` outside a browser window.
    pub fn new(selectors: MarkupSelectors) -> Option<Rc<Self>> {
        let window = web_sys::window()?;
        let document = window.document()?;
        let host = Rc::new_cyclic(|this| DomHost {
            this: this.clone(),
            window,
            document,
            selectors,
            table: RefCell::new(NodeTable {
                elements: HashMap::new(),
                pinned: HashSet::new(),
                prune_at: MIN_PRUNE_AT,
            }),
            observers: RefCell::new(HashMap::new()),
            listeners: RefCell::new(HashMap::new()),
            dropdowns: RefCell::new(HashMap::new()),
            outside_click: RefCell::new(None),
            next_handle: Cell::new(0),
        });
        host.install_outside_click();
        Some(host)
    }

    pub(crate) fn next_handle(&self) -> u64 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }

    /// The `NodeRef` for `element`, registering it on first sight.
    pub fn node_ref(&self, element: &Element) -> NodeRef {
        let known = Reflect::get(element, &JsValue::from_str(NODE_ID_KEY))
            .ok()
            .and_then(|id| id.as_f64());
        let mut table = self.table.borrow_mut();
        if let Some(id) = known {
            let node = NodeRef(id as u64);
            table
                .elements
                .entry(node)
                .or_insert_with(|| element.clone());
            return node;
        }
        let node = NodeRef(next_node_id());
        if Reflect::set(element, &JsValue::from_str(NODE_ID_KEY), &JsValue::from_f64(node.0 as f64))
            .is_err()
        {
            log::warn!("could not tag element {node:?}, it will get a new id when seen again");
        }
        table.elements.insert(node, element.clone());
        if table.elements.len() >= table.prune_at {
            table.prune();
        }
        node
    }

    pub fn element(&self, node: NodeRef) -> Option<Element> {
        self.table.borrow().elements.get(&node).cloned()
    }

    pub(crate) fn html_element(&self, node: NodeRef) -> Option<HtmlElement> {
        self.element(node)?.dyn_into::<HtmlElement>().ok()
    }

    pub(crate) fn query(&self, node: NodeRef, selector: &str) -> Option<Element> {
        self.element(node)?.query_selector(selector).ok().flatten()
    }

    fn element_nodes(&self, list: &web_sys::NodeList) -> Vec<NodeRef> {
        (0..list.length())
            .filter_map(|index| list.item(index))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .map(|element| self.node_ref(&element))
            .collect()
    }

    fn child_change(&self, record: &MutationRecord) -> Option<ChildChange> {
        if record.type_() != "childList" {
            return None;
        }
        let target = record.target()?.dyn_into::<Element>().ok()?;
        let change = ChildChange {
            target: self.node_ref(&target),
            added: self.element_nodes(&record.added_nodes()),
            removed: self.element_nodes(&record.removed_nodes()),
        };
        (!change.added.is_empty() || !change.removed.is_empty()).then_some(change)
    }
}

impl HostTree for DomHost {
    fn create_element(&self, tag: &str) -> NodeRef {
        match self.document.create_element(tag) {
            Ok(element) => {
                let node = self.node_ref(&element);
                self.table.borrow_mut().pinned.insert(node);
                node
            }
            Err(error) => {
                log::error!("could not create <{tag}>: {error:?}");
                NodeRef(0)
            }
        }
    }

    fn set_text(&self, node: NodeRef, text: &str) {
        if let Some(element) = self.element(node) {
            element.set_text_content(Some(text));
        }
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        self.element(node)?.get_attribute(name)
    }

    fn set_attribute(&self, node: NodeRef, name: &str, value: Option<&str>) {
        let Some(element) = self.element(node) else {
            return;
        };
        let result = match value {
            Some(value) => element.set_attribute(name, value),
            None => element.remove_attribute(name),
        };
        if let Err(error) = result {
            log::error!("could not set attribute {name} on {node:?}: {error:?}");
        }
    }

    fn set_style(&self, node: NodeRef, property: &str, value: Option<&str>) {
        let Some(element) = self.html_element(node) else {
            return;
        };
        let style = element.style();
        let result = match value {
            Some(value) => style.set_property(property, value),
            None => style.remove_property(property).map(drop),
        };
        if let Err(error) = result {
            log::error!("could not set style {property} on {node:?}: {error:?}");
        }
    }

    fn set_class(&self, node: NodeRef, class: &str, enabled: bool) {
        if let Some(element) = self.element(node) {
            if let Err(error) = element.class_list().toggle_with_force(class, enabled) {
                log::error!("could not toggle class {class} on {node:?}: {error:?}");
            }
        }
    }

    fn has_class(&self, node: NodeRef, class: &str) -> bool {
        self.element(node)
            .is_some_and(|element| element.class_list().contains(class))
    }

    fn insert(&self, parent: NodeRef, child: NodeRef, before: Option<NodeRef>) {
        let (Some(parent_element), Some(child_element)) = (self.element(parent), self.element(child))
        else {
            return;
        };
        let before = before.and_then(|before| self.element(before));
        let result = parent_element.insert_before(&child_element, before.as_deref());
        if let Err(error) = result {
            log::error!("could not insert {child:?} into {parent:?}: {error:?}");
        }
    }

    fn remove(&self, node: NodeRef) {
        if let Some(element) = self.element(node) {
            element.remove();
        }
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.element(node)?.parent_element()?;
        Some(self.node_ref(&parent))
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        let Some(element) = self.element(node) else {
            return Vec::new();
        };
        let children = element.children();
        (0..children.length())
            .filter_map(|index| children.item(index))
            .map(|child| self.node_ref(&child))
            .collect()
    }

    fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        match (self.element(ancestor), self.element(node)) {
            (Some(ancestor), Some(node)) => {
                let node: &web_sys::Node = &node;
                ancestor.contains(Some(node))
            }
            _ => false,
        }
    }

    fn is_connected(&self, node: NodeRef) -> bool {
        self.element(node).is_some_and(|element| element.is_connected())
    }

    fn observe_children(&self, node: NodeRef, subtree: bool, callback: ChildCallback) -> ObserverId {
        let id = ObserverId(self.next_handle());
        let Some(element) = self.element(node) else {
            log::debug!("not observing unknown node {node:?}");
            return id;
        };
        let this = self.this.clone();
        let closure = Closure::wrap(Box::new(move |records: js_sys::Array, _: MutationObserver| {
            let Some(host) = this.upgrade() else {
                return;
            };
            let changes: Vec<ChildChange> = records
                .iter()
                .filter_map(|record| record.dyn_into::<MutationRecord>().ok())
                .filter_map(|record| host.child_change(&record))
                .collect();
            if !changes.is_empty() {
                callback(&changes);
            }
        }) as Box<dyn FnMut(js_sys::Array, MutationObserver)>);
        let observer = match MutationObserver::new(closure.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(error) => {
                log::error!("could not create a mutation observer: {error:?}");
                return id;
            }
        };
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(subtree);
        if let Err(error) = observer.observe_with_options(&element, &init) {
            log::error!("could not observe {node:?}: {error:?}");
            return id;
        }
        self.observers.borrow_mut().insert(
            id,
            ObserverEntry {
                observer,
                _callback: closure,
            },
        );
        id
    }

    fn disconnect(&self, observer: ObserverId) {
        let entry = self.observers.borrow_mut().remove(&observer);
        if let Some(entry) = entry {
            entry.observer.disconnect();
        }
    }

    fn listen(&self, node: NodeRef, event: HostEvent, callback: Rc<dyn Fn()>) -> ListenerId {
        let id = ListenerId(self.next_handle());
        let Some(element) = self.element(node) else {
            return id;
        };
        let event = match event {
            HostEvent::Click => "click",
        };
        // The row underneath would otherwise treat the click as opening the thread.
        let closure = Closure::wrap(Box::new(move |dom_event: web_sys::Event| {
            dom_event.stop_propagation();
            callback();
        }) as Box<dyn FnMut(web_sys::Event)>);
        if let Err(error) =
            element.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
        {
            log::error!("could not listen for {event} on {node:?}: {error:?}");
            return id;
        }
        self.listeners.borrow_mut().insert(
            id,
            ListenerEntry {
                element,
                event,
                callback: closure,
            },
        );
        id
    }

    fn unlisten(&self, listener: ListenerId) {
        let entry = self.listeners.borrow_mut().remove(&listener);
        if let Some(entry) = entry {
            let _ = entry
                .element
                .remove_event_listener_with_callback(entry.event, entry.callback.as_ref().unchecked_ref());
        }
    }

    fn force_repaint(&self, nodes: &[NodeRef]) {
        for node in nodes {
            let Some(element) = self.html_element(*node) else {
                continue;
            };
            let style = element.style();
            let previous = style.get_property_value("display").unwrap_or_default();
            let _ = style.set_property("display", "none");
            // Reading layout flushes the hidden state before it is undone.
            let _ = element.offset_height();
            let _ = if previous.is_empty() {
                style.remove_property("display").map(drop)
            } else {
                style.set_property("display", &previous)
            };
        }
    }
}

impl Drop for DomHost {
    fn drop(&mut self) {
        for entry in self.observers.get_mut().values() {
            entry.observer.disconnect();
        }
        self.remove_outside_click();
    }
}
