//! Row conventions, the identity probe and dropdowns for [`DomHost`].

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Reflect;
use rowdeco::decoration::DECORATION_CLASS;
use rowdeco::host::{Contact, DateCell, DropdownId, InsertionPoint, RowLayout, RowMetadata, Slot};
use rowdeco::{ExtractionError, NodeRef, ProbeChannel, RowMarkup, Widgets};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Element, MouseEvent, MouseEventInit};

use crate::tree::{DomHost, Dropdown};

const DROPDOWN_CLASS: &str = "rowdeco-dropdown";

impl DomHost {
    fn row_element(&self, row: NodeRef) -> Result<Element, ExtractionError> {
        self.element(row).ok_or(ExtractionError::Detached(row))
    }

    fn required(&self, row: NodeRef, selector: &str, field: &'static str) -> Result<Element, ExtractionError> {
        self.query(row, selector)
            .ok_or(ExtractionError::MissingField { row, field })
    }

    fn subject_element(&self, row: NodeRef, element: &Element) -> Result<Element, ExtractionError> {
        if self.layout(row) == RowLayout::Vertical {
            return element
                .next_element_sibling()
                .and_then(|next| next.query_selector(&self.selectors.vertical_subject).ok().flatten())
                .ok_or(ExtractionError::MissingField {
                    row,
                    field: "subject",
                });
        }
        self.required(row, &self.selectors.subject, "subject")
    }

    /// `container` plus its direct child matching `before`, if any.
    fn slot(&self, row: NodeRef, container: &str, before: Option<&str>) -> Option<InsertionPoint> {
        let parent = self.query(row, container)?;
        let before = before
            .and_then(|selector| parent.query_selector(selector).ok().flatten())
            .filter(|child| child.parent_element().as_ref() == Some(&parent));
        Some(InsertionPoint {
            parent: self.node_ref(&parent),
            before: before.map(|child| self.node_ref(&child)),
        })
    }

    /// The element backing a dropdown, for callers to fill in.
    pub fn dropdown_element(&self, dropdown: DropdownId) -> Option<Element> {
        self.dropdowns
            .borrow()
            .get(&dropdown.0)
            .map(|dropdown| dropdown.container.clone())
    }

    /// Dropdowns close on any mousedown outside of them and their button.
    pub(crate) fn install_outside_click(&self) {
        let this = self.this.clone();
        let closure = Closure::wrap(Box::new(move |event: web_sys::Event| {
            let Some(host) = this.upgrade() else {
                return;
            };
            let Some(target) = event.target().and_then(|target| target.dyn_into::<web_sys::Node>().ok())
            else {
                return;
            };
            let outside: Vec<u64> = host
                .dropdowns
                .borrow()
                .iter()
                .filter(|(_, dropdown)| {
                    !dropdown.container.contains(Some(&target)) && !dropdown.anchor.contains(Some(&target))
                })
                .map(|(id, _)| *id)
                .collect();
            for id in outside {
                host.close_dropdown(DropdownId(id));
            }
        }) as Box<dyn FnMut(web_sys::Event)>);
        if let Err(error) = self.document.add_event_listener_with_callback_and_bool(
            "mousedown",
            closure.as_ref().unchecked_ref(),
            true,
        ) {
            log::error!("could not watch for outside clicks: {error:?}");
            return;
        }
        *self.outside_click.borrow_mut() = Some(closure);
    }

    pub(crate) fn remove_outside_click(&self) {
        if let Some(closure) = self.outside_click.borrow_mut().take() {
            let _ = self.document.remove_event_listener_with_callback_and_bool(
                "mousedown",
                closure.as_ref().unchecked_ref(),
                true,
            );
        }
    }
}

impl RowMarkup for DomHost {
    fn is_row(&self, node: NodeRef) -> bool {
        self.element(node)
            .is_some_and(|element| element.matches(&self.selectors.row).unwrap_or(false))
    }

    fn layout(&self, row: NodeRef) -> RowLayout {
        let Some(element) = self.element(row) else {
            return RowLayout::Horizontal;
        };
        let classes = element.class_list();
        let vertical = !self.selectors.vertical_classes.is_empty()
            && self
                .selectors
                .vertical_classes
                .iter()
                .all(|class| classes.contains(class));
        if vertical {
            RowLayout::Vertical
        } else {
            RowLayout::Horizontal
        }
    }

    fn metadata(&self, row: NodeRef) -> Result<RowMetadata, ExtractionError> {
        let element = self.row_element(row)?;
        let subject = self.subject_element(row, &element)?;
        let date = self.required(row, &self.selectors.date_label, "date")?;
        let participants = self.required(row, &self.selectors.participants, "participants")?;
        Ok(RowMetadata {
            subject: subject.text_content().unwrap_or_default(),
            time_label: date.text_content().unwrap_or_default(),
            participants: participants.text_content().unwrap_or_default(),
        })
    }

    fn insertion_point(&self, row: NodeRef, slot: Slot) -> Option<InsertionPoint> {
        let selectors = &self.selectors;
        match slot {
            Slot::Labels => self.slot(row, &selectors.label_container, Some(&selectors.label_before)),
            Slot::Images => self.slot(row, &selectors.image_container, Some(&selectors.label_before)),
            Slot::Buttons => self.slot(row, &selectors.button_container, None),
            Slot::AttachmentIcons => self.slot(row, &selectors.attachment_container, None),
        }
    }

    fn date_cell(&self, row: NodeRef) -> Option<DateCell> {
        let container = self.query(row, &self.selectors.date_cell)?;
        let children = container.children();
        let original = (0..children.length())
            .filter_map(|index| children.item(index))
            .find(|child| !child.class_list().contains(DECORATION_CLASS));
        Some(DateCell {
            container: self.node_ref(&container),
            original: original.map(|element| self.node_ref(&element)),
        })
    }

    fn date_string(&self, row: NodeRef) -> Result<String, ExtractionError> {
        self.row_element(row)?;
        self.required(row, &self.selectors.date_label, "date")?
            .get_attribute("title")
            .ok_or(ExtractionError::MissingField { row, field: "date title" })
    }

    fn participants_html(&self, row: NodeRef) -> Result<String, ExtractionError> {
        self.row_element(row)?;
        Ok(self
            .required(row, &self.selectors.participants, "participants")?
            .inner_html())
    }

    fn contacts(&self, row: NodeRef) -> Vec<Contact> {
        let Some(nodes) = self
            .element(row)
            .and_then(|element| element.query_selector_all(&self.selectors.contact).ok())
        else {
            return Vec::new();
        };
        (0..nodes.length())
            .filter_map(|index| nodes.item(index))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .filter_map(|element| {
                Some(Contact {
                    email_address: element.get_attribute("email")?,
                    name: element.get_attribute("name"),
                })
            })
            .collect()
    }

    fn is_selected(&self, row: NodeRef) -> bool {
        self.query(row, &self.selectors.selected_checkbox).is_some()
    }

    fn pool_anchor(&self, row: NodeRef) -> Option<NodeRef> {
        let selector = self.selectors.pool_anchor.as_deref()?;
        let anchor = self.element(row)?.closest(selector).ok().flatten()?;
        Some(self.node_ref(&anchor))
    }
}

impl ProbeChannel for DomHost {
    fn current_selection(&self, row: NodeRef) -> Option<NodeRef> {
        let list = self.element(row)?.parent_element()?;
        let cursor_row = list
            .query_selector(&self.selectors.cursor_cell)
            .ok()
            .flatten()
            .and_then(|cell| cell.closest("tr").ok().flatten());
        let selected = match cursor_row {
            Some(selected) => selected,
            None => list.query_selector(&self.selectors.row).ok().flatten()?,
        };
        Some(self.node_ref(&selected))
    }

    /// Ctrl-clicks the row while `window.open` is swapped for a function that records
    /// the URL it is asked to open.
    fn probe_navigation(&self, row: NodeRef) -> Option<String> {
        let element = self.element(row)?;
        let window: &JsValue = self.window.as_ref();
        let open_key = JsValue::from_str("open");
        let original_open = Reflect::get(window, &open_key).ok()?;

        let captured = Rc::new(RefCell::new(None::<String>));
        let capture = {
            let captured = Rc::clone(&captured);
            Closure::wrap(Box::new(move |url: JsValue| -> JsValue {
                *captured.borrow_mut() = url.as_string();
                JsValue::NULL
            }) as Box<dyn FnMut(JsValue) -> JsValue>)
        };
        if Reflect::set(window, &open_key, capture.as_ref()).is_err() {
            log::debug!("window.open cannot be replaced, probe of {row:?} skipped");
            return None;
        }

        let init = MouseEventInit::new();
        init.set_bubbles(true);
        init.set_cancelable(true);
        init.set_ctrl_key(true);
        init.set_meta_key(true);
        match MouseEvent::new_with_mouse_event_init_dict("click", &init) {
            Ok(event) => {
                let _ = element.dispatch_event(&event);
            }
            Err(error) => log::error!("could not build the probe click: {error:?}"),
        }

        if Reflect::set(window, &open_key, &original_open).is_err() {
            log::error!("could not restore window.open after probing {row:?}");
        }
        captured.borrow_mut().take()
    }
}

impl Widgets for DomHost {
    fn open_dropdown(&self, anchor: NodeRef) -> DropdownId {
        let id = DropdownId(self.next_handle());
        let (Some(anchor_element), Some(body)) = (self.element(anchor), self.document.body()) else {
            return id;
        };
        let container = match self.document.create_element("div") {
            Ok(container) => container,
            Err(error) => {
                log::error!("could not create a dropdown: {error:?}");
                return id;
            }
        };
        let _ = container.class_list().add_1(DROPDOWN_CLASS);
        let rect = anchor_element.get_bounding_client_rect();
        let top = rect.bottom() + self.window.scroll_y().unwrap_or_default();
        let left = rect.left() + self.window.scroll_x().unwrap_or_default();
        let _ = container.set_attribute(
            "style",
            &format!("position: absolute; top: {top}px; left: {left}px; z-index: 1000;"),
        );
        if let Err(error) = body.append_child(&container) {
            log::error!("could not attach a dropdown: {error:?}");
            return id;
        }
        self.dropdowns.borrow_mut().insert(
            id.0,
            Dropdown {
                container,
                anchor: anchor_element,
            },
        );
        id
    }

    fn close_dropdown(&self, dropdown: DropdownId) {
        let removed = self.dropdowns.borrow_mut().remove(&dropdown.0);
        if let Some(dropdown) = removed {
            dropdown.container.remove();
        }
    }

    fn dropdown_is_open(&self, dropdown: DropdownId) -> bool {
        self.dropdowns
            .borrow()
            .get(&dropdown.0)
            .is_some_and(|dropdown| dropdown.container.is_connected())
    }
}
