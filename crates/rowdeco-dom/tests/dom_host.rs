#![cfg(target_arch = "wasm32")]

use js_sys::{Function, Reflect};
use rowdeco::host::Slot;
use rowdeco::{
    EngineConfig, HostTree, LabelDescriptor, NodeRef, ProbeChannel, RowMarkup, ThreadId,
};
use rowdeco_dom::{DomHost, MarkupSelectors};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_test::*;
use web_sys::{Element, MouseEvent};

wasm_bindgen_test_configure!(run_in_browser);

const LIST_HTML: &str = r#"<table><tbody>
<tr class="zA" id=":r1">
  <td class="apU xY"><span class="T-KWcmd"></span></td>
  <td class="yX"><div class="yW"><span email="alice@example.com" name="Alice">Alice</span>, <span email="bob@example.com" name="Bob">Bob</span>, <span email="alice@example.com" name="Alice">Alice</span> (3)</div></td>
  <td class="a4W"><div class="xS"><div class="xT"><div class="y6"><span id=":s1">Hello</span></div></div></div></td>
  <td class="yf xY"></td>
  <td class="xW"><span title="Mon, Oct 19, 2026, 3:00 PM">3:00 PM</span></td>
</tr>
</tbody></table>"#;

struct Mounted {
    root: Element,
    row: Element,
}

fn mount() -> Mounted {
    let document = web_sys::window().unwrap().document().unwrap();
    let root = document.create_element("div").unwrap();
    root.set_inner_html(LIST_HTML);
    document.body().unwrap().append_child(&root).unwrap();
    let row = root.query_selector("tr.zA").unwrap().unwrap();
    Mounted { root, row }
}

/// Makes a ctrl-click on `row` open the thread's popup URL, like the host page does.
fn open_popup_on_ctrl_click(row: &Element, url: &'static str) {
    let closure = Closure::wrap(Box::new(move |event: MouseEvent| {
        if !event.ctrl_key() {
            return;
        }
        let window = web_sys::window().unwrap();
        let open: Function = Reflect::get(&window, &"open".into())
            .unwrap()
            .unchecked_into();
        open.call1(&window, &url.into()).unwrap();
    }) as Box<dyn FnMut(MouseEvent)>);
    row.add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())
        .unwrap();
    closure.forget();
}

#[wasm_bindgen_test]
fn reads_row_markup() {
    let mounted = mount();
    let host = DomHost::new(MarkupSelectors::default()).unwrap();
    let row = host.node_ref(&mounted.row);
    let list = host.parent(row).unwrap();

    assert!(host.is_row(row));
    assert!(!host.is_row(list));
    let metadata = host.metadata(row).unwrap();
    assert_eq!(metadata.subject, "Hello");
    assert_eq!(metadata.time_label, "3:00 PM");
    assert_eq!(host.date_string(row).unwrap(), "Mon, Oct 19, 2026, 3:00 PM");
    assert_eq!(host.contacts(row).len(), 3);
    assert!(host.participants_html(row).unwrap().contains("(3)"));

    let point = host.insertion_point(row, Slot::Labels).unwrap();
    let subject_cell = mounted.row.query_selector("div.y6").unwrap().unwrap();
    assert_eq!(point.before, Some(host.node_ref(&subject_cell)));
    mounted.root.remove();
}

#[wasm_bindgen_test]
fn probe_captures_the_popup_url_and_restores_window_open() {
    let mounted = mount();
    open_popup_on_ctrl_click(&mounted.row, "?ui=2&view=btop&th=t123");
    let host = DomHost::new(MarkupSelectors::default()).unwrap();
    let row = host.node_ref(&mounted.row);
    let window = web_sys::window().unwrap();
    let open_before = Reflect::get(&window, &"open".into()).unwrap();

    assert_eq!(
        host.probe_navigation(row).as_deref(),
        Some("?ui=2&view=btop&th=t123")
    );
    let open_after = Reflect::get(&window, &"open".into()).unwrap();
    assert_eq!(open_before, open_after);
    mounted.root.remove();
}

#[wasm_bindgen_test]
async fn engine_decorates_and_resolves_a_live_row() {
    let mounted = mount();
    open_popup_on_ctrl_click(&mounted.row, "?ui=2&view=btop&th=t123");
    let (host, engine) =
        rowdeco_dom::start(MarkupSelectors::default(), EngineConfig::default()).unwrap();
    let row: NodeRef = host.node_ref(&mounted.row);

    let view = engine.bind_row(row).unwrap();
    view.add_label(Some(LabelDescriptor::new("Sale")));
    let label = mounted
        .row
        .query_selector(".rowdeco-label")
        .unwrap()
        .unwrap();
    let subject_cell = mounted.row.query_selector("div.y6").unwrap().unwrap();
    assert_eq!(label.next_element_sibling(), Some(subject_cell));

    zoon::Timer::sleep(50).await;
    assert!(view.is_ready());
    assert_eq!(view.known_thread_id(), Some(ThreadId::from("t123")));

    view.destroy();
    mounted.root.remove();
}
