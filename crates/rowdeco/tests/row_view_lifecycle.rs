use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_channel::mpsc;
use rowdeco::decoration::DECORATION_CLASS;
use rowdeco::testing::{FakeHost, RowSpec};
use rowdeco::{
    DateDescriptor, DecorationKind, Diagnostic, EngineConfig, EventLoop, HostTree, Input,
    LabelDescriptor, NodeRef, RowEngine, RowView, ThreadId,
};

struct Page {
    event_loop: EventLoop,
    host: Rc<FakeHost>,
    engine: RowEngine,
    list: NodeRef,
}

fn page_with(config: EngineConfig) -> Page {
    let _ = env_logger::builder().is_test(true).try_init();
    let event_loop = EventLoop::new();
    let host = FakeHost::new(&event_loop);
    let engine = RowEngine::with_config(host.clone(), event_loop.clone(), config);
    let list = host.add_list();
    event_loop.run_until_idle();
    Page {
        event_loop,
        host,
        engine,
        list,
    }
}

fn page() -> Page {
    page_with(EngineConfig::default())
}

fn hello(thread: &str) -> RowSpec {
    RowSpec::new("Hello", "3:00 PM", "Alice, Bob").thread(thread)
}

fn labels(page: &Page, row: NodeRef) -> Vec<NodeRef> {
    page.host
        .visible_by_class(row, DecorationKind::Label.class_name())
}

#[test]
fn label_survives_repeated_rerenders() {
    let page = page();
    let row = page.host.add_row(page.list, hello("t1"));
    let view = page.engine.bind_row(row).unwrap();
    view.add_label(Some(LabelDescriptor::new("Sale")));
    page.event_loop.run_until_idle();
    let node = labels(&page, row)[0];

    for _ in 0..3 {
        page.host.strip_foreign_nodes(row);
        assert!(labels(&page, row).is_empty());
        page.event_loop.run_until_idle();
        assert_eq!(labels(&page, row), vec![node]);
    }
    assert_eq!(view.pool().total_allocated(), 1);
    assert!(page.engine.diagnostics().is_empty());
}

#[test]
fn stream_values_detach_and_reattach_the_same_record() {
    let page = page();
    let row = page.host.add_row(page.list, hello("t1"));
    let view = page.engine.bind_row(row).unwrap();
    let (tx, rx) = mpsc::unbounded::<Option<LabelDescriptor>>();
    view.add_label(Input::stream(rx));
    page.event_loop.run_until_idle();
    assert!(labels(&page, row).is_empty());

    tx.unbounded_send(Some(LabelDescriptor::new("One"))).unwrap();
    page.event_loop.run_until_idle();
    let node = labels(&page, row)[0];

    tx.unbounded_send(None).unwrap();
    page.event_loop.run_until_idle();
    assert!(page.host.find_by_class(row, DECORATION_CLASS).is_empty());
    assert_eq!(view.pool().unclaimed_len(DecorationKind::Label), 1);

    tx.unbounded_send(Some(LabelDescriptor::new("Two"))).unwrap();
    page.event_loop.run_until_idle();
    assert_eq!(labels(&page, row), vec![node]);
    assert_eq!(page.host.text(page.host.children(node)[0]).as_deref(), Some("Two"));
    assert_eq!(view.pool().total_allocated(), 1);
}

#[test]
fn destroy_hides_releases_and_later_sweeps() {
    let page = page();
    let row = page.host.add_row(page.list, hello("t1"));
    let view = page.engine.bind_row(row).unwrap();
    view.add_label(Some(LabelDescriptor::new("Sale")));
    view.replace_date(Some(DateDescriptor {
        text: "Yesterday".to_string(),
        ..DateDescriptor::default()
    }));
    page.event_loop.run_until_idle();
    assert_eq!(page.host.find_by_class(row, DECORATION_CLASS).len(), 2);

    view.destroy();
    view.destroy();
    assert!(page.host.visible_by_class(row, DECORATION_CLASS).is_empty());
    assert_eq!(page.host.find_by_class(row, DECORATION_CLASS).len(), 2);
    assert_eq!(view.pool().unclaimed_len(DecorationKind::Label), 1);
    assert_eq!(view.pool().unclaimed_len(DecorationKind::DateOverride), 1);
    let original = page.host.date_label_node(row).unwrap();
    assert_eq!(page.host.style(original, "display"), None);
    assert!(page.engine.diagnostics().is_empty());

    page.event_loop.advance_by(0);
    assert!(page.host.find_by_class(row, DECORATION_CLASS).is_empty());
    assert!(view.pool().is_empty());
}

#[test]
fn successor_row_reclaims_records_through_the_list_watcher() {
    let page = page();
    let first = page.host.add_row(page.list, hello("t1"));
    let views = Rc::new(RefCell::new(Vec::<RowView>::new()));
    let _watcher = {
        let views = Rc::clone(&views);
        page.engine.watch_list(page.list, move |view| {
            view.add_label(Some(LabelDescriptor::new("Sale")));
            view.replace_date(Some(DateDescriptor {
                text: "Yesterday".to_string(),
                ..DateDescriptor::default()
            }));
            views.borrow_mut().push(view);
        })
    };
    page.event_loop.advance_by(0);
    let pool = views.borrow()[0].pool().clone();
    assert_eq!(views.borrow()[0].known_thread_id(), Some(ThreadId::from("t1")));
    let node = labels(&page, first)[0];

    let mut current = first;
    for _ in 0..3 {
        current = page.host.replace_row(current, hello("t1")).unwrap();
        page.event_loop.advance_by(0);
        assert_eq!(labels(&page, current), vec![node]);
    }
    assert_eq!(views.borrow().len(), 4);
    assert!(views.borrow()[..3].iter().all(RowView::is_destroyed));
    let last = views.borrow()[3].clone();
    assert!(last.pool().ptr_eq(&pool));
    assert_eq!(pool.total_allocated(), 2);
    assert_eq!(pool.claimed_len(DecorationKind::Label), 1);
    assert_eq!(pool.claimed_len(DecorationKind::DateOverride), 1);
    assert!(last.is_ready());
    assert_eq!(page.engine.resolver().probe_count(), 1);
    assert!(page.engine.diagnostics().is_empty());
}

#[test]
fn rebinding_onto_an_anchor_waits_for_the_settle_delay() {
    let page = page_with(EngineConfig {
        rebind_settle_ms: 50,
        ..EngineConfig::default()
    });
    let anchor = page.host.add_anchor();
    let row = page.host.add_row(page.list, hello("t1").anchor(anchor));
    let view = page.engine.bind_row(row).unwrap();
    view.add_label(Some(LabelDescriptor::new("Sale")));
    page.event_loop.run_until_idle();
    assert!(view.is_ready());
    let node = labels(&page, row)[0];

    view.destroy();
    let successor = page
        .host
        .replace_row(row, hello("t1").anchor(anchor))
        .unwrap();
    let next = page.engine.bind_row(successor).unwrap();
    assert!(next.pool().ptr_eq(view.pool()));
    assert!(!next.pool().has_pending_sweep());
    next.add_label(Some(LabelDescriptor::new("Sale")));
    page.event_loop.run_until_idle();
    assert_eq!(labels(&page, successor), vec![node]);

    page.event_loop.advance_by(49);
    assert!(!next.is_ready());
    page.event_loop.advance_by(1);
    assert!(next.is_ready());
    assert_eq!(next.pool().total_allocated(), 1);
}

#[test]
fn never_ready_row_reports_once_and_never_resolves() {
    let page = page();
    let row = page
        .host
        .add_row(page.list, RowSpec::new("Hello", "3:00 PM", "Alice, Bob"));
    let view = page.engine.bind_row(row).unwrap();
    let resolved = Rc::new(Cell::new(false));
    let _waiter = {
        let resolved = Rc::clone(&resolved);
        let ready = view.wait_for_ready();
        page.event_loop.spawn(async move {
            ready.await;
            resolved.set(true);
        })
    };

    page.event_loop.advance_by(200);
    assert!(!resolved.get());
    assert!(!view.is_ready());
    assert_eq!(
        page.engine.diagnostics().reported(),
        vec![Diagnostic::NeverReady {
            element: row,
            attempts: 4,
        }]
    );

    page.event_loop.advance_by(1_000);
    assert_eq!(
        page.engine
            .diagnostics()
            .count(|d| matches!(d, Diagnostic::NeverReady { .. })),
        1
    );
}

#[test]
fn destroy_before_the_deadline_cancels_readiness() {
    let page = page();
    let row = page
        .host
        .add_row(page.list, RowSpec::new("Hello", "3:00 PM", "Alice, Bob"));
    let view = page.engine.bind_row(row).unwrap();
    page.event_loop.advance_by(5);
    view.destroy();

    page.event_loop.advance_by(200);
    assert!(page.engine.diagnostics().is_empty());
    assert_eq!(page.event_loop.live_tasks(), 0);
}

fn date(text: &str) -> Option<DateDescriptor> {
    Some(DateDescriptor {
        text: text.to_string(),
        ..DateDescriptor::default()
    })
}

fn dates(page: &Page, row: NodeRef) -> Vec<NodeRef> {
    page.host
        .visible_by_class(row, DecorationKind::DateOverride.class_name())
}

#[test]
fn row_rendered_before_its_predecessor_leaves_takes_the_date_over() {
    let page = page();
    let anchor = page.host.add_anchor();
    let first = page.host.add_row(page.list, hello("t1").anchor(anchor));
    let views = Rc::new(RefCell::new(Vec::<RowView>::new()));
    let _watcher = {
        let views = Rc::clone(&views);
        page.engine.watch_list(page.list, move |view| {
            view.replace_date(date("Yesterday"));
            views.borrow_mut().push(view);
        })
    };
    page.event_loop.advance_by(0);
    assert_eq!(dates(&page, first).len(), 1);

    let second = page
        .host
        .insert_row(page.list, hello("t1").anchor(anchor), Some(first));
    page.event_loop.advance_by(0);
    assert_eq!(views.borrow().len(), 2);
    assert!(dates(&page, first).is_empty());
    assert_eq!(dates(&page, second).len(), 1);
    let original = page.host.date_label_node(first).unwrap();
    assert_eq!(page.host.style(original, "display"), None);

    page.host.remove_row(first);
    page.event_loop.advance_by(0);
    assert!(views.borrow()[0].is_destroyed());
    assert_eq!(dates(&page, second).len(), 1);
    let pool = views.borrow()[1].pool().clone();
    assert_eq!(pool.claimed_len(DecorationKind::DateOverride), 1);
    assert_eq!(pool.total_allocated(), 1);
}

#[test]
fn second_view_on_the_same_row_takes_the_date_over() {
    let page = page();
    let row = page.host.add_row(page.list, hello("t1"));
    let first = page.engine.bind_row(row).unwrap();
    first.replace_date(date("Yesterday"));
    page.event_loop.run_until_idle();
    assert!(first.is_ready());

    let second = page.engine.bind_row(row).unwrap();
    assert!(second.pool().ptr_eq(first.pool()));
    second.replace_date(date("Tomorrow"));
    page.event_loop.run_until_idle();
    let shown = dates(&page, row);
    assert_eq!(shown.len(), 1);
    assert_eq!(page.host.text(shown[0]).as_deref(), Some("Tomorrow"));

    first.destroy();
    page.event_loop.advance_by(0);
    let shown = dates(&page, row);
    assert_eq!(shown.len(), 1);
    assert_eq!(page.host.text(shown[0]).as_deref(), Some("Tomorrow"));
    assert_eq!(second.pool().claimed_len(DecorationKind::DateOverride), 1);
    assert_eq!(second.pool().total_allocated(), 1);
}

#[test]
fn nothing_is_applied_after_destroy_even_when_already_queued() {
    let page = page();
    let row = page.host.add_row(page.list, hello("t1"));
    let view = page.engine.bind_row(row).unwrap();
    view.add_label(Some(LabelDescriptor::new("Kept")));
    let (tx, rx) = mpsc::unbounded::<Option<LabelDescriptor>>();
    view.add_label(Input::stream(rx));
    page.event_loop.run_until_idle();
    assert_eq!(labels(&page, row).len(), 1);

    tx.unbounded_send(Some(LabelDescriptor::new("Late"))).unwrap();
    page.host.strip_foreign_nodes(row);
    view.destroy();
    page.event_loop.run_until_idle();

    assert!(labels(&page, row).is_empty());
    assert_eq!(view.pool().claimed_len(DecorationKind::Label), 0);
    assert_eq!(view.pool().total_allocated(), 1);
}
