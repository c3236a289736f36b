//! The façade bound to one live row element.
//!
//! A [`RowView`] owns the decorations callers attach to a row. Each decoration input is
//! normalized into a [`Property`], combined with the row's refresh property and rendered
//! through a record claimed from the row group's [`DecorationPool`]. When the host
//! replaces the row, the successor view binds to the same pool and picks the records up
//! again instead of building new ones.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::counts::{ThreadCounts, parse_counts, unique_contacts};
use crate::decoration::{
    AttachmentIconDescriptor, ButtonDescriptor, DateDescriptor, DecorationKind, DecorationValue,
    ImageDescriptor, LabelDescriptor, RenderCx, RenderOutcome,
};
use crate::diagnostics::Diagnostic;
use crate::engine::RowEngine;
use crate::error::{PoolError, RowViewError};
use crate::event_loop::TaskHandle;
use crate::host::{Contact, NodeRef, RowLayout};
use crate::identity::ThreadId;
use crate::pool::{DecorationPool, PoolKey, RecordId, ReleaseMode};
use crate::property::{Input, Property};
use crate::refresh::RefreshNotifier;
use crate::scope::SubscriptionScope;
use crate::teardown::Teardown;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowViewId(Ulid);

impl fmt::Display for RowViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentState {
    NoValue,
    Attached(RecordId),
    Detached,
    Ended,
}

/// One decoration call on a view.
struct Attachment {
    kind: DecorationKind,
    state: Cell<AttachmentState>,
    missing_reported: Cell<bool>,
    source: Property<Option<DecorationValue>>,
    combined: Property<Option<DecorationValue>>,
}

struct RowViewInner {
    id: RowViewId,
    engine: RowEngine,
    element: NodeRef,
    layout: RowLayout,
    pool: DecorationPool,
    teardown: Teardown,
    scope: SubscriptionScope,
    refresher: RefreshNotifier,
    ready: Property<ThreadId>,
    readiness: RefCell<Option<TaskHandle>>,
    attachments: RefCell<Vec<Rc<Attachment>>>,
    date: RefCell<Option<Rc<Attachment>>>,
    thread_id: RefCell<Option<ThreadId>>,
    counts: OnceCell<ThreadCounts>,
    destroyed: Cell<bool>,
}

#[derive(Clone)]
pub struct RowView {
    inner: Rc<RowViewInner>,
}

/// Non-owning handle, handed to decoration records so clicks can find their view.
#[derive(Clone, Default)]
pub struct WeakRowView {
    inner: Weak<RowViewInner>,
}

impl WeakRowView {
    pub fn upgrade(&self) -> Option<RowView> {
        self.inner.upgrade().map(|inner| RowView { inner })
    }
}

fn fail_fast<T>(result: Result<T, PoolError>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("decoration pool invariant violated: {error}"),
    }
}

impl RowView {
    pub(crate) fn bind(engine: &RowEngine, element: NodeRef) -> Self {
        let host = engine.host();
        let key = match host.pool_anchor(element) {
            Some(anchor) => PoolKey::Anchor(anchor),
            None => match engine.resolver().cached(element) {
                Some(thread_id) => PoolKey::Thread(thread_id),
                None => PoolKey::Private(Ulid::new()),
            },
        };
        let pool = engine.pools().get_or_create(key);
        pool.cancel_grace_sweep();
        let rebinding = !pool.is_empty();

        let view = RowView {
            inner: Rc::new(RowViewInner {
                id: RowViewId(Ulid::new()),
                engine: engine.clone(),
                element,
                layout: host.layout(element),
                pool,
                teardown: Teardown::new(),
                scope: SubscriptionScope::new(),
                refresher: RefreshNotifier::new(
                    Rc::clone(host),
                    engine.event_loop().clone(),
                    element,
                ),
                ready: Property::new(),
                readiness: RefCell::new(None),
                attachments: RefCell::new(Vec::new()),
                date: RefCell::new(None),
                thread_id: RefCell::new(None),
                counts: OnceCell::new(),
                destroyed: Cell::new(false),
            }),
        };
        let readiness = view.spawn_readiness(rebinding);
        *view.inner.readiness.borrow_mut() = Some(readiness);
        log::debug!(
            "row view {} bound to {element:?}{}",
            view.inner.id,
            if rebinding { " (rebind)" } else { "" }
        );
        view
    }

    pub fn downgrade(&self) -> WeakRowView {
        WeakRowView {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> RowViewId {
        self.inner.id
    }

    pub fn element(&self) -> NodeRef {
        self.inner.element
    }

    pub fn pool(&self) -> &DecorationPool {
        &self.inner.pool
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.has_value()
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<(), RowViewError> {
        if self.inner.destroyed.get() {
            self.inner
                .engine
                .diagnostics()
                .warn(Diagnostic::DestroyedRowView { operation });
            return Err(RowViewError::Destroyed);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Readiness
    // ───────────────────────────────────────────────────────────────────────

    fn spawn_readiness(&self, rebinding: bool) -> TaskHandle {
        let weak = self.downgrade();
        let engine = self.inner.engine.clone();
        let teardown = self.inner.teardown.clone();
        let element = self.inner.element;
        let config = engine.config();
        let settle_ms = rebinding.then_some(config.rebind_settle_ms);
        let backoff = config.ready_backoff_ms.clone();
        let event_loop = engine.event_loop().clone();

        let wait = async move {
            if let Some(settle_ms) = settle_ms {
                event_loop.sleep(settle_ms).await;
            }
            let mut attempts = 0;
            let mut delays = backoff.into_iter();
            loop {
                attempts += 1;
                let Some(view) = weak.upgrade() else {
                    return;
                };
                if let Some(thread_id) = view.resolve_identity() {
                    view.become_ready(thread_id);
                    return;
                }
                drop(view);
                match delays.next() {
                    Some(delay) => event_loop.sleep(delay).await,
                    None => break,
                }
            }
            engine
                .diagnostics()
                .warn(Diagnostic::NeverReady { element, attempts });
            if let Some(view) = weak.upgrade() {
                view.queue_sweep();
            }
        };
        self.inner
            .engine
            .event_loop()
            .spawn(async move {
                teardown.guard(wait).await;
            })
    }

    fn resolve_identity(&self) -> Option<ThreadId> {
        if let Some(known) = self.known_thread_id() {
            return Some(known);
        }
        let resolved = self.inner.engine.resolver().resolve(self.inner.element)?;
        *self.inner.thread_id.borrow_mut() = Some(resolved.clone());
        Some(resolved)
    }

    fn become_ready(&self, thread_id: ThreadId) {
        log::debug!("row view {} ready as {thread_id}", self.inner.id);
        self.inner
            .engine
            .pools()
            .alias(PoolKey::Thread(thread_id.clone()), &self.inner.pool);
        self.inner.ready.set(thread_id);
        self.queue_sweep();
    }

    fn queue_sweep(&self) {
        let pool = self.inner.pool.clone();
        self.inner
            .engine
            .event_loop()
            .queue_microtask(move || {
                pool.sweep_unclaimed();
            });
    }

    /// Resolves with this view once its thread id is known. Never resolves for a row that
    /// never becomes ready or once the view is destroyed.
    pub fn wait_for_ready(&self) -> impl Future<Output = RowView> + 'static {
        let ready = self.inner.teardown.guard(self.inner.ready.first_value());
        let view = self.clone();
        async move {
            if let Some(Some(_)) = ready.await {
                if !view.is_destroyed() {
                    return view;
                }
            }
            std::future::pending().await
        }
    }

    /// Runs `callback` synchronously at the ready transition, or right away when the view
    /// is already ready.
    pub fn on_ready(&self, callback: impl FnOnce(RowView) + 'static) {
        if self.ensure_alive("on_ready").is_err() {
            return;
        }
        let weak = self.downgrade();
        let callback = RefCell::new(Some(callback));
        let subscription = self.inner.ready.subscribe(move |_| {
            let Some(view) = weak.upgrade() else {
                return;
            };
            if view.is_destroyed() {
                return;
            }
            if let Some(callback) = callback.borrow_mut().take() {
                callback(view);
            }
        });
        self.inner.scope.add(subscription);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Decorations
    // ───────────────────────────────────────────────────────────────────────

    pub fn add_label(&self, label: impl Into<Input<Option<LabelDescriptor>>>) {
        self.decorate(
            "add_label",
            DecorationKind::Label,
            label.into().map(|value| value.map(DecorationValue::Label)),
        );
    }

    pub fn add_button(&self, button: impl Into<Input<Option<ButtonDescriptor>>>) {
        self.decorate(
            "add_button",
            DecorationKind::Button,
            button.into().map(|value| value.map(DecorationValue::Button)),
        );
    }

    pub fn add_image(&self, image: impl Into<Input<Option<ImageDescriptor>>>) {
        self.decorate(
            "add_image",
            DecorationKind::Image,
            image.into().map(|value| value.map(DecorationValue::Image)),
        );
    }

    pub fn add_attachment_icon(&self, icon: impl Into<Input<Option<AttachmentIconDescriptor>>>) {
        self.decorate(
            "add_attachment_icon",
            DecorationKind::AttachmentIcon,
            icon.into().map(|value| value.map(DecorationValue::AttachmentIcon)),
        );
    }

    /// Replaces the row's date. A later call replaces the earlier one.
    pub fn replace_date(&self, date: impl Into<Input<Option<DateDescriptor>>>) {
        let previous = self.inner.date.borrow_mut().take();
        if let Some(previous) = previous {
            self.end_attachment(&previous, ReleaseMode::Retain);
        }
        let attachment = self.decorate(
            "replace_date",
            DecorationKind::DateOverride,
            date.into().map(|value| value.map(DecorationValue::Date)),
        );
        *self.inner.date.borrow_mut() = attachment;
    }

    fn decorate(
        &self,
        operation: &'static str,
        kind: DecorationKind,
        input: Input<Option<DecorationValue>>,
    ) -> Option<Rc<Attachment>> {
        if self.ensure_alive(operation).is_err() {
            return None;
        }
        if self.inner.layout == RowLayout::Vertical {
            log::debug!(
                "{operation} ignored: row {:?} uses the vertical layout",
                self.inner.element
            );
            return None;
        }
        let source = Property::from_input(input, self.inner.engine.event_loop());
        let combined = source.combine_latest(&self.inner.refresher.property(), |value, _tick| {
            value.clone()
        });
        let attachment = Rc::new(Attachment {
            kind,
            state: Cell::new(AttachmentState::NoValue),
            missing_reported: Cell::new(false),
            source,
            combined,
        });
        if kind != DecorationKind::DateOverride {
            self.inner
                .attachments
                .borrow_mut()
                .push(Rc::clone(&attachment));
        }

        let weak_view = self.downgrade();
        let weak_attachment = Rc::downgrade(&attachment);
        let subscription = attachment.combined.subscribe(move |value| {
            if let (Some(view), Some(attachment)) = (weak_view.upgrade(), weak_attachment.upgrade())
            {
                view.apply(&attachment, value.as_ref());
            }
        });
        self.inner.scope.add(subscription);
        Some(attachment)
    }

    fn apply(&self, attachment: &Rc<Attachment>, value: Option<&DecorationValue>) {
        if self.inner.teardown.is_fired() {
            return;
        }
        let pool = &self.inner.pool;
        match (attachment.state.get(), value) {
            (AttachmentState::Ended, _) => {}
            (AttachmentState::Attached(id), None) => {
                fail_fast(pool.release(id, ReleaseMode::Detach));
                attachment.state.set(AttachmentState::Detached);
            }
            (AttachmentState::NoValue | AttachmentState::Detached, None) => {}
            (AttachmentState::Attached(id), Some(value)) => self.render(attachment, id, value),
            (AttachmentState::NoValue | AttachmentState::Detached, Some(value)) => {
                let id = self.claim(attachment);
                attachment.state.set(AttachmentState::Attached(id));
                self.render(attachment, id, value);
            }
        }
    }

    /// A singleton record held by another view of the row group (a row re-rendered
    /// before its predecessor left, or bound twice) moves to this view.
    fn claim(&self, attachment: &Rc<Attachment>) -> RecordId {
        let pool = &self.inner.pool;
        let kind = attachment.kind;
        if !kind.is_singleton() {
            return fail_fast(pool.claim(kind));
        }
        let id = match pool.claim(kind) {
            Err(PoolError::SingletonClaimed(_)) => {
                log::debug!("row view {} takes the {kind:?} record over", self.inner.id);
                fail_fast(pool.take_over(kind))
            }
            claimed => fail_fast(claimed),
        };
        let holder = self.downgrade();
        let held = Rc::downgrade(attachment);
        pool.set_singleton_holder(kind, move || {
            if let (Some(view), Some(attachment)) = (holder.upgrade(), held.upgrade()) {
                view.give_up(&attachment);
            }
        });
        id
    }

    fn give_up(&self, attachment: &Rc<Attachment>) {
        let mut date = self.inner.date.borrow_mut();
        if date
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, attachment))
        {
            *date = None;
        }
        drop(date);
        self.end_attachment(attachment, ReleaseMode::Retain);
    }

    fn render(&self, attachment: &Attachment, id: RecordId, value: &DecorationValue) {
        let owner = self.downgrade();
        let cx = RenderCx {
            host: self.inner.engine.host(),
            row: self.inner.element,
            owner: &owner,
            repaint: self.inner.engine.repaint(),
        };
        let outcome = fail_fast(
            self.inner
                .pool
                .with_record(id, |record| record.render(&cx, value))
                .and_then(|rendered| rendered),
        );
        match outcome {
            RenderOutcome::Rendered => attachment.missing_reported.set(false),
            RenderOutcome::MissingInsertionPoint => {
                if !attachment.missing_reported.replace(true) {
                    self.inner
                        .engine
                        .diagnostics()
                        .error(Diagnostic::MissingInsertionPoint {
                            row: self.inner.element,
                            kind: attachment.kind,
                        });
                }
            }
        }
    }

    fn end_attachment(&self, attachment: &Attachment, mode: ReleaseMode) {
        let previous = attachment.state.replace(AttachmentState::Ended);
        attachment.combined.end();
        attachment.source.end();
        if let AttachmentState::Attached(id) = previous {
            fail_fast(self.inner.pool.release(id, mode));
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────────────

    pub fn subject(&self) -> Result<String, RowViewError> {
        self.ensure_alive("subject")?;
        Ok(self.inner.engine.host().metadata(self.inner.element)?.subject)
    }

    pub fn date_string(&self) -> Result<String, RowViewError> {
        self.ensure_alive("date_string")?;
        Ok(self.inner.engine.host().date_string(self.inner.element)?)
    }

    fn counts(&self) -> Result<ThreadCounts, RowViewError> {
        if let Some(counts) = self.inner.counts.get() {
            return Ok(*counts);
        }
        let html = self
            .inner
            .engine
            .host()
            .participants_html(self.inner.element)?;
        Ok(*self.inner.counts.get_or_init(|| parse_counts(&html)))
    }

    pub fn visible_message_count(&self) -> Result<u32, RowViewError> {
        self.ensure_alive("visible_message_count")?;
        Ok(self.counts()?.message_count)
    }

    pub fn visible_draft_count(&self) -> Result<u32, RowViewError> {
        self.ensure_alive("visible_draft_count")?;
        Ok(self.counts()?.draft_count)
    }

    pub fn contacts(&self) -> Result<Vec<Contact>, RowViewError> {
        self.ensure_alive("contacts")?;
        Ok(unique_contacts(
            self.inner.engine.host().contacts(self.inner.element),
        ))
    }

    pub fn is_selected(&self) -> Result<bool, RowViewError> {
        self.ensure_alive("is_selected")?;
        Ok(self.inner.engine.host().is_selected(self.inner.element))
    }

    /// Resolves (and may probe) on the first call; later calls return the memoized id.
    pub fn thread_id(&self) -> Result<Option<ThreadId>, RowViewError> {
        self.ensure_alive("thread_id")?;
        Ok(self.resolve_identity())
    }

    /// The thread id if it is already known. Never probes.
    pub fn known_thread_id(&self) -> Option<ThreadId> {
        self.inner.thread_id.borrow().clone()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Teardown
    // ───────────────────────────────────────────────────────────────────────

    /// Ends every decoration and hands its records back to the pool. Calling it again is
    /// a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.teardown.fire();
        self.inner.scope.clear();
        let readiness = self.inner.readiness.borrow_mut().take();
        drop(readiness);

        let attachments = std::mem::take(&mut *self.inner.attachments.borrow_mut());
        for attachment in &attachments {
            self.end_attachment(attachment, ReleaseMode::Retain);
        }
        let date = self.inner.date.borrow_mut().take();
        if let Some(date) = date {
            self.end_attachment(&date, ReleaseMode::Retain);
        }
        self.inner.refresher.stop();
        self.inner.ready.end();
        self.inner
            .pool
            .schedule_grace_sweep(self.inner.engine.config().sweep_grace_ms);
        log::debug!("row view {} destroyed", self.inner.id);
    }
}

impl fmt::Debug for RowView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowView")
            .field("id", &self.inner.id)
            .field("element", &self.inner.element)
            .field("thread_id", &self.inner.thread_id.borrow())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl PartialEq for RowView {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RowView {}
