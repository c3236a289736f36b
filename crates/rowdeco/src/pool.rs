//! Decoration pools.
//!
//! Records live in a generational arena owned by the pool; row views only hold
//! [`RecordId`]s. A swept record bumps its slot generation, so a stale id can never reach
//! a recycled record.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use ulid::Ulid;

use crate::decoration::{DecorationKind, DecorationRecord};
use crate::error::PoolError;
use crate::event_loop::{EventLoop, TimerId};
use crate::host::{Host, NodeRef};
use crate::identity::ThreadId;

/// Generational index of a record inside its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub index: u32,
    pub generation: u32,
}

/// How a released record leaves the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseMode {
    /// The value went away: take the nodes out now.
    Detach,
    /// The view ended: hide in place until the sweep (or a successor) deals with them.
    Retain,
}

struct ArenaSlot {
    generation: u32,
    record: Option<DecorationRecord>,
}

#[derive(Default)]
struct KindSlots {
    claimed: SmallVec<[RecordId; 4]>,
    unclaimed: SmallVec<[RecordId; 4]>,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<ArenaSlot>,
    free_list: Vec<u32>,
    kinds: [KindSlots; 5],
    allocated: usize,
}

impl PoolState {
    fn is_valid(&self, id: RecordId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.record.is_some())
    }

    fn alloc(&mut self, record: DecorationRecord) -> RecordId {
        self.allocated += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            RecordId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(ArenaSlot {
                generation: 0,
                record: Some(record),
            });
            RecordId {
                index,
                generation: 0,
            }
        }
    }

    fn free(&mut self, id: RecordId) -> Option<DecorationRecord> {
        if !self.is_valid(id) {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.generation += 1;
        self.free_list.push(id.index);
        slot.record.take()
    }

    fn record_mut(&mut self, id: RecordId) -> Result<&mut DecorationRecord, PoolError> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.record.as_mut().ok_or(PoolError::StaleRecord(id))
            }
            _ => Err(PoolError::StaleRecord(id)),
        }
    }
}

struct PoolInner {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    state: RefCell<PoolState>,
    grace_sweep: Cell<Option<TimerId>>,
    holders: RefCell<HashMap<DecorationKind, Box<dyn FnOnce()>>>,
}

/// Claimed and unclaimed decoration records of one row group.
#[derive(Clone)]
pub struct DecorationPool {
    inner: Rc<PoolInner>,
}

impl DecorationPool {
    pub fn new(host: Rc<dyn Host>, event_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(PoolInner {
                host,
                event_loop,
                state: RefCell::new(PoolState::default()),
                grace_sweep: Cell::new(None),
                holders: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Reuses an unclaimed record of `kind` when there is one, allocates otherwise.
    pub fn claim(&self, kind: DecorationKind) -> Result<RecordId, PoolError> {
        let mut state = self.inner.state.borrow_mut();
        let slots = &state.kinds[kind.index()];
        if kind.is_singleton() && !slots.claimed.is_empty() {
            return Err(PoolError::SingletonClaimed(kind));
        }
        let id = match state.kinds[kind.index()].unclaimed.pop() {
            Some(id) => id,
            None => {
                let record = DecorationRecord::create(kind, &self.inner.host);
                state.alloc(record)
            }
        };
        state.kinds[kind.index()].claimed.push(id);
        log::trace!("claimed {kind:?} record {id:?}");
        Ok(id)
    }

    /// Remembers how the current claimant of a singleton `kind` gives its record up.
    pub fn set_singleton_holder(&self, kind: DecorationKind, give_up: impl FnOnce() + 'static) {
        self.inner
            .holders
            .borrow_mut()
            .insert(kind, Box::new(give_up));
    }

    /// Claims a singleton `kind` that another view of the row group still holds. The
    /// holder gives its record up first; a record nobody answers for is released with
    /// [`ReleaseMode::Retain`].
    pub fn take_over(&self, kind: DecorationKind) -> Result<RecordId, PoolError> {
        let holder = self.inner.holders.borrow_mut().remove(&kind);
        if let Some(give_up) = holder {
            give_up();
        }
        let orphaned = self.inner.state.borrow().kinds[kind.index()].claimed.clone();
        for id in orphaned {
            log::debug!("releasing orphaned {kind:?} record {id:?}");
            self.release(id, ReleaseMode::Retain)?;
        }
        self.claim(kind)
    }

    /// Returns a claimed record to the unclaimed list.
    pub fn release(&self, id: RecordId, mode: ReleaseMode) -> Result<(), PoolError> {
        let mut state = self.inner.state.borrow_mut();
        let kind = state.record_mut(id)?.kind();
        let slots = &mut state.kinds[kind.index()];
        let position = slots
            .claimed
            .iter()
            .position(|claimed| *claimed == id)
            .ok_or(PoolError::NotClaimed(id))?;
        slots.claimed.remove(position);
        slots.unclaimed.push(id);

        let host = self.inner.host.as_ref();
        let record = state.record_mut(id)?;
        match mode {
            ReleaseMode::Detach => record.detach(host),
            ReleaseMode::Retain => record.hide(host),
        }
        log::trace!("released {kind:?} record {id:?} ({mode:?})");
        Ok(())
    }

    /// Runs `f` against a live record. The pool stays borrowed for the duration, so `f`
    /// must not call back into it.
    pub fn with_record<R>(
        &self,
        id: RecordId,
        f: impl FnOnce(&mut DecorationRecord) -> R,
    ) -> Result<R, PoolError> {
        let mut state = self.inner.state.borrow_mut();
        let record = state.record_mut(id)?;
        Ok(f(record))
    }

    pub fn node(&self, id: RecordId) -> Option<NodeRef> {
        self.with_record(id, |record| record.node()).ok()
    }

    /// Permanently removes every unclaimed record. Returns how many were swept.
    pub fn sweep_unclaimed(&self) -> usize {
        self.cancel_grace_sweep();
        let mut state = self.inner.state.borrow_mut();
        let host = self.inner.host.as_ref();
        let mut swept = 0;
        for kind in DecorationKind::ALL {
            let unclaimed = std::mem::take(&mut state.kinds[kind.index()].unclaimed);
            for id in unclaimed {
                if let Some(mut record) = state.free(id) {
                    record.discard(host);
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            log::debug!("swept {swept} unclaimed decoration records");
        }
        swept
    }

    /// Sweeps after `delay_ms` unless a rebind cancels it first. Rescheduling replaces the
    /// pending sweep.
    pub fn schedule_grace_sweep(&self, delay_ms: u64) {
        self.cancel_grace_sweep();
        let weak: Weak<PoolInner> = Rc::downgrade(&self.inner);
        let timer = self.inner.event_loop.set_timeout(delay_ms, move || {
            if let Some(inner) = weak.upgrade() {
                inner.grace_sweep.set(None);
                DecorationPool { inner }.sweep_unclaimed();
            }
        });
        self.inner.grace_sweep.set(Some(timer));
    }

    pub fn cancel_grace_sweep(&self) -> bool {
        match self.inner.grace_sweep.take() {
            Some(timer) => self.inner.event_loop.clear_timeout(timer),
            None => false,
        }
    }

    pub fn has_pending_sweep(&self) -> bool {
        self.inner.grace_sweep.get().is_some()
    }

    pub fn claimed_len(&self, kind: DecorationKind) -> usize {
        self.inner.state.borrow().kinds[kind.index()].claimed.len()
    }

    pub fn unclaimed_len(&self, kind: DecorationKind) -> usize {
        self.inner.state.borrow().kinds[kind.index()].unclaimed.len()
    }

    /// No claimed and no unclaimed records of any kind.
    pub fn is_empty(&self) -> bool {
        self.inner
            .state
            .borrow()
            .kinds
            .iter()
            .all(|slots| slots.claimed.is_empty() && slots.unclaimed.is_empty())
    }

    /// Records ever created by this pool.
    pub fn total_allocated(&self) -> usize {
        self.inner.state.borrow().allocated
    }

    pub fn ptr_eq(&self, other: &DecorationPool) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DecorationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        let mut debug = f.debug_struct("DecorationPool");
        for kind in DecorationKind::ALL {
            let slots = &state.kinds[kind.index()];
            if !slots.claimed.is_empty() || !slots.unclaimed.is_empty() {
                debug.field(
                    kind.class_name(),
                    &(slots.claimed.len(), slots.unclaimed.len()),
                );
            }
        }
        debug.field("allocated", &state.allocated).finish()
    }
}

/// How row views find the pool of their row group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// A node the host keeps while re-rendering the row around it.
    Anchor(NodeRef),
    Thread(ThreadId),
    /// Nothing stable is known about the row yet.
    Private(Ulid),
}

/// Process-wide map from row group to pool. Grows monotonically.
pub struct PoolRegistry {
    host: Rc<dyn Host>,
    event_loop: EventLoop,
    pools: RefCell<HashMap<PoolKey, DecorationPool>>,
}

impl PoolRegistry {
    pub fn new(host: Rc<dyn Host>, event_loop: EventLoop) -> Self {
        Self {
            host,
            event_loop,
            pools: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &PoolKey) -> Option<DecorationPool> {
        self.pools.borrow().get(key).cloned()
    }

    pub fn get_or_create(&self, key: PoolKey) -> DecorationPool {
        self.pools
            .borrow_mut()
            .entry(key)
            .or_insert_with(|| DecorationPool::new(Rc::clone(&self.host), self.event_loop.clone()))
            .clone()
    }

    /// Makes `pool` reachable under `key` as well. An existing pool under `key` is kept.
    pub fn alias(&self, key: PoolKey, pool: &DecorationPool) {
        self.pools
            .borrow_mut()
            .entry(key)
            .or_insert_with(|| pool.clone());
    }

    pub fn len(&self) -> usize {
        self.pools.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoration::{DECORATION_CLASS, HIDDEN_INLINE_CLASS};
    use crate::host::HostTree;
    use crate::testing::{FakeHost, RowSpec};

    fn pool() -> (EventLoop, Rc<FakeHost>, DecorationPool) {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let dyn_host: Rc<dyn Host> = host.clone();
        let pool = DecorationPool::new(dyn_host, event_loop.clone());
        (event_loop, host, pool)
    }

    #[test]
    fn claim_reuses_unclaimed_records_before_allocating() {
        let (_event_loop, _host, pool) = pool();
        let first = pool.claim(DecorationKind::Label).unwrap();
        assert_eq!(pool.total_allocated(), 1);

        pool.release(first, ReleaseMode::Detach).unwrap();
        assert_eq!(pool.unclaimed_len(DecorationKind::Label), 1);

        let second = pool.claim(DecorationKind::Label).unwrap();
        assert_eq!(second, first);
        assert_eq!(pool.total_allocated(), 1);

        let third = pool.claim(DecorationKind::Label).unwrap();
        assert_ne!(third, first);
        assert_eq!(pool.total_allocated(), 2);
        assert_eq!(pool.claimed_len(DecorationKind::Label), 2);
        assert_eq!(pool.unclaimed_len(DecorationKind::Label), 0);
    }

    #[test]
    fn kinds_do_not_share_records() {
        let (_event_loop, _host, pool) = pool();
        let label = pool.claim(DecorationKind::Label).unwrap();
        pool.release(label, ReleaseMode::Detach).unwrap();
        let button = pool.claim(DecorationKind::Button).unwrap();
        assert_ne!(button, label);
        assert_eq!(pool.unclaimed_len(DecorationKind::Label), 1);
        assert_eq!(pool.claimed_len(DecorationKind::Button), 1);
    }

    #[test]
    fn double_release_is_an_invariant_violation() {
        let (_event_loop, _host, pool) = pool();
        let id = pool.claim(DecorationKind::Image).unwrap();
        pool.release(id, ReleaseMode::Detach).unwrap();
        assert_eq!(
            pool.release(id, ReleaseMode::Detach),
            Err(PoolError::NotClaimed(id))
        );
        assert_eq!(pool.unclaimed_len(DecorationKind::Image), 1);
    }

    #[test]
    fn date_override_is_a_singleton() {
        let (_event_loop, _host, pool) = pool();
        let date = pool.claim(DecorationKind::DateOverride).unwrap();
        assert_eq!(
            pool.claim(DecorationKind::DateOverride),
            Err(PoolError::SingletonClaimed(DecorationKind::DateOverride))
        );
        pool.release(date, ReleaseMode::Retain).unwrap();
        assert_eq!(pool.claim(DecorationKind::DateOverride), Ok(date));
    }

    #[test]
    fn take_over_asks_the_holder_first() {
        let (_event_loop, _host, pool) = pool();
        let date = pool.claim(DecorationKind::DateOverride).unwrap();
        let asked = Rc::new(Cell::new(false));
        {
            let asked = Rc::clone(&asked);
            let holder_pool = pool.clone();
            pool.set_singleton_holder(DecorationKind::DateOverride, move || {
                asked.set(true);
                holder_pool.release(date, ReleaseMode::Retain).unwrap();
            });
        }
        assert_eq!(pool.take_over(DecorationKind::DateOverride), Ok(date));
        assert!(asked.get());
        assert_eq!(pool.claimed_len(DecorationKind::DateOverride), 1);
        assert_eq!(pool.total_allocated(), 1);
    }

    #[test]
    fn take_over_releases_a_record_nobody_answers_for() {
        let (_event_loop, _host, pool) = pool();
        let date = pool.claim(DecorationKind::DateOverride).unwrap();
        assert_eq!(pool.take_over(DecorationKind::DateOverride), Ok(date));
        assert_eq!(pool.claimed_len(DecorationKind::DateOverride), 1);
        assert_eq!(pool.unclaimed_len(DecorationKind::DateOverride), 0);
    }

    #[test]
    fn sweep_discards_unclaimed_and_invalidates_ids() {
        let (_event_loop, host, pool) = pool();
        let list = host.add_list();
        let row = host.add_row(list, RowSpec::new("Hello", "3:00 PM", "Alice"));
        let kept = pool.claim(DecorationKind::Label).unwrap();
        let swept = pool.claim(DecorationKind::Label).unwrap();
        let swept_node = pool.node(swept).unwrap();
        let cell = host.subject_node(row).and_then(|subject| host.parent(subject)).unwrap();
        host.insert(cell, swept_node, None);

        pool.release(swept, ReleaseMode::Retain).unwrap();
        assert_eq!(host.parent(swept_node), Some(cell));
        assert_eq!(host.style(swept_node, "display").as_deref(), Some("none"));

        assert_eq!(pool.sweep_unclaimed(), 1);
        assert_eq!(host.parent(swept_node), None);
        assert_eq!(pool.node(swept), None);
        assert_eq!(
            pool.with_record(swept, |_| ()),
            Err(PoolError::StaleRecord(swept))
        );
        assert!(pool.node(kept).is_some());

        // The freed slot is recycled under a new generation.
        let recycled = pool.claim(DecorationKind::Button).unwrap();
        assert_eq!(recycled.index, swept.index);
        assert_ne!(recycled.generation, swept.generation);
        assert!(host.has_class(pool.node(recycled).unwrap(), DECORATION_CLASS));
    }

    #[test]
    fn grace_sweep_can_be_cancelled() {
        let (event_loop, _host, pool) = pool();
        let id = pool.claim(DecorationKind::AttachmentIcon).unwrap();
        pool.release(id, ReleaseMode::Retain).unwrap();

        pool.schedule_grace_sweep(50);
        assert!(pool.has_pending_sweep());
        assert!(pool.cancel_grace_sweep());
        event_loop.advance_by(100);
        assert_eq!(pool.unclaimed_len(DecorationKind::AttachmentIcon), 1);

        pool.schedule_grace_sweep(50);
        event_loop.advance_by(49);
        assert_eq!(pool.unclaimed_len(DecorationKind::AttachmentIcon), 1);
        event_loop.advance_by(1);
        assert!(pool.is_empty());
        assert!(!pool.has_pending_sweep());
    }

    #[test]
    fn releasing_a_date_override_restores_the_original_label() {
        use crate::decoration::{DateDescriptor, DecorationValue, RenderCx};
        use crate::repaint::RepaintBatcher;
        use crate::row_view::WeakRowView;

        let (event_loop, host, pool) = pool();
        let list = host.add_list();
        let row = host.add_row(list, RowSpec::new("Hello", "3:00 PM", "Alice"));
        let original = host.date_label_node(row).unwrap();
        let dyn_host: Rc<dyn Host> = host.clone();
        let repaint = RepaintBatcher::new(Rc::clone(&dyn_host), event_loop.clone());
        let owner = WeakRowView::default();
        let cx = RenderCx {
            host: &dyn_host,
            row,
            owner: &owner,
            repaint: &repaint,
        };

        let id = pool.claim(DecorationKind::DateOverride).unwrap();
        let value = DecorationValue::Date(DateDescriptor {
            text: "Tomorrow".into(),
            ..DateDescriptor::default()
        });
        pool.with_record(id, |record| record.render(&cx, &value))
            .unwrap()
            .unwrap();
        assert!(host.has_class(original, HIDDEN_INLINE_CLASS));

        pool.release(id, ReleaseMode::Retain).unwrap();
        assert!(!host.has_class(original, HIDDEN_INLINE_CLASS));
        assert_eq!(host.style(original, "display"), None);
    }

    #[test]
    fn registry_aliases_share_one_pool() {
        let event_loop = EventLoop::new();
        let host = FakeHost::new(&event_loop);
        let registry = PoolRegistry::new(host.clone(), event_loop);
        let private = registry.get_or_create(PoolKey::Private(Ulid::new()));
        registry.alias(PoolKey::Thread(ThreadId::from("t1")), &private);

        let by_thread = registry.get(&PoolKey::Thread(ThreadId::from("t1"))).unwrap();
        assert!(by_thread.ptr_eq(&private));
        assert_eq!(registry.len(), 2);

        // An alias never replaces an existing pool.
        let other = registry.get_or_create(PoolKey::Anchor(NodeRef(9)));
        registry.alias(PoolKey::Thread(ThreadId::from("t1")), &other);
        assert!(registry
            .get(&PoolKey::Thread(ThreadId::from("t1")))
            .unwrap()
            .ptr_eq(&private));
    }
}
