//! Single-threaded cooperative event loop.
//!
//! Every deferral in the engine goes through here: microtask-class callbacks, timers and
//! local futures. Time is virtual. Tests move it forward with [`EventLoop::advance_by`],
//! while a platform driver maps it onto real browser timers through the wake-up hook.
//!
//! Ordering guarantees:
//! - callbacks queued with [`EventLoop::queue_microtask`] and woken tasks share one FIFO
//! - timers fire in deadline order, ties in registration order
//! - after every timer callback the microtask queue is drained completely

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::{ArcWake, waker};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What a platform driver has to arrange after being notified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// Jobs were queued while nobody was draining the queue.
    Microtasks,
    /// A timer was registered for the given virtual time.
    TimerAt(u64),
}

/// Plain function pointer so it can be reached from `Send + Sync` wakers.
pub type WakeupHook = fn(Wakeup);

#[derive(Clone, Copy, Debug)]
enum Job {
    Callback(u64),
    Poll(TaskId),
}

// ═══════════════════════════════════════════════════════════════════════════
// Waker-visible state
// ═══════════════════════════════════════════════════════════════════════════

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    draining: AtomicBool,
    hook: Mutex<Option<WakeupHook>>,
}

impl Shared {
    fn push(&self, job: Job) {
        let was_empty = {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let was_empty = jobs.is_empty();
            jobs.push_back(job);
            was_empty
        };
        if was_empty && !self.draining.load(AtomicOrdering::Acquire) {
            self.notify(Wakeup::Microtasks);
        }
    }

    fn pop(&self) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn notify(&self, wakeup: Wakeup) {
        let hook = *self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook {
            hook(wakeup);
        }
    }
}

struct TaskWaker {
    task: TaskId,
    shared: Arc<Shared>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.shared.push(Job::Poll(arc_self.task));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Timers
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    fire_at_ms: u64,
    id: TimerId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earlier deadline first, then earlier registration.
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EventLoop
// ═══════════════════════════════════════════════════════════════════════════

struct Inner {
    shared: Arc<Shared>,
    now_ms: Cell<u64>,
    next_id: Cell<u64>,
    callbacks: RefCell<HashMap<u64, Box<dyn FnOnce()>>>,
    /// `None` while the task is being polled.
    tasks: RefCell<HashMap<TaskId, Option<LocalBoxFuture<'static, ()>>>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    timer_callbacks: RefCell<HashMap<TimerId, Box<dyn FnOnce()>>>,
}

#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                shared: Arc::new(Shared {
                    jobs: Mutex::new(VecDeque::new()),
                    draining: AtomicBool::new(false),
                    hook: Mutex::new(None),
                }),
                now_ms: Cell::new(0),
                next_id: Cell::new(0),
                callbacks: RefCell::new(HashMap::new()),
                tasks: RefCell::new(HashMap::new()),
                timers: RefCell::new(BinaryHeap::new()),
                timer_callbacks: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.now_ms.get()
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Install (or remove) the driver notification hook.
    pub fn set_wakeup_hook(&self, hook: Option<WakeupHook>) {
        *self
            .inner
            .shared
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }

    pub fn queue_microtask(&self, callback: impl FnOnce() + 'static) {
        let id = self.next_id();
        self.inner
            .callbacks
            .borrow_mut()
            .insert(id, Box::new(callback));
        self.inner.shared.push(Job::Callback(id));
    }

    pub fn set_timeout(&self, delay_ms: u64, callback: impl FnOnce() + 'static) -> TimerId {
        let id = TimerId(self.next_id());
        let fire_at_ms = self.now_ms() + delay_ms;
        self.inner
            .timer_callbacks
            .borrow_mut()
            .insert(id, Box::new(callback));
        self.inner
            .timers
            .borrow_mut()
            .push(TimerEntry { fire_at_ms, id });
        self.inner.shared.notify(Wakeup::TimerAt(fire_at_ms));
        id
    }

    /// Returns `false` when the timer already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let removed = self.inner.timer_callbacks.borrow_mut().remove(&id);
        removed.is_some()
    }

    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) -> TaskHandle {
        let task = TaskId(self.next_id());
        self.inner
            .tasks
            .borrow_mut()
            .insert(task, Some(future.boxed_local()));
        self.inner.shared.push(Job::Poll(task));
        TaskHandle {
            task,
            event_loop: Rc::downgrade(&self.inner),
        }
    }

    pub fn sleep(&self, delay_ms: u64) -> Sleep {
        Sleep {
            event_loop: self.clone(),
            delay_ms,
            state: Rc::new(SleepState::default()),
            timer: None,
        }
    }

    /// Microtask checkpoint: runs queued callbacks and woken tasks until none are left.
    ///
    /// Must not be called from inside a spawned task.
    pub fn run_until_idle(&self) -> usize {
        let shared = &self.inner.shared;
        let was_draining = shared.draining.swap(true, AtomicOrdering::AcqRel);
        let mut ran = 0;
        while let Some(job) = shared.pop() {
            ran += 1;
            match job {
                Job::Callback(id) => {
                    let callback = self.inner.callbacks.borrow_mut().remove(&id);
                    if let Some(callback) = callback {
                        callback();
                    }
                }
                Job::Poll(task) => self.poll_task(task),
            }
        }
        if !was_draining {
            shared.draining.store(false, AtomicOrdering::Release);
        }
        ran
    }

    fn poll_task(&self, task: TaskId) {
        let future = match self.inner.tasks.borrow_mut().get_mut(&task) {
            Some(slot) => slot.take(),
            None => None,
        };
        let Some(mut future) = future else {
            return;
        };
        let waker: Waker = waker(Arc::new(TaskWaker {
            task,
            shared: Arc::clone(&self.inner.shared),
        }));
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                let finished = self.inner.tasks.borrow_mut().remove(&task);
                drop(finished);
                drop(future);
            }
            Poll::Pending => {
                // The task may have been aborted while it was being polled.
                let orphan = match self.inner.tasks.borrow_mut().get_mut(&task) {
                    Some(slot) => {
                        *slot = Some(future);
                        None
                    }
                    None => Some(future),
                };
                drop(orphan);
            }
        }
    }

    pub fn advance_by(&self, delta_ms: u64) {
        self.advance_to(self.now_ms() + delta_ms);
    }

    /// Fires every timer due at or before `target_ms`, each as its own macrotask.
    pub fn advance_to(&self, target_ms: u64) {
        self.run_until_idle();
        loop {
            let due = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.peek() {
                    Some(entry) if entry.fire_at_ms <= target_ms => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = due else {
                break;
            };
            if entry.fire_at_ms > self.now_ms() {
                self.inner.now_ms.set(entry.fire_at_ms);
            }
            let callback = self.inner.timer_callbacks.borrow_mut().remove(&entry.id);
            if let Some(callback) = callback {
                callback();
                self.run_until_idle();
            }
        }
        if target_ms > self.now_ms() {
            self.inner.now_ms.set(target_ms);
        }
    }

    /// Deadline of the next live timer, if any.
    pub fn next_timer_at(&self) -> Option<u64> {
        let callbacks = self.inner.timer_callbacks.borrow();
        let mut timers = self.inner.timers.borrow_mut();
        while let Some(entry) = timers.peek() {
            if callbacks.contains_key(&entry.id) {
                return Some(entry.fire_at_ms);
            }
            timers.pop();
        }
        None
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timer_callbacks.borrow().len()
    }

    pub fn pending_jobs(&self) -> usize {
        self.inner.shared.len()
    }

    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TaskHandle / Sleep
// ═══════════════════════════════════════════════════════════════════════════

/// Aborts the task when dropped, unless detached.
#[must_use = "dropping a TaskHandle aborts the task"]
pub struct TaskHandle {
    task: TaskId,
    event_loop: Weak<Inner>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.task
    }

    pub fn is_finished(&self) -> bool {
        match self.event_loop.upgrade() {
            Some(inner) => !inner.tasks.borrow().contains_key(&self.task),
            None => true,
        }
    }

    /// Let the task run to completion on its own.
    pub fn detach(mut self) {
        self.event_loop = Weak::new();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.event_loop.upgrade() {
            let removed = inner.tasks.borrow_mut().remove(&self.task);
            drop(removed);
        }
    }
}

#[derive(Default)]
struct SleepState {
    elapsed: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Resolves after a timer on the owning [`EventLoop`]. The timer is registered on first
/// poll and cleared when the future is dropped early.
pub struct Sleep {
    event_loop: EventLoop,
    delay_ms: u64,
    state: Rc<SleepState>,
    timer: Option<TimerId>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.elapsed.get() {
            return Poll::Ready(());
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        if self.timer.is_none() {
            let state = Rc::clone(&self.state);
            let timer = self.event_loop.set_timeout(self.delay_ms, move || {
                state.elapsed.set(true);
                let waker = state.waker.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            self.timer = Some(timer);
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            if !self.state.elapsed.get() {
                self.event_loop.clear_timeout(timer);
            }
        }
    }
}
