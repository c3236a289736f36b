//! Runs the engine's event loop on the browser's own task queue.
//!
//! The engine only knows virtual time. Here virtual time follows `performance.now()`
//! from the moment the loop was created: every wake-up schedules a zoon task that
//! advances the loop up to the current elapsed time.

use std::cell::{Cell, OnceCell};

use rowdeco::{EventLoop, Wakeup};
use zoon::{Task, Timer};

thread_local! {
    static DRIVER: OnceCell<Driver> = const { OnceCell::new() };
}

struct Driver {
    event_loop: EventLoop,
    origin_ms: f64,
    drain_queued: Cell<bool>,
}

impl Driver {
    fn elapsed_ms(&self) -> u64 {
        (performance_now() - self.origin_ms).max(0.0) as u64
    }
}

fn performance_now() -> f64 {
    web_sys::window()
        .and_then(|window| window.performance())
        .map(|performance| performance.now())
        .unwrap_or_default()
}

/// The page-wide event loop, created and hooked up to the browser on first use.
pub fn event_loop() -> EventLoop {
    DRIVER.with(|driver| {
        driver
            .get_or_init(|| {
                let event_loop = EventLoop::new();
                event_loop.set_wakeup_hook(Some(on_wakeup));
                Driver {
                    event_loop,
                    origin_ms: performance_now(),
                    drain_queued: Cell::new(false),
                }
            })
            .event_loop
            .clone()
    })
}

fn on_wakeup(wakeup: Wakeup) {
    match wakeup {
        Wakeup::Microtasks => queue_drain(),
        Wakeup::TimerAt(at_ms) => {
            let delay_ms = DRIVER
                .with(|driver| {
                    driver
                        .get()
                        .map(|driver| at_ms.saturating_sub(driver.elapsed_ms()))
                })
                .unwrap_or_default();
            Task::start(async move {
                Timer::sleep(u32::try_from(delay_ms).unwrap_or(u32::MAX)).await;
                drain();
            });
        }
    }
}

fn queue_drain() {
    let first = DRIVER.with(|driver| {
        driver
            .get()
            .is_some_and(|driver| !driver.drain_queued.replace(true))
    });
    if first {
        Task::start(async { drain() });
    }
}

fn drain() {
    DRIVER.with(|driver| {
        let Some(driver) = driver.get() else {
            return;
        };
        driver.drain_queued.set(false);
        let target_ms = driver.elapsed_ms();
        driver.event_loop.advance_to(target_ms);
    });
}
