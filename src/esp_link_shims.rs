//! Runtime symbol providers for third-party crates.
//!
//! - `critical-section` acquire/release for `embassy-sync`'s
//!   `CriticalSectionRawMutex` (the agent mailbox).  On ESP-IDF they are
//!   backed by one std mutex held per thread with a nesting depth; host
//!   tests use the `critical-section/std` implementation instead.
//! - The `embassy-time` driver behind `async-io-mini::Timer` (the agent
//!   ticker).  Both targets read the clock from [`platform_now`], so the
//!   ticker and the rest of the pipeline agree on time.

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
use core::time::Duration;
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::adapters::time::platform_now;

// ── critical-section (ESP-IDF only) ───────────────────────────

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static CRITICAL_SECTION_DEPTH: Cell<u8> = const { Cell::new(0) };
    static CRITICAL_SECTION_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

/// Runtime-backed critical-section acquire used by `critical-section` 1.x.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                // The mutex guards no data, so a poisoned lock is still usable.
                let lock = CRITICAL_SECTION_MUTEX
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                *guard.borrow_mut() = Some(lock);
            }
            let new_depth = d.saturating_add(1);
            depth.set(new_depth);
            new_depth
        })
    })
}

/// Runtime-backed critical-section release used by `critical-section` 1.x.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                return;
            }
            let new_depth = d - 1;
            depth.set(new_depth);
            if new_depth == 0 {
                *guard.borrow_mut() = None;
            }
        })
    })
}

// ── embassy-time driver ───────────────────────────────────────

/// Microseconds since boot (`esp_timer` on ESP-IDF, process start on host).
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_now() -> u64 {
    platform_now().as_micros() as u64
}

/// Runtime-backed wake scheduler for async timers.
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_schedule_wake(at: u64, waker: *mut core::ffi::c_void) {
    if waker.is_null() {
        return;
    }

    // SAFETY: embassy-time passes a valid pointer to a `Waker` for the duration
    // of schedule registration. We clone it immediately and move the clone.
    let waker = unsafe { (&*(waker as *const core::task::Waker)).clone() };
    std::thread::spawn(move || {
        let now = _embassy_time_now();
        if at > now {
            std::thread::sleep(Duration::from_micros(at - now));
        }
        waker.wake();
    });
}
