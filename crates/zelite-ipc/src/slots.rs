//! Shared event slot page.
//!
//! Every event pool owns one page. Importing a pool through an
//! [`IpcTransport`](crate::IpcTransport) hands out another reference to the
//! same page, so state written by any handle is observed by all of them.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::layout::slot_state;

/// Start/end ticks recorded when a slot is signaled by device work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotTimestamps {
    pub global_start: u64,
    pub global_end: u64,
    pub context_start: u64,
    pub context_end: u64,
}

impl SlotTimestamps {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct Slot {
    state: AtomicU32,
    global_start: AtomicU64,
    global_end: AtomicU64,
    context_start: AtomicU64,
    context_end: AtomicU64,
}

pub struct EventSlotPage {
    slots: Box<[Slot]>,
    // Bumped on every signal so sleepers can tell a wakeup from a spurious one.
    doorbell: Mutex<u64>,
    rung: Condvar,
}

impl EventSlotPage {
    pub fn new(capacity: u32) -> Self {
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            slots,
            doorbell: Mutex::new(0),
            rung: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    fn lock_doorbell(&self) -> MutexGuard<'_, u64> {
        self.doorbell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` if `index` is out of range.
    pub fn signal(&self, index: u32) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        slot.state.store(slot_state::SIGNALED, Ordering::Release);
        {
            let mut bell = self.lock_doorbell();
            *bell = bell.wrapping_add(1);
        }
        self.rung.notify_all();
        true
    }

    /// Clears the state and zeros recorded timestamps.
    pub fn reset(&self, index: u32) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        slot.global_start.store(0, Ordering::Relaxed);
        slot.global_end.store(0, Ordering::Relaxed);
        slot.context_start.store(0, Ordering::Relaxed);
        slot.context_end.store(0, Ordering::Relaxed);
        slot.state.store(slot_state::UNSIGNALED, Ordering::Release);
        true
    }

    pub fn is_signaled(&self, index: u32) -> bool {
        self.slot(index)
            .map(|slot| slot.state.load(Ordering::Acquire) == slot_state::SIGNALED)
            .unwrap_or(false)
    }

    /// Timestamps must be recorded before the slot is signaled for readers to
    /// observe them together with the state change.
    pub fn record_timestamps(&self, index: u32, ts: SlotTimestamps) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        slot.global_start.store(ts.global_start, Ordering::Relaxed);
        slot.global_end.store(ts.global_end, Ordering::Relaxed);
        slot.context_start.store(ts.context_start, Ordering::Relaxed);
        slot.context_end.store(ts.context_end, Ordering::Relaxed);
        true
    }

    pub fn timestamps(&self, index: u32) -> Option<SlotTimestamps> {
        let slot = self.slot(index)?;
        // Pairs with the Release store in `signal`.
        let _ = slot.state.load(Ordering::Acquire);
        Some(SlotTimestamps {
            global_start: slot.global_start.load(Ordering::Relaxed),
            global_end: slot.global_end.load(Ordering::Relaxed),
            context_start: slot.context_start.load(Ordering::Relaxed),
            context_end: slot.context_end.load(Ordering::Relaxed),
        })
    }

    /// Blocks until the slot is signaled or `timeout` elapses.
    ///
    /// `None` waits forever; `Some(Duration::ZERO)` polls once.
    pub fn wait_signaled(&self, index: u32, timeout: Option<Duration>) -> bool {
        if self.is_signaled(index) {
            return true;
        }
        if timeout == Some(Duration::ZERO) || self.slot(index).is_none() {
            return false;
        }

        // An overflowing deadline is treated as infinite.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut bell = self.lock_doorbell();
        loop {
            if self.is_signaled(index) {
                return true;
            }
            bell = match deadline {
                None => self
                    .rung
                    .wait(bell)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.rung.wait_timeout(bell, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
    }
}

impl std::fmt::Debug for EventSlotPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signaled = (0..self.capacity())
            .filter(|&i| self.is_signaled(i))
            .count();
        f.debug_struct("EventSlotPage")
            .field("capacity", &self.capacity())
            .field("signaled", &signaled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn out_of_range_slots_are_rejected() {
        let page = EventSlotPage::new(2);
        assert!(!page.signal(2));
        assert!(!page.reset(2));
        assert!(!page.is_signaled(2));
        assert!(page.timestamps(2).is_none());
        assert!(!page.wait_signaled(2, Some(Duration::from_millis(1))));
    }

    #[test]
    fn signal_is_idempotent_and_reset_clears() {
        let page = EventSlotPage::new(4);
        assert!(!page.is_signaled(1));
        page.signal(1);
        page.signal(1);
        assert!(page.is_signaled(1));
        assert!(!page.is_signaled(0));
        page.reset(1);
        assert!(!page.is_signaled(1));
    }

    #[test]
    fn reset_zeros_timestamps() {
        let page = EventSlotPage::new(1);
        page.record_timestamps(
            0,
            SlotTimestamps {
                global_start: 10,
                global_end: 20,
                context_start: 1,
                context_end: 2,
            },
        );
        page.signal(0);
        assert_eq!(page.timestamps(0).unwrap().global_end, 20);
        page.reset(0);
        assert!(page.timestamps(0).unwrap().is_zero());
    }

    #[test]
    fn zero_timeout_polls_once() {
        let page = EventSlotPage::new(1);
        let start = Instant::now();
        assert!(!page.wait_signaled(0, Some(Duration::ZERO)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn finite_timeout_expires() {
        let page = EventSlotPage::new(1);
        let start = Instant::now();
        assert!(!page.wait_signaled(0, Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn infinite_wait_is_released_by_signal_from_another_thread() {
        let page = Arc::new(EventSlotPage::new(8));
        let start = Arc::new(std::sync::Barrier::new(2));

        let waiter = {
            let page = page.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                page.wait_signaled(5, None)
            })
        };

        start.wait();
        thread::sleep(Duration::from_millis(10));
        page.signal(5);
        assert!(waiter.join().unwrap());
    }
}
