//! One-shot and many-waiter notification primitives. Grounded on
//! `Python/lock.c`'s `_PyRawEvent_Notify`/`_Wait`/`_TimedWait`/`_Reset` and
//! `_PyEvent_Notify`/`_Wait`/`_TimedWait`.

use std::time::Instant;

use super::atomics::AtomicWord;
use super::parking_lot::{next_token, PARKING_LOT};

const UNSET: usize = 0;
const PARKED: usize = 1;
const SET: usize = 2;

/// A one-shot event: at most one thread parks on it, `notify` fires exactly
/// once. Timed waiters that lose the race with `notify` must remove
/// themselves rather than leave a stale waiter registered.
pub struct RawEvent {
    state: AtomicWord,
}

impl RawEvent {
    pub const fn new() -> Self {
        RawEvent {
            state: AtomicWord::new(UNSET),
        }
    }

    fn addr(&self) -> usize {
        self as *const _ as usize
    }

    pub fn is_set(&self) -> bool {
        self.state.load() == SET
    }

    pub fn wait(&self) {
        self.timed_wait(None);
    }

    /// Returns `true` if the event was observed set before `deadline`.
    pub fn timed_wait(&self, deadline: Option<Instant>) -> bool {
        if self.state.compare_exchange(UNSET, PARKED).is_ok() {
            let token = next_token();
            let woke = PARKING_LOT.park(self.addr(), token, || self.state.load() == PARKED, deadline);
            if !woke {
                // Lost the race with a late notify: if we're still PARKED,
                // roll back to UNSET so a future wait can retry cleanly.
                let _ = self.state.compare_exchange(PARKED, UNSET);
                return self.is_set();
            }
        }
        self.is_set()
    }

    /// Fire the event once; safe to call even with no waiter parked.
    pub fn notify(&self) {
        let prev = self.state.exchange(SET);
        if prev == PARKED {
            PARKING_LOT.unpark_all(self.addr());
        }
    }

    pub fn reset(&self) {
        self.state.store(UNSET);
    }
}

impl Default for RawEvent {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for RawEvent {}

/// A many-waiter event: any number of threads may wait; `notify` wakes all
/// of them, matching `_PyEvent_Notify`'s use of `HAS_PARKED` as a sentinel
/// covering an arbitrary waiter count rather than a single slot.
pub struct Event {
    state: AtomicWord,
}

impl Event {
    pub const fn new() -> Self {
        Event {
            state: AtomicWord::new(UNSET),
        }
    }

    fn addr(&self) -> usize {
        self as *const _ as usize
    }

    pub fn is_set(&self) -> bool {
        self.state.load() == SET
    }

    pub fn wait(&self) {
        self.timed_wait(None);
    }

    pub fn timed_wait(&self, deadline: Option<Instant>) -> bool {
        loop {
            let cur = self.state.load();
            if cur == SET {
                return true;
            }
            if cur == UNSET && self.state.compare_exchange(UNSET, PARKED).is_err() {
                continue;
            }
            let token = next_token();
            let woke = PARKING_LOT.park(self.addr(), token, || self.state.load() != SET, deadline);
            if self.is_set() {
                return true;
            }
            if !woke {
                return false;
            }
        }
    }

    pub fn notify(&self) {
        let prev = self.state.exchange(SET);
        if prev == PARKED {
            PARKING_LOT.unpark_all(self.addr());
        }
    }

    pub fn reset(&self) {
        self.state.store(UNSET);
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for Event {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn raw_event_wakes_single_waiter() {
        let event = Arc::new(RawEvent::new());
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait())
        };
        thread::sleep(Duration::from_millis(20));
        event.notify();
        waiter.join().unwrap();
        assert!(event.is_set());
    }

    #[test]
    fn event_wakes_all_waiters() {
        let event = Arc::new(Event::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let event = event.clone();
            handles.push(thread::spawn(move || event.wait()));
        }
        thread::sleep(Duration::from_millis(20));
        event.notify();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn timed_wait_times_out_before_notify() {
        let event = RawEvent::new();
        let woke = event.timed_wait(Some(Instant::now() + Duration::from_millis(10)));
        assert!(!woke);
        event.notify();
        assert!(event.is_set());
    }
}
