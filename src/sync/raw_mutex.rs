//! A single-word mutex, safe to hold across thread attach/detach because it
//! never cooperates with the collector's stop-the-world protocol. Grounded
//! word-for-word on `Python/lock.c`'s `_PyMutex_lock_slow`/`unlock_slow`.

use std::sync::atomic::Ordering;

use super::atomics::AtomicWord;
use super::parking_lot::{next_token, PARKING_LOT};

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;
const HAS_PARKED: usize = 2;

pub struct RawMutex {
    state: AtomicWord,
}

impl RawMutex {
    pub const fn new() -> Self {
        RawMutex {
            state: AtomicWord::new(UNLOCKED),
        }
    }

    fn addr(&self) -> usize {
        self as *const _ as usize
    }

    pub fn try_lock(&self) -> bool {
        self.state.compare_exchange(UNLOCKED, LOCKED).is_ok()
    }

    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.lock_slow();
    }

    fn lock_slow(&self) {
        loop {
            let cur = self.state.load();
            if cur & LOCKED == 0 {
                if self.state.compare_exchange(cur, cur | LOCKED).is_ok() {
                    return;
                }
                continue;
            }
            // Mark that a waiter exists so the unlocker knows to unpark.
            if cur & HAS_PARKED == 0
                && self
                    .state
                    .compare_exchange(cur, cur | HAS_PARKED)
                    .is_err()
            {
                continue;
            }
            let token = next_token();
            PARKING_LOT.park(
                self.addr(),
                token,
                || self.state.load() == (LOCKED | HAS_PARKED),
                None,
            );
            if self.try_lock() {
                return;
            }
        }
    }

    pub fn unlock(&self) {
        let prev = self.state.exchange(UNLOCKED);
        debug_assert!(prev & LOCKED != 0, "unlock of an unlocked RawMutex");
        if prev & HAS_PARKED != 0 {
            PARKING_LOT.unpark_all(self.addr());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load() & LOCKED != 0
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

// AtomicWord's internal ordering already gives us the synchronization a
// mutex needs to guard a `T`; safe to share across threads.
unsafe impl Sync for RawMutex {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion() {
        let mutex = Arc::new(RawMutex::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let mutex = mutex.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    mutex.lock();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    mutex.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }

    #[test]
    #[should_panic(expected = "unlock of an unlocked")]
    fn double_unlock_is_fatal() {
        let mutex = RawMutex::new();
        mutex.lock();
        mutex.unlock();
        mutex.unlock();
    }
}
