//! A recursive mutex that records its owner and a recursion depth, with fair
//! handoff to the next waiter and a shutdown quirk: the interpreter's
//! "finalizing" thread is treated as already owning any recursive mutex it
//! locks, so teardown code cannot deadlock against itself. Grounded on
//! `Python/lock.c`'s `_PyRecursiveMutex_lock_slow`/`unlock_slow`.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::atomics::AtomicWord;
use super::parking_lot::{next_token, PARKING_LOT};

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;
const HAS_PARKED: usize = 2;
const OWNER_SHIFT: usize = 2;

fn current_tid() -> usize {
    unsafe { libc::pthread_self() as usize }
}

/// Global predicate for the shutdown quirk: the runtime sets this to the
/// thread id of whichever thread is running interpreter finalization.
static FINALIZING_THREAD: AtomicUsize = AtomicUsize::new(0);

/// Mark `tid` (or the calling thread, if `None`) as the finalizing thread.
/// Call once, from the thread driving interpreter shutdown.
pub fn set_finalizing_thread(tid: Option<usize>) {
    FINALIZING_THREAD.store(tid.unwrap_or_else(current_tid), Ordering::Release);
}

pub fn clear_finalizing_thread() {
    FINALIZING_THREAD.store(0, Ordering::Release);
}

fn is_finalizing_thread(tid: usize) -> bool {
    let f = FINALIZING_THREAD.load(Ordering::Acquire);
    f != 0 && f == tid
}

pub struct RecursiveMutex {
    state: AtomicWord,
    recursions: Cell<usize>,
}

// `recursions` is only ever touched by the owning thread while it holds the
// lock bit, so sharing the Cell across threads is sound the way `prev`/
// `next` are sound in `GcHeader`.
unsafe impl Sync for RecursiveMutex {}

impl RecursiveMutex {
    pub const fn new() -> Self {
        RecursiveMutex {
            state: AtomicWord::new(UNLOCKED),
            recursions: Cell::new(0),
        }
    }

    fn addr(&self) -> usize {
        self as *const _ as usize
    }

    fn owner(&self, state: usize) -> usize {
        state >> OWNER_SHIFT
    }

    pub fn lock(&self) {
        let tid = current_tid();
        let cur = self.state.load();
        if cur & LOCKED != 0 && self.owner(cur) == tid {
            self.recursions.set(self.recursions.get() + 1);
            return;
        }
        if is_finalizing_thread(tid) {
            // Shutdown quirk: the finalizing thread owns every recursive
            // mutex it touches. Do not latch a new owner tag onto the word;
            // only bump the recursion counter so a later real unlock by a
            // prior legitimate owner still balances out.
            self.recursions.set(self.recursions.get() + 1);
            return;
        }
        self.lock_slow(tid);
    }

    fn lock_slow(&self, tid: usize) {
        loop {
            let cur = self.state.load();
            if cur & LOCKED == 0 {
                let new = (tid << OWNER_SHIFT) | LOCKED;
                if self.state.compare_exchange(cur, new).is_ok() {
                    self.recursions.set(1);
                    return;
                }
                continue;
            }
            if cur & HAS_PARKED == 0
                && self.state.compare_exchange(cur, cur | HAS_PARKED).is_err()
            {
                continue;
            }
            let token = next_token();
            let fair = PARKING_LOT.park(
                self.addr(),
                token,
                || self.state.load() & (LOCKED | HAS_PARKED) == (LOCKED | HAS_PARKED),
                None,
            );
            let _ = fair;
            // Handoff: whoever unparked us may have assigned ownership
            // directly (see `unlock`'s `begin_unpark` use); re-check.
            let cur = self.state.load();
            if cur & LOCKED != 0 && self.owner(cur) == tid {
                self.recursions.set(1);
                return;
            }
        }
    }

    pub fn unlock(&self) {
        let tid = current_tid();
        if is_finalizing_thread(tid) && self.recursions.get() > 0 {
            let left = self.recursions.get() - 1;
            self.recursions.set(left);
            if left > 0 {
                return;
            }
            // Falls through: if the finalizing thread never actually holds
            // the lock bit (it skipped acquiring it above), there is
            // nothing further to release.
            if self.owner(self.state.load()) != tid {
                return;
            }
        }
        let left = self.recursions.get();
        debug_assert!(left > 0, "unlock of a RecursiveMutex not held");
        if left > 1 {
            self.recursions.set(left - 1);
            return;
        }
        self.recursions.set(0);
        let prev = self.state.exchange(UNLOCKED);
        debug_assert_eq!(self.owner(prev), tid, "unlock by non-owner");
        if prev & HAS_PARKED != 0 {
            PARKING_LOT.begin_unpark(self.addr());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load() & LOCKED != 0
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursion_is_reentrant_on_same_thread() {
        let mutex = RecursiveMutex::new();
        mutex.lock();
        mutex.lock();
        assert!(mutex.is_locked());
        mutex.unlock();
        assert!(mutex.is_locked());
        mutex.unlock();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn finalizing_thread_assumes_ownership() {
        let mutex = RecursiveMutex::new();
        mutex.lock();
        set_finalizing_thread(Some(current_tid()));
        // Same thread already owns it; this models a second, unrelated
        // recursive mutex the finalizing thread touches during shutdown.
        let other = RecursiveMutex::new();
        other.lock();
        assert!(other.is_locked());
        other.unlock();
        clear_finalizing_thread();
        mutex.unlock();
        assert!(!mutex.is_locked());
    }
}
