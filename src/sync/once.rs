//! A once-flag: the first caller runs an initializer and must report
//! success or failure, waking any callers parked behind it either way.
//! Grounded on `Python/lock.c`'s `_PyBeginOnce_slow`/`_PyEndOnce`/
//! `_PyEndOnceFailed`.

use super::atomics::AtomicWord;
use super::parking_lot::{next_token, PARKING_LOT};

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;
const HAS_PARKED: usize = 2;
const INITIALIZED: usize = 4;

pub struct OnceFlag {
    state: AtomicWord,
}

impl OnceFlag {
    pub const fn new() -> Self {
        OnceFlag {
            state: AtomicWord::new(UNLOCKED),
        }
    }

    fn addr(&self) -> usize {
        self as *const _ as usize
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load() & INITIALIZED != 0
    }

    /// Run `init` exactly once across any number of concurrent callers.
    /// `init` returns `Ok(())` on success or `Err(())` to let a later
    /// caller retry initialization.
    pub fn call_once(&self, init: impl FnOnce() -> Result<(), ()>) {
        if self.is_initialized() {
            return;
        }
        if self.begin() {
            match init() {
                Ok(()) => self.end_success(),
                Err(()) => self.end_failure(),
            }
        }
    }

    /// Returns `true` if the caller won the race and must run the
    /// initializer; otherwise blocks until some other thread has finished
    /// (successfully or not) and returns `false`.
    fn begin(&self) -> bool {
        loop {
            let cur = self.state.load();
            if cur & INITIALIZED != 0 {
                return false;
            }
            if cur & LOCKED == 0 {
                if self.state.compare_exchange(cur, cur | LOCKED).is_ok() {
                    return true;
                }
                continue;
            }
            if cur & HAS_PARKED == 0
                && self.state.compare_exchange(cur, cur | HAS_PARKED).is_err()
            {
                continue;
            }
            let token = next_token();
            PARKING_LOT.park(
                self.addr(),
                token,
                || self.state.load() & (LOCKED | INITIALIZED) == (LOCKED | HAS_PARKED),
                None,
            );
            if self.is_initialized() {
                return false;
            }
        }
    }

    fn end_success(&self) {
        let prev = self.state.exchange(INITIALIZED);
        if prev & HAS_PARKED != 0 {
            PARKING_LOT.unpark_all(self.addr());
        }
    }

    fn end_failure(&self) {
        let prev = self.state.exchange(UNLOCKED);
        if prev & HAS_PARKED != 0 {
            PARKING_LOT.unpark_all(self.addr());
        }
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for OnceFlag {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn init_runs_exactly_once() {
        let once = Arc::new(OnceFlag::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let once = once.clone();
            let runs = runs.clone();
            handles.push(thread::spawn(move || {
                once.call_once(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(once.is_initialized());
    }

    #[test]
    fn failed_init_allows_retry() {
        let once = OnceFlag::new();
        let mut attempt = 0;
        once.call_once(|| {
            attempt += 1;
            Err(())
        });
        assert!(!once.is_initialized());
        once.call_once(|| {
            attempt += 1;
            Ok(())
        });
        assert!(once.is_initialized());
        assert_eq!(attempt, 2);
    }
}
