//! An address-keyed wait queue, implementing the `park`/`unpark_all`/
//! `begin_unpark` contract spec §4.A describes. Grounded on
//! `Python/lock.c`'s `_PyParkingLot_Park`/`_PyParkingLot_UnparkAll`/
//! `_PyParkingLot_BeginUnpark`, implemented with a bucketed
//! `Mutex`+`Condvar` table in the idiom `mmtk-core`'s
//! `scheduler/worker_monitor.rs` uses for its worker park/wake-up, rather
//! than raw futex syscalls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

const NUM_BUCKETS: usize = 256;

struct Bucket {
    // `(addr, token)` pairs. Several unrelated addresses can hash into the
    // same bucket, so every queue scan must filter by `addr` — a bare
    // token queue would let two colliding addresses wake and steal each
    // other's waiters.
    queue: Mutex<VecDeque<(usize, usize)>>,
    wake: Condvar,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            queue: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
        }
    }
}

/// Global table of wait queues keyed by the low bits of a parked address.
/// Sized relative to the core count, following the teacher's
/// `num_cpus::get()`-driven sizing of worker pools.
pub struct ParkingLot {
    buckets: Vec<Bucket>,
}

impl ParkingLot {
    fn new() -> Self {
        let n = (num_cpus::get() * 4).max(NUM_BUCKETS);
        ParkingLot {
            buckets: (0..n).map(|_| Bucket::new()).collect(),
        }
    }

    fn bucket_for(&self, addr: usize) -> &Bucket {
        &self.buckets[addr % self.buckets.len()]
    }

    /// Atomically check `*addr == expected`; if so, block the current
    /// (logical) thread, identified by `token`, until woken or `deadline`
    /// elapses. Returns `true` if woken, `false` on timeout.
    ///
    /// The check-then-block step is not actually atomic with the caller's
    /// read of `*addr` the way a futex is; callers establish atomicity by
    /// holding the bucket's own queue lock across their own compare (see
    /// `RawMutex::lock_slow` for the pattern) or by re-checking after
    /// enqueueing, as done here via the `still_expected` closure.
    pub fn park(
        &self,
        addr: usize,
        token: usize,
        still_expected: impl Fn() -> bool,
        deadline: Option<Instant>,
    ) -> bool {
        let bucket = self.bucket_for(addr);
        let mut queue = bucket.queue.lock().unwrap();
        if !still_expected() {
            return true;
        }
        queue.push_back((addr, token));
        loop {
            if !queue.contains(&(addr, token)) {
                return true;
            }
            queue = match deadline {
                None => bucket.wake.wait(queue).unwrap(),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        queue.retain(|&(a, t)| (a, t) != (addr, token));
                        return false;
                    }
                    let (q, timeout) = bucket.wake.wait_timeout(queue, d - now).unwrap();
                    if timeout.timed_out() && q.contains(&(addr, token)) {
                        let mut q = q;
                        q.retain(|&(a, t)| (a, t) != (addr, token));
                        return false;
                    }
                    q
                }
            };
        }
    }

    /// Wake every waiter parked on `addr`.
    pub fn unpark_all(&self, addr: usize) {
        let bucket = self.bucket_for(addr);
        let mut queue = bucket.queue.lock().unwrap();
        queue.retain(|&(a, _)| a != addr);
        bucket.wake.notify_all();
    }

    /// Wake exactly one waiter parked on `addr`, returning whether a fair
    /// direct handoff should occur (the recursive mutex uses this to hand
    /// ownership straight to the woken waiter instead of racing it for the
    /// lock bit).
    pub fn begin_unpark(&self, addr: usize) -> bool {
        let bucket = self.bucket_for(addr);
        let mut queue = bucket.queue.lock().unwrap();
        let had_waiter = match queue.iter().position(|&(a, _)| a == addr) {
            Some(i) => {
                queue.remove(i);
                true
            }
            None => false,
        };
        // `notify_one` could hand the wakeup to some other address's
        // waiter sharing this bucket, leaving the one we just dequeued
        // asleep; every waiter rechecks its own `(addr, token)` membership
        // before going back to sleep, so waking the whole bucket is the
        // only way to guarantee the right one gets up.
        bucket.wake.notify_all();
        // Fair handoff once there is still contention left for this same
        // address; otherwise let the next locker race normally.
        had_waiter && queue.iter().any(|&(a, _)| a == addr)
    }
}

lazy_static! {
    pub static ref PARKING_LOT: ParkingLot = ParkingLot::new();
}

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// A unique per-call-site park token; real callers use their thread id, but
/// tests that park the same thread twice concurrently need distinct tokens.
pub fn next_token() -> usize {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unpark_all_wakes_everyone() {
        let addr = 0x1000;
        let flag = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let flag = flag.clone();
            handles.push(thread::spawn(move || {
                let token = next_token();
                PARKING_LOT.park(addr, token, || flag.load(Ordering::Acquire) == 0, None);
            }));
        }
        thread::sleep(Duration::from_millis(50));
        flag.store(1, Ordering::Release);
        PARKING_LOT.unpark_all(addr);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn park_times_out() {
        let addr = 0x2000;
        let token = next_token();
        let woken = PARKING_LOT.park(
            addr,
            token,
            || true,
            Some(Instant::now() + Duration::from_millis(20)),
        );
        assert!(!woken);
    }
}
