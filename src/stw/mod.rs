//! The stop-the-world controller: quiesces every mutator thread without a
//! single global lock, using a three-state per-thread status and a
//! `stoptheworld_mutex` serializing collectors. Grounded on `gcmodule.c`'s
//! STW handshake inside `collect()`, and on the request/park shape of
//! `plan/gc_requester.rs` and `scheduler/controller.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Detached,
    Attached,
    Gc,
}

/// Per-thread state the controller needs: its current status and the
/// short-critical-section override that lets a thread postpone cooperating
/// with a stop request.
pub struct MutatorThread {
    status: Mutex<ThreadStatus>,
    cant_stop_wont_stop: AtomicBool,
}

impl MutatorThread {
    fn new() -> Self {
        MutatorThread {
            status: Mutex::new(ThreadStatus::Attached),
            cant_stop_wont_stop: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ThreadStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_cant_stop_wont_stop(&self, value: bool) {
        self.cant_stop_wont_stop.store(value, Ordering::Release);
    }

    pub fn is_cant_stop_wont_stop(&self) -> bool {
        self.cant_stop_wont_stop.load(Ordering::Acquire)
    }
}

/// Stops and resumes every registered mutator thread. Exactly one
/// collection may hold the controller's internals at a time; the `collect`
/// CAS (see `collector::Collector`) guards re-entrant collection requests,
/// while this controller's own `stoptheworld_mutex` guards the handshake
/// itself against a second collector racing to stop the world.
pub struct StwController {
    stoptheworld_mutex: Mutex<()>,
    stop_requested: AtomicBool,
    threads: Mutex<HashMap<usize, Arc<MutatorThread>>>,
    parked_count: Mutex<usize>,
    all_parked: Condvar,
    resumed: Condvar,
}

impl StwController {
    pub fn new() -> Self {
        StwController {
            stoptheworld_mutex: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
            threads: Mutex::new(HashMap::new()),
            parked_count: Mutex::new(0),
            all_parked: Condvar::new(),
            resumed: Condvar::new(),
        }
    }

    pub fn register_thread(&self, tid: usize) -> Arc<MutatorThread> {
        self.threads
            .lock()
            .unwrap()
            .entry(tid)
            .or_insert_with(|| Arc::new(MutatorThread::new()))
            .clone()
    }

    pub fn unregister_thread(&self, tid: usize) {
        if let Some(thread) = self.threads.lock().unwrap().remove(&tid) {
            *thread.status.lock().unwrap() = ThreadStatus::Detached;
        }
    }

    pub fn detach(&self, tid: usize) {
        if let Some(thread) = self.threads.lock().unwrap().get(&tid) {
            *thread.status.lock().unwrap() = ThreadStatus::Detached;
            if self.stop_requested.load(Ordering::Acquire) {
                self.note_parked();
            }
        }
    }

    pub fn attach(&self, tid: usize) {
        if let Some(thread) = self.threads.lock().unwrap().get(&tid) {
            *thread.status.lock().unwrap() = ThreadStatus::Attached;
        }
    }

    /// Called periodically by mutator code (the `eval_breaker` poll point).
    /// If a stop has been requested and this thread has not opted out via
    /// `cant_stop_wont_stop`, parks until the world restarts.
    pub fn poll(&self, tid: usize) {
        if !self.stop_requested.load(Ordering::Acquire) {
            return;
        }
        let thread = match self.threads.lock().unwrap().get(&tid).cloned() {
            Some(t) => t,
            None => return,
        };
        if thread.is_cant_stop_wont_stop() {
            return;
        }
        {
            let mut status = thread.status.lock().unwrap();
            if *status != ThreadStatus::Attached {
                return;
            }
            *status = ThreadStatus::Gc;
        }
        self.note_parked();
        let mut status = thread.status.lock().unwrap();
        while self.stop_requested.load(Ordering::Acquire) {
            status = self
                .resumed
                .wait_timeout(status, std::time::Duration::from_millis(10))
                .unwrap()
                .0;
        }
        *status = ThreadStatus::Attached;
    }

    fn note_parked(&self) {
        let mut count = self.parked_count.lock().unwrap();
        *count += 1;
        self.all_parked.notify_all();
    }

    /// Stop every attached thread. Returns `false` (spec §4.F point 3) if
    /// the requester itself has `cant_stop_wont_stop` set, without
    /// touching any state.
    ///
    /// The requester is the collector thread itself: it is excluded from the
    /// set of threads we wait to park, since it is busy running collection
    /// code rather than polling its own `eval_breaker`.
    pub fn stop_world(&self, requester: &MutatorThread) -> bool {
        if requester.is_cant_stop_wont_stop() {
            return false;
        }
        let _guard = self.stoptheworld_mutex.lock().unwrap();
        self.stop_requested.store(true, Ordering::Release);

        let requester_ptr = requester as *const MutatorThread;
        let threads = self
            .threads
            .lock()
            .unwrap()
            .values()
            .filter(|t| Arc::as_ptr(t) != requester_ptr)
            .cloned()
            .collect::<Vec<_>>();
        let target = threads
            .iter()
            .filter(|t| t.status() == ThreadStatus::Attached)
            .count();
        debug!("stopping the world: waiting for {} threads to park", target);

        let mut count = self.parked_count.lock().unwrap();
        *count = threads
            .iter()
            .filter(|t| t.status() != ThreadStatus::Attached)
            .count();
        while *count < threads.len() {
            count = self.all_parked.wait(count).unwrap();
        }
        trace!("world stopped");
        true
    }

    /// Resume every parked thread.
    pub fn restart_world(&self) {
        self.stop_requested.store(false, Ordering::Release);
        *self.parked_count.lock().unwrap() = 0;
        self.resumed.notify_all();
        trace!("world restarted");
    }
}

impl Default for StwController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn stop_world_waits_for_all_attached_threads() {
        let controller = Arc::new(StwController::new());
        let requester = controller.register_thread(0);
        let mutator_count = 4;
        let mut handles = vec![];
        let running = Arc::new(StdAtomicUsize::new(0));
        for i in 1..=mutator_count {
            let controller = controller.clone();
            let running = running.clone();
            controller.register_thread(i);
            handles.push(thread::spawn(move || {
                running.fetch_add(1, Ordering::SeqCst);
                for _ in 0..20 {
                    controller.poll(i);
                    thread::sleep(Duration::from_millis(2));
                }
            }));
        }
        while running.load(Ordering::SeqCst) < mutator_count {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(10));
        assert!(controller.stop_world(&requester));
        controller.restart_world();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn stop_world_aborts_if_requester_opted_out() {
        let controller = StwController::new();
        let requester = controller.register_thread(0);
        requester.set_cant_stop_wont_stop(true);
        assert!(!controller.stop_world(&requester));
    }
}
