//! Biased reference counting: a thread-owned local counter plus a shared
//! atomic counter, merged on demand. Mirrors `gcmodule.c`'s `ref_local`/
//! `ref_shared` fields and the `incref_merge` operation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bit within `ref_local` marking an object as immortal (never collected,
/// refcount operations on it are no-ops).
const LOCAL_IMMORTAL: usize = 1 << 0;
const LOCAL_SHIFT: usize = 1;

/// Bit within `ref_shared` marking that `ref_local` has been merged in and
/// zeroed; once set, all further increfs/decrefs go through `ref_shared`.
const SHARED_MERGED: usize = 1 << 0;
/// Bit within `ref_shared` marking that the object has been queued on its
/// owning thread's dealloc queue and must not be queued twice.
const SHARED_QUEUED: usize = 1 << 1;
const SHARED_SHIFT: usize = 2;

/// The owning thread's private view of an object's refcount. Only the owner
/// (or the collector during STW) may touch this field.
#[derive(Debug)]
pub struct LocalRefcount {
    bits: usize,
}

impl LocalRefcount {
    pub fn new(count: usize) -> Self {
        LocalRefcount {
            bits: count << LOCAL_SHIFT,
        }
    }

    pub fn immortal() -> Self {
        LocalRefcount {
            bits: LOCAL_IMMORTAL,
        }
    }

    pub fn is_immortal(&self) -> bool {
        self.bits & LOCAL_IMMORTAL != 0
    }

    pub fn count(&self) -> usize {
        self.bits >> LOCAL_SHIFT
    }

    pub fn incref(&mut self) {
        if !self.is_immortal() {
            self.bits += 1 << LOCAL_SHIFT;
        }
    }

    /// Returns `true` if this decref would drop the local count to zero.
    pub fn decref(&mut self) -> bool {
        if self.is_immortal() {
            return false;
        }
        debug_assert!(self.count() > 0, "local refcount underflow");
        self.bits -= 1 << LOCAL_SHIFT;
        self.count() == 0
    }

    pub fn take(&mut self) -> usize {
        let c = self.count();
        self.bits = 0;
        c
    }
}

/// The cross-thread-visible view of an object's refcount.
#[derive(Debug)]
pub struct SharedRefcount {
    bits: AtomicUsize,
}

impl SharedRefcount {
    pub fn new() -> Self {
        SharedRefcount {
            bits: AtomicUsize::new(0),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.bits.load(Ordering::Acquire) & SHARED_MERGED != 0
    }

    pub fn count(&self) -> usize {
        self.bits.load(Ordering::Acquire) >> SHARED_SHIFT
    }

    /// Atomically add `delta` shared references (may be negative). Returns
    /// the previous count, not including merged/queued flags.
    pub fn add(&self, delta: isize) -> usize {
        let step = (delta << SHARED_SHIFT as isize) as usize;
        let prev = self.bits.fetch_add(step, Ordering::AcqRel);
        prev >> SHARED_SHIFT
    }

    /// Mark this object as queued for deallocation by its owner. Returns
    /// `false` if it was already queued (caller must not queue it again).
    pub fn try_mark_queued(&self) -> bool {
        let prev = self.bits.fetch_or(SHARED_QUEUED, Ordering::AcqRel);
        prev & SHARED_QUEUED == 0
    }

    pub fn clear_queued(&self) {
        self.bits.fetch_and(!SHARED_QUEUED, Ordering::AcqRel);
    }

    /// Add `extra_count` to the shared count and set `merged`. Uses
    /// `fetch_add` for the count (not `fetch_or`): the shared counter may
    /// already be nonzero from remote decrefs, and OR-ing a count in would
    /// corrupt any overlapping bits.
    fn mark_merged(&self, extra_count: usize) {
        self.bits
            .fetch_add(extra_count << SHARED_SHIFT, Ordering::AcqRel);
        self.bits.fetch_or(SHARED_MERGED, Ordering::AcqRel);
    }
}

impl Default for SharedRefcount {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-object refcount pair plus the owning-thread id (0 once merged).
pub struct Refcount {
    pub local: std::cell::RefCell<LocalRefcount>,
    pub shared: SharedRefcount,
    pub tid: AtomicUsize,
}

impl Refcount {
    pub fn new(owner_tid: usize) -> Self {
        Refcount {
            local: std::cell::RefCell::new(LocalRefcount::new(1)),
            shared: SharedRefcount::new(),
            tid: AtomicUsize::new(owner_tid),
        }
    }

    pub fn immortal() -> Self {
        Refcount {
            local: std::cell::RefCell::new(LocalRefcount::immortal()),
            shared: SharedRefcount::new(),
            tid: AtomicUsize::new(0),
        }
    }

    /// Logical refcount as observed externally: local + shared, ignoring the
    /// immortal/merged/queued bookkeeping bits.
    pub fn get(&self) -> usize {
        self.local.borrow().count() + self.shared.count()
    }

    /// Merge `local` into `shared`, zero `local` and `tid`, set `merged`,
    /// and add one temporary reference the collector holds while the world
    /// is restarted for weakref callbacks and finalizers (spec §4.G step 9;
    /// testable property 2). The caller must later undo this temporary
    /// reference with [`Refcount::release_temporary`] once resurrection has
    /// been ruled out (step 14).
    ///
    /// `get()` after equals `get()` before, plus exactly one.
    pub fn incref_merge(&self) {
        let mut local = self.local.borrow_mut();
        if local.is_immortal() {
            return;
        }
        let taken = local.take();
        self.shared.mark_merged(taken + 1);
        self.tid.store(0, Ordering::Release);
    }

    /// Undo the temporary reference `incref_merge` added.
    pub fn release_temporary(&self) {
        if self.local.borrow().is_immortal() {
            return;
        }
        self.shared.add(-1);
    }
}
