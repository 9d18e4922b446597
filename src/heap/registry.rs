//! Per-thread segregated heaps and the abandoned-segment lists left behind
//! by exited threads. The allocator that actually backs these pages is an
//! external collaborator (spec §1 Non-goals); this registry is the
//! interface the heap walker needs from it: bins of pages of in-use blocks,
//! grouped per owning thread, plus the two abandoned lists `gcmodule.c`'s
//! `visit_heap` consults for threads that have already exited.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::object::GcHeader;

const PAGE_CAPACITY: usize = 256;

/// One allocator page: a bounded run of in-use blocks. Real pages also hold
/// free blocks; only in-use ones are tracked here since only those can carry
/// a live `GcHeader`.
#[derive(Default)]
pub struct Page {
    blocks: Vec<NonNull<GcHeader>>,
}

/// A size-class bin: an ordered list of pages, matching the per-size-class
/// segregation mimalloc-style allocators use.
#[derive(Default)]
pub struct Bin {
    pages: Vec<Page>,
}

impl Bin {
    fn push(&mut self, ptr: NonNull<GcHeader>) {
        if self
            .pages
            .last()
            .map(|p| p.blocks.len() >= PAGE_CAPACITY)
            .unwrap_or(true)
        {
            self.pages.push(Page::default());
        }
        self.pages.last_mut().unwrap().blocks.push(ptr);
    }

    fn remove(&mut self, ptr: NonNull<GcHeader>) -> bool {
        for page in &mut self.pages {
            if let Some(pos) = page.blocks.iter().position(|b| *b == ptr) {
                page.blocks.swap_remove(pos);
                return true;
            }
        }
        false
    }
}

/// One thread's GC-tagged heap: a handful of bins, plus the `visited` bit
/// the heap-walk uses to avoid double-traversing a heap that appears in
/// both the live-thread pass and an abandoned-list pass during the window
/// where a thread is exiting.
pub struct ThreadHeap {
    bins: Mutex<Vec<Bin>>,
    visited: AtomicBool,
}

impl ThreadHeap {
    fn new() -> Self {
        ThreadHeap {
            bins: Mutex::new(Vec::new()),
            visited: AtomicBool::new(false),
        }
    }

    fn track(&self, bin_index: usize, ptr: NonNull<GcHeader>) {
        let mut bins = self.bins.lock().unwrap();
        if bins.len() <= bin_index {
            bins.resize_with(bin_index + 1, Bin::default);
        }
        bins[bin_index].push(ptr);
    }

    fn untrack(&self, ptr: NonNull<GcHeader>) {
        let mut bins = self.bins.lock().unwrap();
        for bin in bins.iter_mut() {
            if bin.remove(ptr) {
                return;
            }
        }
    }

    pub(crate) fn for_each_block(&self, mut f: impl FnMut(NonNull<GcHeader>)) {
        let bins = self.bins.lock().unwrap();
        for bin in bins.iter() {
            for page in &bin.pages {
                for &ptr in &page.blocks {
                    f(ptr);
                }
            }
        }
    }

    pub(crate) fn mark_visited(&self) -> bool {
        !self.visited.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_visited(&self) {
        self.visited.store(false, Ordering::Release);
    }
}

/// Registry of every tracked thread heap plus the abandoned segment lists.
/// Mirrors `gcmodule.c`'s global thread list guarded by `HEAD_LOCK` and its
/// `abandoned`/`abandoned_visited` mimalloc segment lists.
pub struct HeapRegistry {
    threads: Mutex<HashMap<usize, Arc<ThreadHeap>>>,
    abandoned: Mutex<Vec<Arc<ThreadHeap>>>,
    abandoned_visited: Mutex<Vec<Arc<ThreadHeap>>>,
}

impl HeapRegistry {
    pub fn new() -> Self {
        HeapRegistry {
            threads: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(Vec::new()),
            abandoned_visited: Mutex::new(Vec::new()),
        }
    }

    pub fn register_thread(&self, tid: usize) {
        self.threads
            .lock()
            .unwrap()
            .entry(tid)
            .or_insert_with(|| Arc::new(ThreadHeap::new()));
    }

    /// A thread has exited: its heap's blocks may still be referenced by
    /// other threads' objects, so move it to the abandoned list instead of
    /// dropping it.
    pub fn abandon_thread(&self, tid: usize) {
        if let Some(heap) = self.threads.lock().unwrap().remove(&tid) {
            heap.clear_visited();
            self.abandoned.lock().unwrap().push(heap);
        }
    }

    pub fn track(&self, tid: usize, bin_index: usize, ptr: NonNull<GcHeader>) {
        self.threads
            .lock()
            .unwrap()
            .get(&tid)
            .expect("track() on an unregistered thread")
            .track(bin_index, ptr);
    }

    pub fn untrack(&self, tid: usize, ptr: NonNull<GcHeader>) {
        if let Some(heap) = self.threads.lock().unwrap().get(&tid) {
            heap.untrack(ptr);
        }
    }

    pub(crate) fn live_heaps(&self) -> Vec<Arc<ThreadHeap>> {
        self.threads.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn abandoned_heaps(&self) -> Vec<Arc<ThreadHeap>> {
        self.abandoned.lock().unwrap().clone()
    }

    pub(crate) fn abandoned_visited_heaps(&self) -> Vec<Arc<ThreadHeap>> {
        self.abandoned_visited.lock().unwrap().clone()
    }

    /// After a full abandoned-list pass, everything visited moves to the
    /// abandoned-visited list so the next collection's first pass does not
    /// re-walk it needlessly before it clears its `visited` bit again.
    pub(crate) fn rotate_abandoned(&self) {
        let mut abandoned = self.abandoned.lock().unwrap();
        let mut visited = self.abandoned_visited.lock().unwrap();
        visited.append(&mut abandoned);
    }
}

impl Default for HeapRegistry {
    fn default() -> Self {
        Self::new()
    }
}
