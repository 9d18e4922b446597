//! Intrusive, sentinel-headed doubly-linked lists built directly on
//! `GcHeader`'s `prev`/`next` links — the `young`, `unreachable`,
//! `finalizers` and `wrcb_to_call` working lists the cycle collector moves
//! objects between. Grounded on `gcmodule.c`'s `gc_list_init`/
//! `gc_list_append`/`gc_list_merge`/`_gc_list_is_empty`.

use std::ptr::NonNull;

use crate::object::GcHeader;

/// A circular doubly-linked list with a dummy sentinel node, so insertion
/// and removal at any position never need a null check.
pub struct GcList {
    sentinel: Box<GcHeader>,
}

impl GcList {
    pub fn new() -> Self {
        let sentinel = Box::new(GcHeader::new());
        let ptr = NonNull::from(sentinel.as_ref());
        sentinel.set_prev_link(Some(ptr));
        sentinel.set_next_link(Some(ptr));
        GcList { sentinel }
    }

    pub fn sentinel_ptr(&self) -> NonNull<GcHeader> {
        NonNull::from(self.sentinel.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.sentinel.next_link() == Some(self.sentinel_ptr())
    }

    /// Append `node` at the back of the list.
    pub fn push_back(&self, node: NonNull<GcHeader>) {
        let sentinel = self.sentinel_ptr();
        let last = self.sentinel.prev_link().unwrap_or(sentinel);
        unsafe {
            last.as_ref().set_next_link(Some(node));
            node.as_ref().set_prev_link(Some(last));
            node.as_ref().set_next_link(Some(sentinel));
        }
        self.sentinel.set_prev_link(Some(node));
    }

    /// Remove `node` from whatever list it currently sits on. Safe to call
    /// even while iterating a *different* list.
    pub fn unlink(node: NonNull<GcHeader>) {
        unsafe {
            let prev = node.as_ref().prev_link();
            let next = node.as_ref().next_link();
            if let Some(prev) = prev {
                prev.as_ref().set_next_link(next);
            }
            if let Some(next) = next {
                next.as_ref().set_prev_link(prev);
            }
            node.as_ref().set_prev_link(None);
            node.as_ref().set_next_link(None);
        }
    }

    /// Move every node of `other` onto the back of `self`, leaving `other`
    /// empty.
    pub fn append_all(&self, other: &GcList) {
        for node in other.drain() {
            self.push_back(node);
        }
    }

    /// Remove and return every node currently on the list, front to back.
    pub fn drain(&self) -> Vec<NonNull<GcHeader>> {
        let mut out = Vec::new();
        let sentinel = self.sentinel_ptr();
        let mut cur = self.sentinel.next_link().unwrap_or(sentinel);
        while cur != sentinel {
            let next = unsafe { cur.as_ref().next_link() }.unwrap_or(sentinel);
            out.push(cur);
            cur = next;
        }
        self.sentinel.set_prev_link(Some(sentinel));
        self.sentinel.set_next_link(Some(sentinel));
        out
    }

    /// A front-to-back snapshot of the nodes currently linked. Collection
    /// phases that may re-link nodes while walking (`move_unreachable`) do
    /// not use this; they walk live via `first()`/`GcHeader::next_link()`
    /// instead so appends during the walk are observed.
    pub fn snapshot(&self) -> Vec<NonNull<GcHeader>> {
        let mut out = Vec::new();
        let sentinel = self.sentinel_ptr();
        let mut cur = self.sentinel.next_link().unwrap_or(sentinel);
        while cur != sentinel {
            out.push(cur);
            cur = unsafe { cur.as_ref().next_link() }.unwrap_or(sentinel);
        }
        out
    }

    pub fn first(&self) -> Option<NonNull<GcHeader>> {
        let sentinel = self.sentinel_ptr();
        self.sentinel.next_link().filter(|&p| p != sentinel)
    }
}

impl Default for GcList {
    fn default() -> Self {
        Self::new()
    }
}
