//! Pointer-sized atomic word, the substrate every primitive in this module
//! is built from. Grounded on the word-sized CAS loops throughout
//! `Python/lock.c`.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A single machine word used as a small state machine (lock bit, waiter
/// stack head, owner thread id, ...). All operations use the ordering the
/// source relies on: acquire on load/success-CAS, release on store, AcqRel
/// on read-modify-write.
#[derive(Debug)]
pub struct AtomicWord(AtomicUsize);

impl AtomicWord {
    pub const fn new(value: usize) -> Self {
        AtomicWord(AtomicUsize::new(value))
    }

    #[inline]
    pub fn load(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, value: usize) {
        self.0.store(value, Ordering::Release);
    }

    #[inline]
    pub fn exchange(&self, value: usize) -> usize {
        self.0.swap(value, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_exchange(&self, expected: usize, new: usize) -> Result<usize, usize> {
        self.0
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
    }

    #[inline]
    pub fn fetch_or(&self, bits: usize) -> usize {
        self.0.fetch_or(bits, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_and(&self, bits: usize) -> usize {
        self.0.fetch_and(bits, Ordering::AcqRel)
    }
}

impl Default for AtomicWord {
    fn default() -> Self {
        Self::new(0)
    }
}
