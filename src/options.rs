//! Collector configuration: `PYTHONGC`-derived scaling, the debug bitmask,
//! and the collection threshold. Grounded on `util/options.rs`'s
//! `MMTKOption<T>` validate-on-set wrapper, trimmed to the handful of knobs
//! spec §6/§9 names.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

bitflags_like::bitflags! {
    pub struct DebugFlags: u32 {
        const STATS = 1;
        const COLLECTABLE = 2;
        const UNCOLLECTABLE = 4;
        const SAVEALL = 32;
    }
}

/// A small hand-rolled bitflags-style module, kept dependency-free since
/// this crate's only four flags do not warrant pulling in a dedicated
/// bitflags crate the rest of the corpus does not already use.
mod bitflags_like {
    macro_rules! bitflags {
        (pub struct $name:ident: $repr:ty { $(const $variant:ident = $value:expr;)* }) => {
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name($repr);
            impl $name {
                $(pub const $variant: $name = $name($value);)*
                pub const fn empty() -> Self { $name(0) }
                pub const fn bits(self) -> $repr { self.0 }
                pub const fn from_bits_truncate(bits: $repr) -> Self { $name(bits) }
                pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
            }
            impl std::ops::BitOr for $name {
                type Output = Self;
                fn bitor(self, rhs: Self) -> Self { $name(self.0 | rhs.0) }
            }
        };
    }
    pub(crate) use bitflags;
}

/// Validated like `MMTKOption::set`: the setter refuses an out-of-range
/// value and leaves the previous one in place.
fn validate_gc_scale(v: isize) -> bool {
    v >= 0
}

/// Process-wide tunables, mirroring the small slice of `util/options.rs`
/// relevant to this collector: a scale factor derived from `PYTHONGC`, the
/// debug bitmask, and the generation-0 threshold (spec §6, §9).
pub struct Options {
    /// Integer percentage read from `PYTHONGC`; default 100.
    gc_scale: AtomicIsize,
    debug: AtomicUsize,
    /// `set_threshold`'s `t0`; overwritten by `Options::update_threshold`
    /// after every completed collection (open question 3 in DESIGN.md).
    threshold: AtomicUsize,
    enabled: std::sync::atomic::AtomicBool,
}

const DEFAULT_GC_SCALE: isize = 100;
const MINIMUM_THRESHOLD: usize = 7000;

impl Options {
    pub fn from_env() -> Self {
        let gc_scale = std::env::var("PYTHONGC")
            .ok()
            .and_then(|v| v.parse::<isize>().ok())
            .filter(|v| validate_gc_scale(*v))
            .unwrap_or(DEFAULT_GC_SCALE);
        Options {
            gc_scale: AtomicIsize::new(gc_scale),
            debug: AtomicUsize::new(0),
            threshold: AtomicUsize::new(MINIMUM_THRESHOLD),
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::Release);
    }

    pub fn gc_scale(&self) -> isize {
        self.gc_scale.load(Ordering::Acquire)
    }

    pub fn set_debug(&self, flags: u32) {
        self.debug.store(flags as usize, Ordering::Release);
    }

    pub fn get_debug(&self) -> u32 {
        self.debug.load(Ordering::Acquire) as u32
    }

    pub fn debug_flags(&self) -> DebugFlags {
        DebugFlags::from_bits_truncate(self.get_debug())
    }

    /// Only `t0` is meaningful, per spec §6; `t1`/`t2` are accepted by the
    /// API surface but not stored here.
    pub fn set_threshold(&self, t0: usize) {
        self.threshold.store(t0, Ordering::Release);
    }

    pub fn get_threshold(&self) -> usize {
        self.threshold.load(Ordering::Acquire)
    }

    /// Recompute the threshold from the live-object count after a
    /// collection completes: `max(7000, live * (1 + gc_scale/100))`. Per
    /// DESIGN.md's open-question decision, this always wins over whatever
    /// `set_threshold` last wrote.
    pub fn update_threshold(&self, live: usize) {
        let scale = self.gc_scale().max(0) as usize;
        let scaled = live.saturating_add(live.saturating_mul(scale) / 100);
        self.threshold
            .store(scaled.max(MINIMUM_THRESHOLD), Ordering::Release);
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_floors_at_7000() {
        let options = Options::from_env();
        options.update_threshold(10);
        assert_eq!(options.get_threshold(), MINIMUM_THRESHOLD);
    }

    #[test]
    fn set_threshold_is_overwritten_by_update_threshold() {
        let options = Options::from_env();
        options.set_threshold(42);
        assert_eq!(options.get_threshold(), 42);
        options.update_threshold(100_000);
        assert!(options.get_threshold() > 42);
    }

    #[test]
    fn debug_flags_roundtrip() {
        let options = Options::from_env();
        options.set_debug(DebugFlags::SAVEALL.bits() | DebugFlags::STATS.bits());
        assert!(options.debug_flags().contains(DebugFlags::SAVEALL));
        assert!(options.debug_flags().contains(DebugFlags::STATS));
        assert!(!options.debug_flags().contains(DebugFlags::UNCOLLECTABLE));
    }
}
