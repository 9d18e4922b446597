//! A concurrent cycle-collecting garbage collector for a free-threaded,
//! biased-reference-counted runtime.
//!
//! This crate is the collector core: the stop-the-world handshake, the
//! heap and stack walkers, the refcount-subtraction cycle detector, and
//! the weakref/finalizer resurrection pipeline. It does not own the
//! allocator or the object model a host language builds on top of it —
//! those are external collaborators this crate only consumes a narrow
//! interface from (see [`heap::HeapRegistry`], [`object::traceable::Vtable`]).
//!
//! A host embeds this crate by constructing one process-wide [`Collector`]
//! with [`new_collector`], registering each of its own threads with
//! [`Collector::stw`], [`Collector::heap`], and [`Collector::stacks`], and
//! driving collections through the [`api`] module.

#[macro_use]
extern crate lazy_static;

pub mod api;
pub mod collector;
pub mod error;
pub mod heap;
mod logging;
pub mod object;
pub mod options;
pub mod stack;
pub mod stats;
pub mod stw;
pub mod sync;

pub use crate::collector::{CollectReason, Collector};

use std::sync::Once;

static LOGGING_INIT: Once = Once::new();

/// Construct a fresh collector, initializing the built-in logger on first
/// call. A host process constructs exactly one of these.
pub fn new_collector() -> Collector {
    LOGGING_INIT.call_once(logging::try_init);
    Collector::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_collector_starts_enabled_with_default_threshold() {
        let collector = new_collector();
        assert!(collector.options.is_enabled());
        assert!(collector.options.get_threshold() >= 7000);
    }
}
