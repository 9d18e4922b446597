//! Per-thread register stacks and the root-sweep/traversal walk over them.
//! See spec §4.E.

pub mod walker;

pub use walker::{visit_thread_stacks, Frame, Register, StackRegistry, ThreadStack};
