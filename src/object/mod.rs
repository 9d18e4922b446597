//! The object model: GC header bit layout, split local/shared refcounts, and
//! the per-type traversal vtable. See spec §3-§4.C.

pub mod header;
pub mod refcount;
pub mod traceable;

pub use header::GcHeader;
pub use refcount::Refcount;
pub use traceable::{GcObject, Vtable, Visit, VisitKind};
