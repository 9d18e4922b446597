//! The polymorphic capability every collectable type provides: `traverse`
//! over outgoing strong references, plus the optional `tp_clear`/
//! `tp_finalize`/`tp_del` hooks. Grounded on `gcmodule.c`'s `traverseproc`
//! contract and on the `Linked`/vtable-reconstruction pattern used by the
//! quark-zju Rust port of this collector (`GcHeader` carries a type-erased
//! vtable pointer instead of a Rust trait object, to keep headers a fixed
//! two-word size); we keep that shape as `GcObject::vtable`.

use std::ptr::NonNull;

use super::header::GcHeader;

/// What a visit callback is being asked to do with each outgoing reference.
/// Mirrors the three visitor kinds the stack walker and heap walker share
/// (spec §4.E): decrementing internal refs, counting roots, and re-marking
/// reachable successors during `move_unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitKind {
    /// Subtract one from the successor's `gc_refs`.
    Decref,
    /// Add one to the successor's `gc_refs` (used for stack roots).
    Incref,
    /// Promote a zeroed successor back onto the reachable working list.
    Reachable,
}

/// A single outgoing strong reference visited by `traverse`.
pub type Visit<'a> = dyn FnMut(NonNull<GcHeader>, VisitKind) + 'a;

/// Per-type behavior table. One instance is shared by every instance of a
/// type (so it is cheap to store a `&'static Vtable` per object), matching
/// `gcmodule.c`'s single function-pointer-per-type layout.
pub struct Vtable {
    /// Visit every strong outgoing reference of `obj` exactly once.
    pub traverse: fn(obj: NonNull<GcHeader>, kind: VisitKind, visit: &mut Visit),
    /// Clear outgoing references so a cycle can be broken (`tp_clear`).
    pub clear: Option<fn(obj: NonNull<GcHeader>)>,
    /// Run once, the first time the object becomes unreachable.
    pub finalize: Option<fn(obj: NonNull<GcHeader>)>,
    /// Legacy `__del__`-style finalizer: objects with this set are never
    /// cleared automatically and are instead routed to `gc.garbage`.
    pub legacy_del: Option<fn(obj: NonNull<GcHeader>)>,
    /// The object's current logical refcount (`local + shared`), the
    /// `update_refs` seed value.
    pub refcount: fn(obj: NonNull<GcHeader>) -> isize,
    /// Merge the object's local refcount into its shared refcount and add
    /// one temporary reference, per `incref_merge` (spec §4.C, §4.G step 9).
    pub incref_merge: fn(obj: NonNull<GcHeader>),
    /// Undo the temporary reference `incref_merge` added, once resurrection
    /// has been ruled out (spec §4.G step 14).
    pub decref: fn(obj: NonNull<GcHeader>),
    pub name: &'static str,
}

impl Vtable {
    pub fn has_legacy_finalizer(&self) -> bool {
        self.legacy_del.is_some()
    }
}

/// A heap object tracked by the collector: a header plus a vtable pointer.
/// Real objects embed a `GcObject` as their first field so a `*mut Object`
/// can be reinterpreted as `*mut GcObject`, matching `gcmodule.c`'s
/// `PyGC_Head`-prefix convention.
#[repr(C)]
pub struct GcObject {
    pub header: GcHeader,
    pub vtable: &'static Vtable,
}

impl GcObject {
    pub fn new(vtable: &'static Vtable) -> Self {
        GcObject {
            header: GcHeader::new(),
            vtable,
        }
    }

    pub fn traverse(&self, obj: NonNull<GcHeader>, kind: VisitKind, visit: &mut Visit) {
        (self.vtable.traverse)(obj, kind, visit);
    }

    /// Recover the `GcObject` a tracked header belongs to. Sound because
    /// `GcObject` is `repr(C)` with `header` as its first field, so a
    /// `*mut GcHeader` obtained from `&object.header` can always be cast
    /// back; callers must ensure `ptr` really does point at a `GcHeader`
    /// embedded in a `GcObject` (every pointer the heap walker and working
    /// lists hand out satisfies this).
    pub unsafe fn from_header(ptr: NonNull<GcHeader>) -> NonNull<GcObject> {
        ptr.cast()
    }
}
