//! The core refcount-subtraction cycle-detection algorithm: seed `gc_refs`
//! from the real refcount, subtract every internal reference, then
//! partition the working set into reachable and unreachable. Grounded
//! step-for-step on `gcmodule.c`'s `update_refs`/`subtract_refs`/
//! `move_unreachable`/`deduce_unreachable`, cross-checked against the
//! `update_refs`/`subtract_refs`/`mark_reachable`/`release_unreachable`
//! shape of the quark-zju Rust port of this same algorithm.

use std::ptr::NonNull;

use log::trace;

use crate::object::{GcHeader, GcObject, VisitKind};

use super::lists::GcList;

/// Seed `gc_refs` with each object's real refcount and link it onto
/// `young`. Spec §4.G step 5.
pub fn update_refs(tracked: &[NonNull<GcHeader>], young: &GcList) {
    for &ptr in tracked {
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        let refcount = (obj.vtable.refcount)(ptr);
        unsafe { ptr.as_ref() }.set_gc_refs(refcount);
        young.push_back(ptr);
    }
}

/// For every object in `young`, traverse its outgoing references and
/// decrement `gc_refs` on any tracked successor. After this,
/// `gc_refs > 0` iff the object has an external (non-cycle) reference.
/// Spec §4.G step 6.
pub fn subtract_refs(young: &GcList) {
    subtract_refs_impl(young, false);
}

/// As `subtract_refs`, but only touches successors already flagged
/// `UNREACHABLE`. Spec §4.G step 14's resurrection re-run is scoped to the
/// unreachable set alone: a dying cycle member can still hold a strong
/// reference to a live external object, and that object's header is not on
/// any working list during the re-run, so decrementing its `gc_refs` would
/// corrupt bits overlaid on a field the list machinery isn't tracking.
pub fn subtract_refs_unreachable_only(young: &GcList) {
    subtract_refs_impl(young, true);
}

fn subtract_refs_impl(young: &GcList, unreachable_only: bool) {
    for ptr in young.snapshot() {
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        let mut visit = |succ: NonNull<GcHeader>, kind: VisitKind| {
            if kind != VisitKind::Decref {
                return;
            }
            let header = unsafe { succ.as_ref() };
            if !header.is_tracked() {
                return;
            }
            if unreachable_only && !header.is_unreachable() {
                return;
            }
            header.dec_gc_refs();
        };
        (obj.vtable.traverse)(ptr, VisitKind::Decref, &mut visit);
    }
}

/// Examine one direct successor of an object `move_unreachable` has just
/// proven reachable. Deliberately not recursive: a successor sitting in
/// `unreachable` is rescued back onto the tail of `young`, where the outer
/// `move_unreachable` loop will reach it in its own time and traverse *its*
/// successors in turn — the fixed point is reached by the loop re-visiting
/// appended tail nodes, not by this function recursing. Spec §4.G step 7
/// ("visit_reachable").
fn rescue_successor(succ: NonNull<GcHeader>, young: &GcList) {
    let header = unsafe { succ.as_ref() };
    if !header.is_tracked() {
        return;
    }
    if header.is_unreachable() {
        GcList::unlink(succ);
        header.clear_unreachable();
        header.set_gc_refs(1);
        young.push_back(succ);
    } else if header.gc_refs() <= 0 {
        // Still sitting in `young`, not yet reached by the outer loop;
        // mark it so that when the loop gets there it treats it as
        // reachable without needing to rediscover that fact.
        header.set_gc_refs(1);
    }
}

/// Walk `young` front-to-back, splitting it into still-reachable objects
/// (left in `young`, `gc_refs` reset to 1) and `unreachable` (flagged
/// `UNREACHABLE`). Rescued successors are re-appended to the tail of
/// `young`, so the walk naturally reaches them and terminates once it
/// catches up to the sentinel. Spec §4.G step 7.
pub fn move_unreachable(young: &GcList, unreachable: &GcList) {
    let sentinel = young.sentinel_ptr();
    let mut cur = unsafe { sentinel.as_ref() }.next_link().unwrap_or(sentinel);
    let mut moved = 0usize;
    while cur != sentinel {
        let header = unsafe { cur.as_ref() };
        if header.gc_refs() > 0 {
            header.set_gc_refs(1);
            let obj = unsafe { GcObject::from_header(cur).as_ref() };
            let mut visit = |succ: NonNull<GcHeader>, kind: VisitKind| {
                if kind == VisitKind::Reachable {
                    rescue_successor(succ, young);
                }
            };
            (obj.vtable.traverse)(cur, VisitKind::Reachable, &mut visit);
            // Read `next` only now: a rescued successor may have just been
            // appended after `cur`, extending the walk so it gets visited
            // in turn instead of being skipped.
            cur = header.next_link().unwrap_or(sentinel);
        } else {
            // `unlink` zeroes `cur`'s own links, so capture `next` first.
            let next = header.next_link().unwrap_or(sentinel);
            GcList::unlink(cur);
            header.set_unreachable();
            unreachable.push_back(cur);
            moved += 1;
            cur = next;
        }
    }
    trace!("move_unreachable: moved {} objects to the unreachable set", moved);
}

/// `subtract_refs` + `move_unreachable` combined, the shape
/// `deduce_unreachable` wraps in `gcmodule.c`.
pub fn deduce_unreachable(young: &GcList, unreachable: &GcList) {
    subtract_refs(young);
    move_unreachable(young, unreachable);
}

/// As `deduce_unreachable`, scoped to the unreachable set alone: the
/// resurrection re-run of spec §4.G step 14, which must re-subtract refs
/// only among objects already known unreachable rather than every tracked
/// successor.
pub fn deduce_unreachable_in_unreachable_set(unreachable: &GcList, final_unreachable: &GcList) {
    subtract_refs_unreachable_only(unreachable);
    move_unreachable(unreachable, final_unreachable);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::traceable::{Visit, Vtable};
    use std::cell::RefCell;

    struct Node {
        obj: GcObject,
        out: RefCell<Vec<NonNull<GcHeader>>>,
    }

    fn traverse(obj: NonNull<GcHeader>, kind: VisitKind, visit: &mut Visit) {
        let node = unsafe { &*(GcObject::from_header(obj).as_ptr() as *const Node) };
        for &succ in node.out.borrow().iter() {
            visit(succ, kind);
        }
    }

    static NODE_VTABLE: Vtable = Vtable {
        traverse,
        clear: None,
        finalize: None,
        legacy_del: None,
        refcount: |_| 1,
        incref_merge: |_| {},
        decref: |_| {},
        name: "node",
    };

    fn new_node() -> Box<Node> {
        let node = Box::new(Node {
            obj: GcObject::new(&NODE_VTABLE),
            out: RefCell::new(Vec::new()),
        });
        node.obj.header.set_tracked();
        node
    }

    fn header_of(node: &Node) -> NonNull<GcHeader> {
        NonNull::from(&node.obj.header)
    }

    #[test]
    fn two_node_cycle_with_no_external_refs_is_fully_unreachable() {
        let a = new_node();
        let b = new_node();
        a.out.borrow_mut().push(header_of(&b));
        b.out.borrow_mut().push(header_of(&a));

        let young = GcList::new();
        let unreachable = GcList::new();
        update_refs(&[header_of(&a), header_of(&b)], &young);
        deduce_unreachable(&young, &unreachable);

        assert!(young.is_empty());
        assert_eq!(unreachable.snapshot().len(), 2);
        assert!(unsafe { header_of(&a).as_ref() }.is_unreachable());
        assert!(unsafe { header_of(&b).as_ref() }.is_unreachable());
    }

    #[test]
    fn externally_referenced_member_rescues_whole_cycle() {
        let a = new_node();
        let b = new_node();
        a.out.borrow_mut().push(header_of(&b));
        b.out.borrow_mut().push(header_of(&a));

        let young = GcList::new();
        let unreachable = GcList::new();
        update_refs(&[header_of(&a), header_of(&b)], &young);
        // Simulate an external root holding a reference into `b` beyond the
        // cycle edge from `a`, so `b`'s gc_refs stays positive after
        // subtract_refs.
        unsafe { header_of(&b).as_ref() }.add_gc_refs(1);
        deduce_unreachable(&young, &unreachable);

        assert!(unreachable.is_empty());
        assert_eq!(young.snapshot().len(), 2);
    }
}
