//! The user-visible operations (spec §6): `enable`/`disable`, `collect`,
//! debug flags, thresholds, counts/stats, object introspection, and the
//! freeze no-ops. Grounded on `mm/memory_manager.rs`'s shape as the single
//! FFI-facing surface a VM binding calls into, narrowed to this collector's
//! operation set.

use std::ptr::NonNull;

use crate::collector::{CollectReason, Collector};
use crate::error::ArgumentError;
use crate::object::GcHeader;
use crate::stats::CollectionReport;
use crate::stw::MutatorThread;

pub fn enable(collector: &Collector) {
    collector.options.set_enabled(true);
}

pub fn disable(collector: &Collector) {
    collector.options.set_enabled(false);
}

pub fn isenabled(collector: &Collector) -> bool {
    collector.options.is_enabled()
}

/// Run a full collection. `generation` is accepted for API compatibility
/// with a generational collector but only 0..3 is valid; this collector
/// has a single generation, so any in-range value runs the same pass.
pub fn collect(
    collector: &Collector,
    generation: isize,
    requester: &MutatorThread,
) -> Result<usize, ArgumentError> {
    if !(0..3).contains(&generation) {
        return Err(ArgumentError::GenerationOutOfRange(generation));
    }
    Ok(collector.collect(CollectReason::Manual, requester))
}

pub fn set_debug(collector: &Collector, flags: u32) {
    collector.options.set_debug(flags);
}

pub fn get_debug(collector: &Collector) -> u32 {
    collector.options.get_debug()
}

pub fn set_threshold(collector: &Collector, t0: usize) {
    collector.options.set_threshold(t0);
}

pub fn get_threshold(collector: &Collector) -> usize {
    collector.options.get_threshold()
}

/// `(live_objects, 0, 0)`: the trailing zeros are the per-generation counts
/// a generational collector would report.
pub fn get_count(collector: &Collector) -> (usize, usize, usize) {
    (collector.stats.get_count(), 0, 0)
}

pub fn get_stats(collector: &Collector) -> Vec<CollectionReport> {
    vec![collector.stats.get_stats()]
}

/// Snapshot every tracked object. `generation` is validated but otherwise
/// ignored, per spec §6.
pub fn get_objects(
    collector: &Collector,
    generation: Option<isize>,
) -> Result<Vec<NonNull<GcHeader>>, ArgumentError> {
    if let Some(g) = generation {
        if !(-1..3).contains(&g) {
            return Err(ArgumentError::GenerationOutOfRange(g));
        }
    }
    let mut objects = Vec::new();
    crate::heap::visit_heap(&collector.heap, |ptr| objects.push(ptr));
    Ok(objects)
}

pub fn is_tracked(ptr: NonNull<GcHeader>) -> bool {
    unsafe { ptr.as_ref() }.is_tracked()
}

pub fn is_finalized(ptr: NonNull<GcHeader>) -> bool {
    unsafe { ptr.as_ref() }.is_finalized()
}

/// Every tracked object whose `traverse` visits any of `targets`. A full
/// heap scan, since nothing indexes the reverse edge.
pub fn get_referrers(collector: &Collector, targets: &[NonNull<GcHeader>]) -> Vec<NonNull<GcHeader>> {
    use crate::object::traceable::GcObject;

    let mut referrers = Vec::new();
    crate::heap::visit_heap(&collector.heap, |ptr| {
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        let mut found = false;
        let mut visit = |succ: NonNull<GcHeader>, _kind: crate::object::VisitKind| {
            if targets.contains(&succ) {
                found = true;
            }
        };
        (obj.vtable.traverse)(ptr, crate::object::VisitKind::Reachable, &mut visit);
        if found {
            referrers.push(ptr);
        }
    });
    referrers
}

/// The direct successors of each object in `objs`.
pub fn get_referents(objs: &[NonNull<GcHeader>]) -> Vec<NonNull<GcHeader>> {
    use crate::object::traceable::GcObject;

    let mut referents = Vec::new();
    for &ptr in objs {
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        let mut visit = |succ: NonNull<GcHeader>, _kind: crate::object::VisitKind| {
            referents.push(succ);
        };
        (obj.vtable.traverse)(ptr, crate::object::VisitKind::Reachable, &mut visit);
    }
    referents
}

/// No-ops: this collector keeps a single generation, so there is nothing to
/// freeze. Spec §6, open question 4.
pub fn freeze(_collector: &Collector) {}

pub fn unfreeze(_collector: &Collector) {}

pub fn get_freeze_count(_collector: &Collector) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::traceable::Vtable;
    use crate::object::traceable::GcObject;
    use std::cell::RefCell;

    struct Node {
        obj: GcObject,
        out: RefCell<Vec<NonNull<GcHeader>>>,
    }

    fn traverse(obj: NonNull<GcHeader>, kind: crate::object::VisitKind, visit: &mut crate::object::traceable::Visit) {
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

    #[test]
    fn collect_rejects_out_of_range_generation() {
        let collector = Collector::new();
        let requester = collector.stw.register_thread(0);
        assert_eq!(
            collect(&collector, 5, &requester),
            Err(ArgumentError::GenerationOutOfRange(5))
        );
        assert_eq!(
            collect(&collector, -1, &requester),
            Err(ArgumentError::GenerationOutOfRange(-1))
        );
    }

    #[test]
    fn get_referrers_finds_direct_predecessor() {
        let collector = Collector::new();
        collector.heap.register_thread(1);
        let a = Box::new(GcObject::new(&NODE_VTABLE));
        let b = Box::new(GcObject::new(&NODE_VTABLE));
        a.header.set_tracked();
        b.header.set_tracked();
        let pa = NonNull::from(&a.header);
        let pb = NonNull::from(&b.header);
        a.out.borrow_mut().push(pb);
        collector.heap.track(1, 0, pa);
        collector.heap.track(1, 0, pb);

        let referrers = get_referrers(&collector, &[pb]);
        assert_eq!(referrers, vec![pa]);
    }

    #[test]
    fn get_referents_returns_direct_successors() {
        let a = Box::new(GcObject::new(&NODE_VTABLE));
        let b = Box::new(GcObject::new(&NODE_VTABLE));
        let pa = NonNull::from(&a.header);
        let pb = NonNull::from(&b.header);
        a.out.borrow_mut().push(pb);

        let referents = get_referents(&[pa]);
        assert_eq!(referents, vec![pb]);
    }
}
