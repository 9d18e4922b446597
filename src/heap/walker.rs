//! The heap traversal itself: enumerate every tracked object without a
//! shadow list by walking each thread's heap plus the abandoned-segment
//! lists, invoking a visitor on every block whose header has `TRACKED` set.
//! Grounded on `gcmodule.c`'s `visit_heap`/`visit_page`/`visit_segment`.
//!
//! Only safe to call under stop-the-world: page freelists are not stable
//! under concurrent allocation (spec §4.D).

use std::ptr::NonNull;

use log::trace;

use crate::object::GcHeader;

use super::registry::HeapRegistry;

/// Walk every tracked object reachable through `registry`. `visit` is
/// invoked once per tracked object; visiting is the heap-walk's only job,
/// so the working-set construction (seeding `gc_refs`, etc.) lives in the
/// collector, not here.
pub fn visit_heap(registry: &HeapRegistry, mut visit: impl FnMut(NonNull<GcHeader>)) {
    let mut visited_count = 0usize;

    for heap in registry.live_heaps() {
        if !heap.mark_visited() {
            continue;
        }
        heap.for_each_block(|ptr| {
            if unsafe { ptr.as_ref() }.is_tracked() {
                visit(ptr);
                visited_count += 1;
            }
        });
    }

    for heap in registry
        .abandoned_heaps()
        .into_iter()
        .chain(registry.abandoned_visited_heaps())
    {
        if !heap.mark_visited() {
            continue;
        }
        heap.for_each_block(|ptr| {
            if unsafe { ptr.as_ref() }.is_tracked() {
                visit(ptr);
                visited_count += 1;
            }
        });
    }

    // Clear the visited bit on every heap we touched so the next collection
    // starts fresh, then fold this round's abandoned list into
    // abandoned-visited (spec §4.D point 3).
    for heap in registry.live_heaps() {
        heap.clear_visited();
    }
    for heap in registry
        .abandoned_heaps()
        .into_iter()
        .chain(registry.abandoned_visited_heaps())
    {
        heap.clear_visited();
    }
    registry.rotate_abandoned();

    trace!("heap walk visited {} tracked objects", visited_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::traceable::{GcObject, Vtable};

    static EMPTY_VTABLE: Vtable = Vtable {
        traverse: |_, _, _| {},
        clear: None,
        finalize: None,
        legacy_del: None,
        refcount: |_| 1,
        incref_merge: |_| {},
        decref: |_| {},
        name: "test",
    };

    fn new_object() -> Box<GcObject> {
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        obj.header.set_tracked();
        obj
    }

    #[test]
    fn visits_live_and_abandoned_tracked_blocks() {
        let registry = HeapRegistry::new();
        registry.register_thread(1);
        registry.register_thread(2);

        let a = new_object();
        let ptr_a = NonNull::from(&a.header);
        registry.track(1, 0, ptr_a);

        let b = new_object();
        let ptr_b = NonNull::from(&b.header);
        registry.track(2, 0, ptr_b);
        registry.abandon_thread(2);

        let mut seen = Vec::new();
        visit_heap(&registry, |ptr| seen.push(ptr));

        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&ptr_a));
        assert!(seen.contains(&ptr_b));
    }

    #[test]
    fn skips_untracked_blocks() {
        let registry = HeapRegistry::new();
        registry.register_thread(1);
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        registry.track(1, 0, ptr);

        let mut seen = Vec::new();
        visit_heap(&registry, |p| seen.push(p));
        assert!(seen.is_empty());
    }
}
