//! Legacy (`tp_del`) finalizers, `tp_finalize`, and the final
//! clear-or-publish step that actually breaks a dead cycle. Grounded on
//! `gcmodule.c`'s `move_legacy_finalizers`/`finalize_garbage`/
//! `delete_garbage`/`handle_legacy_finalizers`, with the ready-queue shape
//! borrowed from `util/finalizable_processor.rs`'s `ready_for_finalize`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::report_unraisable;
use crate::object::{GcHeader, GcObject, VisitKind};

use super::lists::GcList;

/// Move every object in `unreachable` whose type has a legacy `tp_del` to
/// `finalizers`, then transitively everything reachable from it, clearing
/// `UNREACHABLE` as each moves. Spec §4.G step 8.
pub fn move_legacy_finalizers(unreachable: &GcList, finalizers: &GcList) {
    let mut queue: Vec<NonNull<GcHeader>> = unreachable
        .snapshot()
        .into_iter()
        .filter(|&ptr| unsafe { GcObject::from_header(ptr).as_ref() }.vtable.has_legacy_finalizer())
        .collect();

    while let Some(ptr) = queue.pop() {
        let header = unsafe { ptr.as_ref() };
        if !header.is_unreachable() {
            continue;
        }
        GcList::unlink(ptr);
        header.clear_unreachable();
        finalizers.push_back(ptr);

        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        let mut visit = |succ: NonNull<GcHeader>, kind: VisitKind| {
            if kind == VisitKind::Reachable && unsafe { succ.as_ref() }.is_unreachable() {
                queue.push(succ);
            }
        };
        (obj.vtable.traverse)(ptr, VisitKind::Reachable, &mut visit);
    }
}

/// Run `tp_finalize` once per object in `final_unreachable`, latching
/// `FINALIZED` first so a resurrecting finalizer can never cause it to run
/// twice, in this collection or any later one. Spec §4.G step 13,
/// testable property 4.
pub fn finalize_garbage(final_unreachable: &GcList) {
    for ptr in final_unreachable.snapshot() {
        let header = unsafe { ptr.as_ref() };
        if header.is_finalized() {
            continue;
        }
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        if let Some(finalize) = obj.vtable.finalize {
            header.set_finalized();
            if catch_unwind(AssertUnwindSafe(|| finalize(ptr))).is_err() {
                report_unraisable("tp_finalize");
            }
        }
    }
}

/// Break every cycle in `final_unreachable` by calling `tp_clear`, unless
/// `DEBUG_SAVEALL` is set, in which case objects are published to `garbage`
/// untouched instead. Spec §4.G step 16.
pub fn delete_garbage(final_unreachable: &GcList, save_all: bool, garbage: &Mutex<Vec<NonNull<GcHeader>>>) {
    for ptr in final_unreachable.drain() {
        if save_all {
            garbage.lock().unwrap().push(ptr);
            continue;
        }
        let obj = unsafe { GcObject::from_header(ptr).as_ref() };
        if let Some(clear) = obj.vtable.clear {
            if catch_unwind(AssertUnwindSafe(|| clear(ptr))).is_err() {
                report_unraisable("tp_clear");
            }
        }
        unsafe { ptr.as_ref() }.clear_collection_bits();
    }
}

/// Publish every object with a legacy finalizer that survived collection
/// into `gc.garbage`, visible to user code. Spec §4.G step 17.
pub fn publish_legacy_finalizers(finalizers: &GcList, garbage: &Mutex<Vec<NonNull<GcHeader>>>) {
    let mut garbage = garbage.lock().unwrap();
    for ptr in finalizers.drain() {
        unsafe { ptr.as_ref() }.clear_collection_bits();
        garbage.push(ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::traceable::Vtable;

    static LEGACY_VTABLE: Vtable = Vtable {
        traverse: |_, _, _| {},
        clear: None,
        finalize: None,
        legacy_del: Some(|_| {}),
        refcount: |_| 1,
        incref_merge: |_| {},
        decref: |_| {},
        name: "legacy",
    };

    static CLEAR_CALLS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    static PLAIN_VTABLE: Vtable = Vtable {
        traverse: |_, _, _| {},
        clear: Some(|_| {
            CLEAR_CALLS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }),
        finalize: None,
        legacy_del: None,
        refcount: |_| 1,
        incref_merge: |_| {},
        decref: |_| {},
        name: "plain",
    };

    #[test]
    fn legacy_finalizer_objects_are_published_to_garbage() {
        let obj = Box::new(GcObject::new(&LEGACY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        ptr_ref(ptr).set_unreachable();

        let unreachable = GcList::new();
        unreachable.push_back(ptr);
        let finalizers = GcList::new();
        move_legacy_finalizers(&unreachable, &finalizers);

        assert!(unreachable.is_empty());
        assert_eq!(finalizers.snapshot(), vec![ptr]);
        assert!(!ptr_ref(ptr).is_unreachable());

        let garbage = Mutex::new(Vec::new());
        publish_legacy_finalizers(&finalizers, &garbage);
        assert_eq!(garbage.lock().unwrap().len(), 1);
    }

    #[test]
    fn delete_garbage_calls_tp_clear_once() {
        let obj = Box::new(GcObject::new(&PLAIN_VTABLE));
        let ptr = NonNull::from(&obj.header);
        let final_unreachable = GcList::new();
        final_unreachable.push_back(ptr);
        let garbage = Mutex::new(Vec::new());
        let before = CLEAR_CALLS.load(std::sync::atomic::Ordering::SeqCst);
        delete_garbage(&final_unreachable, false, &garbage);
        assert!(garbage.lock().unwrap().is_empty());
        assert_eq!(
            CLEAR_CALLS.load(std::sync::atomic::Ordering::SeqCst) - before,
            1
        );
        assert!(!ptr_ref(ptr).is_unreachable());
    }

    fn ptr_ref<'a>(ptr: NonNull<GcHeader>) -> &'a GcHeader {
        unsafe { &*ptr.as_ptr() }
    }
}
