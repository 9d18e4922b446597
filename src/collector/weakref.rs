//! Weak reference detachment and callback queueing, the STW half of spec
//! §4.G step 9, and the callback-running half of step 12. Grounded on
//! `gcmodule.c`'s `clear_weakrefs`/`call_weakref_callbacks` and, for the
//! ambient registry shape, on `util/reference_processor.rs`'s
//! `ReferenceProcessor` (`add_candidate`/`scan`/`process_reference`).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::error::report_unraisable;
use crate::object::GcHeader;

use super::lists::GcList;

/// A single weak reference control block. Once its target is collected the
/// reference observes `target() == None` forever; a weakref created with a
/// callback has that callback invoked exactly once, with the world running
/// again, never observing the dying object itself.
pub struct WeakRef {
    target: Mutex<Option<NonNull<GcHeader>>>,
    callback: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

// `target` is a bare pointer tracked only for identity comparison and
// cleared under the registry's lock before the pointee can be freed.
unsafe impl Send for WeakRef {}
unsafe impl Sync for WeakRef {}

impl WeakRef {
    pub fn target(&self) -> Option<NonNull<GcHeader>> {
        *self.target.lock().unwrap()
    }

    fn detach(&self) -> bool {
        self.target.lock().unwrap().take().is_some()
    }

    fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    fn run_callback(&self) {
        let cb = self.callback.lock().unwrap().take();
        if let Some(mut cb) = cb {
            if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                report_unraisable("weakref callback");
            }
        }
    }
}

/// Maps a target object to the weakrefs pointing at it, so the collector
/// can find every weakref that must be detached when the target dies
/// without every object needing its own weakref list field.
pub struct WeakRefRegistry {
    by_target: Mutex<HashMap<usize, Vec<Arc<WeakRef>>>>,
}

impl WeakRefRegistry {
    pub fn new() -> Self {
        WeakRefRegistry {
            by_target: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        target: NonNull<GcHeader>,
        callback: Option<Box<dyn FnMut() + Send>>,
    ) -> Arc<WeakRef> {
        let wr = Arc::new(WeakRef {
            target: Mutex::new(Some(target)),
            callback: Mutex::new(callback),
        });
        self.by_target
            .lock()
            .unwrap()
            .entry(target.as_ptr() as usize)
            .or_default()
            .push(wr.clone());
        wr
    }

    fn take_for(&self, target: NonNull<GcHeader>) -> Vec<Arc<WeakRef>> {
        self.by_target
            .lock()
            .unwrap()
            .remove(&(target.as_ptr() as usize))
            .unwrap_or_default()
    }
}

impl Default for WeakRefRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// For every object in `unreachable`, detach every weakref that targets it
/// (spec §4.G step 9: "Detach any weakref whose target is in unreachable").
/// Weakrefs that carry a callback are collected into the returned list to
/// be invoked later, once the world has restarted — callbacks must never
/// run while mutators are stopped, and must never observe the dying target
/// itself (spec testable property 5).
pub fn clear_weakrefs(unreachable: &GcList, registry: &WeakRefRegistry) -> Vec<Arc<WeakRef>> {
    let mut to_call = Vec::new();
    for ptr in unreachable.snapshot() {
        for wr in registry.take_for(ptr) {
            if wr.detach() && wr.has_callback() {
                to_call.push(wr);
            }
        }
    }
    to_call
}

/// Run every queued weakref callback with the world live. Spec §4.G step
/// 12: exceptions become unraisable and do not stop later callbacks from
/// running.
pub fn call_weakref_callbacks(callbacks: Vec<Arc<WeakRef>>) {
    for wr in callbacks {
        wr.run_callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::traceable::{GcObject, Vtable};
    use std::sync::atomic::{AtomicBool, Ordering};

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

    #[test]
    fn callback_sees_none_target_exactly_once() {
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        let registry = WeakRefRegistry::new();
        let fired = Arc::new(AtomicBool::new(false));
        let wr = {
            let fired = fired.clone();
            registry.register(
                ptr,
                Some(Box::new(move || {
                    fired.store(true, Ordering::SeqCst);
                })),
            )
        };

        let unreachable = GcList::new();
        unreachable.push_back(ptr);
        let to_call = clear_weakrefs(&unreachable, &registry);

        assert!(wr.target().is_none());
        assert_eq!(to_call.len(), 1);
        call_weakref_callbacks(to_call);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_callback_is_reported_not_propagated() {
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        let registry = WeakRefRegistry::new();
        registry.register(ptr, Some(Box::new(|| panic!("boom"))));
        let unreachable = GcList::new();
        unreachable.push_back(ptr);
        let to_call = clear_weakrefs(&unreachable, &registry);
        call_weakref_callbacks(to_call);
    }
}
