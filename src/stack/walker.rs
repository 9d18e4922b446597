//! Each thread's interpreter register stack, and the walk over it that
//! feeds the three visitor kinds the collector needs (spec §4.E): counting
//! roots, subtracting internal references, and re-marking reachable
//! successors. Grounded on `gcmodule.c`'s `_PyGC_TraverseStack` and
//! `upgrade_deferred_rc`.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::object::{GcHeader, VisitKind};

/// One stack slot. `DeferredObject` is a strong reference the stack keeps
/// alive without having bumped `ref_local`/`ref_shared` — valid only while
/// the slot remains on some thread's live stack.
#[derive(Clone, Copy)]
pub enum Register {
    Immediate,
    Object(NonNull<GcHeader>),
    DeferredObject(NonNull<GcHeader>),
}

#[derive(Default)]
pub struct Frame {
    registers: Vec<Register>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    pub fn push(&mut self, reg: Register) {
        self.registers.push(reg);
    }

    /// Promote every deferred slot referencing `target` into a real,
    /// refcount-bearing reference. The caller is responsible for bumping
    /// the object's refcount to match (spec §4.G step 9: upgrading
    /// deferred-rc stack slots for generators/coroutines whose target
    /// became unreachable).
    pub fn upgrade_deferred(&mut self, target: NonNull<GcHeader>) -> usize {
        let mut upgraded = 0;
        for reg in self.registers.iter_mut() {
            if let Register::DeferredObject(ptr) = reg {
                if *ptr == target {
                    *reg = Register::Object(*ptr);
                    upgraded += 1;
                }
            }
        }
        upgraded
    }
}

/// One thread's stack: a sequence of frames, innermost last, matching the
/// interpreter's own call-stack ordering.
pub struct ThreadStack {
    frames: Mutex<Vec<Frame>>,
}

impl ThreadStack {
    pub fn new() -> Self {
        ThreadStack {
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn push_frame(&self, frame: Frame) {
        self.frames.lock().unwrap().push(frame);
    }

    pub fn pop_frame(&self) {
        self.frames.lock().unwrap().pop();
    }

    /// Upgrade every deferred-rc slot across all frames referencing
    /// `target` into a real reference. Spec §4.G step 9.
    pub(crate) fn upgrade_deferred(&self, target: NonNull<GcHeader>) -> usize {
        let mut frames = self.frames.lock().unwrap();
        frames
            .iter_mut()
            .map(|frame| frame.upgrade_deferred(target))
            .sum()
    }

    fn for_each_register(&self, mut f: impl FnMut(Register)) {
        let frames = self.frames.lock().unwrap();
        for frame in frames.iter() {
            for reg in &frame.registers {
                f(*reg);
            }
        }
    }
}

impl Default for ThreadStack {
    fn default() -> Self {
        Self::new()
    }
}

/// All live thread stacks, indexed by thread id. The collector walks every
/// one of these during the root sweep (spec §4.G step 4) with
/// `VisitKind::Incref`.
pub struct StackRegistry {
    stacks: Mutex<HashMap<usize, Arc<ThreadStack>>>,
}

impl StackRegistry {
    pub fn new() -> Self {
        StackRegistry {
            stacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_thread(&self, tid: usize) -> Arc<ThreadStack> {
        self.stacks
            .lock()
            .unwrap()
            .entry(tid)
            .or_insert_with(|| Arc::new(ThreadStack::new()))
            .clone()
    }

    pub fn unregister_thread(&self, tid: usize) {
        self.stacks.lock().unwrap().remove(&tid);
    }

    pub(crate) fn live_stacks(&self) -> Vec<Arc<ThreadStack>> {
        self.stacks.lock().unwrap().values().cloned().collect()
    }
}

impl Default for StackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Visit one register slot under `kind`. Deferred slots are skipped by
/// `Decref` (they never contributed to the refcount that was summed into
/// `gc_refs`) and counted by `Incref`/`Reachable` just like ordinary
/// references (spec §4.E).
fn visit_register(reg: Register, kind: VisitKind, visit: &mut dyn FnMut(NonNull<GcHeader>, VisitKind)) {
    match reg {
        Register::Immediate => {}
        Register::Object(ptr) => visit(ptr, kind),
        Register::DeferredObject(ptr) => {
            if kind != VisitKind::Decref {
                visit(ptr, kind);
            }
        }
    }
}

/// Walk every live thread's stack under `kind`, matching `gcmodule.c`'s
/// per-thread stack traversal used during the root sweep.
pub fn visit_thread_stacks(
    registry: &StackRegistry,
    kind: VisitKind,
    mut visit: impl FnMut(NonNull<GcHeader>, VisitKind),
) {
    for stack in registry.live_stacks() {
        stack.for_each_register(|reg| visit_register(reg, kind, &mut visit));
    }
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

    #[test]
    fn decref_skips_deferred_slots() {
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        let registry = StackRegistry::new();
        let stack = registry.register_thread(1);
        let mut frame = Frame::new();
        frame.push(Register::DeferredObject(ptr));
        frame.push(Register::Object(ptr));
        stack.push_frame(frame);

        let mut decref_hits = 0;
        visit_thread_stacks(&registry, VisitKind::Decref, |_, _| decref_hits += 1);
        assert_eq!(decref_hits, 1);

        let mut incref_hits = 0;
        visit_thread_stacks(&registry, VisitKind::Incref, |_, _| incref_hits += 1);
        assert_eq!(incref_hits, 2);
    }

    #[test]
    fn upgrade_deferred_converts_matching_slots() {
        let obj = Box::new(GcObject::new(&EMPTY_VTABLE));
        let ptr = NonNull::from(&obj.header);
        let mut frame = Frame::new();
        frame.push(Register::DeferredObject(ptr));
        let upgraded = frame.upgrade_deferred(ptr);
        assert_eq!(upgraded, 1);
        assert!(matches!(frame.registers[0], Register::Object(_)));
    }
}
