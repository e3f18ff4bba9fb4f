//! Value-box hook.
//!
//! Decorates the toolkit's value-box handler so that a bridge-managed object
//! stored in a persistent box holds a variant reference (and a GC lock) for as
//! long as the box holds it.
//!
//! ## Transient vs. persistent boxes
//!
//! The toolkit's marshalling code creates short-lived boxes on the stack and
//! sometimes copies pointer values without going through the handler, so
//! those boxes cannot be counted reliably. Boxes on the heap only change
//! through the handler. The hook therefore counts a box only when its address
//! lies outside the live part of the event loop thread's stack, i.e. outside
//! `[current stack pointer, recorded stack base]`.
//!
//! This assumes a stack that grows downwards and a stack base recorded in a
//! frame that encloses every toolkit frame. Both hold on the platforms this
//! crate targets; a port to an upward-growing stack must revisit
//! [`is_heap_resident`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::ThreadId;

use crate::counters::{CounterBank, CounterId};
use crate::gc::RefKind;
use crate::registry::ObjectRegistry;
use crate::toolkit::{ObjectRef, ValueBox, Variant, VariantHandler};

/// Thread binding and stack base of the event loop.
#[derive(Debug, Default)]
pub struct LoopAffinity {
    thread: RwLock<Option<ThreadId>>,
    stack_base: AtomicUsize,
}

impl LoopAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, thread: ThreadId) {
        *self.thread.write().expect("loop affinity poisoned") = Some(thread);
    }

    pub fn unbind(&self) {
        *self.thread.write().expect("loop affinity poisoned") = None;
        self.stack_base.store(0, Ordering::Release);
    }

    pub fn thread(&self) -> Option<ThreadId> {
        *self.thread.read().expect("loop affinity poisoned")
    }

    #[inline]
    pub fn is_event_thread(&self) -> bool {
        self.thread() == Some(std::thread::current().id())
    }

    pub fn set_stack_base(&self, address: usize) {
        self.stack_base.store(address, Ordering::Release);
    }

    #[inline]
    pub fn stack_base(&self) -> usize {
        self.stack_base.load(Ordering::Acquire)
    }
}

/// Address of a local in a fresh frame, i.e. (just above) the stack pointer.
#[inline(never)]
pub fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Whether a box at `address` lives outside the active stack range
/// `[stack pointer, stack_base]` of the calling thread.
#[inline(never)]
pub fn is_heap_resident(address: usize, stack_base: usize) -> bool {
    let guard = 0u8;
    let stack_pointer = std::hint::black_box(&guard) as *const u8 as usize;
    address < stack_pointer || address > stack_base
}

/// Handler installed in place of the toolkit's own at owner construction.
pub struct HookedHandler {
    original: Arc<dyn VariantHandler>,
    counters: Arc<CounterBank>,
    registry: Arc<ObjectRegistry>,
    affinity: Arc<LoopAffinity>,
}

impl HookedHandler {
    pub fn new(
        original: Arc<dyn VariantHandler>,
        counters: Arc<CounterBank>,
        registry: Arc<ObjectRegistry>,
        affinity: Arc<LoopAffinity>,
    ) -> Self {
        Self {
            original,
            counters,
            registry,
            affinity,
        }
    }

    pub fn original(&self) -> &Arc<dyn VariantHandler> {
        &self.original
    }

    /// The bridge-managed object held by a persistent box, if bridge
    /// accounting applies to this box on this thread.
    fn managed_object(&self, slot: &ValueBox) -> Option<ObjectRef> {
        let Variant::Object(object) = slot.value() else {
            return None;
        };

        // Residency first: a transient box must never reach the registry
        if !is_heap_resident(slot.address(), self.affinity.stack_base()) {
            return None;
        }

        if !self.affinity.is_event_thread() || !self.registry.contains(object.object_id()) {
            return None;
        }

        Some(Arc::clone(object))
    }
}

impl VariantHandler for HookedHandler {
    fn construct(&self, slot: &mut ValueBox, value: Variant) {
        self.original.construct(slot, value);

        if let Some(object) = self.managed_object(slot) {
            object.add_ref(RefKind::Variant);
            object.try_gc_lock();
            self.counters.update(CounterId::VariantCount, 1);
        }
    }

    fn clear(&self, slot: &mut ValueBox) {
        if let Some(object) = self.managed_object(slot) {
            object.release_ref(RefKind::Variant);
            self.counters.update(CounterId::VariantCount, -1);
        }

        self.original.clear(slot);
    }
}
