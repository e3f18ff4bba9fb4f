//! Object proxies: the native side of a host object.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::Manager;
use crate::counters::CounterId;
use crate::event::{DeferredAction, LoopEvent};
use crate::host::StablePtr;
use crate::registry::ObjectId;

/// Who holds a reference to a bridged object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// A host-side handle
    Handle,
    /// A persistent toolkit value box
    Variant,
}

/// A native object whose lifetime the bridge accounts for.
///
/// Implemented by object wrappers; the value-box hook only calls these on the
/// event loop thread.
pub trait BridgedObject: Send + Sync {
    /// Identity used for registry membership.
    fn object_id(&self) -> ObjectId;

    fn add_ref(&self, kind: RefKind);

    fn release_ref(&self, kind: RefKind);

    /// Pin the host object against collection while the toolkit holds it.
    ///
    /// Returns `true` if this call acquired the lock.
    fn try_gc_lock(&self) -> bool;
}

/// Reference-counting proxy for a host object.
///
/// Registers itself with the manager on creation and unregisters on drop.
/// While at least one persistent value box refers to it, the proxy holds a GC
/// lock on the host object. Removing that lock off the event loop thread is
/// deferred to the loop via [`LoopEvent::DeferredDelete`].
pub struct ObjectProxy {
    manager: Arc<Manager>,
    this: Weak<ObjectProxy>,
    serial: i32,
    host_object: Mutex<Option<StablePtr>>,
    handle_refs: AtomicUsize,
    variant_refs: AtomicUsize,
    gc_locked: AtomicBool,
}

impl ObjectProxy {
    pub fn new(manager: &Arc<Manager>, host_object: StablePtr) -> Arc<Self> {
        let counters = manager.counters();
        counters.update(CounterId::ObjectCount, 1);
        let serial = counters.next_serial(CounterId::ObjectSerial);

        let proxy = Arc::new_cyclic(|this| Self {
            manager: Arc::clone(manager),
            this: this.clone(),
            serial,
            host_object: Mutex::new((!host_object.is_null()).then_some(host_object)),
            handle_refs: AtomicUsize::new(0),
            variant_refs: AtomicUsize::new(0),
            gc_locked: AtomicBool::new(false),
        });

        manager.register_object(proxy.object_id());
        tracing::trace!("Created object proxy #{} at {}", serial, proxy.object_id());
        proxy
    }

    pub fn serial(&self) -> i32 {
        self.serial
    }

    pub fn ref_count(&self, kind: RefKind) -> usize {
        self.counter(kind).load(Ordering::Acquire)
    }

    pub fn is_gc_locked(&self) -> bool {
        self.gc_locked.load(Ordering::Acquire)
    }

    fn counter(&self, kind: RefKind) -> &AtomicUsize {
        match kind {
            RefKind::Handle => &self.handle_refs,
            RefKind::Variant => &self.variant_refs,
        }
    }

    /// Drop the GC lock unless a variant reference was taken again meanwhile.
    fn remove_gc_lock(&self) {
        if self.variant_refs.load(Ordering::Acquire) > 0 {
            return;
        }

        if self.gc_locked.swap(false, Ordering::AcqRel) {
            tracing::trace!("Removed GC lock on object proxy #{}", self.serial);
        }
    }

    fn request_gc_lock_removal(&self) {
        if self.manager.is_event_thread() {
            self.remove_gc_lock();
            return;
        }

        let this = self.this.clone();
        let action = DeferredAction::new("remove-gc-lock", move || {
            if let Some(proxy) = this.upgrade() {
                proxy.remove_gc_lock();
            }
        });

        if !self.manager.post_event(LoopEvent::DeferredDelete(action)) {
            // No loop to defer to
            self.remove_gc_lock();
        }
    }
}

impl BridgedObject for ObjectProxy {
    fn object_id(&self) -> ObjectId {
        ObjectId::of(self)
    }

    fn add_ref(&self, kind: RefKind) {
        self.counter(kind).fetch_add(1, Ordering::AcqRel);
    }

    fn release_ref(&self, kind: RefKind) {
        let previous = self.counter(kind).fetch_sub(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "object proxy #{} released a {:?} reference it did not hold",
            self.serial,
            kind
        );

        if kind == RefKind::Variant && previous == 1 && self.is_gc_locked() {
            self.request_gc_lock_removal();
        }
    }

    fn try_gc_lock(&self) -> bool {
        let has_host_object = self
            .host_object
            .lock()
            .expect("object proxy poisoned")
            .is_some();

        if !has_host_object {
            return false;
        }

        let acquired = !self.gc_locked.swap(true, Ordering::AcqRel);
        if acquired {
            tracing::trace!("Acquired GC lock on object proxy #{}", self.serial);
        }
        acquired
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        self.manager.unregister_object(self.object_id());

        let host_object = self
            .host_object
            .get_mut()
            .map(|slot| slot.take())
            .unwrap_or(None);
        if let Some(ptr) = host_object {
            self.manager.free_stable(ptr);
        }

        self.manager.counters().update(CounterId::ObjectCount, -1);
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("serial", &self.serial)
            .field("handle_refs", &self.ref_count(RefKind::Handle))
            .field("variant_refs", &self.ref_count(RefKind::Variant))
            .field("gc_locked", &self.is_gc_locked())
            .finish()
    }
}
