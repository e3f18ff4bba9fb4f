#![allow(dead_code)]

use lifetime_bridge::engine::EngineProxy;
use lifetime_bridge::gc::{BridgedObject, RefKind};
use lifetime_bridge::{BridgeConfig, HostCallback, HostRuntime, Manager, ObjectId, StablePtr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Host that counts what the bridge hands back to it.
#[derive(Clone, Default)]
pub struct RecordingHost {
    pub freed_callbacks: Arc<AtomicUsize>,
    pub freed_stables: Arc<AtomicUsize>,
}

impl RecordingHost {
    pub fn callbacks_freed(&self) -> usize {
        self.freed_callbacks.load(Ordering::SeqCst)
    }

    pub fn stables_freed(&self) -> usize {
        self.freed_stables.load(Ordering::SeqCst)
    }
}

impl HostRuntime for RecordingHost {
    fn free_callback(&self, callback: HostCallback) {
        self.freed_callbacks.fetch_add(1, Ordering::SeqCst);
        drop(callback);
    }

    fn free_stable(&self, ptr: StablePtr) {
        if !ptr.is_null() {
            self.freed_stables.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn new_manager() -> (Arc<Manager>, RecordingHost) {
    new_manager_with(BridgeConfig::default())
}

pub fn new_manager_with(config: BridgeConfig) -> (Arc<Manager>, RecordingHost) {
    let host = RecordingHost::default();
    (Manager::with_config(host.clone(), config), host)
}

pub fn callback<F>(f: F) -> HostCallback
where
    F: Fn() + Send + Sync + 'static,
{
    HostCallback::new(f)
}

pub fn noop() -> HostCallback {
    HostCallback::new(|| {})
}

/// Callback that counts its invocations.
pub fn counting(hits: &Arc<AtomicUsize>) -> HostCallback {
    let hits = Arc::clone(hits);
    HostCallback::new(move || {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

/// Start callback that gives back the initial lease straight away.
pub fn release_on_start(manager: &Arc<Manager>) -> HostCallback {
    let manager = Arc::clone(manager);
    HostCallback::new(move || manager.release_event_loop())
}

/// Run one loop that stops as soon as it has started.
pub fn run_once(manager: &Arc<Manager>) {
    manager
        .run_event_loop(release_on_start(manager), noop(), None)
        .unwrap();
}

/// Leaked token usable as a host stable pointer.
pub fn stable_token() -> StablePtr {
    let token = Box::leak(Box::new(0u64));
    StablePtr::from_raw(token as *mut u64 as *mut std::ffi::c_void)
}

/// A bridged object that only counts references.
#[derive(Default)]
pub struct CountingObject {
    pub variant_refs: AtomicUsize,
    pub gc_locks: AtomicUsize,
}

impl BridgedObject for CountingObject {
    fn object_id(&self) -> ObjectId {
        ObjectId::of(self)
    }

    fn add_ref(&self, kind: RefKind) {
        if kind == RefKind::Variant {
            self.variant_refs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_ref(&self, kind: RefKind) {
        if kind == RefKind::Variant {
            self.variant_refs.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn try_gc_lock(&self) -> bool {
        self.gc_locks.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[derive(Default)]
pub struct TestEngineProxy {
    pub dead: AtomicBool,
}

impl TestEngineProxy {
    pub fn dead() -> Arc<Self> {
        Arc::new(Self {
            dead: AtomicBool::new(true),
        })
    }

    pub fn alive() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl EngineProxy for TestEngineProxy {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}
