//! Host runtime boundary.
//!
//! The host hands the bridge callbacks and stable pointers it allocated with
//! its own memory manager; the bridge must give every one of them back.

use std::ffi::c_void;
use std::sync::Arc;

/// A host function pointer taking no arguments.
pub type ForeignFn = unsafe extern "C" fn();

/// An opaque host pointer pinned against the host collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StablePtr(*mut c_void);

// SAFETY: a stable pointer is an opaque token; the host only dereferences it
// through its own runtime, which is thread-safe for stable pointers.
unsafe impl Send for StablePtr {}
unsafe impl Sync for StablePtr {}

impl StablePtr {
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// A callback owned by the host runtime.
///
/// Invoked on the event loop thread. Either a Rust closure or a foreign
/// function pointer; the latter is returned to the host via
/// [`HostRuntime::free_callback`].
#[derive(Clone)]
pub struct HostCallback {
    call: Arc<dyn Fn() + Send + Sync>,
    foreign: Option<ForeignFn>,
}

impl HostCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(f),
            foreign: None,
        }
    }

    /// Wrap a host function pointer.
    ///
    /// # Safety
    ///
    /// `f` must stay callable until it is handed back through
    /// [`HostRuntime::free_callback`].
    pub unsafe fn foreign(f: ForeignFn) -> Self {
        Self {
            // SAFETY: guaranteed by the caller
            call: Arc::new(move || unsafe { f() }),
            foreign: Some(f),
        }
    }

    #[inline]
    pub fn call(&self) {
        (self.call)()
    }

    pub fn foreign_ptr(&self) -> Option<ForeignFn> {
        self.foreign
    }
}

impl std::fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCallback")
            .field("foreign", &self.foreign.is_some())
            .finish()
    }
}

/// Memory-manager hooks supplied by the host at initialisation.
pub trait HostRuntime: Send + Sync {
    /// Give a callback back to the host.
    fn free_callback(&self, callback: HostCallback);

    /// Give a stable pointer back to the host.
    fn free_stable(&self, ptr: StablePtr);
}

/// Host for pure Rust embedders: callbacks and stable pointers are simply dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHost;

impl HostRuntime for NativeHost {
    fn free_callback(&self, callback: HostCallback) {
        drop(callback);
    }

    fn free_stable(&self, _ptr: StablePtr) {}
}

/// Free function signature for host function pointers.
pub type FreeFunFn = unsafe extern "C" fn(ForeignFn);

/// Free function signature for host stable pointers.
pub type FreeStableFn = unsafe extern "C" fn(*mut c_void);

/// Host reached through C function pointers.
#[derive(Debug, Clone, Copy)]
pub struct ForeignHost {
    free_fun: FreeFunFn,
    free_stable: FreeStableFn,
}

impl ForeignHost {
    /// # Safety
    ///
    /// Both functions must be safe to call from any thread for the lifetime
    /// of the process.
    pub unsafe fn new(free_fun: FreeFunFn, free_stable: FreeStableFn) -> Self {
        Self {
            free_fun,
            free_stable,
        }
    }
}

impl HostRuntime for ForeignHost {
    fn free_callback(&self, callback: HostCallback) {
        if let Some(f) = callback.foreign_ptr() {
            // SAFETY: the pointer came from the host and is returned exactly once
            unsafe { (self.free_fun)(f) };
        }
    }

    fn free_stable(&self, ptr: StablePtr) {
        if !ptr.is_null() {
            // SAFETY: the pointer came from the host and is returned exactly once
            unsafe { (self.free_stable)(ptr.as_raw()) };
        }
    }
}
