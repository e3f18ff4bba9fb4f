//! C entry points.
//!
//! The host initialises one process-wide [`Manager`] with [`bridge_init`] and
//! drives it through the functions below. Every entry point other than
//! `bridge_init` is a no-op (or reports a failure status) until then.

use std::ffi::{CStr, CString, c_char, c_int};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::Manager;
use crate::config::GlobalFlag;
use crate::host::{ForeignFn, ForeignHost, FreeFunFn, FreeStableFn, HostCallback};
use crate::status::EventLoopStatus;

static MANAGER: OnceLock<Arc<Manager>> = OnceLock::new();
static AT_EXIT_REGISTERED: AtomicBool = AtomicBool::new(false);

/// The process-wide manager, once initialised.
pub fn global_manager() -> Option<&'static Arc<Manager>> {
    MANAGER.get()
}

extern "C" fn dump_counters_at_exit() {
    if let Some(manager) = MANAGER.get()
        && manager.check_log_level(1)
    {
        manager.dump_counters();
    }
}

/// Set the log level, arming the exit-time counter dump the first time it
/// becomes positive.
fn apply_log_level(manager: &Manager, level: i32) {
    manager.set_log_level(level);

    if level > 0 && !AT_EXIT_REGISTERED.swap(true, Ordering::AcqRel) {
        // SAFETY: the handler only touches the static manager
        if unsafe { libc::atexit(dump_counters_at_exit) } != 0 {
            AT_EXIT_REGISTERED.store(false, Ordering::Release);
            log::warn!("Failed to register counter dump with atexit()");
        }
    }
}

/// Install the process-wide manager. Later calls are ignored.
///
/// # Safety
///
/// `free_fun` and `free_stable` must be callable from any thread for the rest
/// of the process lifetime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_init(free_fun: FreeFunFn, free_stable: FreeStableFn) {
    if MANAGER.get().is_some() {
        return;
    }

    // SAFETY: forwarded from the caller
    let host = unsafe { ForeignHost::new(free_fun, free_stable) };
    let candidate = Manager::new(host);
    let level = candidate.log_level();

    if MANAGER.set(candidate).is_ok() {
        if let Some(manager) = MANAGER.get() {
            apply_log_level(manager, level);
        }
    } else {
        log::debug!("Manager already installed, discarding duplicate");
    }
}

/// Replace the toolkit argument vector.
///
/// Returns 1 on success, 0 once the loop owner exists or after shutdown.
///
/// # Safety
///
/// `args` must point to a null-terminated array of NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_set_args(args: *const *const c_char) -> c_int {
    let Some(manager) = MANAGER.get() else {
        return 0;
    };
    if args.is_null() {
        return 0;
    }

    let mut list = Vec::new();
    let mut cursor = args;
    // SAFETY: the array is null-terminated per the contract above
    unsafe {
        while !(*cursor).is_null() {
            list.push(CStr::from_ptr(*cursor).to_string_lossy().into_owned());
            cursor = cursor.add(1);
        }
    }

    manager.set_args(list) as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_get_args_count() -> c_int {
    MANAGER
        .get()
        .map_or(0, |manager| manager.args_count() as c_int)
}

/// Write the argument vector into `out`.
///
/// Each string must be returned with [`bridge_free_string`].
///
/// # Safety
///
/// `out` must have room for [`bridge_get_args_count`] pointers.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_get_args(out: *mut *mut c_char) {
    let Some(manager) = MANAGER.get() else {
        return;
    };
    if out.is_null() {
        return;
    }

    for (i, arg) in manager.args().into_iter().enumerate() {
        // Interior NULs cannot cross the boundary
        let arg = CString::new(arg.replace('\0', "")).unwrap_or_default();
        // SAFETY: the caller sized `out` for every argument
        unsafe { *out.add(i) = arg.into_raw() };
    }
}

/// # Safety
///
/// `s` must come from [`bridge_get_args`] and not have been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: produced by CString::into_raw
        drop(unsafe { CString::from_raw(s) });
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_set_flag(flag: c_int, value: c_int) -> c_int {
    let (Some(manager), Ok(flag)) = (MANAGER.get(), GlobalFlag::try_from(flag)) else {
        return 0;
    };

    manager.set_flag(flag, value != 0) as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_get_flag(flag: c_int) -> c_int {
    let (Some(manager), Ok(flag)) = (MANAGER.get(), GlobalFlag::try_from(flag)) else {
        return 0;
    };

    manager.flag(flag) as c_int
}

/// Run the event loop on the calling thread. `idle` may be null.
///
/// # Safety
///
/// The callbacks must stay callable until the host's free function receives
/// them back.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_evloop_run(
    start: ForeignFn,
    jobs: ForeignFn,
    idle: Option<ForeignFn>,
) -> EventLoopStatus {
    // SAFETY: forwarded from the caller
    let (start, jobs, idle) = unsafe {
        (
            HostCallback::foreign(start),
            HostCallback::foreign(jobs),
            idle.map(|f| HostCallback::foreign(f)),
        )
    };

    match MANAGER.get() {
        Some(manager) => manager.run_event_loop(start, jobs, idle).into(),
        None => EventLoopStatus::OtherError,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_evloop_require() -> EventLoopStatus {
    match MANAGER.get() {
        Some(manager) => manager.require_event_loop().into(),
        None => EventLoopStatus::NotRunning,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_evloop_release() {
    if let Some(manager) = MANAGER.get() {
        manager.release_event_loop();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_evloop_notify_jobs() {
    if let Some(manager) = MANAGER.get() {
        manager.notify_pending_jobs();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_evloop_shutdown() -> EventLoopStatus {
    match MANAGER.get() {
        Some(manager) => manager.shutdown().into(),
        None => EventLoopStatus::Ok,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_set_debug_loglevel(level: c_int) {
    if let Some(manager) = MANAGER.get() {
        apply_log_level(manager, level);
    }
}

/// # Safety
///
/// `path` must be null or a NUL-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_set_window_icon(path: *const c_char) {
    let Some(manager) = MANAGER.get() else {
        return;
    };
    if path.is_null() {
        return;
    }

    // SAFETY: checked non-null above
    let path = unsafe { CStr::from_ptr(path) }.to_string_lossy();
    manager.set_window_icon(&*path);
}
