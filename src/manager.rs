//! Event loop orchestrator.
//!
//! The [`Manager`] is the explicit context object every other part of the
//! bridge reaches through. It owns the counters, the object registry and the
//! value-box handler table, and coordinates starting, leasing, stopping and
//! shutting down the native event loop across threads.
//!
//! ## Loop states
//!
//! ```text
//!            run                Started              last release
//!  Stopped ───────▶ Starting ───────────▶ Running ───────────────▶ Stopping
//!     ▲                                                                │ Stop
//!     │              dispatch returned                                 ▼
//!     └──────────────────────────────────────────────────────────── Quitting
//!
//!  Stopped ── shutdown (on the loop thread) ──▶ Shutdown (terminal)
//! ```
//!
//! Every transition happens under one mutex; threads waiting for a start in
//! progress sleep on the paired condition variable.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use crate::config::{BridgeConfig, GlobalFlag, GlobalFlags};
use crate::counters::{CounterBank, CounterId};
use crate::engine::{DefaultEngineFactory, EngineFactory, EngineId};
use crate::event::{EventKind, LoopEvent, Priority};
use crate::event_loop::{self, Dispatcher, LoopCallbacks, LoopOwner, ToolkitOptions};
use crate::gc::ClassDefinition;
use crate::hook::LoopAffinity;
use crate::host::{HostCallback, HostRuntime, StablePtr};
use crate::registry::{ObjectId, ObjectRegistry};
use crate::status::EventLoopError;
use crate::toolkit::HandlerTable;

/// Where the native event loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Not dispatching; a run may start
    Stopped,
    /// Dispatch entered, `Started` not yet handled
    Starting,
    /// Started handled, at least one lease held
    Running,
    /// Last lease released, `Stop` posted
    Stopping,
    /// `Stop` handled, dispatch unwinding
    Quitting,
    /// Owner destroyed; no further runs
    Shutdown,
}

impl LoopState {
    /// Whether a run is in progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LoopState::Starting | LoopState::Running | LoopState::Stopping | LoopState::Quitting
        )
    }
}

pub(crate) struct ManagerState {
    pub(crate) loop_state: LoopState,
    pub(crate) leases: usize,
    pub(crate) owner: Option<Arc<LoopOwner>>,
    pub(crate) args: Vec<String>,
    pub(crate) flags: GlobalFlags,
}

pub struct Manager {
    host: Arc<dyn HostRuntime>,
    counters: Arc<CounterBank>,
    registry: Arc<ObjectRegistry>,
    affinity: Arc<LoopAffinity>,
    handlers: Arc<HandlerTable>,
    log_level: AtomicI32,
    debug_port: u16,
    state: Mutex<ManagerState>,
    transitions: Condvar,
    jobs_pending: AtomicBool,
    engine_factory: RwLock<Arc<dyn EngineFactory>>,
    active_engine: Mutex<Option<EngineId>>,
}

impl Manager {
    /// Create a manager configured from the environment.
    pub fn new<H: HostRuntime + 'static>(host: H) -> Arc<Self> {
        Self::with_config(host, BridgeConfig::from_env())
    }

    pub fn with_config<H: HostRuntime + 'static>(host: H, config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            host: Arc::new(host),
            counters: Arc::new(CounterBank::new()),
            registry: Arc::new(ObjectRegistry::new()),
            affinity: Arc::new(LoopAffinity::new()),
            handlers: Arc::new(HandlerTable::new()),
            log_level: AtomicI32::new(config.log_level),
            debug_port: config.debug_port,
            state: Mutex::new(ManagerState {
                loop_state: LoopState::Stopped,
                leases: 0,
                owner: None,
                args: config.args,
                flags: GlobalFlags::default(),
            }),
            transitions: Condvar::new(),
            jobs_pending: AtomicBool::new(false),
            engine_factory: RwLock::new(Arc::new(DefaultEngineFactory)),
            active_engine: Mutex::new(None),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("manager state poisoned")
    }

    pub fn counters(&self) -> &Arc<CounterBank> {
        &self.counters
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub(crate) fn affinity(&self) -> &Arc<LoopAffinity> {
        &self.affinity
    }

    /// The toolkit's value-box handler table.
    pub fn variant_handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    pub fn debug_port(&self) -> u16 {
        self.debug_port
    }

    // ---- diagnostics ----

    pub fn set_log_level(&self, level: i32) {
        self.log_level.store(level, Ordering::Relaxed);
    }

    pub fn log_level(&self) -> i32 {
        self.log_level.load(Ordering::Relaxed)
    }

    /// Whether messages of level `ll` are enabled.
    pub fn check_log_level(&self, ll: i32) -> bool {
        self.log_level() >= ll
    }

    /// Write every counter to stderr.
    pub fn dump_counters(&self) {
        let stderr = std::io::stderr();
        if let Err(e) = self.counters.dump(&mut stderr.lock()) {
            log::warn!("Failed to dump counters: {}", e);
        }
    }

    // ---- host memory ----

    pub fn free_callback(&self, callback: HostCallback) {
        self.host.free_callback(callback);
    }

    pub fn free_stable(&self, ptr: StablePtr) {
        self.host.free_stable(ptr);
    }

    // ---- toolkit initialisation parameters ----

    /// Replace the toolkit argument vector.
    ///
    /// Fails once the loop owner exists or after shutdown.
    pub fn set_args(&self, args: Vec<String>) -> bool {
        let mut state = self.lock_state();
        if state.owner.is_some() || state.loop_state == LoopState::Shutdown {
            return false;
        }

        state.args = args;
        true
    }

    /// The argument vector, minus anything the toolkit consumed.
    pub fn args(&self) -> Vec<String> {
        self.lock_state().args.clone()
    }

    pub fn args_count(&self) -> usize {
        self.lock_state().args.len()
    }

    pub fn set_flag(&self, flag: GlobalFlag, value: bool) -> bool {
        let mut state = self.lock_state();
        if state.owner.is_some() || state.loop_state == LoopState::Shutdown {
            return false;
        }

        state.flags.set(flag, value);
        true
    }

    pub fn flag(&self, flag: GlobalFlag) -> bool {
        self.lock_state().flags.get(flag)
    }

    // ---- object registry ----

    pub fn register_object(&self, id: ObjectId) {
        self.registry.register(id);
        self.counters.update(CounterId::NativeObjectCount, 1);
    }

    pub fn unregister_object(&self, id: ObjectId) {
        self.registry.unregister(id);
        self.counters.update(CounterId::NativeObjectCount, -1);
    }

    /// Whether the caller is on the thread that owns the event loop.
    pub fn is_event_thread(&self) -> bool {
        self.affinity.is_event_thread()
    }

    // ---- event loop ----

    pub fn loop_state(&self) -> LoopState {
        self.lock_state().loop_state
    }

    pub fn lease_count(&self) -> usize {
        self.lock_state().leases
    }

    pub fn has_owner(&self) -> bool {
        self.lock_state().owner.is_some()
    }

    /// How many events of `kind` are waiting to be dispatched.
    pub fn posted_count(&self, kind: EventKind) -> usize {
        let owner = self.lock_state().owner.clone();
        owner.map_or(0, |owner| owner.queue().count(kind))
    }

    /// Donate the calling thread to the native event loop.
    ///
    /// Blocks until the loop stops. `start` runs once the loop is up, `jobs`
    /// whenever the host has notified pending work, and `idle` (if given) on
    /// every pass through an empty queue. All three are handed back to the
    /// host before this returns, on every path.
    pub fn run_event_loop(
        self: &Arc<Self>,
        start: HostCallback,
        jobs: HostCallback,
        idle: Option<HostCallback>,
    ) -> Result<(), EventLoopError> {
        let stack_marker = 0u8;
        let stack_base = std::hint::black_box(&stack_marker) as *const u8 as usize;
        let callbacks = LoopCallbacks::new(Arc::clone(&self.host), start, jobs, idle);

        let owner = {
            let mut state = self.lock_state();
            let current = std::thread::current().id();

            if state.loop_state.is_active() {
                return Err(EventLoopError::AlreadyRunning);
            }
            if state.loop_state == LoopState::Shutdown {
                return Err(EventLoopError::PostShutdown);
            }
            if let Some(owner) = &state.owner
                && owner.thread() != current
            {
                return Err(EventLoopError::WrongThread);
            }
            if !is_primordial_thread() {
                return Err(EventLoopError::WrongThread);
            }

            if callbacks.has_idle() {
                log::warn!("Idle callback armed: the CPU cannot idle while the loop runs");
            }

            let owner = match state.owner.clone() {
                Some(owner) => owner,
                None => {
                    let owner = Arc::new(LoopOwner::new(self, &mut state));
                    state.owner = Some(Arc::clone(&owner));
                    owner
                }
            };

            self.affinity.bind(current);
            self.affinity.set_stack_base(stack_base);
            state.loop_state = LoopState::Starting;
            owner.queue().post(LoopEvent::Started, Priority::High);
            owner
        };

        if self.check_log_level(1) {
            log::info!("Entering event loop");
        }

        let mut dispatcher = Dispatcher::new(self, owner, callbacks);
        let code = loop {
            let code = event_loop::exec(&mut dispatcher);
            dispatcher.destroy_children();

            if code != 0 || self.loop_state() == LoopState::Quitting {
                break code;
            }

            // A platform quit (Cmd-Q) can end dispatch before Stop arrives
            log::warn!("Event loop exited before it was stopped, re-entering");
        };

        let owner = Arc::clone(dispatcher.owner());
        let deferred = owner.run_deferred_deletes();
        if deferred > 0 {
            log::debug!("Ran {} deferred deletes after the loop exited", deferred);
        }
        drop(dispatcher);

        {
            let mut state = self.lock_state();
            if code != 0 {
                for kind in [EventKind::Started, EventKind::Stop, EventKind::PendingJobs] {
                    owner.queue().remove_posted(kind);
                }
            }

            if let Some(stale) = owner.queue().clear_exit() {
                log::debug!("Discarding exit request {} made after dispatch ended", stale);
            }

            state.loop_state = LoopState::Stopped;
            state.leases = 0;
            self.jobs_pending.store(false, Ordering::Release);
            self.transitions.notify_all();
        }

        // Keep the recorded base valid for the whole run
        std::hint::black_box(&stack_marker);

        if self.check_log_level(1) {
            log::info!("Left event loop with code {}", code);
        }

        if code == 0 {
            Ok(())
        } else {
            Err(EventLoopError::Abnormal(code))
        }
    }

    /// Take a lease on the running loop.
    ///
    /// Waits out a start in progress when called from another thread.
    pub fn require_event_loop(&self) -> Result<(), EventLoopError> {
        let mut state = self.lock_state();

        if !self.is_event_thread() {
            state = self
                .transitions
                .wait_while(state, |s| s.loop_state == LoopState::Starting)
                .expect("manager state poisoned");
        }

        if state.loop_state == LoopState::Running && state.leases > 0 {
            state.leases += 1;
            Ok(())
        } else {
            Err(EventLoopError::NotRunning)
        }
    }

    /// Give back a lease. The last release stops the loop.
    pub fn release_event_loop(&self) {
        let owner = {
            let mut state = self.lock_state();
            if state.leases == 0 {
                log::warn!("Event loop released without a lease held");
                return;
            }

            state.leases -= 1;
            if state.leases > 0 {
                return;
            }

            state.loop_state = LoopState::Stopping;
            state.owner.clone()
        };

        if let Some(owner) = owner {
            owner.queue().post(LoopEvent::Stop, Priority::Low);
        }
    }

    /// Ask the loop to run the jobs callback.
    ///
    /// Notifications arriving before the callback runs share one event.
    pub fn notify_pending_jobs(&self) {
        let owner = {
            let state = self.lock_state();
            if state.leases == 0 || self.jobs_pending.swap(true, Ordering::AcqRel) {
                return;
            }
            state.owner.clone()
        };

        if let Some(owner) = owner {
            owner.queue().post(LoopEvent::PendingJobs, Priority::Normal);
        }
    }

    /// Destroy the loop owner for good.
    pub fn shutdown(&self) -> Result<(), EventLoopError> {
        let owner = {
            let mut state = self.lock_state();

            if state.loop_state.is_active() {
                return Err(EventLoopError::AlreadyRunning);
            } else if self.is_event_thread() {
                state.loop_state = LoopState::Shutdown;
                self.affinity.unbind();
                state.owner.take()
            } else if state.owner.is_some() {
                return Err(EventLoopError::WrongThread);
            } else {
                return Ok(());
            }
        };

        if self.check_log_level(1) {
            log::info!("Deleting loop owner");
        }
        drop(owner);
        Ok(())
    }

    /// Post `event` to the loop owner at its usual priority.
    ///
    /// Returns false (and disposes of the event) when there is no owner.
    pub fn post_event(&self, event: LoopEvent) -> bool {
        let priority = event.default_priority();
        self.post_event_with_priority(event, priority)
    }

    pub fn post_event_with_priority(&self, event: LoopEvent, priority: Priority) -> bool {
        let owner = self.lock_state().owner.clone();

        match owner {
            Some(owner) => {
                owner.queue().post(event, priority);
                true
            }
            None => {
                if let LoopEvent::CreateEngine(request) = event {
                    self.free_callback(request.stop_cb);
                }
                false
            }
        }
    }

    /// Make the native loop return `code`, as a platform quit would.
    ///
    /// Refused unless dispatch is in progress: once Stop has been handled
    /// nothing would consume the request.
    pub fn interrupt_event_loop(&self, code: i32) -> bool {
        let state = self.lock_state();
        let dispatching = matches!(
            state.loop_state,
            LoopState::Starting | LoopState::Running | LoopState::Stopping
        );
        match &state.owner {
            Some(owner) if dispatching => {
                owner.queue().exit(code);
                true
            }
            _ => false,
        }
    }

    /// Destroy `class` once the toolkit can no longer reference it.
    pub fn zombify(&self, class: Box<dyn ClassDefinition>) {
        let owner = self.lock_state().owner.clone();

        match owner {
            Some(owner) => owner.zombies().defer(class),
            None => drop(class),
        }
    }

    pub fn set_window_icon<P: AsRef<Path>>(&self, path: P) -> bool {
        let owner = self.lock_state().owner.clone();
        owner.is_some_and(|owner| owner.set_window_icon(path.as_ref()))
    }

    pub fn window_icon(&self) -> Option<PathBuf> {
        let owner = self.lock_state().owner.clone();
        owner.and_then(|owner| owner.window_icon())
    }

    /// Options the toolkit recognised in the argument vector.
    pub fn toolkit_options(&self) -> Option<ToolkitOptions> {
        let owner = self.lock_state().owner.clone();
        owner.map(|owner| owner.options().clone())
    }

    /// Address of the debug listener, when one is serving.
    pub fn debug_server_addr(&self) -> Option<SocketAddr> {
        let owner = self.lock_state().owner.clone();
        owner.and_then(|owner| owner.debug_server().map(|server| server.local_addr()))
    }

    // ---- engines ----

    pub fn set_engine_factory(&self, factory: Arc<dyn EngineFactory>) {
        *self.engine_factory.write().expect("engine factory poisoned") = factory;
    }

    pub fn engine_factory(&self) -> Arc<dyn EngineFactory> {
        Arc::clone(&self.engine_factory.read().expect("engine factory poisoned"))
    }

    /// Mark `engine` as the active one, or clear the slot with `None`.
    ///
    /// # Panics
    ///
    /// If an engine is already active and `engine` is `Some`.
    pub fn set_active_engine(&self, engine: Option<EngineId>) {
        let mut active = self.active_engine.lock().expect("active engine poisoned");
        assert!(
            active.is_none() || engine.is_none(),
            "engine {:?} activated while {:?} is active",
            engine,
            *active
        );
        *active = engine;
    }

    pub fn active_engine(&self) -> Option<EngineId> {
        *self.active_engine.lock().expect("active engine poisoned")
    }

    // ---- event handlers (loop thread) ----

    pub(crate) fn handle_started(&self) {
        let mut state = self.lock_state();
        state.loop_state = LoopState::Running;
        state.leases = 1;
        self.transitions.notify_all();
    }

    pub(crate) fn handle_stop(&self) {
        self.lock_state().loop_state = LoopState::Quitting;
    }

    pub(crate) fn take_jobs_pending(&self) -> bool {
        self.jobs_pending.swap(false, Ordering::AcqRel)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if self.check_log_level(1) {
            self.dump_counters();
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Manager")
            .field("loop_state", &state.loop_state)
            .field("leases", &state.leases)
            .field("owner", &state.owner)
            .field("args", &state.args)
            .field("log_level", &self.log_level())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Whether the caller may host the toolkit's event loop.
///
/// macOS only dispatches UI events on the process's first thread.
#[cfg(target_os = "macos")]
fn is_primordial_thread() -> bool {
    // SAFETY: no preconditions
    unsafe { libc::pthread_main_np() != 0 }
}

#[cfg(not(target_os = "macos"))]
fn is_primordial_thread() -> bool {
    true
}
