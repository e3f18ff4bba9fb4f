//! Event loop owner and dispatcher.
//!
//! The [`LoopOwner`] is the toolkit application object: created lazily by the
//! first successful run, reused by every later run and destroyed only by
//! shutdown. A [`Dispatcher`] lives for one run: it holds the callbacks the
//! host registered for that run and the engines created during it.
//!
//! Dispatch itself is the blocking [`exec`] call:
//!
//! 1. Wait on the posted event queue (or fire the idle callback if armed)
//! 2. Hand each event to [`EventLoopRuntime::process_event`]
//! 3. Return the exit code once the loop is asked to quit

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::Manager;
use crate::config::GlobalFlag;
use crate::debug_server::DebugServer;
use crate::engine::Engine;
use crate::event::{EventKind, LoopEvent};
use crate::gc::DeferredDestructionQueue;
use crate::hook::HookedHandler;
use crate::host::{HostCallback, HostRuntime};
use crate::manager::ManagerState;
use crate::toolkit::{Dispatch, HandlerTable, PostedEventQueue, VariantHandler};

/// Trait for types that can run the native event loop.
///
/// Implementors provide the queue to wait on and what to do with each event
/// and each idle tick.
pub trait EventLoopRuntime {
    fn queue(&self) -> &PostedEventQueue;

    /// Whether the zero-interval idle timer is armed.
    fn idle_armed(&self) -> bool;

    fn process_event(&mut self, event: LoopEvent);

    fn on_idle(&mut self);
}

/// Dispatch events until the loop is asked to exit, returning the exit code.
pub fn exec<R: EventLoopRuntime>(runtime: &mut R) -> i32 {
    loop {
        match runtime.queue().next(runtime.idle_armed()) {
            Dispatch::Event(event) => runtime.process_event(event),
            Dispatch::Idle => {
                runtime.on_idle();
                std::thread::yield_now();
            }
            Dispatch::Exit(code) => return code,
        }
    }
}

/// Toolkit options recognised (and removed) from the argument vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolkitOptions {
    pub platform: Option<String>,
    pub style: Option<String>,
    pub reverse_layout: bool,
}

impl ToolkitOptions {
    /// Strip the options the toolkit understands out of `args`.
    ///
    /// `args[0]` is the program name and is always kept. A trailing option
    /// that is missing its value is left in place.
    pub fn consume(args: &mut Vec<String>) -> Self {
        let mut options = Self::default();
        let mut remaining = Vec::with_capacity(args.len());
        let mut iter = std::mem::take(args).into_iter();

        if let Some(program) = iter.next() {
            remaining.push(program);
        }

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-platform" | "-style" => match iter.next() {
                    Some(value) if arg == "-platform" => options.platform = Some(value),
                    Some(value) => options.style = Some(value),
                    None => remaining.push(arg),
                },
                "-reverse" => options.reverse_layout = true,
                _ => remaining.push(arg),
            }
        }

        *args = remaining;
        options
    }
}

/// The toolkit application object.
pub struct LoopOwner {
    thread: ThreadId,
    queue: PostedEventQueue,
    handlers: Arc<HandlerTable>,
    original_handler: Arc<dyn VariantHandler>,
    zombies: DeferredDestructionQueue,
    options: ToolkitOptions,
    window_icon: Mutex<Option<PathBuf>>,
    debug_server: Option<DebugServer>,
}

impl LoopOwner {
    /// Initialise the toolkit on the calling thread.
    ///
    /// Consumes the argument vector and flags held in `state` and installs
    /// the value-box hook.
    pub(crate) fn new(manager: &Manager, state: &mut ManagerState) -> Self {
        let options = ToolkitOptions::consume(&mut state.args);

        let debug_server = if state.flags.get(GlobalFlag::EnableQmlDebug) {
            match DebugServer::start(manager.debug_port()) {
                Ok(server) => Some(server),
                Err(e) => {
                    log::warn!(
                        "Debug server could not listen on port {}: {}",
                        manager.debug_port(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let handlers = Arc::clone(manager.variant_handlers());
        let original_handler = handlers.current();
        let hooked = HookedHandler::new(
            Arc::clone(&original_handler),
            Arc::clone(manager.counters()),
            Arc::clone(manager.registry()),
            Arc::clone(manager.affinity()),
        );
        handlers.install(Arc::new(hooked));

        if manager.check_log_level(1) {
            log::info!("Created loop owner with {:?}", options);
        }

        Self {
            thread: std::thread::current().id(),
            queue: PostedEventQueue::new(),
            handlers,
            original_handler,
            zombies: DeferredDestructionQueue::new(),
            options,
            window_icon: Mutex::new(None),
            debug_server,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn queue(&self) -> &PostedEventQueue {
        &self.queue
    }

    pub fn zombies(&self) -> &DeferredDestructionQueue {
        &self.zombies
    }

    pub fn options(&self) -> &ToolkitOptions {
        &self.options
    }

    pub fn debug_server(&self) -> Option<&DebugServer> {
        self.debug_server.as_ref()
    }

    /// Set the application icon; fails if the file does not exist.
    pub fn set_window_icon(&self, path: &Path) -> bool {
        if !path.is_file() {
            log::warn!("Window icon {} not found", path.display());
            return false;
        }

        *self.window_icon.lock().expect("loop owner poisoned") = Some(path.to_path_buf());
        true
    }

    pub fn window_icon(&self) -> Option<PathBuf> {
        self.window_icon.lock().expect("loop owner poisoned").clone()
    }

    /// Run every queued GC-lock removal now.
    pub(crate) fn run_deferred_deletes(&self) -> usize {
        let pending = self.queue.take_posted(EventKind::DeferredDelete);
        let count = pending.len();

        for event in pending {
            if let LoopEvent::DeferredDelete(action) = event {
                action.process();
            }
        }

        count
    }
}

impl Drop for LoopOwner {
    fn drop(&mut self) {
        self.run_deferred_deletes();
        self.handlers.install(Arc::clone(&self.original_handler));

        let destroyed = self.zombies.process_all();
        if destroyed > 0 {
            log::debug!("Destroyed {} zombie classes with the loop owner", destroyed);
        }
    }
}

impl std::fmt::Debug for LoopOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopOwner")
            .field("thread", &self.thread)
            .field("queue", &self.queue)
            .field("zombies", &self.zombies.len())
            .field("options", &self.options)
            .field("debug_server", &self.debug_server)
            .finish()
    }
}

/// Callbacks registered for one run, handed back to the host when dropped.
pub(crate) struct LoopCallbacks {
    host: Arc<dyn HostRuntime>,
    start: Option<HostCallback>,
    jobs: Option<HostCallback>,
    idle: Option<HostCallback>,
}

impl LoopCallbacks {
    pub(crate) fn new(
        host: Arc<dyn HostRuntime>,
        start: HostCallback,
        jobs: HostCallback,
        idle: Option<HostCallback>,
    ) -> Self {
        Self {
            host,
            start: Some(start),
            jobs: Some(jobs),
            idle,
        }
    }

    pub(crate) fn has_idle(&self) -> bool {
        self.idle.is_some()
    }

    fn start(&self) {
        if let Some(cb) = &self.start {
            cb.call();
        }
    }

    fn jobs(&self) {
        if let Some(cb) = &self.jobs {
            cb.call();
        }
    }

    fn idle(&self) {
        if let Some(cb) = &self.idle {
            cb.call();
        }
    }
}

impl Drop for LoopCallbacks {
    fn drop(&mut self) {
        for cb in [self.start.take(), self.jobs.take(), self.idle.take()]
            .into_iter()
            .flatten()
        {
            self.host.free_callback(cb);
        }
    }
}

/// Per-run event handler state.
pub(crate) struct Dispatcher<'a> {
    manager: &'a Arc<Manager>,
    owner: Arc<LoopOwner>,
    callbacks: LoopCallbacks,
    children: Vec<Box<dyn Engine>>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        manager: &'a Arc<Manager>,
        owner: Arc<LoopOwner>,
        callbacks: LoopCallbacks,
    ) -> Self {
        Self {
            manager,
            owner,
            callbacks,
            children: Vec::new(),
        }
    }

    pub(crate) fn owner(&self) -> &Arc<LoopOwner> {
        &self.owner
    }

    /// Destroy every engine created during this run, newest last.
    pub(crate) fn destroy_children(&mut self) {
        if !self.children.is_empty() {
            log::debug!("Destroying {} engines", self.children.len());
        }

        for child in self.children.drain(..) {
            drop(child);
        }
    }
}

impl EventLoopRuntime for Dispatcher<'_> {
    fn queue(&self) -> &PostedEventQueue {
        self.owner.queue()
    }

    fn idle_armed(&self) -> bool {
        self.callbacks.has_idle()
    }

    fn process_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Started => {
                self.manager.handle_started();
                self.callbacks.start();
                self.callbacks.jobs();
            }
            LoopEvent::Stop => {
                self.manager.handle_stop();
                self.owner.queue().exit(0);
            }
            LoopEvent::PendingJobs => {
                self.manager.take_jobs_pending();
                self.callbacks.jobs();
            }
            LoopEvent::DeferredDelete(action) => {
                log::trace!("Processing deferred {}", action.label());
                action.process();
            }
            LoopEvent::CreateEngine(request) => {
                if request.proxy.is_dead() {
                    log::debug!("Engine proxy died before creation");
                    request.stop_cb.call();
                    self.manager.free_callback(request.stop_cb);
                } else {
                    let factory = self.manager.engine_factory();
                    let engine = factory.create(self.manager, request);
                    self.children.push(engine);
                }
            }
        }
    }

    fn on_idle(&mut self) {
        self.callbacks.idle();
    }
}

impl Drop for Dispatcher<'_> {
    fn drop(&mut self) {
        self.destroy_children();
    }
}
