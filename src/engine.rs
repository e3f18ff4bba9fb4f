//! Engine boundary.
//!
//! Engines are built on the event loop thread in response to
//! [`LoopEvent::CreateEngine`](crate::event::LoopEvent::CreateEngine) and live
//! as children of the loop owner until dispatch returns.

use std::sync::Arc;

use crate::Manager;
use crate::counters::CounterId;
use crate::host::HostCallback;
use crate::toolkit::ObjectRef;

/// Identity of an engine (its serial number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(pub i32);

/// Host-side handle of a requested engine.
pub trait EngineProxy: Send + Sync {
    /// `true` once the host has given up on this engine.
    fn is_dead(&self) -> bool;
}

/// Construction parameters for an engine.
#[derive(Clone, Default)]
pub struct EngineParams {
    pub context_object: Option<ObjectRef>,
    pub init_url: String,
    pub import_paths: Vec<String>,
    pub plugin_paths: Vec<String>,
}

impl std::fmt::Debug for EngineParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineParams")
            .field("context_object", &self.context_object.as_ref().map(|o| o.object_id()))
            .field("init_url", &self.init_url)
            .field("import_paths", &self.import_paths)
            .field("plugin_paths", &self.plugin_paths)
            .finish()
    }
}

/// Payload of a `CreateEngine` event.
pub struct EngineRequest {
    pub proxy: Arc<dyn EngineProxy>,
    pub params: EngineParams,
    /// Invoked when the engine stops (or never starts)
    pub stop_cb: HostCallback,
}

impl std::fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRequest")
            .field("dead", &self.proxy.is_dead())
            .field("params", &self.params)
            .finish()
    }
}

/// A live engine owned by the loop owner.
pub trait Engine: Send {
    fn id(&self) -> EngineId;
}

/// Builds engines on the event loop thread.
pub trait EngineFactory: Send + Sync {
    fn create(&self, manager: &Arc<Manager>, request: EngineRequest) -> Box<dyn Engine>;
}

/// Factory producing [`EngineShell`]s.
#[derive(Debug, Default)]
pub struct DefaultEngineFactory;

impl EngineFactory for DefaultEngineFactory {
    fn create(&self, manager: &Arc<Manager>, request: EngineRequest) -> Box<dyn Engine> {
        Box::new(EngineShell::new(manager, request))
    }
}

/// Minimal engine: accounts for itself and fires its stop callback on drop.
pub struct EngineShell {
    manager: Arc<Manager>,
    id: EngineId,
    params: EngineParams,
    stop_cb: Option<HostCallback>,
}

impl EngineShell {
    pub fn new(manager: &Arc<Manager>, request: EngineRequest) -> Self {
        let counters = manager.counters();
        counters.update(CounterId::EngineCount, 1);
        let id = EngineId(counters.next_serial(CounterId::EngineSerial));

        log::debug!("Created engine {:?} for {:?}", id, request.params.init_url);

        Self {
            manager: Arc::clone(manager),
            id,
            params: request.params,
            stop_cb: Some(request.stop_cb),
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }
}

impl Engine for EngineShell {
    fn id(&self) -> EngineId {
        self.id
    }
}

impl Drop for EngineShell {
    fn drop(&mut self) {
        if self.manager.active_engine() == Some(self.id) {
            self.manager.set_active_engine(None);
        }

        if let Some(stop_cb) = self.stop_cb.take() {
            stop_cb.call();
            self.manager.free_callback(stop_cb);
        }

        self.manager.counters().update(CounterId::EngineCount, -1);
        log::debug!("Destroyed engine {:?}", self.id);
    }
}
