//! Custom events posted into the loop owner.
//!
//! The set is closed: every cross-thread request to the event loop thread is
//! one of these variants, carrying only what its handler needs.

use crate::engine::EngineRequest;

/// First event number available to user events (the toolkit reserves below).
pub const USER_EVENT_BASE: u16 = 1000;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started = USER_EVENT_BASE,
    Stop = USER_EVENT_BASE + 1,
    PendingJobs = USER_EVENT_BASE + 2,
    DeferredDelete = USER_EVENT_BASE + 3,
    CreateEngine = USER_EVENT_BASE + 4,
}

/// Delivery priority. FIFO within a class; higher classes drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A finalize action to run on the event loop thread.
pub struct DeferredAction {
    label: &'static str,
    action: Box<dyn FnOnce() + Send>,
}

impl DeferredAction {
    pub fn new<F>(label: &'static str, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            label,
            action: Box::new(action),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn process(self) {
        (self.action)()
    }
}

impl std::fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .finish()
    }
}

#[derive(Debug)]
pub enum LoopEvent {
    /// Dispatch has begun
    Started,
    /// The last lease was released
    Stop,
    /// The host has work queued for the jobs callback
    PendingJobs,
    /// Run a finalize action (GC-lock removal)
    DeferredDelete(DeferredAction),
    /// Build a new engine as a child of the owner
    CreateEngine(EngineRequest),
}

impl LoopEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LoopEvent::Started => EventKind::Started,
            LoopEvent::Stop => EventKind::Stop,
            LoopEvent::PendingJobs => EventKind::PendingJobs,
            LoopEvent::DeferredDelete(_) => EventKind::DeferredDelete,
            LoopEvent::CreateEngine(_) => EventKind::CreateEngine,
        }
    }

    /// Priority the bridge posts this event with.
    ///
    /// Started jumps ahead of queued work, Stop waits for it to drain.
    pub fn default_priority(&self) -> Priority {
        match self {
            LoopEvent::Started => Priority::High,
            LoopEvent::Stop => Priority::Low,
            _ => Priority::Normal,
        }
    }
}
