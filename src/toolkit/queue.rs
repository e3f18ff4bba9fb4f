//! Posted event queue of the native loop.
//!
//! Three FIFO lanes, one per [`Priority`]. Any thread may post; only the
//! dispatching thread takes events out. An exit request makes the blocking
//! wait return even when events are still queued (they stay queued).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::event::{EventKind, LoopEvent, Priority};

/// What the dispatching thread should do next.
#[derive(Debug)]
pub enum Dispatch {
    Event(LoopEvent),
    /// The queue is empty and the zero-interval idle timer is armed
    Idle,
    /// The loop was asked to return with this exit code
    Exit(i32),
}

#[derive(Default)]
struct QueueInner {
    high: VecDeque<LoopEvent>,
    normal: VecDeque<LoopEvent>,
    low: VecDeque<LoopEvent>,
    exit_code: Option<i32>,
}

impl QueueInner {
    fn lane(&mut self, priority: Priority) -> &mut VecDeque<LoopEvent> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<LoopEvent> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

#[derive(Default)]
pub struct PostedEventQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl PostedEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, event: LoopEvent, priority: Priority) {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        log::trace!("Posting {:?} ({:?})", event.kind(), priority);
        inner.lane(priority).push_back(event);
        self.ready.notify_one();
    }

    /// Ask the dispatch call to return `code`.
    pub fn exit(&self, code: i32) {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        inner.exit_code = Some(code);
        self.ready.notify_one();
    }

    /// Forget an exit request nobody consumed, returning its code.
    pub fn clear_exit(&self) -> Option<i32> {
        self.inner.lock().expect("event queue poisoned").exit_code.take()
    }

    /// Take every queued event of `kind` out of the queue, oldest first
    /// within each priority class.
    pub fn take_posted(&self, kind: EventKind) -> Vec<LoopEvent> {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        let mut taken = Vec::new();

        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            let lane = inner.lane(priority);
            let (matching, kept): (VecDeque<_>, VecDeque<_>) =
                lane.drain(..).partition(|ev| ev.kind() == kind);
            *lane = kept;
            taken.extend(matching);
        }

        taken
    }

    /// Drop every queued event of `kind`, returning how many were removed.
    pub fn remove_posted(&self, kind: EventKind) -> usize {
        // Dropped outside the lock: payload destructors may post again
        self.take_posted(kind).len()
    }

    /// Block until there is something to do.
    pub fn next(&self, idle_armed: bool) -> Dispatch {
        let mut inner = self.inner.lock().expect("event queue poisoned");

        loop {
            if let Some(code) = inner.exit_code.take() {
                return Dispatch::Exit(code);
            }

            if let Some(event) = inner.pop() {
                return Dispatch::Event(event);
            }

            if idle_armed {
                return Dispatch::Idle;
            }

            inner = self.ready.wait(inner).expect("event queue poisoned");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("event queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: EventKind) -> usize {
        let inner = self.inner.lock().expect("event queue poisoned");
        inner
            .high
            .iter()
            .chain(inner.normal.iter())
            .chain(inner.low.iter())
            .filter(|ev| ev.kind() == kind)
            .count()
    }
}

impl std::fmt::Debug for PostedEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostedEventQueue")
            .field("pending", &self.len())
            .finish()
    }
}
