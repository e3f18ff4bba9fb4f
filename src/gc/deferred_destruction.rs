//! Deferred destruction queue for class definitions.
//!
//! ## Problem
//!
//! A class definition released by the host may still be referenced by live
//! engine state inside the toolkit (metaobjects, cached bindings). Destroying
//! it while the loop owner exists can leave the toolkit with dangling
//! pointers.
//!
//! ## Solution
//!
//! Queue such "zombie" classes and destroy them only when the loop owner
//! itself is torn down.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::gc::DeferredDestructionQueue;
//!
//! // Owned by the loop owner
//! let zombies = DeferredDestructionQueue::new();
//!
//! // From any thread
//! zombies.defer(class);
//!
//! // On owner teardown
//! zombies.process_all();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::counters::{CounterBank, CounterId};

/// A host-defined class whose metadata the toolkit may reference.
///
/// Implementations embed a [`ClassCounters`] so `ClassCount` tracks every
/// live definition, zombies included.
pub trait ClassDefinition: Send {
    fn name(&self) -> &str;
}

/// Counter bookkeeping for one class definition.
///
/// Takes the next `ClassSerial` and bumps `ClassCount` on creation; the
/// count drops again when the guard does.
#[derive(Debug)]
pub struct ClassCounters {
    counters: Arc<CounterBank>,
    serial: i32,
}

impl ClassCounters {
    pub fn new(counters: &Arc<CounterBank>) -> Self {
        let serial = counters.next_serial(CounterId::ClassSerial);
        counters.update(CounterId::ClassCount, 1);
        Self {
            counters: Arc::clone(counters),
            serial,
        }
    }

    pub fn serial(&self) -> i32 {
        self.serial
    }
}

impl Drop for ClassCounters {
    fn drop(&mut self) {
        self.counters.update(CounterId::ClassCount, -1);
    }
}

/// Queue of class definitions awaiting destruction.
pub struct DeferredDestructionQueue {
    /// Classes pending destruction
    queue: Mutex<VecDeque<Box<dyn ClassDefinition>>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for DeferredDestructionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredDestructionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Queue a class for destruction at owner teardown.
    ///
    /// Thread-safe.
    pub fn defer(&self, class: Box<dyn ClassDefinition>) {
        tracing::trace!("Deferring destruction of class {}", class.name());

        self.queue
            .lock()
            .expect("deferred destruction queue poisoned")
            .push_back(class);
        self.pending_count.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Destroy every queued class, returning how many were destroyed.
    pub fn process_all(&self) -> usize {
        // Fast path: nothing queued
        if !self.has_pending() {
            return 0;
        }

        let classes: VecDeque<Box<dyn ClassDefinition>> = {
            let mut queue = self
                .queue
                .lock()
                .expect("deferred destruction queue poisoned");
            std::mem::take(&mut *queue)
        };

        let count = classes.len();

        // Destructors run outside the queue lock
        drop(classes);

        self.pending_count.fetch_sub(count as u64, Ordering::Release);

        tracing::trace!("Destroyed {} deferred classes", count);
        count
    }
}

impl Drop for DeferredDestructionQueue {
    fn drop(&mut self) {
        self.process_all();
    }
}

impl std::fmt::Debug for DeferredDestructionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDestructionQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
