//! Lifetime tracking for bridged objects and deferred destruction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HookedHandler (value-box construct / clear)                │
//! │  ├── heap-resident box holding a registered object          │
//! │  └── on the event loop thread                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BridgedObject / ObjectProxy                                │
//! │  ├── Handle and Variant reference counts                    │
//! │  ├── GC lock held while variant refs > 0                    │
//! │  └── Off-thread lock removal → LoopEvent::DeferredDelete    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeferredDestructionQueue                                   │
//! │  ├── Zombie class definitions                               │
//! │  └── Destroyed on loop owner teardown                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use lifetime_bridge::gc::ObjectProxy;
//! use lifetime_bridge::toolkit::Variant;
//!
//! // On the event loop thread
//! let proxy = ObjectProxy::new(&manager, host_object);
//! let slot = manager.variant_handlers().boxed(Variant::Object(proxy.clone()));
//! // proxy now holds one variant reference and a GC lock
//! drop(slot);
//! // released again
//! ```

mod deferred_destruction;
mod proxy;

pub use deferred_destruction::{ClassCounters, ClassDefinition, DeferredDestructionQueue};
pub use proxy::{BridgedObject, ObjectProxy, RefKind};
