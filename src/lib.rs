pub mod config;
pub mod counters;
pub mod debug_server;
pub mod engine;
pub mod event;
pub mod event_loop;
pub mod ffi;
pub mod gc;
pub mod hook;
pub mod host;
pub mod manager;
pub mod registry;
pub mod status;
pub mod toolkit;

// Core API
pub use manager::{LoopState, Manager};
pub use status::{EventLoopError, EventLoopStatus};

pub use config::{BridgeConfig, GlobalFlag};
pub use counters::{CounterBank, CounterId};
pub use event::{EventKind, LoopEvent, Priority};
pub use host::{HostCallback, HostRuntime, NativeHost, StablePtr};
pub use registry::{ObjectId, ObjectRegistry};
