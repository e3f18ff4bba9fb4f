//! The slice of the native toolkit the bridge talks to.
//!
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  PostedEventQueue            │     │  HandlerTable                │
//! │  ├── High / Normal / Low     │     │  ├── current VariantHandler  │
//! │  ├── exit(code)              │     │  └── construct / clear boxes │
//! │  └── blocking next()         │     └──────────────────────────────┘
//! └──────────────────────────────┘
//! ```
//!
//! Both are deliberately small: the bridge only depends on posting events
//! cross-thread, a blocking dispatch call that can be asked to return, and a
//! replaceable value-box handler.

mod queue;
mod variant;

pub use queue::{Dispatch, PostedEventQueue};
pub use variant::{
    DefaultHandler, HandlerTable, ObjectRef, ValueBox, Variant, VariantHandler, VariantType,
};
