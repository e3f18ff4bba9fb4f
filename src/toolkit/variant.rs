//! Type-erased value boxes and the handler table that constructs them.
//!
//! A [`ValueBox`] never moves between construct and clear: it is only ever
//! handled pinned, so the address a handler observes on construction is the
//! address it observes on clear.

use std::marker::PhantomPinned;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::gc::BridgedObject;

/// Shared pointer to a native object that may be bridge-managed.
pub type ObjectRef = Arc<dyn BridgedObject>;

/// Runtime-declared type of a boxed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantType {
    Invalid,
    Bool,
    Int,
    Double,
    String,
    ObjectStar,
}

/// A runtime value as the toolkit sees it.
#[derive(Clone, Default)]
pub enum Variant {
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Object(ObjectRef),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Invalid => VariantType::Invalid,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Double(_) => VariantType::Double,
            Variant::String(_) => VariantType::String,
            Variant::Object(_) => VariantType::ObjectStar,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Variant::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Invalid => write!(f, "Invalid"),
            Variant::Bool(v) => write!(f, "Bool({})", v),
            Variant::Int(v) => write!(f, "Int({})", v),
            Variant::Double(v) => write!(f, "Double({})", v),
            Variant::String(v) => write!(f, "String({:?})", v),
            Variant::Object(object) => write!(f, "Object({})", object.object_id()),
        }
    }
}

/// Construct/clear entry points of the toolkit's value-box implementation.
pub trait VariantHandler: Send + Sync {
    /// Store `value` into an empty box.
    fn construct(&self, slot: &mut ValueBox, value: Variant);

    /// Release whatever the box holds, leaving it `Invalid`.
    fn clear(&self, slot: &mut ValueBox);
}

/// The toolkit's stock handler.
#[derive(Debug, Default)]
pub struct DefaultHandler;

impl VariantHandler for DefaultHandler {
    fn construct(&self, slot: &mut ValueBox, value: Variant) {
        slot.value = value;
    }

    fn clear(&self, slot: &mut ValueBox) {
        slot.value = Variant::Invalid;
    }
}

/// Type-erased value container.
///
/// The handler that constructed the box also clears it, even if the table's
/// current handler has been replaced in between.
pub struct ValueBox {
    value: Variant,
    handler: Option<Arc<dyn VariantHandler>>,
    _pin: PhantomPinned,
}

impl ValueBox {
    /// An empty box. Construct into it once it is pinned in place.
    pub fn empty() -> Self {
        Self {
            value: Variant::Invalid,
            handler: None,
            _pin: PhantomPinned,
        }
    }

    pub fn value(&self) -> &Variant {
        &self.value
    }

    pub fn variant_type(&self) -> VariantType {
        self.value.variant_type()
    }

    /// Address of the box itself.
    #[inline]
    pub fn address(&self) -> usize {
        self as *const ValueBox as usize
    }

    pub fn is_constructed(&self) -> bool {
        self.handler.is_some()
    }

    fn release(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.clear(self);
        }
    }
}

impl Drop for ValueBox {
    fn drop(&mut self) {
        // Pinned values are dropped in place, so this is the constructed address
        self.release();
    }
}

impl std::fmt::Debug for ValueBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueBox")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("value", &self.value)
            .finish()
    }
}

/// Process-wide slot holding the current value-box handler.
pub struct HandlerTable {
    current: RwLock<Arc<dyn VariantHandler>>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(DefaultHandler)),
        }
    }

    pub fn current(&self) -> Arc<dyn VariantHandler> {
        Arc::clone(&self.current.read().expect("handler table poisoned"))
    }

    /// Replace the current handler, returning the one it replaces.
    pub fn install(&self, handler: Arc<dyn VariantHandler>) -> Arc<dyn VariantHandler> {
        let mut current = self.current.write().expect("handler table poisoned");
        std::mem::replace(&mut *current, handler)
    }

    /// Construct `value` into a pinned box, clearing previous contents first.
    pub fn construct(&self, slot: Pin<&mut ValueBox>, value: Variant) {
        // SAFETY: the box is modified in place and never moved out
        let slot = unsafe { slot.get_unchecked_mut() };
        slot.release();

        let handler = self.current();
        handler.construct(slot, value);
        slot.handler = Some(handler);
    }

    /// Clear a pinned box in place.
    pub fn clear(&self, slot: Pin<&mut ValueBox>) {
        // SAFETY: the box is modified in place and never moved out
        unsafe { slot.get_unchecked_mut() }.release();
    }

    /// Allocate a heap-resident box holding `value`.
    pub fn boxed(&self, value: Variant) -> Pin<Box<ValueBox>> {
        let mut slot = Box::pin(ValueBox::empty());
        self.construct(slot.as_mut(), value);
        slot
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable").finish_non_exhaustive()
    }
}
