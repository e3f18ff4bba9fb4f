//! Registry of bridge-managed native objects.
//!
//! Membership decides whether the value-box hook touches an object's
//! reference counts. Registering twice or unregistering an unknown object
//! means lifetime bookkeeping has desynchronised; both panic.

use std::collections::HashSet;
use std::sync::RwLock;

/// Identity of a native object (its address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn of<T: ?Sized>(object: &T) -> Self {
        Self(object as *const T as *const () as usize)
    }

    pub fn from_raw(address: usize) -> Self {
        Self(address)
    }

    pub fn address(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Thread-safe set of registered object identities.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashSet<ObjectId>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// If `id` is already registered.
    pub fn register(&self, id: ObjectId) {
        let inserted = self
            .objects
            .write()
            .expect("object registry poisoned")
            .insert(id);
        assert!(inserted, "object {} registered twice", id);
    }

    /// # Panics
    ///
    /// If `id` was never registered.
    pub fn unregister(&self, id: ObjectId) {
        let removed = self
            .objects
            .write()
            .expect("object registry poisoned")
            .remove(&id);
        assert!(removed, "object {} unregistered but not registered", id);
    }

    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects
            .read()
            .expect("object registry poisoned")
            .contains(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("object registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("len", &self.len())
            .finish()
    }
}
