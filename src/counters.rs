//! Diagnostic counters.
//!
//! Lock-free, updated from any thread. Read for diagnostics and to check
//! that lifetimes balance out (e.g. `VariantCount` back to zero).

use std::io::Write;
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of counters in the bank
pub const TOTAL_COUNTERS: usize = 8;

/// Class counters are kept by [`ClassCounters`](crate::gc::ClassCounters),
/// object counters by [`ObjectProxy`](crate::gc::ObjectProxy) and the
/// registry, engine counters by the engine shells.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterId {
    ClassCount = 0,
    ObjectCount = 1,
    NativeObjectCount = 2,
    VariantCount = 3,
    EngineCount = 4,
    ClassSerial = 5,
    ObjectSerial = 6,
    EngineSerial = 7,
}

impl CounterId {
    pub const ALL: [CounterId; TOTAL_COUNTERS] = [
        CounterId::ClassCount,
        CounterId::ObjectCount,
        CounterId::NativeObjectCount,
        CounterId::VariantCount,
        CounterId::EngineCount,
        CounterId::ClassSerial,
        CounterId::ObjectSerial,
        CounterId::EngineSerial,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CounterId::ClassCount => "ClassCount",
            CounterId::ObjectCount => "ObjectCount",
            CounterId::NativeObjectCount => "NativeObjectCount",
            CounterId::VariantCount => "VariantCount",
            CounterId::EngineCount => "EngineCount",
            CounterId::ClassSerial => "ClassSerial",
            CounterId::ObjectSerial => "ObjectSerial",
            CounterId::EngineSerial => "EngineSerial",
        }
    }
}

/// Fixed bank of atomic counters.
#[derive(Default)]
pub struct CounterBank {
    counters: [AtomicI32; TOTAL_COUNTERS],
}

impl CounterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` and return the value before the update.
    ///
    /// `update(id, 0)` reads the counter.
    #[inline]
    pub fn update(&self, id: CounterId, delta: i32) -> i32 {
        self.counters[id as usize].fetch_add(delta, Ordering::Relaxed)
    }

    #[inline]
    pub fn get(&self, id: CounterId) -> i32 {
        self.counters[id as usize].load(Ordering::Relaxed)
    }

    /// Next value of a serial generator. Serials start at 0 and never repeat.
    pub fn next_serial(&self, id: CounterId) -> i32 {
        debug_assert!(matches!(
            id,
            CounterId::ClassSerial | CounterId::ObjectSerial | CounterId::EngineSerial
        ));
        self.update(id, 1)
    }

    pub fn snapshot(&self) -> [(CounterId, i32); TOTAL_COUNTERS] {
        CounterId::ALL.map(|id| (id, self.get(id)))
    }

    /// Write one `Name = value.` line per counter.
    pub fn dump<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for (id, value) in self.snapshot() {
            writeln!(out, "lifetime-bridge: {} = {}.", id.name(), value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CounterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (id, value) in self.snapshot() {
            map.entry(&id.name(), &value);
        }
        map.finish()
    }
}
