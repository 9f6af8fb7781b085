//! Fixed-capacity table of core records, indexed by logical processor number.
//!
//! Built once during bring-up as cores report in, read-heavy afterwards.
//! Index 0 is always the primary.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::cpu::{CoreFlags, CoreRecord, ProcessorIdentity};

pub struct CoreRegistry {
    records: Vec<CoreRecord>,
    /// Logical indices handed out so far, including claims that never
    /// registered.
    count: AtomicUsize,
    /// Records actually filled by `register_core`.
    registered: AtomicUsize,
    /// Cores flagged ENABLED, primary included. Written by the primary only.
    enabled: AtomicUsize,
}

impl CoreRegistry {
    /// Allocate `capacity` empty records.
    pub fn new(capacity: usize, relax: fn()) -> Self {
        Self {
            records: (0..capacity).map(|_| CoreRecord::new(relax)).collect(),
            count: AtomicUsize::new(0),
            registered: AtomicUsize::new(0),
            enabled: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Hand out the next free logical index, if any remain.
    pub fn claim_index(&self) -> Option<usize> {
        let capacity = self.capacity();
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < capacity).then_some(count + 1)
            })
            .ok()
    }

    /// Fill the record at `index` for the calling core.
    ///
    /// Initial flags are ENABLED | HEALTHY (plus PRIMARY); the primary starts
    /// Busy, everyone else Idle.
    ///
    /// # Panics
    /// If `index` is beyond capacity or was already registered.
    pub fn register_core(&self, is_primary: bool, index: usize, identity: ProcessorIdentity) {
        let record = &self.records[index];
        record.register(identity, is_primary);
        self.count.fetch_max(index + 1, Ordering::AcqRel);
        self.registered.fetch_add(1, Ordering::AcqRel);
        self.enabled.fetch_add(1, Ordering::AcqRel);
    }

    /// Registered record at `index`.
    pub fn get(&self, index: usize) -> Option<&CoreRecord> {
        if index >= self.len() {
            return None;
        }
        self.records.get(index).filter(|record| record.is_registered())
    }

    /// Number of logical indices in use.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(total, enabled)` core counts. A claimed index whose core never
    /// finished registering is not counted.
    pub fn count(&self) -> (usize, usize) {
        (
            self.registered.load(Ordering::Acquire),
            self.enabled.load(Ordering::Acquire),
        )
    }

    pub(crate) fn note_enabled(&self) {
        self.enabled.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_disabled(&self) {
        self.enabled.fetch_sub(1, Ordering::AcqRel);
    }

    /// All registered records in ascending logical order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &CoreRecord)> + '_ {
        self.records[..self.len().min(self.capacity())]
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_registered())
    }

    /// Enabled secondaries in ascending logical order. This is the
    /// execution order contract of single-threaded dispatch.
    pub fn enabled_secondaries(&self) -> impl Iterator<Item = (usize, &CoreRecord)> + '_ {
        self.iter().filter(|(_, record)| {
            !record.test_flags(CoreFlags::PRIMARY) && record.test_flags(CoreFlags::ENABLED)
        })
    }

    /// Lowest-numbered secondary parked in Blocked, if any.
    pub fn next_blocked(&self) -> Option<(usize, &CoreRecord)> {
        self.iter().find(|(_, record)| {
            !record.test_flags(CoreFlags::PRIMARY) && record.state() == crate::cpu::CoreState::Blocked
        })
    }
}
