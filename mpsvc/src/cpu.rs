//! Per-core records and the state guard around them.
//!
//! Each logical processor owns one [`CoreRecord`]. Its identity is written
//! once during bring-up and read lock-free afterwards; everything mutable
//! (state, flags, assignment, deadline, completion sink) lives in a
//! [`CoreSlot`] behind the record's own spinlock. No two records share a lock.
//!
//! State machine:
//!
//! ```text
//! Idle --dispatch--> Ready --core--> Busy --returns--> Finished --harvest--> Idle
//! Ready --single-thread, not yet its turn--> Blocked --predecessor done--> Ready
//! any --deadline exceeded--> Idle   (forced; the running routine is abandoned)
//! ```
//!
//! The dispatcher and supervisor only perform `Idle -> Ready/Blocked`,
//! `Blocked -> Ready`, `Finished -> Idle` and the forced reset. `Ready -> Busy`
//! and `Busy -> Finished` are performed by the secondary itself.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::deadline::Deadline;
use crate::platform::WaitEvent;
use crate::sync::{SpinLock, SpinLockGuard};

/// Routine run on a secondary. Receives the caller's argument word.
pub type ApProcedure = fn(usize);

/// Lifecycle of one core with respect to dispatched work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Idle,
    Ready,
    Blocked,
    Busy,
    Finished,
}

bitflags! {
    /// Status flags, bit-compatible with `EFI_PROCESSOR_INFORMATION.StatusFlag`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoreFlags: u32 {
        const PRIMARY = 1 << 0;
        const ENABLED = 1 << 1;
        const HEALTHY = 1 << 2;
    }
}

/// Topology coordinates. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub package: u32,
    pub core: u32,
    pub thread: u32,
}

/// Immutable identity captured when the core registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorIdentity {
    pub processor_id: u32,
    pub location: Location,
}

/// Point-in-time copy of a record, as handed out by `processor_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub processor_id: u32,
    pub status_flag: CoreFlags,
    pub location: Location,
}

/// A routine plus its argument, installed on a core.
#[derive(Clone, Copy)]
pub struct Assignment {
    pub procedure: ApProcedure,
    pub argument: usize,
}

impl Assignment {
    pub fn new(procedure: ApProcedure, argument: usize) -> Self {
        Self { procedure, argument }
    }

    pub fn run(self) {
        (self.procedure)(self.argument)
    }
}

impl PartialEq for Assignment {
    fn eq(&self, other: &Self) -> bool {
        self.procedure as usize == other.procedure as usize && self.argument == other.argument
    }
}

impl Eq for Assignment {}

impl fmt::Debug for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assignment")
            .field("procedure", &(self.procedure as usize as *const ()))
            .field("argument", &format_args!("{:#x}", self.argument))
            .finish()
    }
}

/// Caller-owned "did it finish in time" flag for single-target dispatch.
///
/// Cloning shares the flag; the services keep one clone until the operation
/// completes.
#[derive(Debug, Clone, Default)]
pub struct FinishedFlag(Arc<AtomicBool>);

impl FinishedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, finished: bool) {
        self.0.store(finished, Ordering::Release);
    }
}

/// The mutable part of a record. Only reachable through the record lock.
#[derive(Debug, Clone)]
pub struct CoreSlot {
    pub flags: CoreFlags,
    pub state: CoreState,
    pub assignment: Option<Assignment>,
    pub deadline: Deadline,
    pub wait_event: Option<WaitEvent>,
    pub finished: Option<FinishedFlag>,
}

impl CoreSlot {
    const fn empty() -> Self {
        Self {
            flags: CoreFlags::empty(),
            state: CoreState::Idle,
            assignment: None,
            deadline: Deadline::NEVER,
            wait_event: None,
            finished: None,
        }
    }
}

/// Comparable view of a record's dispatch-relevant fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub flags: CoreFlags,
    pub state: CoreState,
    pub assignment: Option<Assignment>,
}

/// One logical processor.
pub struct CoreRecord {
    identity: spin::Once<ProcessorIdentity>,
    slot: SpinLock<CoreSlot>,
    relax: fn(),
}

impl CoreRecord {
    pub fn new(relax: fn()) -> Self {
        Self {
            identity: spin::Once::new(),
            slot: SpinLock::new(CoreSlot::empty()),
            relax,
        }
    }

    /// Fill the record for a core that just reported in.
    ///
    /// # Panics
    /// If the record was already registered: bring-up hands every logical
    /// index out exactly once.
    pub fn register(&self, identity: ProcessorIdentity, is_primary: bool) {
        let mut fresh = false;
        self.identity.call_once(|| {
            fresh = true;
            identity
        });
        assert!(fresh, "processor {:#x} registered into an occupied record", identity.processor_id);

        let mut slot = self.lock();
        *slot = CoreSlot::empty();
        slot.flags = CoreFlags::ENABLED | CoreFlags::HEALTHY;
        if is_primary {
            slot.flags |= CoreFlags::PRIMARY;
        }
        // The primary is already running the caller.
        slot.state = if is_primary { CoreState::Busy } else { CoreState::Idle };
    }

    pub fn identity(&self) -> Option<&ProcessorIdentity> {
        self.identity.get()
    }

    pub fn is_registered(&self) -> bool {
        self.identity.get().is_some()
    }

    /// Spin (with the platform's relax hint) until the record lock is ours.
    pub fn lock(&self) -> SpinLockGuard<'_, CoreSlot> {
        self.slot.lock_with(self.relax)
    }

    /// Single acquisition attempt, for code that may have interrupted a
    /// holder of this lock on the same core.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, CoreSlot>> {
        self.slot.try_lock()
    }

    pub fn state(&self) -> CoreState {
        self.lock().state
    }

    pub fn set_state(&self, state: CoreState) {
        self.lock().state = state;
    }

    pub fn set_assignment(&self, assignment: Option<Assignment>) {
        self.lock().assignment = assignment;
    }

    /// Whether any of `mask` is set.
    pub fn test_flags(&self, mask: CoreFlags) -> bool {
        self.lock().flags.intersects(mask)
    }

    pub fn set_flags(&self, mask: CoreFlags) {
        self.lock().flags.insert(mask);
    }

    pub fn clear_flags(&self, mask: CoreFlags) {
        self.lock().flags.remove(mask);
    }

    pub fn flags(&self) -> CoreFlags {
        self.lock().flags
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        let slot = self.lock();
        CoreSnapshot {
            flags: slot.flags,
            state: slot.state,
            assignment: slot.assignment,
        }
    }

    /// Secondary side: claim a pending assignment and mark the core busy.
    pub fn begin_assignment(&self) -> Option<Assignment> {
        let mut slot = self.lock();
        if slot.state != CoreState::Ready {
            return None;
        }
        let assignment = slot.assignment.take()?;
        slot.state = CoreState::Busy;
        Some(assignment)
    }

    /// Secondary side: the routine returned.
    ///
    /// A record that was force-reset while the routine ran is left alone;
    /// the late completion belongs to an operation that already timed out.
    pub fn finish_assignment(&self) -> bool {
        let mut slot = self.lock();
        if slot.state != CoreState::Busy {
            return false;
        }
        slot.state = CoreState::Finished;
        true
    }

    /// Force the record back to Idle, dropping any unclaimed assignment.
    pub fn reset_to_idle(&self) -> CoreState {
        let mut slot = self.lock();
        let previous = slot.state;
        slot.state = CoreState::Idle;
        slot.assignment = None;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: usize) {}
    fn other(argument: usize) {
        core::hint::black_box(argument);
    }

    fn registered(is_primary: bool) -> CoreRecord {
        let record = CoreRecord::new(core::hint::spin_loop);
        record.register(
            ProcessorIdentity {
                processor_id: 7,
                location: Location::default(),
            },
            is_primary,
        );
        record
    }

    #[test]
    fn primary_registers_busy_and_secondary_idle() {
        let primary = registered(true);
        assert_eq!(primary.state(), CoreState::Busy);
        assert!(primary.test_flags(CoreFlags::PRIMARY));

        let secondary = registered(false);
        assert_eq!(secondary.state(), CoreState::Idle);
        assert_eq!(secondary.flags(), CoreFlags::ENABLED | CoreFlags::HEALTHY);
    }

    #[test]
    #[should_panic(expected = "occupied record")]
    fn double_registration_is_fatal() {
        let record = registered(false);
        record.register(
            ProcessorIdentity {
                processor_id: 8,
                location: Location::default(),
            },
            false,
        );
    }

    #[test]
    fn flag_primitives() {
        let record = registered(false);
        record.clear_flags(CoreFlags::ENABLED);
        assert!(!record.test_flags(CoreFlags::ENABLED));
        assert!(record.test_flags(CoreFlags::ENABLED | CoreFlags::HEALTHY));
        record.set_flags(CoreFlags::ENABLED);
        assert!(record.test_flags(CoreFlags::ENABLED));
    }

    #[test]
    fn secondary_transitions_own_states() {
        let record = registered(false);
        assert!(record.begin_assignment().is_none());

        record.set_state(CoreState::Ready);
        record.set_assignment(Some(Assignment::new(noop, 3)));
        let taken = record.begin_assignment().expect("ready assignment");
        assert_eq!(taken.argument, 3);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.state, CoreState::Busy);
        assert_eq!(snapshot.assignment, None);

        assert!(record.finish_assignment());
        assert_eq!(record.state(), CoreState::Finished);
    }

    #[test]
    fn blocked_core_does_not_start() {
        let record = registered(false);
        record.set_state(CoreState::Blocked);
        assert!(record.begin_assignment().is_none());
        assert_eq!(record.state(), CoreState::Blocked);
    }

    #[test]
    fn late_completion_after_reset_stays_idle() {
        let record = registered(false);
        record.set_state(CoreState::Ready);
        record.set_assignment(Some(Assignment::new(noop, 0)));
        record.begin_assignment().unwrap();

        assert_eq!(record.reset_to_idle(), CoreState::Busy);
        assert!(!record.finish_assignment());
        assert_eq!(record.state(), CoreState::Idle);
    }

    #[test]
    fn assignments_compare_by_routine_and_argument() {
        assert_eq!(Assignment::new(noop, 1), Assignment::new(noop, 1));
        assert_ne!(Assignment::new(noop, 1), Assignment::new(noop, 2));
        assert_ne!(Assignment::new(noop, 1), Assignment::new(other, 1));
    }

    #[test]
    fn finished_flag_is_shared_between_clones() {
        let flag = FinishedFlag::new();
        let clone = flag.clone();
        clone.set(true);
        assert!(flag.get());
    }
}
