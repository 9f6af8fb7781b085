//! State of the one broadcast operation that may be in flight.
//!
//! The session is only ever touched by the primary (from the dispatch call or
//! from its own supervision callback), so its counters need no atomics; the
//! surrounding `spin::Mutex` exists to give the callback a way to back off
//! while the dispatch call itself is still filling the session in.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::cpu::Assignment;
use crate::deadline::Deadline;
use crate::platform::WaitEvent;

/// Terminates a [`FailedCpuList`].
pub const END_OF_CPU_LIST: usize = usize::MAX;

/// Logical indices of the cores that missed a broadcast deadline, in
/// ascending order, followed by [`END_OF_CPU_LIST`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCpuList(Vec<usize>);

impl FailedCpuList {
    /// Room for `entries` indices plus the terminator.
    ///
    /// # Panics
    /// If the allocation fails; the failed list is the one allocation the
    /// supervision path cannot do without.
    fn with_room_for(entries: usize) -> Self {
        let mut raw = Vec::new();
        if raw.try_reserve_exact(entries + 1).is_err() {
            panic!("cannot allocate a failed-CPU list of {} entries", entries + 1);
        }
        Self(raw)
    }

    fn push(&mut self, index: usize) {
        self.0.push(index);
    }

    fn terminate(mut self) -> Self {
        self.0.push(END_OF_CPU_LIST);
        self
    }

    /// The failed indices, without the terminator.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied().take_while(|&index| index != END_OF_CPU_LIST)
    }

    /// Raw contents, terminator included.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.indices().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

/// Where a broadcast caller collects its [`FailedCpuList`].
///
/// Clones share the slot, which lets a non-blocking caller read the list
/// once its wait event fires.
#[derive(Debug, Clone, Default)]
pub struct FailedCpuListSlot(Arc<spin::Mutex<Option<FailedCpuList>>>);

impl FailedCpuListSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<FailedCpuList> {
        self.0.lock().take()
    }

    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }

    pub(crate) fn clear(&self) {
        *self.0.lock() = None;
    }

    fn store(&self, list: FailedCpuList) {
        *self.0.lock() = Some(list);
    }
}

/// Builds the failed list while the supervisor walks the cores.
pub(crate) struct FailureRecorder<'a> {
    slot: &'a FailedCpuListSlot,
    list: FailedCpuList,
}

impl<'a> FailureRecorder<'a> {
    pub(crate) fn record(&mut self, index: usize) {
        self.list.push(index);
    }

    pub(crate) fn finish(self) {
        self.slot.store(self.list.terminate());
    }
}

/// One broadcast operation.
#[derive(Debug, Default)]
pub struct DispatchSession {
    active: bool,
    pub assignment: Option<Assignment>,
    pub single_thread: bool,
    pub started: usize,
    pub finished: usize,
    pub deadline: Deadline,
    pub wait_event: Option<WaitEvent>,
    pub failed: Option<FailedCpuListSlot>,
}

impl DispatchSession {
    pub const fn new() -> Self {
        Self {
            active: false,
            assignment: None,
            single_thread: false,
            started: 0,
            finished: 0,
            deadline: Deadline::NEVER,
            wait_event: None,
            failed: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Reset every field for a new broadcast.
    pub fn begin(
        &mut self,
        assignment: Assignment,
        single_thread: bool,
        deadline: Deadline,
        wait_event: Option<WaitEvent>,
        failed: Option<FailedCpuListSlot>,
    ) {
        *self = Self {
            active: true,
            assignment: Some(assignment),
            single_thread,
            started: 0,
            finished: 0,
            deadline,
            wait_event,
            failed,
        };
    }

    pub fn all_finished(&self) -> bool {
        self.finished == self.started
    }

    /// Start the failed list, sized for every core still outstanding.
    /// `None` when the caller did not ask for one.
    pub(crate) fn failure_recorder(&self) -> Option<FailureRecorder<'_>> {
        let slot = self.failed.as_ref()?;
        let outstanding = self.started.saturating_sub(self.finished);
        Some(FailureRecorder {
            slot,
            list: FailedCpuList::with_room_for(outstanding),
        })
    }

    /// Invalidate the session once the operation completed or timed out.
    pub fn end(&mut self) {
        *self = Self::new();
    }
}
