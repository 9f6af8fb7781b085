//! Putting work on the secondaries.
//!
//! Broadcast dispatch installs one routine on every enabled secondary (all
//! at once, or chained one core at a time in ascending logical order).
//! Single-target dispatch installs it on one core with its own deadline and
//! completion sink. Both validate everything before touching a record, so a
//! rejected call leaves no trace.
//!
//! Completion is driven either inline (no wait event: the call busy-polls the
//! supervisor) or by the periodic timer (wait event given: the call returns
//! at once and the caller is signalled later).

use crate::cpu::{ApProcedure, Assignment, CoreFlags, CoreState, FinishedFlag};
use crate::deadline::Deadline;
use crate::error::{MpError, MpResult};
use crate::platform::{Platform, TimerEvent, TimerMode, WaitEvent};
use crate::services::MpServices;
use crate::session::FailedCpuListSlot;

impl<P: Platform> MpServices<P> {
    /// Run `procedure(argument)` on every enabled secondary.
    ///
    /// With `single_thread` the cores run one after another in ascending
    /// logical order; otherwise all of them start together. A `timeout_us`
    /// of zero waits forever.
    ///
    /// Without `wait_event` the call blocks until every core finished
    /// (`Ok`) or the deadline elapsed ([`MpError::Timeout`]; the cores that
    /// missed it are listed in `failed_cpu_list`). With `wait_event` the
    /// call returns `Ok` right after dispatch and the event is signalled on
    /// completion.
    pub fn startup_all_aps(
        &self,
        procedure: Option<ApProcedure>,
        single_thread: bool,
        wait_event: Option<WaitEvent>,
        timeout_us: u64,
        argument: usize,
        failed_cpu_list: Option<&FailedCpuListSlot>,
    ) -> MpResult<()> {
        if let Some(slot) = failed_cpu_list {
            slot.clear();
        }

        self.ensure_primary()?;
        let (total, _) = self.registry.count();
        if total <= 1 {
            return Err(MpError::NotStarted);
        }
        let procedure = procedure.ok_or(MpError::InvalidArgument)?;
        if wait_event.is_some() && !self.platform.async_allowed() {
            log::debug!("MP: non-blocking broadcast refused, async work no longer allowed");
            return Err(MpError::Unsupported);
        }

        let mut session = self.session.lock();
        if session.is_active() {
            log::debug!("MP: broadcast refused, another one is in flight");
            return Err(MpError::Busy);
        }
        // Full pass before anything changes: one busy core fails the lot.
        if let Some((index, _)) = self
            .registry
            .enabled_secondaries()
            .find(|(_, record)| record.state() != CoreState::Idle)
        {
            log::debug!("MP: broadcast refused, core {index} is not idle");
            return Err(MpError::Busy);
        }

        if wait_event.is_some() {
            self.platform.set_timer(
                TimerEvent::AllAps,
                TimerMode::Periodic {
                    period_us: self.config.poll_interval_us,
                },
            )?;
        }

        let assignment = Assignment::new(procedure, argument);
        session.begin(
            assignment,
            single_thread,
            Deadline::from_micros(timeout_us),
            wait_event,
            failed_cpu_list.cloned(),
        );

        let mut initial = CoreState::Ready;
        for (_, record) in self.registry.enabled_secondaries() {
            let mut slot = record.lock();
            if slot.state != CoreState::Idle {
                continue;
            }
            session.started += 1;
            slot.state = initial;
            if initial == CoreState::Ready {
                slot.assignment = Some(assignment);
            }
            if single_thread {
                initial = CoreState::Blocked;
            }
        }
        log::debug!(
            "MP: broadcast {:?} to {} cores ({}, timeout {} us)",
            assignment,
            session.started,
            if single_thread { "single thread" } else { "parallel" },
            timeout_us
        );

        if wait_event.is_some() {
            return Ok(());
        }

        let poll = self.config.poll_interval_us;
        let result = loop {
            self.harvest(&mut session);
            if session.all_finished() {
                break Ok(());
            }
            if session.deadline.is_expired() {
                self.reset_all_failed(&session);
                break Err(MpError::Timeout);
            }
            self.platform.stall(poll);
            session.deadline.tick(poll);
        };
        session.end();
        result
    }

    /// Run `procedure(argument)` on the secondary at logical `index`.
    ///
    /// `finished` is cleared on entry and set once the core finished within
    /// `timeout_us` (zero waits forever). Blocking and non-blocking
    /// completion behave as in [`MpServices::startup_all_aps`].
    pub fn startup_this_ap(
        &self,
        procedure: Option<ApProcedure>,
        index: usize,
        wait_event: Option<WaitEvent>,
        timeout_us: u64,
        argument: usize,
        finished: Option<&FinishedFlag>,
    ) -> MpResult<()> {
        if let Some(flag) = finished {
            flag.set(false);
        }

        self.ensure_primary()?;
        let procedure = procedure.ok_or(MpError::InvalidArgument)?;
        let record = self.registry.get(index).ok_or(MpError::NotFound)?;
        if record.test_flags(CoreFlags::PRIMARY) || !record.test_flags(CoreFlags::ENABLED) {
            log::debug!("MP: core {index} is the primary or disabled");
            return Err(MpError::InvalidArgument);
        }
        if wait_event.is_some() && !self.platform.async_allowed() {
            log::debug!("MP: non-blocking dispatch refused, async work no longer allowed");
            return Err(MpError::Unsupported);
        }
        // A core harvested mid-broadcast is Idle but still counted by the
        // broadcast supervisor.
        if self.session.lock().is_active() {
            log::debug!("MP: core {index} belongs to the broadcast in flight");
            return Err(MpError::Busy);
        }
        // Only the primary moves a core out of Idle, so the state observed
        // here still holds when the assignment is installed below.
        if record.state() != CoreState::Idle {
            log::debug!("MP: core {index} is not idle");
            return Err(MpError::Busy);
        }

        if wait_event.is_some() {
            self.platform.set_timer(
                TimerEvent::ThisAp(index),
                TimerMode::Periodic {
                    period_us: self.config.poll_interval_us,
                },
            )?;
        }

        let assignment = Assignment::new(procedure, argument);
        {
            let mut slot = record.lock();
            slot.deadline = Deadline::from_micros(timeout_us);
            slot.wait_event = wait_event;
            slot.finished = finished.cloned();
            slot.assignment = Some(assignment);
            slot.state = CoreState::Ready;
        }
        log::debug!("MP: dispatched {assignment:?} to core {index} (timeout {timeout_us} us)");

        if wait_event.is_some() {
            return Ok(());
        }

        let poll = self.config.poll_interval_us;
        loop {
            if let Some(result) = Self::settle(&mut record.lock(), index) {
                return result;
            }
            self.platform.stall(poll);
            record.lock().deadline.tick(poll);
        }
    }

    /// Enable or disable the secondary at logical `index`, optionally
    /// replacing its health bit with the HEALTHY bit of `health`.
    ///
    /// Only an idle core may change; toggling to the current value leaves the
    /// enabled count alone.
    pub fn enable_disable_ap(&self, index: usize, enable: bool, health: Option<CoreFlags>) -> MpResult<()> {
        self.ensure_primary()?;
        let record = self.registry.get(index).ok_or(MpError::NotFound)?;

        let mut slot = record.lock();
        if slot.flags.contains(CoreFlags::PRIMARY) {
            return Err(MpError::InvalidArgument);
        }
        if slot.state != CoreState::Idle {
            log::debug!("MP: core {index} is {:?}, cannot change its enable state", slot.state);
            return Err(MpError::Unsupported);
        }

        let enabled = slot.flags.contains(CoreFlags::ENABLED);
        if enable && !enabled {
            slot.flags.insert(CoreFlags::ENABLED);
            self.registry.note_enabled();
        } else if !enable && enabled {
            slot.flags.remove(CoreFlags::ENABLED);
            self.registry.note_disabled();
        }
        if let Some(health) = health {
            slot.flags.set(CoreFlags::HEALTHY, health.contains(CoreFlags::HEALTHY));
        }
        log::info!("MP: core {index} {} ({:?})", if enable { "enabled" } else { "disabled" }, slot.flags);
        Ok(())
    }
}
