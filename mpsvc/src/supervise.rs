//! Supervision: harvesting finished cores and enforcing deadlines.
//!
//! One harvesting pass serves both completion modes. Blocking dispatch calls
//! it in a stall loop on the primary; non-blocking dispatch has the platform
//! timer call [`MpServices::on_timer`] every poll interval, which runs one
//! pass per tick and disarms itself when the operation is over.
//!
//! A core reset after its deadline is not stopped. Whatever it was running
//! keeps running untracked, and a later dispatch to the same index may race
//! with it; the hardware offers nothing stronger than forgetting the slot.

use crate::cpu::{CoreSlot, CoreState};
use crate::deadline::Deadline;
use crate::error::{MpError, MpResult};
use crate::platform::{Platform, TimerEvent, TimerMode};
use crate::services::MpServices;
use crate::session::DispatchSession;

impl<P: Platform> MpServices<P> {
    /// Timer entry point for non-blocking operations. Primary only.
    pub fn on_timer(&self, event: TimerEvent) {
        match event {
            TimerEvent::AllAps => self.check_all_aps_status(),
            TimerEvent::ThisAp(index) => self.check_this_ap_status(index),
        }
    }

    /// Count every Finished secondary, chain the next Blocked core in single
    /// thread mode, and return the harvested cores to Idle.
    pub(crate) fn harvest(&self, session: &mut DispatchSession) {
        for (index, record) in self.registry.enabled_secondaries() {
            if record.state() != CoreState::Finished {
                continue;
            }
            session.finished += 1;
            log::trace!("MP: core {index} finished ({}/{})", session.finished, session.started);

            if session.single_thread {
                if let Some((next, blocked)) = self.registry.next_blocked() {
                    let mut slot = blocked.lock();
                    slot.assignment = session.assignment;
                    slot.state = CoreState::Ready;
                    log::trace!("MP: core {next} is next in line");
                }
            }

            record.set_state(CoreState::Idle);
        }
    }

    /// Force every dispatched secondary that is not back in Idle to Idle,
    /// recording it in the caller's failed list when one was requested.
    pub(crate) fn reset_all_failed(&self, session: &DispatchSession) {
        let mut recorder = session.failure_recorder();
        for (index, record) in self.registry.enabled_secondaries() {
            let previous = record.reset_to_idle();
            if previous == CoreState::Idle {
                continue;
            }
            log::warn!("MP: core {index} missed its deadline while {previous:?}, abandoning it");
            if let Some(recorder) = recorder.as_mut() {
                recorder.record(index);
            }
        }
        if let Some(recorder) = recorder {
            recorder.finish();
        }
    }

    /// One supervision tick of the broadcast in flight.
    fn check_all_aps_status(&self) {
        // The dispatch call itself may hold the session; try again next tick.
        let Some(mut session) = self.session.try_lock() else {
            return;
        };
        if !session.is_active() {
            return;
        }

        session.deadline.tick(self.config.poll_interval_us);
        self.harvest(&mut session);

        if session.deadline.is_expired() && !session.all_finished() {
            self.reset_all_failed(&session);
            session.finished = session.started;
        }
        if !session.all_finished() {
            return;
        }

        self.cancel_timer(TimerEvent::AllAps);
        if let Some(event) = session.wait_event.take() {
            self.platform.signal(event);
        }
        log::debug!("MP: broadcast of {} cores complete", session.started);
        session.end();
    }

    /// One supervision tick of the single-target operation on `index`.
    fn check_this_ap_status(&self, index: usize) {
        let Some(record) = self.registry.get(index) else {
            return;
        };
        // The secondary polls its own record under this lock. A lost race
        // skips the whole tick, deadline charge included, so a contended
        // single-target deadline can run late by the skipped intervals.
        let Some(mut slot) = record.try_lock() else {
            return;
        };

        slot.deadline.tick(self.config.poll_interval_us);
        if Self::settle(&mut slot, index).is_none() {
            return;
        }
        let wait_event = slot.wait_event.take();
        drop(slot);

        self.cancel_timer(TimerEvent::ThisAp(index));
        if let Some(event) = wait_event {
            self.platform.signal(event);
        }
    }

    /// Decide a single-target operation: `Ok` once the core finished,
    /// [`MpError::Timeout`] once the deadline passed, `None` while pending.
    /// A decided operation leaves the core Idle with its sink cleared.
    pub(crate) fn settle(slot: &mut CoreSlot, index: usize) -> Option<MpResult<()>> {
        let result = if slot.state == CoreState::Finished {
            if let Some(flag) = &slot.finished {
                flag.set(true);
            }
            Ok(())
        } else if slot.deadline.is_expired() {
            if slot.state != CoreState::Idle {
                log::warn!("MP: core {index} missed its deadline while {:?}, abandoning it", slot.state);
                if let Some(flag) = &slot.finished {
                    flag.set(false);
                }
            }
            slot.assignment = None;
            Err(MpError::Timeout)
        } else {
            return None;
        };

        slot.state = CoreState::Idle;
        slot.deadline = Deadline::NEVER;
        slot.finished = None;
        Some(result)
    }

    fn cancel_timer(&self, event: TimerEvent) {
        if let Err(err) = self.platform.set_timer(event, TimerMode::Cancel) {
            log::error!("MP: cannot cancel {event:?} timer: {err}");
        }
    }
}
