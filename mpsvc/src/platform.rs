//! Collaborator seams.
//!
//! The services never touch hardware directly. Everything below the logical
//! index abstraction (reading the local APIC id, sending INIT-SIPI-SIPI,
//! programming a timer, signalling an event, handing out pages) goes through
//! these traits, implemented by the firmware that embeds the crate.

use x86_64::VirtAddr;

use crate::cpu::Location;
use crate::error::MpResult;

/// Which supervision callback a timer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Broadcast supervision ([`crate::MpServices::startup_all_aps`]).
    AllAps,
    /// Single-target supervision of the core with this logical index.
    ThisAp(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Call back every `period_us` until cancelled.
    Periodic { period_us: u64 },
    Cancel,
}

/// Opaque wake token supplied by a non-blocking caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitEvent(pub usize);

/// Services provided by the platform the crate runs on.
///
/// Every method except [`Platform::set_timer`] and [`Platform::signal`] may be
/// called from any core.
pub trait Platform: Sync {
    /// Hardware identifier (APIC id on x86) of the calling core.
    fn processor_id(&self) -> u32;

    /// Package/core/thread coordinates of a processor.
    fn location(&self, processor_id: u32) -> Location {
        Location {
            package: processor_id,
            core: 0,
            thread: 0,
        }
    }

    /// Busy-wait for `micros` microseconds.
    fn stall(&self, micros: u64);

    /// Hint issued between failed lock attempts and idle polls.
    fn relax() {
        core::hint::spin_loop();
    }

    /// Arm or cancel the periodic callback for `event`. When it fires the
    /// platform must call [`crate::MpServices::on_timer`] on the primary.
    fn set_timer(&self, event: TimerEvent, mode: TimerMode) -> MpResult<()>;

    /// Wake anyone waiting on `event`.
    fn signal(&self, event: WaitEvent);

    /// False once the platform no longer accepts asynchronous work.
    fn async_allowed(&self) -> bool {
        true
    }
}

/// Page allocator used for the secondary stack reservation.
pub trait PageAllocator {
    /// Reserve `pages` contiguous 4 KiB pages.
    fn allocate_pages(&mut self, pages: usize) -> Option<VirtAddr>;

    /// Give back `pages` pages starting at `base`.
    fn free_pages(&mut self, base: VirtAddr, pages: usize);
}

/// Hardware bring-up of the halted secondaries.
pub trait ApStartup {
    /// Start every halted secondary on the common stack ending at
    /// `common_stack_top`. Each one must call
    /// [`crate::MpServices::register_secondary`], switch to the stack it
    /// returns and enter [`crate::MpServices::ap_loop`]. Returns once all
    /// secondaries have checked in.
    fn start_aps(&mut self, common_stack_top: VirtAddr) -> MpResult<()>;
}
