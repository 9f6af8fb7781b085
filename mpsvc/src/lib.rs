// =============================================================================
// mpsvc — Boot-Time Multiprocessor Services
// =============================================================================
//
// Before any OS or scheduler exists, one core (the primary) has to put the
// other cores (the secondaries) to work. This crate is the bookkeeping and
// protocol side of that job:
//
//   registry.rs / cpu.rs     one record per logical processor, each behind
//                            its own try-lock
//   dispatch.rs              broadcast and single-target dispatch
//   supervise.rs             harvesting, deadlines, forced resets
//   ap.rs                    the loop every secondary runs
//   stack.rs                 common + private secondary stacks
//   identity.rs              hardware id → logical index
//
// Everything that touches hardware (waking a core, timers, events, pages)
// is a collaborator behind the traits in platform.rs.
//
// HOW A DISPATCH FLOWS:
//   primary: Idle → Ready (+ assignment)         [dispatch.rs]
//   secondary: Ready → Busy, run, Busy → Finished [ap.rs]
//   primary: Finished → Idle, count it            [supervise.rs]
//
// =============================================================================

// `no_std` on the target; the host test build links std so simulated cores
// can be threads.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ap;
pub mod config;
pub mod cpu;
pub mod deadline;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod platform;
pub mod registry;
pub mod services;
pub mod session;
pub mod stack;
pub mod supervise;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::MpConfig;
pub use cpu::{ApProcedure, CoreFlags, CoreState, FinishedFlag, Location, ProcessorInfo};
pub use deadline::Deadline;
pub use error::{MpError, MpResult};
pub use platform::{ApStartup, PageAllocator, Platform, TimerEvent, TimerMode, WaitEvent};
pub use services::{MpServices, SecondaryBoot};
pub use session::{END_OF_CPU_LIST, FailedCpuList, FailedCpuListSlot};
