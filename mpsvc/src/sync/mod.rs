// =============================================================================
// mpsvc — Synchronization Primitives
// =============================================================================
//
// Lock ordering rules:
//   Level 1 (innermost): per-core record lock (`SpinLock<CoreSlot>`)
//   Level 2: stack pool lock (`spin::Mutex`)
//   Level 3 (outermost): dispatch session lock (`spin::Mutex`)
//
// A record lock is only ever held for one field update; no code path takes
// two record locks at once.
// =============================================================================

pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};
