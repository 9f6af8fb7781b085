//! Status kinds returned by the multiprocessor services.
//!
//! Every kind is recoverable by the caller. `Timeout` in particular is not a
//! failure of the services themselves: partial results (the failed-core list,
//! the finished flag) are valid when it is returned.

use core::fmt;

/// Error returned by every fallible service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpError {
    /// The operation is restricted to the primary core.
    NotPrimaryCaller,
    /// Missing procedure, or the target is the primary / disabled.
    InvalidArgument,
    /// Logical index outside the registry.
    NotFound,
    /// A target core is not idle, or a broadcast is already in flight.
    Busy,
    /// Broadcast attempted with only the primary registered.
    NotStarted,
    /// The deadline elapsed before every dispatched core finished.
    Timeout,
    /// Enable/disable of a non-idle core, or asynchronous dispatch after the
    /// platform stopped accepting asynchronous work.
    Unsupported,
    /// A page reservation or a registry slot could not be obtained.
    OutOfResources,
}

/// Result alias used throughout the crate.
pub type MpResult<T> = Result<T, MpError>;

impl fmt::Display for MpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MpError::NotPrimaryCaller => "operation may only be called from the primary core",
            MpError::InvalidArgument => "invalid argument",
            MpError::NotFound => "no core with that logical index",
            MpError::Busy => "target core is not idle",
            MpError::NotStarted => "no secondary cores are present",
            MpError::Timeout => "deadline elapsed before completion",
            MpError::Unsupported => "operation not supported in the current state",
            MpError::OutOfResources => "out of resources",
        };
        f.write_str(text)
    }
}

impl core::error::Error for MpError {}
