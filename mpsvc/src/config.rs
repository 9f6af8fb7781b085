//! Build-time knobs of the multiprocessor services.

use x86_64::structures::paging::{PageSize, Size4KiB};

use crate::error::{MpError, MpResult};

/// Platform limits and timing for one services instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpConfig {
    /// Maximum number of logical processors, primary included.
    pub max_processors: usize,
    /// Bytes of stack per secondary. Must be a whole number of 4 KiB pages.
    pub ap_stack_size: usize,
    /// Supervision tick in microseconds.
    pub poll_interval_us: u64,
}

impl MpConfig {
    pub const DEFAULT: Self = Self {
        max_processors: 4,
        ap_stack_size: 0x8000,
        poll_interval_us: 100,
    };

    pub const fn new(max_processors: usize, ap_stack_size: usize) -> Self {
        Self {
            max_processors,
            ap_stack_size,
            poll_interval_us: Self::DEFAULT.poll_interval_us,
        }
    }

    pub const fn with_poll_interval(mut self, poll_interval_us: u64) -> Self {
        self.poll_interval_us = poll_interval_us;
        self
    }

    /// Reject configurations the stack allocator cannot honour.
    pub fn validate(&self) -> MpResult<()> {
        if self.max_processors == 0 {
            log::error!("max_processors must be at least 1");
            return Err(MpError::InvalidArgument);
        }
        if self.ap_stack_size == 0 || self.ap_stack_size as u64 % Size4KiB::SIZE != 0 {
            log::error!("AP stack size {:#x} is not page aligned", self.ap_stack_size);
            return Err(MpError::InvalidArgument);
        }
        if self.poll_interval_us == 0 {
            return Err(MpError::InvalidArgument);
        }
        Ok(())
    }

    /// Whether secondaries can exist at all.
    pub const fn is_multiprocessor(&self) -> bool {
        self.max_processors > 1
    }
}

impl Default for MpConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
