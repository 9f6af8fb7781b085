//! Stacks for the secondaries.
//!
//! One contiguous reservation of `max_processors` stacks:
//!
//! ```text
//! base                                                         end
//! | common | private 1 | private 2 | ... | private max-1 |
//! ```
//!
//! Every secondary first runs on the shared common stack, registers, and
//! then moves to the private stack matching its logical index. The common
//! stack is kept for as long as any secondary exists, since a core coming
//! back from a reset lands on it again.

use x86_64::VirtAddr;
use x86_64::structures::paging::{PageSize, Size4KiB};

use crate::error::{MpError, MpResult};
use crate::platform::PageAllocator;

/// Pages needed to hold `bytes`.
pub fn pages_for(bytes: usize) -> usize {
    (bytes as u64).div_ceil(Size4KiB::SIZE) as usize
}

#[derive(Debug)]
pub struct ApStackPool {
    base: VirtAddr,
    stack_size: usize,
    /// Stacks still owned by the pool, common stack included.
    slots: usize,
}

impl ApStackPool {
    /// Reserve `slots` stacks of `stack_size` bytes each.
    pub fn reserve<A: PageAllocator>(allocator: &mut A, slots: usize, stack_size: usize) -> MpResult<Self> {
        let bytes = slots.checked_mul(stack_size).ok_or(MpError::InvalidArgument)?;
        let pages = pages_for(bytes);
        let base = allocator.allocate_pages(pages).ok_or_else(|| {
            log::error!("cannot reserve {pages} pages for {slots} AP stacks");
            MpError::OutOfResources
        })?;
        log::debug!("AP stacks: {slots} x {stack_size:#x} bytes at {:#x}", base.as_u64());
        Ok(Self {
            base,
            stack_size,
            slots,
        })
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    fn offset(&self, slot: usize) -> VirtAddr {
        self.base + (slot as u64) * (self.stack_size as u64)
    }

    /// Top of the shared bring-up stack (stacks grow down).
    pub fn common_stack_top(&self) -> VirtAddr {
        self.offset(1)
    }

    /// Top of the private stack of the secondary at logical `index`.
    pub fn private_stack_top(&self, index: usize) -> Option<VirtAddr> {
        if index == 0 || index >= self.slots {
            return None;
        }
        Some(self.offset(index + 1))
    }

    /// Return what bring-up did not use, given the final processor count.
    ///
    /// A uniprocessor system gives back the whole reservation, common stack
    /// included, and gets `None`. Otherwise the trailing private stacks of
    /// secondaries that never appeared are freed.
    pub fn trim<A: PageAllocator>(mut self, allocator: &mut A, processors: usize) -> Option<Self> {
        if processors <= 1 {
            let pages = pages_for(self.slots * self.stack_size);
            log::info!("uniprocessor system, releasing all {pages} AP stack pages");
            allocator.free_pages(self.base, pages);
            return None;
        }
        if processors < self.slots {
            let unused = self.slots - processors;
            let pages = pages_for(unused * self.stack_size);
            log::debug!("releasing {unused} unused AP stacks ({pages} pages)");
            allocator.free_pages(self.offset(processors), pages);
            self.slots = processors;
        }
        Some(self)
    }
}
