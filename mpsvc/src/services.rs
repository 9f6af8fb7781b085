// =============================================================================
// mpsvc — Service Instance and Bring-Up
// =============================================================================
//
// One `MpServices` value owns everything the primary needs to drive the
// secondaries: the core registry, the broadcast session, the AP stack
// reservation, and the platform collaborator.
//
// BRING-UP ORDER:
//   1. `MpServices::new`: primary reserves stacks and registers at index 0
//   2. `MpServices::start_aps`: platform wakes the secondaries on the common
//      stack; each one calls `register_secondary`, switches to its private
//      stack and enters `ap_loop`
//   3. unused stacks are trimmed once the final core count is known
//
// After step 3 the services are ready for dispatch (see dispatch.rs).
//
// =============================================================================

use x86_64::VirtAddr;

use crate::config::MpConfig;
use crate::cpu::{CoreFlags, Location, ProcessorIdentity, ProcessorInfo};
use crate::error::{MpError, MpResult};
use crate::identity;
use crate::platform::{ApStartup, PageAllocator, Platform};
use crate::registry::CoreRegistry;
use crate::session::DispatchSession;
use crate::stack::ApStackPool;

/// What a secondary needs to continue after registering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryBoot {
    /// Logical index handed to [`MpServices::ap_loop`].
    pub index: usize,
    /// Top of the private stack to switch to before entering the loop.
    pub stack_top: VirtAddr,
}

/// Multiprocessor services for one boot session.
pub struct MpServices<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: MpConfig,
    pub(crate) registry: CoreRegistry,
    pub(crate) session: spin::Mutex<DispatchSession>,
    stacks: spin::Mutex<Option<ApStackPool>>,
}

impl<P: Platform> MpServices<P> {
    /// Initialize on the primary.
    ///
    /// Reserves the AP stacks when secondaries are possible and registers
    /// the calling core as the primary at logical index 0.
    pub fn new<A: PageAllocator>(platform: P, config: MpConfig, allocator: &mut A) -> MpResult<Self> {
        config.validate()?;

        let stacks = if config.is_multiprocessor() {
            Some(ApStackPool::reserve(allocator, config.max_processors, config.ap_stack_size)?)
        } else {
            log::info!("MP: single processor configuration, no AP stacks reserved");
            None
        };

        let services = Self {
            registry: CoreRegistry::new(config.max_processors, P::relax),
            session: spin::Mutex::new(DispatchSession::new()),
            stacks: spin::Mutex::new(stacks),
            platform,
            config,
        };

        let index = services.registry.claim_index().ok_or(MpError::OutOfResources)?;
        let identity = services.current_identity();
        services.registry.register_core(true, index, identity);
        log::info!("MP: primary (processor {:#x}) registered as core {index}", identity.processor_id);

        Ok(services)
    }

    /// Wake every secondary and release the stacks nobody claimed.
    ///
    /// Returns the total number of registered cores.
    pub fn start_aps<S: ApStartup, A: PageAllocator>(&self, startup: &mut S, allocator: &mut A) -> MpResult<usize> {
        self.ensure_primary()?;

        // The stack lock is not held across bring-up: every secondary takes
        // it in `register_secondary`.
        let common_stack_top = self.stacks.lock().as_ref().map(ApStackPool::common_stack_top);
        if let Some(top) = common_stack_top {
            log::debug!("MP: waking secondaries on common stack {:#x}", top.as_u64());
            startup.start_aps(top)?;
        }

        let (total, enabled) = self.registry.count();
        let mut stacks = self.stacks.lock();
        if let Some(pool) = stacks.take() {
            *stacks = pool.trim(allocator, total);
        }
        log::info!("MP: {total} cores online, {enabled} enabled");
        Ok(total)
    }

    /// Secondary side of bring-up, called on the common stack.
    ///
    /// Fails with [`MpError::OutOfResources`] once all configured slots are
    /// taken; the platform then parks the calling core for good.
    pub fn register_secondary(&self) -> MpResult<SecondaryBoot> {
        let identity = self.current_identity();
        let Some(index) = self.registry.claim_index() else {
            log::warn!(
                "MP: no slot left for processor {:#x} (max {})",
                identity.processor_id,
                self.config.max_processors
            );
            return Err(MpError::OutOfResources);
        };

        let stack_top = self
            .stacks
            .lock()
            .as_ref()
            .and_then(|pool| pool.private_stack_top(index))
            .ok_or(MpError::OutOfResources)?;

        self.registry.register_core(false, index, identity);
        log::debug!(
            "MP: processor {:#x} registered as core {index}, stack top {:#x}",
            identity.processor_id,
            stack_top.as_u64()
        );
        Ok(SecondaryBoot { index, stack_top })
    }

    /// `(total, enabled)` core counts. Primary only.
    pub fn core_counts(&self) -> MpResult<(usize, usize)> {
        self.ensure_primary()?;
        Ok(self.registry.count())
    }

    /// Snapshot of the core at logical `index`. Primary only.
    pub fn processor_info(&self, index: usize) -> MpResult<ProcessorInfo> {
        self.ensure_primary()?;
        let record = self.registry.get(index).ok_or(MpError::NotFound)?;
        let identity = record.identity().ok_or(MpError::NotFound)?;
        Ok(ProcessorInfo {
            processor_id: identity.processor_id,
            status_flag: record.flags(),
            location: identity.location,
        })
    }

    /// Logical index of the calling core. Callable from any core.
    ///
    /// # Panics
    /// If the calling core never registered.
    pub fn who_am_i(&self) -> usize {
        identity::resolve_self(&self.registry, self.platform.processor_id())
    }

    pub fn config(&self) -> &MpConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Whether the AP stack reservation is still held.
    pub fn has_ap_stacks(&self) -> bool {
        self.stacks.lock().is_some()
    }

    pub(crate) fn ensure_primary(&self) -> MpResult<()> {
        let is_primary = identity::resolve(&self.registry, self.platform.processor_id())
            .and_then(|index| self.registry.get(index))
            .is_some_and(|record| record.test_flags(CoreFlags::PRIMARY));
        if is_primary {
            Ok(())
        } else {
            log::debug!("MP: rejected call from processor {:#x}", self.platform.processor_id());
            Err(MpError::NotPrimaryCaller)
        }
    }

    fn current_identity(&self) -> ProcessorIdentity {
        let processor_id = self.platform.processor_id();
        let location: Location = self.platform.location(processor_id);
        ProcessorIdentity { processor_id, location }
    }
}
