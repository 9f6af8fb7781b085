// =============================================================================
// mpsvc — Secondary Execution Loop
// =============================================================================
//
// Where every secondary spends its life after registering. The core polls
// its own record; when the primary has installed an assignment and marked the
// record Ready, the core claims it (Ready -> Busy), runs it with the record
// lock released, and reports back (Busy -> Finished). Those two transitions
// are the only ones a secondary ever performs.
//
// =============================================================================

use crate::platform::Platform;
use crate::services::MpServices;

impl<P: Platform> MpServices<P> {
    /// One iteration of the secondary loop for logical `index`.
    ///
    /// Returns whether an assignment was run.
    pub fn ap_poll(&self, index: usize) -> bool {
        let Some(record) = self.registry.get(index) else {
            return false;
        };
        let Some(assignment) = record.begin_assignment() else {
            return false;
        };

        assignment.run();

        if !record.finish_assignment() {
            log::warn!("MP: core {index} returned after being reset, result dropped");
        }
        true
    }

    /// Secondary main loop. Never returns.
    pub fn ap_loop(&self, index: usize) -> ! {
        log::debug!("MP: core {index} entering idle loop");
        loop {
            if !self.ap_poll(index) {
                P::relax();
            }
        }
    }
}
