//! Host-side simulation used by the unit tests.
//!
//! Every simulated core is a `std::thread` whose hardware identifier lives in
//! a thread local. Secondaries run the real poll loop until the machine is
//! dropped; timers are not real either, tests call
//! [`MpServices::on_timer`] themselves (usually through
//! [`SimMachine::tick_until_signaled`]).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once, RwLock, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use x86_64::VirtAddr;
use x86_64::structures::paging::{PageSize, Size4KiB};

use crate::config::MpConfig;
use crate::cpu::CoreState;
use crate::error::{MpError, MpResult};
use crate::platform::{ApStartup, PageAllocator, Platform, TimerEvent, TimerMode, WaitEvent};
use crate::services::MpServices;

/// Wait event used by most non-blocking tests.
pub const EVENT: WaitEvent = WaitEvent(1);

/// Identifier reported by threads that never set one.
const UNKNOWN_PROCESSOR: u32 = u32::MAX;

/// How long a helper waits for the simulated cores before failing the test.
const PATIENCE: Duration = Duration::from_secs(10);

thread_local! {
    static PROCESSOR_ID: Cell<u32> = const { Cell::new(UNKNOWN_PROCESSOR) };
}

/// Make the calling thread report `processor_id` as its hardware id.
pub fn set_processor_id(processor_id: u32) {
    PROCESSOR_ID.with(|id| id.set(processor_id));
}

/// Hardware id of the calling thread.
pub fn current_processor_id() -> u32 {
    PROCESSOR_ID.with(Cell::get)
}

fn init_logging() {
    struct Stderr;

    impl klog::Sink for Stderr {
        fn write_str(&self, s: &str) {
            eprint!("{s}");
        }
    }

    static STDERR: Stderr = Stderr;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another test binary component may own the global logger already.
        let _ = klog::init(&STDERR, log::LevelFilter::Debug);
    });
}

pub fn noop(_: usize) {}

/// Spin until the [`Gate`] whose [`Gate::argument`] was passed is opened.
pub fn wait_at_gate(argument: usize) {
    // SAFETY: gates are leaked, so the pointer stays valid forever.
    let open = unsafe { &*(argument as *const AtomicBool) };
    while !open.load(Ordering::Acquire) {
        thread::yield_now();
    }
}

/// Releases routines parked in [`wait_at_gate`]. Opens on drop, so declare
/// it after the [`SimMachine`] whose threads it blocks.
pub struct Gate {
    open: &'static AtomicBool,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: Box::leak(Box::new(AtomicBool::new(false))),
        }
    }

    pub fn argument(&self) -> usize {
        self.open as *const AtomicBool as usize
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.open();
    }
}

// ── Platform ───────────────────────────────────────────────────

/// Platform double that records timer and signal traffic.
pub struct SimPlatform {
    timers: Mutex<Vec<(TimerEvent, TimerMode)>>,
    signals: Mutex<Vec<WaitEvent>>,
    async_allowed: AtomicBool,
    fail_timer: AtomicBool,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            async_allowed: AtomicBool::new(true),
            fail_timer: AtomicBool::new(false),
        }
    }

    pub fn set_async_allowed(&self, allowed: bool) {
        self.async_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Make every `set_timer` call fail with `OutOfResources`.
    pub fn set_timer_failure(&self, fail: bool) {
        self.fail_timer.store(fail, Ordering::SeqCst);
    }

    pub fn timer_calls(&self) -> Vec<(TimerEvent, TimerMode)> {
        self.timers.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<WaitEvent> {
        self.signals.lock().unwrap().clone()
    }
}

impl Platform for SimPlatform {
    fn processor_id(&self) -> u32 {
        current_processor_id()
    }

    fn stall(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }

    fn relax() {
        thread::yield_now();
    }

    fn set_timer(&self, event: TimerEvent, mode: TimerMode) -> MpResult<()> {
        if self.fail_timer.load(Ordering::SeqCst) {
            return Err(MpError::OutOfResources);
        }
        self.timers.lock().unwrap().push((event, mode));
        Ok(())
    }

    fn signal(&self, event: WaitEvent) {
        self.signals.lock().unwrap().push(event);
    }

    fn async_allowed(&self) -> bool {
        self.async_allowed.load(Ordering::SeqCst)
    }
}

// ── Page allocator ─────────────────────────────────────────────

/// Bump allocator that only does bookkeeping.
pub struct CountingAllocator {
    next: u64,
    exhausted: bool,
    allocated: Vec<(VirtAddr, usize)>,
    freed: Vec<(VirtAddr, usize)>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self {
            next: 0x4000_0000,
            exhausted: false,
            allocated: Vec::new(),
            freed: Vec::new(),
        }
    }

    /// An allocator that refuses every request.
    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Self::new()
        }
    }

    pub fn allocated_pages(&self) -> usize {
        self.allocated.iter().map(|&(_, pages)| pages).sum()
    }

    pub fn outstanding_pages(&self) -> usize {
        self.allocated_pages() - self.freed.iter().map(|&(_, pages)| pages).sum::<usize>()
    }

    pub fn freed(&self) -> Vec<(VirtAddr, usize)> {
        self.freed.clone()
    }
}

impl PageAllocator for CountingAllocator {
    fn allocate_pages(&mut self, pages: usize) -> Option<VirtAddr> {
        if self.exhausted {
            return None;
        }
        let base = VirtAddr::new(self.next);
        self.next += pages as u64 * Size4KiB::SIZE;
        self.allocated.push((base, pages));
        Some(base)
    }

    fn free_pages(&mut self, base: VirtAddr, pages: usize) {
        self.freed.push((base, pages));
    }
}

// ── Machine ────────────────────────────────────────────────────

/// Wakes the secondaries one at a time so logical indices are predictable.
struct SimStartup {
    services: Arc<MpServices<SimPlatform>>,
    secondaries: usize,
    stop: Arc<AtomicBool>,
    hold: Arc<RwLock<()>>,
    threads: Vec<JoinHandle<()>>,
    stack_tops: Vec<VirtAddr>,
    rejected: usize,
}

impl ApStartup for SimStartup {
    fn start_aps(&mut self, _common_stack_top: VirtAddr) -> MpResult<()> {
        for ordinal in 1..=self.secondaries {
            let (report, reported) = mpsc::channel();
            let services = Arc::clone(&self.services);
            let stop = Arc::clone(&self.stop);
            let hold = Arc::clone(&self.hold);

            self.threads.push(thread::spawn(move || {
                set_processor_id(SimMachine::processor_id_of(ordinal));
                let boot = services.register_secondary();
                let _ = report.send(boot);
                let Ok(boot) = boot else {
                    return;
                };
                while !stop.load(Ordering::Acquire) {
                    let running = hold.read().unwrap();
                    let ran = services.ap_poll(boot.index);
                    drop(running);
                    if !ran {
                        thread::yield_now();
                    }
                }
            }));

            match reported.recv_timeout(PATIENCE) {
                Ok(Ok(boot)) => self.stack_tops.push(boot.stack_top),
                Ok(Err(_)) => self.rejected += 1,
                Err(_) => panic!("secondary {ordinal} never reported in"),
            }
        }
        Ok(())
    }
}

/// A primary (the test thread) plus simulated secondaries.
pub struct SimMachine {
    pub services: Arc<MpServices<SimPlatform>>,
    allocator: CountingAllocator,
    stop: Arc<AtomicBool>,
    hold: Arc<RwLock<()>>,
    threads: Vec<JoinHandle<()>>,
    stack_tops: Vec<VirtAddr>,
    rejected: usize,
}

impl SimMachine {
    /// Primary plus `secondaries` cores, all of which fit.
    pub fn boot(secondaries: usize) -> Self {
        Self::with_config(MpConfig::new(secondaries + 1, 0x1000), secondaries)
    }

    /// Bring up `secondaries` cores under `config`; the calling thread
    /// becomes the primary.
    pub fn with_config(config: MpConfig, secondaries: usize) -> Self {
        init_logging();
        set_processor_id(Self::processor_id_of(0));

        let mut allocator = CountingAllocator::new();
        let services = Arc::new(MpServices::new(SimPlatform::new(), config, &mut allocator).unwrap());
        let mut startup = SimStartup {
            services: Arc::clone(&services),
            secondaries,
            stop: Arc::new(AtomicBool::new(false)),
            hold: Arc::new(RwLock::new(())),
            threads: Vec::new(),
            stack_tops: Vec::new(),
            rejected: 0,
        };
        services.start_aps(&mut startup, &mut allocator).unwrap();

        Self {
            services,
            allocator,
            stop: startup.stop,
            hold: startup.hold,
            threads: startup.threads,
            stack_tops: startup.stack_tops,
            rejected: startup.rejected,
        }
    }

    /// Hardware id of the core bring-up registers at logical `index`.
    pub fn processor_id_of(index: usize) -> u32 {
        index as u32 * 2
    }

    pub fn allocator(&self) -> &CountingAllocator {
        &self.allocator
    }

    pub fn stack_tops(&self) -> &[VirtAddr] {
        &self.stack_tops
    }

    pub fn rejected_secondaries(&self) -> usize {
        self.rejected
    }

    /// Keep every secondary out of its poll loop while the guard lives.
    pub fn hold_secondaries(&self) -> RwLockWriteGuard<'_, ()> {
        self.hold.write().unwrap()
    }

    /// Drive `event` like the platform timer would until `wait` is signalled.
    pub fn tick_until_signaled(&self, event: TimerEvent, wait: WaitEvent) {
        let poll = Duration::from_micros(self.services.config().poll_interval_us);
        let started = Instant::now();
        while !self.services.platform().signals().contains(&wait) {
            assert!(started.elapsed() < PATIENCE, "{wait:?} never signalled by {event:?}");
            self.services.on_timer(event);
            thread::sleep(poll);
        }
    }

    /// Wait until the core at `index` reaches `state`.
    pub fn wait_for_state(&self, index: usize, state: CoreState) {
        let record = self.services.registry.get(index).unwrap();
        let started = Instant::now();
        while record.state() != state {
            assert!(started.elapsed() < PATIENCE, "core {index} never reached {state:?}");
            thread::yield_now();
        }
    }
}

impl Drop for SimMachine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}
