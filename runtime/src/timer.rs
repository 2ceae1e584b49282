//! ACLINT MTIMER access and timed sleep.
//!
//! One free-running `mtime` counter is shared by all harts; each hart owns
//! one `mtimecmp` word, indexed by physical id. A hart sleeps by flagging
//! itself SLEEPING, arming its compare register and sitting in a `wfi`
//! loop until the timer handler (or any wakeup IPI) clears the flag.

use conquer_once::spin::OnceCell;

use crate::arch;
use crate::config;
use crate::hart::{self, HartState, StateFlags};
use crate::mmio::MmioRegion;
use crate::trap;

/// Compare value that never fires.
const DISARMED: u64 = u64::MAX;

pub struct Mtimer {
    mtime: MmioRegion,
    mtimecmp: MmioRegion,
}

impl Mtimer {
    pub const fn new(mtime: MmioRegion, mtimecmp: MmioRegion) -> Self {
        Self { mtime, mtimecmp }
    }

    /// Current tick count.
    pub fn now(&self) -> u64 {
        self.mtime.read64(0)
    }

    /// Fire the calling hart's timer interrupt at tick `deadline`.
    pub fn arm_at(&self, hs: &HartState, deadline: u64) {
        self.mtimecmp.write64(hs.hart_id() as usize * 8, deadline);
        arch::enable_timer_irq();
    }

    /// Fire after `ticks` from now.
    pub fn arm_after(&self, hs: &HartState, ticks: u64) {
        self.arm_at(hs, self.now().saturating_add(ticks));
    }

    /// Park the calling hart's compare register.
    pub fn disarm(&self, hs: &HartState) {
        self.mtimecmp.write64(hs.hart_id() as usize * 8, DISARMED);
        arch::disable_timer_irq();
    }
}

static TIMER: OnceCell<Mtimer> = OnceCell::uninit();

/// Map the MTIMER registers. Called once on the boot hart.
pub fn init() {
    TIMER.get_or_init(|| {
        // SAFETY: the platform constants name the MTIMER register words.
        unsafe {
            Mtimer::new(
                MmioRegion::new(config::MTIME_BASE),
                MmioRegion::new(config::MTIMECMP_BASE),
            )
        }
    });
}

fn timer() -> &'static Mtimer {
    TIMER.get().expect("timer accessed before init")
}

pub fn now() -> u64 {
    timer().now()
}

/// Ticks per millisecond on this platform.
pub const fn ticks_per_ms() -> u64 {
    config::MTIMER_FREQ / 1000
}

/// Sleep until the timer reaches `deadline`. Returns early if some other
/// interrupt (typically a wakeup IPI) clears the SLEEPING flag first.
pub fn sleep_until(deadline: u64) {
    let hs = hart::current();
    hs.clear_flags(StateFlags::RUNNING);
    hs.set_flags(StateFlags::SLEEPING);
    timer().arm_at(hs, deadline);
    arch::enable_interrupts();
    while hs.flags().contains(StateFlags::SLEEPING) {
        arch::wait_for_interrupt();
    }
    timer().disarm(hs);
    hs.set_flags(StateFlags::RUNNING);
}

/// Sleep for `ticks` from now.
pub fn sleep_ticks(ticks: u64) {
    sleep_until(now().saturating_add(ticks));
}

/// Machine timer interrupt entry point.
///
/// A firing while SLEEPING ends the sleep. A firing nobody asked for goes
/// to the embedder's timer hook instead.
pub fn handle_interrupt(hs: &HartState) {
    handle_with(timer(), hs);
}

fn handle_with(t: &Mtimer, hs: &HartState) {
    t.disarm(hs);
    if !hs.test_and_clear_flags(StateFlags::SLEEPING) {
        trap::hooks().on_timer(hs);
    }
}
