//! Hart bring-up and parking.
//!
//! Every hart enters through [`online`]. The hart that claims record 0
//! owns the one-time platform setup (controller, IPI path, timer) and
//! waits for late secondaries before running the payload entry; the rest
//! park in a `wfi` loop and only ever leave it through a wakeup IPI.

use crate::arch;
use crate::config;
use crate::error::ConfigError;
use crate::hart::{self, StateFlags};
use crate::trap::Hooks;
use crate::{ipi, irq, timer, trap};

/// Polls of the registration counter without growth before the boot hart
/// stops waiting for more secondaries.
const STABLE_POLLS: usize = 1024;

/// Bring the calling hart into the runtime. Must be entered with a valid
/// stack and `mhartid` in hand; never returns.
///
/// The boot hart (whoever claims record 0) runs `entry` once the
/// secondaries have settled. Secondaries park and wait for
/// [`crate::ipi::wake_with_addr`].
pub fn online<H: Hooks>(hart_id: u64, entry: fn(u64, u64) -> !) -> ! {
    arch::disable_interrupts();
    let Some(hs) = hart::register_self(hart_id) else {
        log::error!("no hart record left for hart {hart_id}");
        hang();
    };
    trap::install_hooks::<H>();
    trap::install();

    // Capability probing may take recoverable faults; the trap path
    // records them on our own record and skips past.
    hs.set_caps(trap::hooks().probe_capabilities(hs));
    trap::hooks().init_virtual_memory(hs);

    match irq::resolve_target(&config::INTC_MAP, hart_id) {
        Some(i) => hs.set_map_index(Some(i)),
        None => {
            // The hart still runs, it just cannot take device interrupts.
            log::warn!("hart {hart_id} has no interrupt-controller target");
            hs.set_map_index(None);
        }
    }

    if hs.index() == 0 {
        trap::hooks().platform_init();
        if let Err(err) = platform_bring_up() {
            log::error!("interrupt plumbing failed to come up: {err}");
            hs.set_error(crate::error::HartError::BootFailed);
            hang();
        }
    }

    #[cfg(feature = "aplic-msi")]
    {
        ipi::imsic::setup_local_file();
        // Identities routed to this file before we were up never got
        // their toggle IPI; enable them now.
        if let Some(mi) = hs.map_index() {
            for src in irq::IRQ_SOURCES
                .iter()
                .filter(|s| usize::from(s.target) == mi)
            {
                if src.priority != irq::Priority::Disabled {
                    ipi::imsic::local_enable(src.identity, true);
                }
            }
        }
    }

    arch::enable_software_irq();
    if hs.map_index().is_some() || cfg!(feature = "aplic-msi") {
        arch::enable_external_irq();
    }
    hs.set_flags(StateFlags::READY);
    hs.sample_cycles();
    arch::enable_interrupts();

    if hs.index() == 0 {
        let settled = settle(hart::count, config::MAX_HARTS, STABLE_POLLS);
        let joined = confirm_joined(settled);
        log::info!("{joined} hart(s) online, hart {hart_id} entering payload");
        hs.set_flags(StateFlags::RUNNING);
        entry(hart_id, 0)
    } else {
        park()
    }
}

fn platform_bring_up() -> Result<(), ConfigError> {
    irq::validate_targets(&config::INTC_MAP)?;
    // The notification path first: controller init on the message backend
    // pushes identity toggles through it.
    ipi::init();
    timer::init();
    irq::init()
}

/// Wait for the registration count to reach `max` or to stop growing for
/// `stable_polls` consecutive polls. Returns the settled count.
fn settle<F: FnMut() -> usize>(mut count: F, max: usize, stable_polls: usize) -> usize {
    let mut last = count();
    let mut stable = 0;
    while last < max && stable < stable_polls {
        arch::pause();
        let now = count();
        if now == last {
            stable += 1;
        } else {
            last = now;
            stable = 0;
        }
    }
    last
}

/// Check that every record the barrier counted finished bring-up. The
/// registration counter is bumped before the record is filled in, so a
/// hart that stalled between the two is counted but never became ready;
/// secondaries are best effort, so the count is truncated at the first
/// such record rather than waiting for it.
fn confirm_joined(settled: usize) -> usize {
    for idx in 0..settled {
        let ready = hart::by_index(idx).is_some_and(|h| {
            h.flags()
                .contains(StateFlags::REGISTERED | StateFlags::READY)
        });
        if !ready {
            log::warn!(
                "hart record {idx} never became ready, keeping {idx} of {settled}"
            );
            hart::truncate_count(idx);
            return idx;
        }
    }
    settled
}

/// Park until an IPI redirects us somewhere else. The wakeup never comes
/// back here: the IPI handler replaces the return address of the trap.
fn park() -> ! {
    loop {
        arch::wait_for_interrupt();
    }
}

/// Park permanently with interrupts off. Terminal state for harts that
/// failed bring-up or took a fatal trap.
pub fn hang() -> ! {
    arch::disable_interrupts();
    loop {
        arch::wait_for_interrupt();
    }
}
