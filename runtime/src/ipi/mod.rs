//! Inter-processor interrupts.
//!
//! A sender ORs its reasons into the target's pending bitset and then
//! issues exactly one hardware notification. The receiving hart's software
//! interrupt (or message claim) lands in [`handle`], which drains the
//! bitset and acts on every reason it finds, so posts that raced the
//! notification are still picked up by the one delivery.

pub mod imsic;
pub mod mswi;

use conquer_once::spin::OnceCell;

use crate::arch;
use crate::config;
use crate::error::HartError;
use crate::hart::{self, HartState, Reason, StateFlags};
use crate::mmio::MmioRegion;
use crate::timer;

pub use imsic::ImsicIpi;
pub use mswi::Mswi;

mod sealed {
    pub trait Sealed {}
}

/// Hardware notification mechanism behind [`send`]. Exactly one
/// implementation is active per build, matching the controller backend.
pub trait IpiSender: sealed::Sealed {
    /// Raise the target hart's software interrupt.
    fn notify(&self, target: &HartState);

    /// Drop the calling hart's own pending notification, if the mechanism
    /// does not retire it on claim.
    fn clear(&self, receiver: &HartState);
}

impl sealed::Sealed for Mswi {}
impl sealed::Sealed for ImsicIpi {}

#[cfg(any(feature = "plic", feature = "aplic-direct"))]
pub type ActiveSender = Mswi;
#[cfg(feature = "aplic-msi")]
pub type ActiveSender = ImsicIpi;

static SENDER: OnceCell<ActiveSender> = OnceCell::uninit();

/// Set up the notification path. Called once on the boot hart.
pub fn init() {
    SENDER.get_or_init(|| {
        #[cfg(any(feature = "plic", feature = "aplic-direct"))]
        // SAFETY: the platform constant names the MSWI msip array.
        let s = Mswi::new(unsafe { MmioRegion::new(config::MSWI_BASE) });
        #[cfg(feature = "aplic-msi")]
        // SAFETY: the platform constant names the IMSIC file array.
        let s = ImsicIpi::new(
            unsafe { MmioRegion::new(config::IMSIC_BASE) },
            &config::INTC_MAP,
        );
        s
    });
}

fn sender() -> &'static ActiveSender {
    SENDER.get().expect("ipi sender accessed before init")
}

/// Post `reasons` to the hart record at `target` and notify it.
pub fn send(target: usize, reasons: Reason) {
    let Some(hs) = hart::by_index(target) else {
        log::warn!("ipi to nonexistent hart record {target}");
        return;
    };
    send_to(sender(), hs, reasons);
}

/// Post `reasons` to the calling hart itself.
pub fn send_self(reasons: Reason) {
    send_to(sender(), hart::current(), reasons);
}

fn send_to(sender: &ActiveSender, hs: &HartState, reasons: Reason) {
    hs.post(reasons);
    sender.notify(hs);
}

/// Redirect `target` to `addr` once it drains its IPIs. `args` default to
/// (hart id, 0) on the receiving side; a nonzero `deadline` makes the
/// woken hart sleep until that timer tick before jumping.
pub fn wake_with_addr(target: usize, addr: usize, args: Option<(u64, u64)>, deadline: u64) {
    let Some(hs) = hart::by_index(target) else {
        log::warn!("wake of nonexistent hart record {target}");
        return;
    };
    // The staged descriptor is published by the release post in send_to.
    hs.stage_wakeup(addr, args, deadline);
    send_to(sender(), hs, Reason::WAKE_WITH_ADDR);
}

/// Wake every registered hart at `addr`, the caller last. Each target gets
/// its own wakeup descriptor, so a slow drain on one hart cannot see
/// another's arguments.
pub fn wake_all_with_addr(addr: usize, args: Option<(u64, u64)>, deadline: u64) {
    let me = hart::current().index();
    for idx in 0..hart::count() {
        if idx != me {
            wake_with_addr(idx, addr, args, deadline);
        }
    }
    wake_with_addr(me, addr, args, deadline);
}

/// Ask `target` to toggle delivery of `eiid` at its hart-local interrupt
/// file. The file's enable bits are unreachable from other harts, hence
/// the round trip. Only the message-signaled backend has interrupt files;
/// wire-routed builds compile this path out (test builds keep it, running
/// against the mock file).
#[cfg(any(feature = "aplic-msi", test))]
pub fn configure_identity(target: usize, eiid: u16, enable: bool) {
    let Some(hs) = hart::by_index(target) else {
        log::warn!("identity toggle for nonexistent hart record {target}");
        return;
    };
    // Toggles requested before the notification path exists are dropped;
    // each hart scans its own sources during bring-up anyway.
    let Some(sender) = SENDER.get() else {
        log::debug!("identity toggle for hart record {target} before ipi init");
        return;
    };
    hs.stage_identity(eiid, enable);
    let reason = if enable {
        Reason::ENABLE_IDENTITY
    } else {
        Reason::DISABLE_IDENTITY
    };
    send_to(sender, hs, reason);
}

/// Software-interrupt entry point, run on the receiving hart.
pub fn handle(hs: &HartState) {
    handle_with(sender(), hs);
}

fn handle_with(sender: &ActiveSender, hs: &HartState) {
    // Drop the doorbell before draining, so a reason posted after the
    // drain still leaves a raised wire behind it.
    sender.clear(hs);
    let reasons = hs.take_pending();

    if reasons.contains(Reason::WAKE_WITH_ADDR) {
        // The jump happens after mret, from the trampoline.
        arch::write_mepc(wake_trampoline as usize);
    }
    #[cfg(any(feature = "aplic-msi", test))]
    if reasons.intersects(Reason::ENABLE_IDENTITY | Reason::DISABLE_IDENTITY) {
        let (enable, disable) = hs.take_identities();
        if enable == 0 && disable == 0 {
            log::warn!(
                "identity toggle ipi on hart {} without a staged request",
                hs.hart_id()
            );
        }
        for eiid in 0..u64::BITS as u16 {
            if enable & (1 << eiid) != 0 {
                imsic::local_enable(eiid, true);
            } else if disable & (1 << eiid) != 0 {
                imsic::local_enable(eiid, false);
            }
        }
    }
}

/// Runs on the woken hart after the IPI handler returns, in place of the
/// interrupted code.
extern "C" fn wake_trampoline() -> ! {
    let hs = hart::current();
    let (addr, (a0, a1), deadline) = hs.wakeup();
    if addr == 0 {
        log::error!("hart {} woken without a jump target", hs.hart_id());
        hs.set_error(HartError::BootFailed);
        hart::lifecycle::hang();
    }
    if deadline != 0 {
        timer::sleep_until(deadline);
    }
    hs.clear_flags(StateFlags::SLEEPING);
    hs.set_flags(StateFlags::RUNNING);
    arch::execution_fence();
    // SAFETY: addr was staged by a caller naming a function with this
    // exact signature; the fence above made its code visible.
    let entry: fn(u64, u64) -> ! = unsafe { core::mem::transmute(addr) };
    entry(a0, a1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock;
    use crate::test_lock;
    use std::vec;
    use std::vec::Vec;

    fn fixture(mem: &mut Vec<u32>) -> Mswi {
        *mem = vec![0u32; config::MAX_HARTS];
        // SAFETY: the backing vec covers one msip word per hart.
        Mswi::new(unsafe { MmioRegion::new(mem.as_mut_ptr() as usize) })
    }

    #[cfg(feature = "plic")]
    #[test]
    fn send_posts_and_rings_exactly_one_doorbell() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        hart::register_self(1);
        let hs = hart::by_index(1).unwrap();

        send_to(&mswi, hs, Reason::WAKE_WITH_ADDR);
        send_to(&mswi, hs, Reason::ENABLE_IDENTITY);
        assert_eq!(mem[1], 1);
        assert_eq!(mem[0], 0);
        assert_eq!(
            hs.take_pending(),
            Reason::WAKE_WITH_ADDR | Reason::ENABLE_IDENTITY
        );
    }

    #[cfg(feature = "plic")]
    #[test]
    fn handler_redirects_mepc_for_a_wake() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        let hs = hart::by_index(0).unwrap();
        mem[0] = 1;

        hs.stage_wakeup(0x8020_0000, Some((1, 2)), 0);
        hs.post(Reason::WAKE_WITH_ADDR);
        mock::set_trap(0, 0x1000, 0);
        handle_with(&mswi, hs);

        assert_eq!(mock::mepc(), wake_trampoline as usize);
        // Doorbell dropped, bitset drained.
        assert_eq!(mem[0], 0);
        assert_eq!(hs.take_pending(), Reason::empty());
    }

    #[cfg(feature = "plic")]
    #[test]
    fn handler_without_a_wake_leaves_mepc_alone() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        let hs = hart::by_index(0).unwrap();
        hs.stage_identity(42, true);
        hs.post(Reason::ENABLE_IDENTITY);
        mock::set_trap(0, 0x1000, 0);
        handle_with(&mswi, hs);

        assert_eq!(mock::mepc(), 0x1000);
        assert_eq!(mock::eie_word(0), 1 << 42);
    }

    #[cfg(feature = "plic")]
    #[test]
    fn identity_disable_clears_the_enable_bit() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        let hs = hart::by_index(0).unwrap();

        hs.stage_identity(42, true);
        hs.post(Reason::ENABLE_IDENTITY);
        handle_with(&mswi, hs);
        hs.stage_identity(42, false);
        hs.post(Reason::DISABLE_IDENTITY);
        handle_with(&mswi, hs);
        assert_eq!(mock::eie_word(0), 0);
    }

    #[cfg(feature = "plic")]
    #[test]
    fn coalesced_reasons_are_all_acted_on() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        let hs = hart::by_index(0).unwrap();

        // Two sends, one delivery: the single drain must act on both.
        hs.stage_wakeup(0x8020_0000, None, 0);
        hs.stage_identity(7, true);
        hs.post(Reason::WAKE_WITH_ADDR);
        hs.post(Reason::ENABLE_IDENTITY);
        handle_with(&mswi, hs);

        assert_eq!(mock::mepc(), wake_trampoline as usize);
        assert_eq!(mock::eie_word(0), 1 << 7);
    }

    #[cfg(feature = "plic")]
    #[test]
    fn toggles_for_distinct_identities_coalesce_without_loss() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();
        let mut mem = Vec::new();
        let mswi = fixture(&mut mem);

        hart::register_self(0);
        let hs = hart::by_index(0).unwrap();

        // Two enables posted before the target drains; one delivery must
        // apply both.
        hs.stage_identity(4, true);
        hs.post(Reason::ENABLE_IDENTITY);
        hs.stage_identity(9, true);
        hs.post(Reason::ENABLE_IDENTITY);
        handle_with(&mswi, hs);

        assert_eq!(mock::eie_word(0), (1 << 4) | (1 << 9));
    }
}
