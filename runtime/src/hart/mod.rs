//! Per-hart state records.
//!
//! One statically allocated [`HartState`] record exists per possible hart.
//! Trap handlers, IPI senders and the lifecycle code all talk to the same
//! bank, so every field is an atomic and the record itself is never moved
//! or locked. A hart finds its own record through `mscratch`, which holds
//! the record index from the moment the hart registers itself.

pub mod lifecycle;

use core::sync::atomic::{
    AtomicI32, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

use bitflags::bitflags;

use crate::arch;
use crate::config::MAX_HARTS;
use crate::error::HartError;

bitflags! {
    /// Lifecycle flags of a hart record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u16 {
        /// The record is claimed by a hart; `hart_id` is valid.
        const REGISTERED = 1 << 0;
        /// Interrupt plumbing is up; the hart can take IPIs.
        const READY = 1 << 1;
        /// The hart is executing payload code.
        const RUNNING = 1 << 2;
        /// The hart is parked in a `wfi` loop waiting for a wakeup.
        const SLEEPING = 1 << 3;
    }
}

bitflags! {
    /// Inter-processor interrupt reasons, posted as a bitset so that
    /// concurrent senders union rather than overwrite.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Reason: u16 {
        /// Redirect the target hart to the address in its wakeup slot.
        const WAKE_WITH_ADDR = 1 << 0;
        /// Enable the identities staged in the target's identity bitmaps.
        const ENABLE_IDENTITY = 1 << 1;
        /// Disable the identities staged in the target's identity bitmaps.
        const DISABLE_IDENTITY = 1 << 2;
    }
}

// One bit per interrupt identity in the staging bitmaps below.
const _: () = assert!(crate::config::NUM_IRQ_SOURCES <= 64);

/// State record of a single hart. All fields are independently atomic;
/// in particular the IPI bitset and the lifecycle flags are separate words,
/// so posting a reason can never clobber a concurrent flag update.
#[derive(Debug)]
pub struct HartState {
    /// Physical hart id (`mhartid`), valid once REGISTERED is set.
    hart_id: AtomicU64,
    /// Resolved index into the interrupt-target map, -1 if unmapped.
    map_index: AtomicI32,
    /// Sticky first error, as a [`HartError`] raw code. Zero means none.
    error: AtomicU32,
    /// Pending IPI reasons ([`Reason`] bits).
    pending: AtomicU16,
    /// Lifecycle flags ([`StateFlags`] bits).
    flags: AtomicU16,
    /// Cycle counter sampled at the last accounting point.
    last_cycle: AtomicU64,
    /// Capability word filled in by the platform probe hook.
    caps: AtomicUsize,
    /// Wakeup redirect target; the trampoline jumps here.
    wake_addr: AtomicUsize,
    wake_arg0: AtomicU64,
    wake_arg1: AtomicU64,
    /// Set when `wake_arg0`/`wake_arg1` carry caller-provided values.
    wake_args_set: AtomicU32,
    /// Deadline in timer ticks the woken hart sleeps until, 0 for none.
    wake_deadline: AtomicU64,
    /// Pending hart-local identity toggles, one bit per identity. Two
    /// bitmaps instead of one slot, so toggles for different identities
    /// coalesced into one delivery never overwrite each other.
    identity_enable: AtomicU64,
    identity_disable: AtomicU64,
}

impl HartState {
    pub const fn new() -> Self {
        Self {
            hart_id: AtomicU64::new(0),
            map_index: AtomicI32::new(-1),
            error: AtomicU32::new(0),
            pending: AtomicU16::new(0),
            flags: AtomicU16::new(0),
            last_cycle: AtomicU64::new(0),
            caps: AtomicUsize::new(0),
            wake_addr: AtomicUsize::new(0),
            wake_arg0: AtomicU64::new(0),
            wake_arg1: AtomicU64::new(0),
            wake_args_set: AtomicU32::new(0),
            wake_deadline: AtomicU64::new(0),
            identity_enable: AtomicU64::new(0),
            identity_disable: AtomicU64::new(0),
        }
    }

    /// Index of this record in the bank.
    pub fn index(&self) -> usize {
        let base = HARTS.as_ptr() as usize;
        (self as *const Self as usize - base) / core::mem::size_of::<Self>()
    }

    pub fn hart_id(&self) -> u64 {
        self.hart_id.load(Ordering::Acquire)
    }

    pub fn map_index(&self) -> Option<usize> {
        usize::try_from(self.map_index.load(Ordering::Acquire)).ok()
    }

    pub fn set_map_index(&self, idx: Option<usize>) {
        let v = idx.map_or(-1, |i| i as i32);
        self.map_index.store(v, Ordering::Release);
    }

    pub fn flags(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: StateFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: StateFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Clear `flags` and report whether any of them were set.
    pub fn test_and_clear_flags(&self, flags: StateFlags) -> bool {
        let prev = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        prev & flags.bits() != 0
    }

    /// Union `reasons` into the pending IPI bitset. Release ordering makes
    /// the wakeup slot writes that precede a post visible to the consumer.
    pub fn post(&self, reasons: Reason) {
        self.pending.fetch_or(reasons.bits(), Ordering::Release);
    }

    /// Atomically drain the pending IPI bitset. Each posted reason is
    /// observed by exactly one drain.
    pub fn take_pending(&self) -> Reason {
        Reason::from_bits_truncate(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Record the first error a hart hits; later errors are dropped.
    pub fn set_error(&self, err: HartError) {
        let _ = self.error.compare_exchange(
            0,
            err.to_raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn error(&self) -> Option<HartError> {
        HartError::from_raw(self.error.load(Ordering::Acquire))
    }

    pub fn caps(&self) -> usize {
        self.caps.load(Ordering::Acquire)
    }

    pub fn set_caps(&self, caps: usize) {
        self.caps.store(caps, Ordering::Release);
    }

    /// Accumulate the cycle counter into the accounting field and return
    /// the delta since the previous sample.
    pub fn sample_cycles(&self) -> u64 {
        let now = arch::read_cycle();
        let prev = self.last_cycle.swap(now, Ordering::AcqRel);
        now.wrapping_sub(prev)
    }

    /// Stage a wakeup request in this record. Must be followed by a
    /// [`Reason::WAKE_WITH_ADDR`] post, whose release store publishes it.
    pub fn stage_wakeup(&self, addr: usize, args: Option<(u64, u64)>, deadline: u64) {
        self.wake_addr.store(addr, Ordering::Relaxed);
        match args {
            Some((a0, a1)) => {
                self.wake_arg0.store(a0, Ordering::Relaxed);
                self.wake_arg1.store(a1, Ordering::Relaxed);
                self.wake_args_set.store(1, Ordering::Relaxed);
            }
            None => self.wake_args_set.store(0, Ordering::Relaxed),
        }
        self.wake_deadline.store(deadline, Ordering::Relaxed);
    }

    /// Read back a staged wakeup: (addr, args, deadline). Args fall back
    /// to (hart id, 0) when the sender did not provide any.
    pub fn wakeup(&self) -> (usize, (u64, u64), u64) {
        let addr = self.wake_addr.load(Ordering::Relaxed);
        let args = if self.wake_args_set.load(Ordering::Relaxed) != 0 {
            (
                self.wake_arg0.load(Ordering::Relaxed),
                self.wake_arg1.load(Ordering::Relaxed),
            )
        } else {
            (self.hart_id(), 0)
        };
        (addr, args, self.wake_deadline.load(Ordering::Relaxed))
    }

    /// Stage a hart-local identity toggle; pairs with ENABLE_IDENTITY or
    /// DISABLE_IDENTITY posts. The opposite bitmap is cleared first, so
    /// the last request for an identity wins.
    pub fn stage_identity(&self, eiid: u16, enable: bool) {
        if usize::from(eiid) >= crate::config::NUM_IRQ_SOURCES {
            log::warn!("identity {eiid} out of staging range, toggle dropped");
            return;
        }
        let bit = 1u64 << eiid;
        if enable {
            self.identity_disable.fetch_and(!bit, Ordering::Relaxed);
            self.identity_enable.fetch_or(bit, Ordering::Relaxed);
        } else {
            self.identity_enable.fetch_and(!bit, Ordering::Relaxed);
            self.identity_disable.fetch_or(bit, Ordering::Relaxed);
        }
    }

    /// Drain every staged identity toggle as (enable, disable) bitmaps.
    pub fn take_identities(&self) -> (u64, u64) {
        (
            self.identity_enable.swap(0, Ordering::Relaxed),
            self.identity_disable.swap(0, Ordering::Relaxed),
        )
    }
}

static HARTS: [HartState; MAX_HARTS] = [const { HartState::new() }; MAX_HARTS];

/// Highest record index handed out so far, plus one. Starts at one because
/// the boot hart exists before anything registers.
static REGISTERED: AtomicU32 = AtomicU32::new(0);

/// All hart records, registered or not.
pub fn all() -> &'static [HartState; MAX_HARTS] {
    &HARTS
}

pub fn by_index(idx: usize) -> Option<&'static HartState> {
    HARTS.get(idx)
}

/// Number of registered harts. Never less than one.
pub fn count() -> usize {
    REGISTERED.load(Ordering::Acquire).max(1) as usize
}

/// Drop the registered count to `n`. The boot hart uses this when a record
/// counted by the barrier turns out not to have finished bring-up.
pub(crate) fn truncate_count(n: usize) {
    REGISTERED.store(n as u32, Ordering::Release);
}

/// Claim the next free record for the calling hart and point `mscratch`
/// at it. Returns `None` once the bank is exhausted.
pub fn register_self(hart_id: u64) -> Option<&'static HartState> {
    let idx = REGISTERED.fetch_add(1, Ordering::AcqRel) as usize;
    let Some(hs) = HARTS.get(idx) else {
        // Leave the counter clamped so count() stays in range.
        REGISTERED.store(MAX_HARTS as u32, Ordering::Release);
        return None;
    };
    hs.hart_id.store(hart_id, Ordering::Release);
    hs.set_flags(StateFlags::REGISTERED);
    arch::write_mscratch(idx);
    Some(hs)
}

/// The calling hart's record, via the index parked in `mscratch`.
pub fn current() -> &'static HartState {
    &HARTS[arch::read_mscratch() % MAX_HARTS]
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    use core::sync::atomic::Ordering;

    REGISTERED.store(0, Ordering::Release);
    for hs in &HARTS {
        hs.hart_id.store(0, Ordering::Release);
        hs.map_index.store(-1, Ordering::Release);
        hs.error.store(0, Ordering::Release);
        hs.pending.store(0, Ordering::Release);
        hs.flags.store(0, Ordering::Release);
        hs.last_cycle.store(0, Ordering::Release);
        hs.caps.store(0, Ordering::Release);
        hs.wake_addr.store(0, Ordering::Release);
        hs.wake_arg0.store(0, Ordering::Release);
        hs.wake_arg1.store(0, Ordering::Release);
        hs.wake_args_set.store(0, Ordering::Release);
        hs.wake_deadline.store(0, Ordering::Release);
        hs.identity_enable.store(0, Ordering::Release);
        hs.identity_disable.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_lock;

    #[test]
    fn record_index_matches_bank_position() {
        let _guard = test_lock();
        for (i, hs) in all().iter().enumerate() {
            assert_eq!(hs.index(), i);
        }
    }

    #[test]
    fn registration_claims_records_in_order() {
        let _guard = test_lock();
        reset_for_test();
        crate::arch::mock::reset();

        let a = register_self(0).unwrap();
        let b = register_self(3).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(b.hart_id(), 3);
        assert!(b.flags().contains(StateFlags::REGISTERED));
        assert_eq!(count(), 2);
        // mscratch now names the most recent registrant.
        assert_eq!(current().index(), 1);
    }

    #[test]
    fn registration_past_the_bank_is_refused() {
        let _guard = test_lock();
        reset_for_test();
        crate::arch::mock::reset();

        for i in 0..MAX_HARTS {
            assert!(register_self(i as u64).is_some());
        }
        assert!(register_self(99).is_none());
        assert_eq!(count(), MAX_HARTS);
    }

    #[test]
    fn count_is_never_zero() {
        let _guard = test_lock();
        reset_for_test();
        assert_eq!(count(), 1);
    }

    #[test]
    fn posted_reasons_union_and_drain_once() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        hs.post(Reason::WAKE_WITH_ADDR);
        hs.post(Reason::ENABLE_IDENTITY);
        assert_eq!(
            hs.take_pending(),
            Reason::WAKE_WITH_ADDR | Reason::ENABLE_IDENTITY
        );
        assert_eq!(hs.take_pending(), Reason::empty());
    }

    #[test]
    fn concurrent_posts_are_never_lost() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        // Reasons posted from many threads racing a draining consumer must
        // each be observed exactly once.
        let drained = std::sync::atomic::AtomicU16::new(0);
        std::thread::scope(|s| {
            for reason in [
                Reason::WAKE_WITH_ADDR,
                Reason::ENABLE_IDENTITY,
                Reason::DISABLE_IDENTITY,
            ] {
                s.spawn(move || {
                    for _ in 0..1000 {
                        hs.post(reason);
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..5000 {
                    drained.fetch_or(
                        hs.take_pending().bits(),
                        Ordering::Relaxed,
                    );
                }
            });
        });
        drained.fetch_or(hs.take_pending().bits(), Ordering::Relaxed);
        assert_eq!(
            Reason::from_bits_truncate(drained.load(Ordering::Relaxed)),
            Reason::WAKE_WITH_ADDR | Reason::ENABLE_IDENTITY | Reason::DISABLE_IDENTITY
        );
    }

    #[test]
    fn posting_does_not_disturb_lifecycle_flags() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        hs.set_flags(StateFlags::READY | StateFlags::SLEEPING);
        hs.post(Reason::WAKE_WITH_ADDR);
        assert_eq!(hs.flags(), StateFlags::READY | StateFlags::SLEEPING);
        hs.take_pending();
        assert_eq!(hs.flags(), StateFlags::READY | StateFlags::SLEEPING);
    }

    #[test]
    fn first_error_sticks() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        assert_eq!(hs.error(), None);
        hs.set_error(HartError::OutOfMemory);
        hs.set_error(HartError::BootFailed);
        assert_eq!(hs.error(), Some(HartError::OutOfMemory));
    }

    #[test]
    fn wakeup_args_default_to_hart_id() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();
        hs.hart_id.store(7, Ordering::Release);

        hs.stage_wakeup(0x8020_0000, None, 0);
        assert_eq!(hs.wakeup(), (0x8020_0000, (7, 0), 0));

        hs.stage_wakeup(0x8020_0000, Some((11, 22)), 500);
        assert_eq!(hs.wakeup(), (0x8020_0000, (11, 22), 500));
    }

    #[test]
    fn identity_requests_round_trip_and_drain() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        assert_eq!(hs.take_identities(), (0, 0));
        hs.stage_identity(42, true);
        assert_eq!(hs.take_identities(), (1 << 42, 0));
        assert_eq!(hs.take_identities(), (0, 0));
        hs.stage_identity(42, false);
        assert_eq!(hs.take_identities(), (0, 1 << 42));
    }

    #[test]
    fn staged_identities_accumulate_per_identity() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        // Toggles for distinct identities must survive side by side.
        hs.stage_identity(4, true);
        hs.stage_identity(9, true);
        hs.stage_identity(13, false);
        assert_eq!(hs.take_identities(), ((1 << 4) | (1 << 9), 1 << 13));
    }

    #[test]
    fn last_toggle_for_an_identity_wins() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        hs.stage_identity(4, true);
        hs.stage_identity(4, false);
        assert_eq!(hs.take_identities(), (0, 1 << 4));
    }

    #[test]
    fn out_of_range_identity_is_dropped() {
        let _guard = test_lock();
        reset_for_test();
        let hs = by_index(0).unwrap();

        hs.stage_identity(crate::config::NUM_IRQ_SOURCES as u16, true);
        assert_eq!(hs.take_identities(), (0, 0));
    }
}
