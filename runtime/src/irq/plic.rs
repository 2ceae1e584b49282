//! Platform-level interrupt controller (wire-routed claim/complete).

use crate::config;
use crate::error::ConfigError;
use crate::hart::HartState;
use crate::mmio::MmioRegion;

use super::{InterruptController, IrqSourceMapping, IrqTarget, IrqTargetMapping, Priority};

const PRIORITY_BASE: usize = 0x0000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_STRIDE: usize = 0x80;
const CONTEXT_BASE: usize = 0x20_0000;
const CONTEXT_STRIDE: usize = 0x1000;
const CLAIM_OFFSET: usize = 4;

/// Highest priority value the PLIC on qemu-virt implements.
const MAX_PRIORITY: u32 = 7;

pub struct Plic {
    regs: MmioRegion,
    sources: &'static [IrqSourceMapping],
    targets: &'static [IrqTargetMapping],
}

impl Plic {
    pub const fn new(
        regs: MmioRegion,
        sources: &'static [IrqSourceMapping],
        targets: &'static [IrqTargetMapping],
    ) -> Self {
        Self {
            regs,
            sources,
            targets,
        }
    }

    /// Larger number wins arbitration; 0 keeps the source gated off.
    fn native_priority(p: Priority) -> u32 {
        match p {
            Priority::Disabled => 0,
            Priority::Low => 1,
            Priority::Medium => MAX_PRIORITY / 2 + 1,
            Priority::High => MAX_PRIORITY,
        }
    }

    fn source_of(&self, identity: u16) -> Option<&'static IrqSourceMapping> {
        self.sources.iter().find(|s| s.identity == identity)
    }

    fn context_of(&self, target: u16) -> Result<u32, ConfigError> {
        match self.targets.get(usize::from(target)).map(|t| t.target) {
            Some(IrqTarget::PlicContext(c)) => Ok(c),
            _ => Err(ConfigError::UnmappedTarget(target)),
        }
    }

    fn write_enable_bit(&self, context: u32, identity: u16, enable: bool) {
        let off = ENABLE_BASE
            + ENABLE_STRIDE * context as usize
            + (usize::from(identity) / 32) * 4;
        let bit = 1 << (identity % 32);
        let v = self.regs.read32(off);
        self.regs
            .write32(off, if enable { v | bit } else { v & !bit });
    }

    fn threshold_offset(context: u32) -> usize {
        CONTEXT_BASE + CONTEXT_STRIDE * context as usize
    }

    fn claim_offset(context: u32) -> usize {
        Self::threshold_offset(context) + CLAIM_OFFSET
    }
}

impl InterruptController for Plic {
    fn init(&self) -> Result<(), ConfigError> {
        let span = Self::claim_offset(
            self.targets
                .iter()
                .map(|t| match t.target {
                    IrqTarget::PlicContext(c) => c,
                    _ => 0,
                })
                .max()
                .unwrap_or(0),
        );
        self.regs
            .base()
            .checked_add(span)
            .ok_or(ConfigError::AddressOverflow)?;

        // Reset leftovers from earlier firmware: every source gated, every
        // mapped context masked and fully thresholded.
        for id in 1..config::NUM_IRQ_SOURCES {
            self.regs.write32(PRIORITY_BASE + id * 4, 0);
        }
        for t in self.targets {
            if let IrqTarget::PlicContext(c) = t.target {
                for word in 0..config::NUM_IRQ_SOURCES.div_ceil(32) {
                    self.regs
                        .write32(ENABLE_BASE + ENABLE_STRIDE * c as usize + word * 4, 0);
                }
                self.regs.write32(Self::threshold_offset(c), MAX_PRIORITY);
            }
        }

        for src in self.sources {
            // Surface a bad table even for sources that stay masked.
            let context = self.context_of(src.target)?;
            if src.priority != Priority::Disabled {
                self.enable(src.identity);
            }
            log::debug!(
                "plic: source {} ({}) -> context {context}, priority {:?}",
                src.identity,
                src.name,
                src.priority
            );
        }
        Ok(())
    }

    fn enable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("plic: enable of unknown source {identity}");
            return;
        };
        let Ok(context) = self.context_of(src.target) else {
            return;
        };
        self.regs.write32(
            PRIORITY_BASE + usize::from(identity) * 4,
            Self::native_priority(src.priority),
        );
        self.write_enable_bit(context, identity, true);
        // Arbitration is per-source priority only; the context accepts all.
        self.regs.write32(Self::threshold_offset(context), 0);
    }

    fn disable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("plic: disable of unknown source {identity}");
            return;
        };
        let Ok(context) = self.context_of(src.target) else {
            return;
        };
        self.write_enable_bit(context, identity, false);
        self.regs.write32(PRIORITY_BASE + usize::from(identity) * 4, 0);
    }

    fn dispatch(&self, hs: &HartState, _claimed: u16) {
        let Some(mi) = hs.map_index() else {
            log::warn!(
                "plic: external interrupt on unmapped hart {}",
                hs.hart_id()
            );
            return;
        };
        let Some(IrqTarget::PlicContext(context)) =
            self.targets.get(mi).map(|t| t.target)
        else {
            return;
        };

        let off = Self::claim_offset(context);
        let claim = self.regs.read32(off);
        if claim == 0 {
            log::warn!("plic: spurious external interrupt on hart {}", hs.hart_id());
        } else {
            super::route(self.sources, claim as u16);
        }
        // Completion is written unconditionally, spurious claims included,
        // otherwise the source stays gated at this context forever.
        self.regs.write32(off, claim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::TriggerMode;
    use core::sync::atomic::{AtomicU16, Ordering};
    use std::vec;
    use std::vec::Vec;

    const WORDS: usize = (CONTEXT_BASE + CONTEXT_STRIDE * 7) / 4;

    static HANDLED: AtomicU16 = AtomicU16::new(0);

    fn noop(_identity: u16) {}

    fn record(identity: u16) {
        HANDLED.store(identity, Ordering::SeqCst);
    }

    static SOURCES: [IrqSourceMapping; 2] = [
        IrqSourceMapping {
            name: "uart",
            identity: 10,
            priority: Priority::High,
            trigger: TriggerMode::LevelHigh,
            target: 0,
            handler: record,
        },
        IrqSourceMapping {
            name: "spare",
            identity: 33,
            priority: Priority::Disabled,
            trigger: TriggerMode::EdgeRising,
            target: 1,
            handler: noop,
        },
    ];

    static TARGETS: [IrqTargetMapping; 2] = [
        IrqTargetMapping {
            hart_id: 0,
            target: IrqTarget::PlicContext(0),
        },
        IrqTargetMapping {
            hart_id: 1,
            target: IrqTarget::PlicContext(2),
        },
    ];

    fn fixture(mem: &mut Vec<u32>) -> Plic {
        *mem = vec![0u32; WORDS];
        // SAFETY: the backing vec covers every register offset used here.
        Plic::new(
            unsafe { MmioRegion::new(mem.as_mut_ptr() as usize) },
            &SOURCES,
            &TARGETS,
        )
    }

    #[test]
    fn init_programs_priority_enable_and_threshold() {
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);
        plic.init().unwrap();

        // uart: priority 7, enabled at context 0, threshold dropped.
        assert_eq!(mem[10], MAX_PRIORITY);
        assert_eq!(mem[ENABLE_BASE / 4], 1 << 10);
        assert_eq!(mem[CONTEXT_BASE / 4], 0);
        // spare stays gated: priority 0, masked, context 2 fully thresholded.
        assert_eq!(mem[33], 0);
        assert_eq!(mem[(ENABLE_BASE + 2 * ENABLE_STRIDE + 4) / 4], 0);
        assert_eq!(mem[(CONTEXT_BASE + 2 * CONTEXT_STRIDE) / 4], MAX_PRIORITY);
    }

    #[test]
    fn init_rejects_a_target_of_the_wrong_kind() {
        static BAD_TARGETS: [IrqTargetMapping; 1] = [IrqTargetMapping {
            hart_id: 0,
            target: IrqTarget::MsiHartIndex(0),
        }];
        let mut mem = vec![0u32; WORDS];
        // SAFETY: backing vec covers the register span.
        let plic = Plic::new(
            unsafe { MmioRegion::new(mem.as_mut_ptr() as usize) },
            &SOURCES,
            &BAD_TARGETS,
        );
        assert_eq!(plic.init(), Err(ConfigError::UnmappedTarget(0)));
    }

    #[test]
    fn dispatch_claims_routes_and_completes() {
        let _guard = crate::test_lock();
        crate::hart::reset_for_test();
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);

        let hs = crate::hart::by_index(0).unwrap();
        hs.set_map_index(Some(0));

        let claim_idx = Plic::claim_offset(0) / 4;
        mem[claim_idx] = 10;
        HANDLED.store(0, Ordering::SeqCst);
        plic.dispatch(hs, 0);

        assert_eq!(HANDLED.load(Ordering::SeqCst), 10);
        // Completion wrote the claimed identity back.
        assert_eq!(mem[claim_idx], 10);
    }

    #[test]
    fn spurious_claim_is_dropped_without_dispatch() {
        let _guard = crate::test_lock();
        crate::hart::reset_for_test();
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);

        let hs = crate::hart::by_index(0).unwrap();
        hs.set_map_index(Some(0));
        HANDLED.store(0, Ordering::SeqCst);
        plic.dispatch(hs, 0);
        assert_eq!(HANDLED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_claim_is_completed_without_dispatch() {
        let _guard = crate::test_lock();
        crate::hart::reset_for_test();
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);

        let hs = crate::hart::by_index(0).unwrap();
        hs.set_map_index(Some(0));

        let claim_idx = Plic::claim_offset(0) / 4;
        mem[claim_idx] = 55;
        HANDLED.store(0, Ordering::SeqCst);
        plic.dispatch(hs, 0);

        assert_eq!(HANDLED.load(Ordering::SeqCst), 0);
        // No handler ran, but the claim was still retired.
        assert_eq!(mem[claim_idx], 55);
    }

    #[test]
    fn disable_is_idempotent() {
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);
        plic.init().unwrap();

        plic.disable(10);
        let once = mem.clone();
        plic.disable(10);
        assert_eq!(mem, once);
    }

    #[test]
    fn reenabling_restores_the_register_image() {
        let mut mem = Vec::new();
        let plic = fixture(&mut mem);
        plic.init().unwrap();
        let enabled = mem.clone();

        plic.disable(10);
        assert_ne!(mem, enabled);
        plic.enable(10);
        assert_eq!(mem, enabled);
    }
}
