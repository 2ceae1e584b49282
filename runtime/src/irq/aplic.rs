//! Advanced platform-level interrupt controller.
//!
//! Two delivery modes share one register map: direct delivery raises the
//! external-interrupt wire of a per-hart IDC structure, MSI delivery writes
//! interrupt identities into per-hart IMSIC files. The mode is a type
//! parameter so a build carries exactly one and the other compiles away.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config;
use crate::error::ConfigError;
#[cfg(any(feature = "aplic-msi", test))]
use crate::hart;
use crate::hart::HartState;
#[cfg(any(feature = "aplic-msi", test))]
use crate::ipi;
use crate::mmio::MmioRegion;

use super::{
    InterruptController, IrqSourceMapping, IrqTarget, IrqTargetMapping, Priority,
    TriggerMode,
};

const DOMAINCFG: usize = 0x0000;
const DOMAINCFG_IE: u32 = 1 << 8;
const DOMAINCFG_DM: u32 = 1 << 2;

const SOURCECFG_BASE: usize = 0x0004;
const SM_INACTIVE: u32 = 0;
const SM_DETACHED: u32 = 1;
const SM_EDGE_RISE: u32 = 4;
const SM_EDGE_FALL: u32 = 5;
const SM_LEVEL_HIGH: u32 = 6;
const SM_LEVEL_LOW: u32 = 7;

#[cfg(any(feature = "aplic-msi", test))]
const MMSIADDRCFG: usize = 0x1BC0;
#[cfg(any(feature = "aplic-msi", test))]
const MMSIADDRCFGH: usize = 0x1BC4;
#[cfg(any(feature = "aplic-msi", test))]
const MSIADDRCFGH_LOCK: u32 = 1 << 31;

const SETIENUM: usize = 0x1EDC;
const CLRIE_BASE: usize = 0x1F00;
const CLRIENUM: usize = 0x1FDC;

const TARGET_BASE: usize = 0x3004;

const IDC_BASE: usize = 0x4000;
const IDC_STRIDE: usize = 32;
const IDC_IDELIVERY: usize = 0x00;
const IDC_ITHRESHOLD: usize = 0x08;
const IDC_CLAIMI: usize = 0x1C;

/// Threshold value that gates every priority (nothing is numerically
/// below the highest priority, 1).
const THRESHOLD_SHUT: u32 = 1;
/// Threshold disabled; everything delivers.
const THRESHOLD_OPEN: u32 = 0;

mod sealed {
    pub trait Sealed {}
}

/// Delivery mode of an [`Aplic`] instance.
pub trait DeliveryMode: sealed::Sealed + 'static {}

/// Wire delivery through per-hart IDC structures.
pub struct DirectDelivery;
/// Message-signaled delivery into IMSIC interrupt files.
pub struct MsiDelivery;

impl sealed::Sealed for DirectDelivery {}
impl sealed::Sealed for MsiDelivery {}
impl DeliveryMode for DirectDelivery {}
impl DeliveryMode for MsiDelivery {}

pub struct Aplic<D: DeliveryMode> {
    regs: MmioRegion,
    sources: &'static [IrqSourceMapping],
    targets: &'static [IrqTargetMapping],
    /// Numerically largest (lowest) priority the implementation holds,
    /// probed at init. Direct mode only; 0 until probed.
    min_priority: AtomicU32,
    _mode: PhantomData<D>,
}

impl Aplic<DirectDelivery> {
    pub const fn direct(
        regs: MmioRegion,
        sources: &'static [IrqSourceMapping],
        targets: &'static [IrqTargetMapping],
    ) -> Self {
        Self::new(regs, sources, targets)
    }
}

#[cfg(any(feature = "aplic-msi", test))]
impl Aplic<MsiDelivery> {
    pub const fn msi(
        regs: MmioRegion,
        sources: &'static [IrqSourceMapping],
        targets: &'static [IrqTargetMapping],
    ) -> Self {
        Self::new(regs, sources, targets)
    }
}

impl<D: DeliveryMode> Aplic<D> {
    const fn new(
        regs: MmioRegion,
        sources: &'static [IrqSourceMapping],
        targets: &'static [IrqTargetMapping],
    ) -> Self {
        Self {
            regs,
            sources,
            targets,
            min_priority: AtomicU32::new(0),
            _mode: PhantomData,
        }
    }

    fn sourcecfg(identity: u16) -> usize {
        SOURCECFG_BASE + (usize::from(identity) - 1) * 4
    }

    fn target(identity: u16) -> usize {
        TARGET_BASE + (usize::from(identity) - 1) * 4
    }

    fn idc(context: u32, reg: usize) -> usize {
        IDC_BASE + IDC_STRIDE * context as usize + reg
    }

    fn source_mode(trigger: TriggerMode) -> u32 {
        match trigger {
            TriggerMode::EdgeRising => SM_EDGE_RISE,
            TriggerMode::EdgeFalling => SM_EDGE_FALL,
            TriggerMode::LevelHigh => SM_LEVEL_HIGH,
            TriggerMode::LevelLow => SM_LEVEL_LOW,
        }
    }

    fn source_of(&self, identity: u16) -> Option<&'static IrqSourceMapping> {
        self.sources.iter().find(|s| s.identity == identity)
    }

    fn check_span(&self) -> Result<(), ConfigError> {
        self.regs
            .base()
            .checked_add(Self::idc(self.targets.len() as u32, IDC_CLAIMI))
            .ok_or(ConfigError::AddressOverflow)?;
        Ok(())
    }

    /// Deactivate every source and drop every enable bit.
    fn sweep_sources(&self) {
        for id in 1..config::NUM_IRQ_SOURCES {
            self.regs.write32(Self::sourcecfg(id as u16), SM_INACTIVE);
        }
        for word in 0..config::NUM_IRQ_SOURCES.div_ceil(32) {
            self.regs.write32(CLRIE_BASE + word * 4, u32::MAX);
        }
    }
}

impl Aplic<DirectDelivery> {
    /// Discover how many priority bits the implementation holds: write an
    /// all-ones priority through a detached source's target register and
    /// read back what stuck. Smaller number means higher priority.
    fn probe_min_priority(&self) -> u32 {
        self.regs.write32(Self::sourcecfg(1), SM_DETACHED);
        self.regs.write32(Self::target(1), 0xFF);
        let probed = self.regs.read32(Self::target(1)) & 0xFF;
        // Leave nothing of the probe behind.
        self.regs.write32(Self::target(1), 0);
        self.regs.write32(Self::sourcecfg(1), SM_INACTIVE);
        probed.max(1)
    }

    fn native_priority(&self, p: Priority) -> u32 {
        let min = self.min_priority.load(Ordering::Relaxed);
        match p {
            // Disabled sources never reach arbitration; park them lowest.
            Priority::Disabled | Priority::Low => min,
            Priority::Medium => (min + 1) / 2,
            Priority::High => 1,
        }
    }

    fn delivery_context(&self, target: u16) -> Result<u32, ConfigError> {
        match self.targets.get(usize::from(target)).map(|t| t.target) {
            Some(IrqTarget::DeliveryContext(c)) => Ok(c),
            _ => Err(ConfigError::UnmappedTarget(target)),
        }
    }
}

impl InterruptController for Aplic<DirectDelivery> {
    fn init(&self) -> Result<(), ConfigError> {
        self.check_span()?;
        // Domain off while reconfiguring.
        self.regs.write32(DOMAINCFG, 0);

        let min = self.probe_min_priority();
        self.min_priority.store(min, Ordering::Relaxed);
        log::debug!("aplic: lowest implemented priority is {min}");

        self.sweep_sources();
        for t in self.targets {
            if let IrqTarget::DeliveryContext(c) = t.target {
                self.regs.write32(Self::idc(c, IDC_IDELIVERY), 0);
                self.regs.write32(Self::idc(c, IDC_ITHRESHOLD), THRESHOLD_SHUT);
            }
        }

        for src in self.sources {
            let context = self.delivery_context(src.target)?;
            if src.priority != Priority::Disabled {
                self.enable(src.identity);
            }
            log::debug!(
                "aplic: source {} ({}) -> idc {context}, priority {:?}",
                src.identity,
                src.name,
                src.priority
            );
        }
        self.regs.write32(DOMAINCFG, DOMAINCFG_IE);
        Ok(())
    }

    fn enable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("aplic: enable of unknown source {identity}");
            return;
        };
        let Ok(context) = self.delivery_context(src.target) else {
            return;
        };
        self.regs
            .write32(Self::sourcecfg(identity), Self::source_mode(src.trigger));
        self.regs.write32(
            Self::target(identity),
            context << 18 | self.native_priority(src.priority),
        );
        self.regs.write32(SETIENUM, u32::from(identity));
        self.regs.write32(Self::idc(context, IDC_ITHRESHOLD), THRESHOLD_OPEN);
        self.regs.write32(Self::idc(context, IDC_IDELIVERY), 1);
    }

    fn disable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("aplic: disable of unknown source {identity}");
            return;
        };
        let Ok(context) = self.delivery_context(src.target) else {
            return;
        };
        self.regs.write32(CLRIENUM, u32::from(identity));
        self.regs.write32(Self::sourcecfg(identity), SM_INACTIVE);
        // Park the target at the lowest priority so a re-enable rewrites
        // it from the table.
        self.regs.write32(
            Self::target(identity),
            context << 18 | self.min_priority.load(Ordering::Relaxed),
        );
    }

    fn dispatch(&self, hs: &HartState, _claimed: u16) {
        let Some(mi) = hs.map_index() else {
            log::warn!(
                "aplic: external interrupt on unmapped hart {}",
                hs.hart_id()
            );
            return;
        };
        let Some(IrqTarget::DeliveryContext(context)) =
            self.targets.get(mi).map(|t| t.target)
        else {
            return;
        };

        // Reading claimi retires the interrupt at the IDC.
        let claimi = self.regs.read32(Self::idc(context, IDC_CLAIMI));
        let identity = (claimi >> 16) as u16;
        if identity == 0 {
            log::warn!(
                "aplic: spurious external interrupt on hart {}",
                hs.hart_id()
            );
            return;
        }
        super::route(self.sources, identity);
    }
}

#[cfg(any(feature = "aplic-msi", test))]
impl Aplic<MsiDelivery> {
    fn msi_hart_index(&self, target: u16) -> Result<u32, ConfigError> {
        match self.targets.get(usize::from(target)).map(|t| t.target) {
            Some(IrqTarget::MsiHartIndex(i)) => Ok(i),
            _ => Err(ConfigError::UnmappedTarget(target)),
        }
    }

    /// Point the APLIC at the contiguous IMSIC file array and lock the
    /// address configuration. A configuration locked by earlier firmware is
    /// accepted if it already names the same files.
    fn configure_msi_addr(&self) -> Result<(), ConfigError> {
        let ppn = (config::IMSIC_BASE >> 12) as u64;
        let lhxw = (u32::BITS
            - (self.targets.len().max(1) as u32 - 1).leading_zeros())
            .min(0xF);
        let want_lo = ppn as u32;
        let want_hi = ((ppn >> 32) as u32 & 0xFFF) | lhxw << 12;

        let hi = self.regs.read32(MMSIADDRCFGH);
        if hi & MSIADDRCFGH_LOCK != 0 {
            let lo = self.regs.read32(MMSIADDRCFG);
            if lo == want_lo && hi & !MSIADDRCFGH_LOCK == want_hi {
                return Ok(());
            }
            return Err(ConfigError::IncompatibleLockedConfig);
        }

        self.regs.write32(MMSIADDRCFG, want_lo);
        self.regs.write32(MMSIADDRCFGH, want_hi | MSIADDRCFGH_LOCK);
        let lo = self.regs.read32(MMSIADDRCFG);
        let hi = self.regs.read32(MMSIADDRCFGH);
        if lo != want_lo || hi & !MSIADDRCFGH_LOCK != want_hi {
            return Err(ConfigError::MsiProgrammingFailed);
        }
        Ok(())
    }

    /// Ask the hart behind target-map entry `target` to toggle `identity`
    /// in its local interrupt file. Skipped while that hart has not
    /// resolved its mapping yet; its own bring-up scan covers the gap.
    fn push_local_toggle(&self, target: u16, identity: u16, enable: bool) {
        let wanted = Some(usize::from(target));
        if let Some(hs) = hart::all().iter().find(|h| h.map_index() == wanted) {
            ipi::configure_identity(hs.index(), identity, enable);
        }
    }
}

#[cfg(any(feature = "aplic-msi", test))]
impl InterruptController for Aplic<MsiDelivery> {
    fn init(&self) -> Result<(), ConfigError> {
        self.check_span()?;
        self.configure_msi_addr()?;
        self.regs.write32(DOMAINCFG, DOMAINCFG_DM);
        self.sweep_sources();

        for src in self.sources {
            // Surface a bad table even for sources that stay masked.
            self.msi_hart_index(src.target)?;
            if src.priority != Priority::Disabled {
                self.enable(src.identity);
            }
        }
        self.regs.write32(DOMAINCFG, DOMAINCFG_IE | DOMAINCFG_DM);
        Ok(())
    }

    fn enable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("aplic: enable of unknown source {identity}");
            return;
        };
        let Ok(hart_index) = self.msi_hart_index(src.target) else {
            return;
        };
        self.regs
            .write32(Self::sourcecfg(identity), Self::source_mode(src.trigger));
        // In MSI mode the target register carries the identity the file
        // receives, not a priority.
        self.regs.write32(
            Self::target(identity),
            hart_index << 18 | u32::from(identity),
        );
        self.regs.write32(SETIENUM, u32::from(identity));
        self.push_local_toggle(src.target, identity, true);
        log::debug!(
            "aplic: source {identity} ({}) -> imsic file {hart_index}",
            src.name
        );
    }

    fn disable(&self, identity: u16) {
        let Some(src) = self.source_of(identity) else {
            log::warn!("aplic: disable of unknown source {identity}");
            return;
        };
        self.regs.write32(CLRIENUM, u32::from(identity));
        self.regs.write32(Self::sourcecfg(identity), SM_INACTIVE);
        self.push_local_toggle(src.target, identity, false);
    }

    /// The identity was already claimed at the hart's IMSIC file, so this
    /// is pure table routing.
    fn dispatch(&self, hs: &HartState, claimed: u16) {
        if claimed == 0 {
            log::warn!(
                "aplic: spurious message interrupt on hart {}",
                hs.hart_id()
            );
            return;
        }
        super::route(self.sources, claimed);
    }
}
