//! IMSIC message notifier and hart-local interrupt-file access.
//!
//! Cross-hart notification goes through the memory-mapped `seteipnum_le`
//! doorbell of the target's interrupt file. Everything else about a file
//! (delivery, threshold, per-identity enables) is only reachable from the
//! owning hart through the indirect CSR window, which is why enable
//! changes for a remote hart travel as IPIs instead of register writes.

#[cfg(any(feature = "aplic-msi", test))]
use crate::arch;
use crate::config;
use crate::hart::HartState;
use crate::irq::{IrqTarget, IrqTargetMapping};
use crate::mmio::MmioRegion;

use super::IpiSender;

/// Byte offset of `seteipnum_le` within an interrupt file.
const SETEIPNUM_LE: usize = 0x0;
/// log2 of the per-file register span.
const FILE_SHIFT: usize = 12;

pub struct ImsicIpi {
    files: MmioRegion,
    targets: &'static [IrqTargetMapping],
}

impl ImsicIpi {
    pub const fn new(files: MmioRegion, targets: &'static [IrqTargetMapping]) -> Self {
        Self { files, targets }
    }
}

impl IpiSender for ImsicIpi {
    fn notify(&self, target: &HartState) {
        let Some(mi) = target.map_index() else {
            log::warn!("ipi to hart {} with no interrupt file", target.hart_id());
            return;
        };
        let Some(IrqTarget::MsiHartIndex(i)) = self.targets.get(mi).map(|t| t.target)
        else {
            return;
        };
        self.files.write32(
            ((i as usize) << FILE_SHIFT) + SETEIPNUM_LE,
            u32::from(config::IPI_IDENTITY),
        );
    }

    // Claiming at the file already retired the pending bit.
    fn clear(&self, _receiver: &HartState) {}
}

/// Enable or disable delivery of `eiid` at the calling hart's file.
///
/// The `eie` array is indexed in even registers on RV64, 64 identities per
/// register.
#[cfg(any(feature = "aplic-msi", test))]
pub fn local_enable(eiid: u16, enable: bool) {
    let reg = arch::ISELECT_EIE_BASE + (u32::from(eiid) / 64) * 2;
    let bit = 1u64 << (eiid % 64);
    let v = arch::imsic_indirect_read(reg);
    arch::imsic_indirect_write(reg, if enable { v | bit } else { v & !bit });
}

/// Bring up the calling hart's interrupt file: deliver everything at or
/// above the wide-open threshold and take IPI messages from the start.
#[cfg(any(feature = "aplic-msi", test))]
pub fn setup_local_file() {
    arch::imsic_indirect_write(arch::ISELECT_EITHRESHOLD, 0);
    arch::imsic_indirect_write(arch::ISELECT_EIDELIVERY, 1);
    local_enable(config::IPI_IDENTITY, true);
}

/// Claim the highest pending identity at the calling hart's file.
/// Zero means the file had nothing pending.
#[cfg(any(feature = "aplic-msi", test))]
pub fn claim() -> u16 {
    // mtopei packs the identity into bits 26:16.
    (arch::imsic_claim() >> 16) as u16 & 0x7FF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock;
    use crate::hart;
    use crate::test_lock;

    #[test]
    fn notify_writes_the_target_files_doorbell() {
        let _guard = test_lock();
        hart::reset_for_test();
        mock::reset();

        static TARGETS: [IrqTargetMapping; 2] = [
            IrqTargetMapping { hart_id: 0, target: IrqTarget::MsiHartIndex(0) },
            IrqTargetMapping { hart_id: 1, target: IrqTarget::MsiHartIndex(1) },
        ];

        let mut files = [0u32; 2 << (FILE_SHIFT - 2)];
        // SAFETY: the backing array spans two 4 KiB interrupt files.
        let ipi = ImsicIpi::new(
            unsafe { MmioRegion::new(files.as_mut_ptr() as usize) },
            &TARGETS,
        );

        let hs = hart::by_index(0).unwrap();
        hs.set_map_index(Some(1));
        ipi.notify(hs);
        assert_eq!(files[(1 << FILE_SHIFT) / 4], u32::from(config::IPI_IDENTITY));
        assert_eq!(files[0], 0);
    }

    #[test]
    fn notify_to_an_unmapped_hart_is_dropped() {
        let _guard = test_lock();
        hart::reset_for_test();

        static TARGETS: [IrqTargetMapping; 1] =
            [IrqTargetMapping { hart_id: 0, target: IrqTarget::MsiHartIndex(0) }];

        let mut files = [0u32; 1 << (FILE_SHIFT - 2)];
        // SAFETY: the backing array spans one interrupt file.
        let ipi = ImsicIpi::new(
            unsafe { MmioRegion::new(files.as_mut_ptr() as usize) },
            &TARGETS,
        );
        ipi.notify(hart::by_index(0).unwrap());
        assert_eq!(files[0], 0);
    }

    #[test]
    fn local_enable_pairs_even_registers() {
        let _guard = test_lock();
        mock::reset();

        local_enable(5, true);
        local_enable(68, true);
        assert_eq!(mock::eie_word(0), 1 << 5);
        assert_eq!(mock::eie_word(1), 1 << 4);
        local_enable(5, false);
        assert_eq!(mock::eie_word(0), 0);
        assert_eq!(mock::eie_word(1), 1 << 4);
    }

    #[test]
    fn file_setup_opens_delivery_and_the_ipi_identity() {
        let _guard = test_lock();
        mock::reset();

        setup_local_file();
        assert_eq!(mock::eidelivery(), 1);
        assert_eq!(mock::eithreshold(), 0);
        assert_eq!(
            mock::eie_word(0),
            1 << config::IPI_IDENTITY
        );
    }

    #[test]
    fn claim_extracts_the_identity_once() {
        let _guard = test_lock();
        mock::reset();

        mock::set_pending_identity(u64::from(config::IPI_IDENTITY));
        assert_eq!(claim(), config::IPI_IDENTITY);
        assert_eq!(claim(), 0);
    }
}
