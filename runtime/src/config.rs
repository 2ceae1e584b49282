//! Platform constants for the qemu-virt machine.
//!
//! Everything here is resolved at build time. The interrupt target map is
//! feature-gated so it always matches the active controller backend.

use crate::irq::{IrqTarget, IrqTargetMapping};

/// Hart records allocated in the state bank.
pub const MAX_HARTS: usize = 4;

/// Largest external source identity any backend accepts.
pub const NUM_IRQ_SOURCES: usize = 64;

pub const PLIC_BASE: usize = 0x0c00_0000;
pub const APLIC_BASE: usize = 0x0c00_0000;
/// Base of the contiguous machine-level IMSIC interrupt-file array,
/// one 4 KiB file per hart.
pub const IMSIC_BASE: usize = 0x2400_0000;

/// ACLINT MSWI `msip` array.
pub const MSWI_BASE: usize = 0x0200_0000;
/// ACLINT MTIMER compare register array.
pub const MTIMECMP_BASE: usize = 0x0200_4000;
/// ACLINT MTIMER free-running counter.
pub const MTIME_BASE: usize = 0x0200_bff8;

/// MTIMER tick rate on qemu-virt.
pub const MTIMER_FREQ: u64 = 10_000_000;

/// IMSIC identity reserved for inter-processor interrupts when the MSI
/// backend is active. External sources must stay clear of it.
pub const IPI_IDENTITY: u16 = 1;

/// How the active controller reaches each hart record, indexed like the
/// hart state bank. Machine-mode PLIC contexts on qemu-virt are the even
/// ones; APLIC IDCs and IMSIC files are numbered per hart.
#[cfg(feature = "plic")]
pub static INTC_MAP: [IrqTargetMapping; MAX_HARTS] = [
    IrqTargetMapping { hart_id: 0, target: IrqTarget::PlicContext(0) },
    IrqTargetMapping { hart_id: 1, target: IrqTarget::PlicContext(2) },
    IrqTargetMapping { hart_id: 2, target: IrqTarget::PlicContext(4) },
    IrqTargetMapping { hart_id: 3, target: IrqTarget::PlicContext(6) },
];
#[cfg(feature = "aplic-direct")]
pub static INTC_MAP: [IrqTargetMapping; MAX_HARTS] = [
    IrqTargetMapping { hart_id: 0, target: IrqTarget::DeliveryContext(0) },
    IrqTargetMapping { hart_id: 1, target: IrqTarget::DeliveryContext(1) },
    IrqTargetMapping { hart_id: 2, target: IrqTarget::DeliveryContext(2) },
    IrqTargetMapping { hart_id: 3, target: IrqTarget::DeliveryContext(3) },
];
#[cfg(feature = "aplic-msi")]
pub static INTC_MAP: [IrqTargetMapping; MAX_HARTS] = [
    IrqTargetMapping { hart_id: 0, target: IrqTarget::MsiHartIndex(0) },
    IrqTargetMapping { hart_id: 1, target: IrqTarget::MsiHartIndex(1) },
    IrqTargetMapping { hart_id: 2, target: IrqTarget::MsiHartIndex(2) },
    IrqTargetMapping { hart_id: 3, target: IrqTarget::MsiHartIndex(3) },
];
