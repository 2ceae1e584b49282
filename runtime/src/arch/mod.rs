//! Architecture access layer.
//!
//! On `riscv64` this is a thin veneer over the machine-mode CSRs (via the
//! `riscv` crate where it has coverage, inline asm for the AIA indirect
//! window). On every other target a mock CSR file stands in so that the
//! dispatch, IPI and lifecycle logic above this layer can be exercised by
//! host unit tests.

#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(target_arch = "riscv64")]
pub use riscv64::*;

#[cfg(not(target_arch = "riscv64"))]
mod host;
#[cfg(not(target_arch = "riscv64"))]
pub use host::*;

/// Interrupt bit of `mcause` (top bit of the register).
pub const MCAUSE_INTERRUPT: usize = 1 << (usize::BITS - 1);

/// IMSIC indirect register numbers (AIA spec, chapter 3).
pub const ISELECT_EIDELIVERY: u32 = 0x70;
pub const ISELECT_EITHRESHOLD: u32 = 0x72;
pub const ISELECT_EIE_BASE: u32 = 0xC0;
