//! Machine-mode interrupt and IPI core for multi-hart RISC-V.
//!
//! The crate owns the trap vector, the per-hart state bank, the IPI
//! protocol and one of three interrupt-controller backends, selected at
//! build time. The embedding platform supplies a [`Hooks`] impl and calls
//! [`hart::lifecycle::online`] on every hart; everything else (sending
//! IPIs, registering interrupt sources, timed sleep) happens through the
//! module APIs re-exported below.

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(not(any(feature = "plic", feature = "aplic-direct", feature = "aplic-msi")))]
compile_error!(
    "select exactly one interrupt-controller backend: `plic`, `aplic-direct` or `aplic-msi`"
);

#[cfg(any(
    all(feature = "plic", feature = "aplic-direct"),
    all(feature = "plic", feature = "aplic-msi"),
    all(feature = "aplic-direct", feature = "aplic-msi"),
))]
compile_error!("the interrupt-controller backend features are mutually exclusive");

pub mod arch;
pub mod config;
pub mod error;
pub mod hart;
pub mod ipi;
pub mod irq;
pub mod mmio;
pub mod timer;
pub mod trap;

pub use error::{ConfigError, HartError};
pub use hart::{lifecycle::online, HartState, Reason, StateFlags};
pub use irq::{IrqSourceMapping, IrqTarget, IrqTargetMapping, Priority, TriggerMode, IRQ_SOURCES};
pub use trap::Hooks;

/// Serializes tests that touch the hart bank or the mock CSR file.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
