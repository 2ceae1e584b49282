//! Error taxonomy for the runtime core.
//!
//! Configuration errors are detected once during bring-up and surfaced as a
//! boot-time failure. Runtime faults never unwind: they are either recorded
//! in the faulting hart's error field and resumed past, or the hart is
//! parked permanently. Errors never cross a hart boundary except through
//! that per-hart field, which only its owner reads.

use thiserror::Error;

/// Boot-time configuration failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    /// A computed controller register range does not fit the address space.
    #[error("interrupt-file address range overflows the address space")]
    AddressOverflow,
    /// The MSI address registers were locked by earlier firmware with a
    /// layout we cannot use.
    #[error("locked MSI address configuration is incompatible")]
    IncompatibleLockedConfig,
    /// The MSI address registers did not read back what was written.
    #[error("MSI address configuration readback mismatch")]
    MsiProgrammingFailed,
    /// A hart has no row in the hart-to-controller routing table.
    #[error("hart index {0} has no interrupt-controller target mapping")]
    UnmappedTarget(u16),
    /// Two rows of the routing table name the same physical hart.
    #[error("hart {0} appears more than once in the target map")]
    DuplicateTarget(u64),
}

/// Per-hart error codes, stored in the owning hart's state record.
///
/// Recoverable faults taken during bring-up probes land here; the probing
/// code reads and clears the field after the faulting instruction has been
/// skipped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HartError {
    /// An unimplemented SYSTEM instruction (typically a CSR probe).
    Unimplemented,
    /// A page fault taken during a deliberate translation probe.
    OutOfMemory,
    /// Bring-up failed; the hart is not usable.
    BootFailed,
}

impl HartError {
    pub(crate) const fn to_raw(self) -> u32 {
        match self {
            HartError::Unimplemented => 1,
            HartError::OutOfMemory => 2,
            HartError::BootFailed => 3,
        }
    }

    pub(crate) const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(HartError::Unimplemented),
            2 => Some(HartError::OutOfMemory),
            3 => Some(HartError::BootFailed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hart_error_raw_round_trip() {
        for e in [
            HartError::Unimplemented,
            HartError::OutOfMemory,
            HartError::BootFailed,
        ] {
            assert_eq!(HartError::from_raw(e.to_raw()), Some(e));
        }
        assert_eq!(HartError::from_raw(0), None);
    }
}
