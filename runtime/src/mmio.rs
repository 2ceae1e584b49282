//! Volatile access to memory-mapped controller registers.
//!
//! Every controller backend owns an [`MmioRegion`] and addresses registers
//! as byte offsets from its base, keeping the register maps in one place
//! per backend instead of scattering raw pointers.

/// A window of device registers starting at a fixed base address.
#[derive(Debug, Copy, Clone)]
pub struct MmioRegion {
    base: usize,
}

impl MmioRegion {
    /// Creates a register window at `base`.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be a mapped, device-safe region for the
    /// lifetime of the returned value, and all offsets passed to the access
    /// methods must stay inside it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn read32(&self, offset: usize) -> u32 {
        // SAFETY: guaranteed in range by the `new` contract.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        // SAFETY: guaranteed in range by the `new` contract.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    #[inline]
    pub fn read64(&self, offset: usize) -> u64 {
        // SAFETY: guaranteed in range by the `new` contract.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u64) }
    }

    #[inline]
    pub fn write64(&self, offset: usize, value: u64) {
        // SAFETY: guaranteed in range by the `new` contract.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u64, value) }
    }
}
