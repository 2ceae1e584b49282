//! ACLINT MSWI doorbell notifier.
//!
//! One `msip` word per physical hart; writing 1 raises the machine software
//! interrupt wire, the receiver writes 0 to drop it again.

use crate::hart::HartState;
use crate::mmio::MmioRegion;

use super::IpiSender;

pub struct Mswi {
    regs: MmioRegion,
}

impl Mswi {
    pub const fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    fn msip(&self, hart_id: u64) -> usize {
        hart_id as usize * 4
    }
}

impl IpiSender for Mswi {
    fn notify(&self, target: &HartState) {
        self.regs.write32(self.msip(target.hart_id()), 1);
    }

    fn clear(&self, receiver: &HartState) {
        self.regs.write32(self.msip(receiver.hart_id()), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart;
    use crate::test_lock;

    #[test]
    fn doorbell_is_keyed_by_physical_hart_id() {
        let _guard = test_lock();
        hart::reset_for_test();
        crate::arch::mock::reset();

        // Physical ids need not match record indices.
        hart::register_self(2);
        let hs = hart::by_index(0).unwrap();

        let mut mem = [0u32; 4];
        // SAFETY: the backing array covers the four msip words.
        let mswi = Mswi::new(unsafe { MmioRegion::new(mem.as_mut_ptr() as usize) });

        mswi.notify(hs);
        assert_eq!(mem, [0, 0, 1, 0]);
        mswi.clear(hs);
        assert_eq!(mem, [0, 0, 0, 0]);
    }
}
