//! Mock CSR file for non-riscv64 targets.
//!
//! Every CSR the real layer touches is backed by an atomic static here, so
//! unit tests can seed trap state, run the handlers, and assert on what was
//! written back (redirected `mepc`, armed `mie` bits, IMSIC enable words).

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use super::{ISELECT_EIDELIVERY, ISELECT_EIE_BASE, ISELECT_EITHRESHOLD};

const MSTATUS_MIE: usize = 1 << 3;

const MIE_MSIE: usize = 1 << 3;
const MIE_MTIE: usize = 1 << 7;
const MIE_MEIE: usize = 1 << 11;

static MCAUSE: AtomicUsize = AtomicUsize::new(0);
static MTVAL: AtomicUsize = AtomicUsize::new(0);
static MEPC: AtomicUsize = AtomicUsize::new(0);
static MSCRATCH: AtomicUsize = AtomicUsize::new(0);
static MSTATUS: AtomicUsize = AtomicUsize::new(0);
static MIE: AtomicUsize = AtomicUsize::new(0);
static MTVEC: AtomicUsize = AtomicUsize::new(0);
static MCYCLE: AtomicU64 = AtomicU64::new(0);

static TRAPPED_INSTRUCTION: AtomicU32 = AtomicU32::new(0);

static EIDELIVERY: AtomicU64 = AtomicU64::new(0);
static EITHRESHOLD: AtomicU64 = AtomicU64::new(0);
static MTOPEI: AtomicU64 = AtomicU64::new(0);
static EIE: [AtomicU64; 32] = [const { AtomicU64::new(0) }; 32];

pub fn read_mcause() -> usize {
    MCAUSE.load(Ordering::Relaxed)
}

pub fn read_mtval() -> usize {
    MTVAL.load(Ordering::Relaxed)
}

pub fn read_mepc() -> usize {
    MEPC.load(Ordering::Relaxed)
}

pub fn write_mepc(v: usize) {
    MEPC.store(v, Ordering::Relaxed);
}

pub fn read_mscratch() -> usize {
    MSCRATCH.load(Ordering::Relaxed)
}

pub fn write_mscratch(v: usize) {
    MSCRATCH.store(v, Ordering::Relaxed);
}

pub fn read_mstatus() -> usize {
    MSTATUS.load(Ordering::Relaxed)
}

pub fn enable_interrupts() {
    MSTATUS.fetch_or(MSTATUS_MIE, Ordering::Relaxed);
}

pub fn disable_interrupts() {
    MSTATUS.fetch_and(!MSTATUS_MIE, Ordering::Relaxed);
}

pub fn enable_software_irq() {
    MIE.fetch_or(MIE_MSIE, Ordering::Relaxed);
}

pub fn enable_timer_irq() {
    MIE.fetch_or(MIE_MTIE, Ordering::Relaxed);
}

pub fn disable_timer_irq() {
    MIE.fetch_and(!MIE_MTIE, Ordering::Relaxed);
}

pub fn enable_external_irq() {
    MIE.fetch_or(MIE_MEIE, Ordering::Relaxed);
}

pub fn write_mtvec(base: usize, vectored: bool) {
    MTVEC.store(base | usize::from(vectored), Ordering::Relaxed);
}

pub fn read_cycle() -> u64 {
    MCYCLE.fetch_add(1, Ordering::Relaxed)
}

pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

pub fn pause() {
    core::hint::spin_loop();
}

pub fn execution_fence() {}

pub fn fetch_trapped_instruction(_epc: usize) -> u32 {
    TRAPPED_INSTRUCTION.load(Ordering::Relaxed)
}

pub fn imsic_indirect_write(reg: u32, val: u64) {
    match reg {
        ISELECT_EIDELIVERY => EIDELIVERY.store(val, Ordering::Relaxed),
        ISELECT_EITHRESHOLD => EITHRESHOLD.store(val, Ordering::Relaxed),
        r if (ISELECT_EIE_BASE..ISELECT_EIE_BASE + 64).contains(&r) => {
            EIE[(r - ISELECT_EIE_BASE) as usize / 2].store(val, Ordering::Relaxed);
        }
        _ => {}
    }
}

pub fn imsic_indirect_read(reg: u32) -> u64 {
    match reg {
        ISELECT_EIDELIVERY => EIDELIVERY.load(Ordering::Relaxed),
        ISELECT_EITHRESHOLD => EITHRESHOLD.load(Ordering::Relaxed),
        r if (ISELECT_EIE_BASE..ISELECT_EIE_BASE + 64).contains(&r) => {
            EIE[(r - ISELECT_EIE_BASE) as usize / 2].load(Ordering::Relaxed)
        }
        _ => 0,
    }
}

pub fn imsic_claim() -> u64 {
    MTOPEI.swap(0, Ordering::Relaxed)
}

#[cfg(test)]
pub mod mock {
    //! Seed and inspect the mock CSR file from tests.

    use core::sync::atomic::Ordering;

    pub fn set_trap(cause: usize, epc: usize, tval: usize) {
        super::MCAUSE.store(cause, Ordering::Relaxed);
        super::MEPC.store(epc, Ordering::Relaxed);
        super::MTVAL.store(tval, Ordering::Relaxed);
    }

    pub fn set_trapped_instruction(insn: u32) {
        super::TRAPPED_INSTRUCTION.store(insn, Ordering::Relaxed);
    }

    pub fn set_pending_identity(eiid: u64) {
        super::MTOPEI.store(eiid << 16 | eiid, Ordering::Relaxed);
    }

    pub fn mepc() -> usize {
        super::MEPC.load(Ordering::Relaxed)
    }

    pub fn mie() -> usize {
        super::MIE.load(Ordering::Relaxed)
    }

    pub fn mtvec() -> usize {
        super::MTVEC.load(Ordering::Relaxed)
    }

    pub fn eidelivery() -> u64 {
        super::EIDELIVERY.load(Ordering::Relaxed)
    }

    pub fn eithreshold() -> u64 {
        super::EITHRESHOLD.load(Ordering::Relaxed)
    }

    pub fn eie_word(idx: usize) -> u64 {
        super::EIE[idx].load(Ordering::Relaxed)
    }

    pub fn reset() {
        for r in [
            &super::MCAUSE,
            &super::MTVAL,
            &super::MEPC,
            &super::MSCRATCH,
            &super::MSTATUS,
            &super::MIE,
            &super::MTVEC,
        ] {
            r.store(0, Ordering::Relaxed);
        }
        super::TRAPPED_INSTRUCTION.store(0, Ordering::Relaxed);
        super::EIDELIVERY.store(0, Ordering::Relaxed);
        super::EITHRESHOLD.store(0, Ordering::Relaxed);
        super::MTOPEI.store(0, Ordering::Relaxed);
        for w in &super::EIE {
            w.store(0, Ordering::Relaxed);
        }
    }
}
