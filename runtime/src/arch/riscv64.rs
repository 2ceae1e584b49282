use core::arch::asm;

use riscv::register::{mcause, mepc, mscratch, mtval};

// AIA indirect-access CSRs are not covered by the `riscv` crate yet, so the
// numbers go straight into the asm below.
#[cfg(feature = "aplic-msi")]
const CSR_MISELECT: u32 = 0x350;
#[cfg(feature = "aplic-msi")]
const CSR_MIREG: u32 = 0x351;
#[cfg(feature = "aplic-msi")]
const CSR_MTOPEI: u32 = 0x35C;

const MSTATUS_MIE: usize = 1 << 3;
const MSTATUS_MXR: usize = 1 << 19;

const MIE_MSIE: usize = 1 << 3;
const MIE_MTIE: usize = 1 << 7;
const MIE_MEIE: usize = 1 << 11;

#[inline]
pub fn read_mcause() -> usize {
    mcause::read().bits()
}

#[inline]
pub fn read_mtval() -> usize {
    mtval::read()
}

#[inline]
pub fn read_mepc() -> usize {
    mepc::read()
}

#[inline]
pub fn write_mepc(v: usize) {
    unsafe { mepc::write(v) }
}

#[inline]
pub fn read_mscratch() -> usize {
    mscratch::read()
}

#[inline]
pub fn write_mscratch(v: usize) {
    unsafe { mscratch::write(v) }
}

#[inline]
pub fn read_mstatus() -> usize {
    let v: usize;
    unsafe { asm!("csrr {}, mstatus", out(reg) v) };
    v
}

#[inline]
pub fn enable_interrupts() {
    unsafe { asm!("csrs mstatus, {}", in(reg) MSTATUS_MIE) };
}

#[inline]
pub fn disable_interrupts() {
    unsafe { asm!("csrc mstatus, {}", in(reg) MSTATUS_MIE) };
}

#[inline]
pub fn enable_software_irq() {
    unsafe { asm!("csrs mie, {}", in(reg) MIE_MSIE) };
}

#[inline]
pub fn enable_timer_irq() {
    unsafe { asm!("csrs mie, {}", in(reg) MIE_MTIE) };
}

#[inline]
pub fn disable_timer_irq() {
    unsafe { asm!("csrc mie, {}", in(reg) MIE_MTIE) };
}

#[inline]
pub fn enable_external_irq() {
    unsafe { asm!("csrs mie, {}", in(reg) MIE_MEIE) };
}

/// Point `mtvec` at `base`. `vectored` selects vectored dispatch; the base
/// must then be 64-byte aligned so the low mode bits stay clear.
pub fn write_mtvec(base: usize, vectored: bool) {
    let v = base | usize::from(vectored);
    unsafe { asm!("csrw mtvec, {}", in(reg) v) };
}

#[inline]
pub fn read_cycle() -> u64 {
    riscv::register::mcycle::read() as u64
}

#[inline]
pub fn wait_for_interrupt() {
    unsafe { riscv::asm::wfi() };
}

#[inline]
pub fn pause() {
    core::hint::spin_loop();
}

/// Full fence after patching code or resume addresses another hart will
/// execute: order the stores, then resynchronise the fetch stream.
#[inline]
pub fn execution_fence() {
    unsafe {
        asm!("fence rw, rw");
        asm!("fence.i");
    }
}

/// Load the instruction word a trap points at.
///
/// The trapped PC may sit in a page that is execute-only for loads, so MXR
/// is raised around the fetch. Compressed instructions only occupy the low
/// halfword; callers mask as needed.
pub fn fetch_trapped_instruction(epc: usize) -> u32 {
    let insn: u32;
    unsafe {
        asm!("csrs mstatus, {}", in(reg) MSTATUS_MXR);
        insn = core::ptr::read_volatile(epc as *const u32);
        asm!("csrc mstatus, {}", in(reg) MSTATUS_MXR);
    }
    insn
}

/// Write an IMSIC interrupt-file register through the indirect window.
#[cfg(feature = "aplic-msi")]
pub fn imsic_indirect_write(reg: u32, val: u64) {
    unsafe {
        asm!(
            "csrw {sel}, {r}",
            "csrw {win}, {v}",
            sel = const CSR_MISELECT,
            win = const CSR_MIREG,
            r = in(reg) reg as usize,
            v = in(reg) val as usize,
        );
    }
}

/// Read an IMSIC interrupt-file register through the indirect window.
#[cfg(feature = "aplic-msi")]
pub fn imsic_indirect_read(reg: u32) -> u64 {
    let v: usize;
    unsafe {
        asm!(
            "csrw {sel}, {r}",
            "csrr {v}, {win}",
            sel = const CSR_MISELECT,
            win = const CSR_MIREG,
            r = in(reg) reg as usize,
            v = out(reg) v,
        );
    }
    v as u64
}

/// Claim the highest-priority pending IMSIC identity. The swap with zero
/// atomically retires the identity; a zero result means nothing was pending.
#[cfg(feature = "aplic-msi")]
pub fn imsic_claim() -> u64 {
    let v: usize;
    unsafe {
        asm!(
            "csrrw {v}, {top}, x0",
            top = const CSR_MTOPEI,
            v = out(reg) v,
        );
    }
    v as u64
}
