//! Vectored trap table.
//!
//! With `mtvec` in vectored mode the hardware indexes `base + 4 * cause`
//! for interrupts and jumps to `base` for exceptions, skipping the cause
//! read of the direct path. Every slot jumps to a full entry shim: like
//! the direct-mode vector it saves the caller-saved file, calls the Rust
//! handler for that cause, restores and leaves with `mret`. Causes this
//! runtime never enables share one complaint entry.

#![cfg(all(target_arch = "riscv64", feature = "vectored-traps"))]

use core::arch::global_asm;

global_asm!(
    ".macro mtrap_shim target",
    "addi sp, sp, -128",
    "sd ra, 0(sp)",
    "sd t0, 8(sp)",
    "sd t1, 16(sp)",
    "sd t2, 24(sp)",
    "sd t3, 32(sp)",
    "sd t4, 40(sp)",
    "sd t5, 48(sp)",
    "sd t6, 56(sp)",
    "sd a0, 64(sp)",
    "sd a1, 72(sp)",
    "sd a2, 80(sp)",
    "sd a3, 88(sp)",
    "sd a4, 96(sp)",
    "sd a5, 104(sp)",
    "sd a6, 112(sp)",
    "sd a7, 120(sp)",
    "call \\target",
    "ld ra, 0(sp)",
    "ld t0, 8(sp)",
    "ld t1, 16(sp)",
    "ld t2, 24(sp)",
    "ld t3, 32(sp)",
    "ld t4, 40(sp)",
    "ld t5, 48(sp)",
    "ld t6, 56(sp)",
    "ld a0, 64(sp)",
    "ld a1, 72(sp)",
    "ld a2, 80(sp)",
    "ld a3, 88(sp)",
    "ld a4, 96(sp)",
    "ld a5, 104(sp)",
    "ld a6, 112(sp)",
    "ld a7, 120(sp)",
    "addi sp, sp, 128",
    "mret",
    ".endm",
    ".section .text.mtvec_table, \"ax\"",
    // Vectored bases must leave the low mode bits clear.
    ".balign 64",
    ".global mtvec_table",
    "mtvec_table:",
    "j mtvec_entry_exception",   // 0: all exceptions
    "j mtvec_entry_unexpected",  // 1
    "j mtvec_entry_unexpected",  // 2
    "j mtvec_entry_soft",        // 3: machine software interrupt
    "j mtvec_entry_unexpected",  // 4
    "j mtvec_entry_unexpected",  // 5
    "j mtvec_entry_unexpected",  // 6
    "j mtvec_entry_timer",       // 7: machine timer interrupt
    "j mtvec_entry_unexpected",  // 8
    "j mtvec_entry_unexpected",  // 9
    "j mtvec_entry_unexpected",  // 10
    "j mtvec_entry_external",    // 11: machine external interrupt
    "j mtvec_entry_unexpected",  // 12
    "j mtvec_entry_unexpected",  // 13
    "j mtvec_entry_unexpected",  // 14
    "j mtvec_entry_unexpected",  // 15
    "mtvec_entry_exception:",
    "mtrap_shim {exception}",
    "mtvec_entry_soft:",
    "mtrap_shim {soft}",
    "mtvec_entry_timer:",
    "mtrap_shim {timer}",
    "mtvec_entry_external:",
    "mtrap_shim {external}",
    "mtvec_entry_unexpected:",
    "mtrap_shim {unexpected}",
    exception = sym super::machine_trap_handler,
    soft = sym vectored_soft,
    timer = sym vectored_timer,
    external = sym vectored_external,
    unexpected = sym vectored_unexpected,
);

extern "C" {
    fn mtvec_table();
}

pub(crate) fn table_base() -> usize {
    mtvec_table as usize
}

extern "C" fn vectored_soft() {
    super::handle_interrupt(3);
}

extern "C" fn vectored_timer() {
    super::handle_interrupt(7);
}

extern "C" fn vectored_external() {
    super::handle_interrupt(11);
}

extern "C" fn vectored_unexpected() {
    log::warn!(
        "interrupt through an unpopulated vector slot, mcause {:#x}",
        crate::arch::read_mcause()
    );
}
