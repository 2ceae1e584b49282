//! Machine-mode trap dispatch.
//!
//! One direct-mode handler classifies everything; the optional vectored
//! table in [`vector`] fans interrupts out to the same per-cause entry
//! points. Exceptions fall into three buckets: recoverable probe faults
//! that are recorded and skipped, requests (ecall, breakpoint) that go to
//! the embedder's hooks, and everything else, which parks the hart.

pub mod vector;

use conquer_once::spin::OnceCell;

use crate::arch;
use crate::error::HartError;
use crate::hart::{self, HartState};
use crate::{ipi, irq, timer};

const IRQ_SOFT: usize = 3;
const IRQ_TIMER: usize = 7;
const IRQ_EXTERNAL: usize = 11;

const EX_ILLEGAL: usize = 2;
const EX_BREAKPOINT: usize = 3;
const EX_ECALL_M: usize = 11;
const EX_FETCH_PAGE_FAULT: usize = 12;
const EX_LOAD_PAGE_FAULT: usize = 13;
const EX_STORE_PAGE_FAULT: usize = 15;

/// Major opcode shared by CSR instructions, `ecall` and friends.
const OPCODE_SYSTEM: u32 = 0b111_0011;

/// Compile-time-selected default handlers for traps the runtime does not
/// consume itself. Implement this on a marker type and pass it to
/// [`crate::hart::lifecycle::online`]; every method has a default, so an
/// empty impl is a valid platform.
pub trait Hooks {
    /// Environment call taken from machine mode.
    fn on_ecall(hs: &HartState) {
        log::debug!("unhandled ecall on hart {}", hs.hart_id());
    }

    /// Breakpoint hit.
    fn on_breakpoint(hs: &HartState) {
        log::debug!("breakpoint on hart {}", hs.hart_id());
    }

    /// Timer interrupt nobody armed through [`crate::timer`].
    fn on_timer(hs: &HartState) {
        log::warn!("unsolicited timer interrupt on hart {}", hs.hart_id());
    }

    /// Probe hart capabilities during bring-up; the result lands in the
    /// hart record. Probes may take recoverable faults.
    fn probe_capabilities(hs: &HartState) -> usize {
        let _ = hs;
        0
    }

    /// Set up translation for the calling hart, if the platform wants any.
    fn init_virtual_memory(hs: &HartState) {
        let _ = hs;
    }

    /// One-time platform setup, run on the boot hart before the interrupt
    /// plumbing comes up.
    fn platform_init() {}
}

/// Monomorphized hook table; one instance per build, installed at bring-up.
pub(crate) struct HookTable {
    ecall: fn(&HartState),
    breakpoint: fn(&HartState),
    timer: fn(&HartState),
    probe_capabilities: fn(&HartState) -> usize,
    init_virtual_memory: fn(&HartState),
    platform_init: fn(),
}

impl HookTable {
    pub(crate) fn on_ecall(&self, hs: &HartState) {
        (self.ecall)(hs)
    }

    pub(crate) fn on_breakpoint(&self, hs: &HartState) {
        (self.breakpoint)(hs)
    }

    pub(crate) fn on_timer(&self, hs: &HartState) {
        (self.timer)(hs)
    }

    pub(crate) fn probe_capabilities(&self, hs: &HartState) -> usize {
        (self.probe_capabilities)(hs)
    }

    pub(crate) fn init_virtual_memory(&self, hs: &HartState) {
        (self.init_virtual_memory)(hs)
    }

    pub(crate) fn platform_init(&self) {
        (self.platform_init)()
    }
}

struct DefaultHooks;

impl Hooks for DefaultHooks {
    #[cfg(test)]
    fn on_timer(hs: &HartState) {
        let _ = hs;
        test_support::TIMER_HOOK_CALLS
            .fetch_add(1, core::sync::atomic::Ordering::SeqCst);
    }
}

static DEFAULT_HOOKS: HookTable = table_of::<DefaultHooks>();
static HOOKS: OnceCell<HookTable> = OnceCell::uninit();

const fn table_of<H: Hooks>() -> HookTable {
    HookTable {
        ecall: H::on_ecall,
        breakpoint: H::on_breakpoint,
        timer: H::on_timer,
        probe_capabilities: H::probe_capabilities,
        init_virtual_memory: H::init_virtual_memory,
        platform_init: H::platform_init,
    }
}

/// Install the hook set for this build. First caller wins; harts brought
/// up later reuse the table the boot hart installed.
pub(crate) fn install_hooks<H: Hooks>() {
    HOOKS.get_or_init(table_of::<H>);
}

pub(crate) fn hooks() -> &'static HookTable {
    HOOKS.get().unwrap_or(&DEFAULT_HOOKS)
}

// The real vector. It must preserve the interrupted context itself: the
// handler is an ordinary `extern "C"` function, so the entry saves the
// caller-saved file on the hart's stack, calls it, and leaves with `mret`
// so that handler writes to `mepc` (probe skips, wake and hang redirects)
// take effect and `mstatus.MIE` is restored from `MPIE`. The `.balign`
// also keeps the low mtvec mode bits clear.
#[cfg(target_arch = "riscv64")]
core::arch::global_asm!(
    ".balign 4",
    ".global machine_trap_entry",
    "machine_trap_entry:",
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
    "call {handler}",
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
    handler = sym machine_trap_handler,
);

#[cfg(target_arch = "riscv64")]
extern "C" {
    fn machine_trap_entry();
}

/// Point `mtvec` at the handler for the calling hart.
pub fn install() {
    #[cfg(all(target_arch = "riscv64", feature = "vectored-traps"))]
    arch::write_mtvec(vector::table_base(), true);
    #[cfg(all(target_arch = "riscv64", not(feature = "vectored-traps")))]
    arch::write_mtvec(machine_trap_entry as usize, false);
    #[cfg(not(target_arch = "riscv64"))]
    arch::write_mtvec(machine_trap_handler as usize, false);
}

/// Direct-mode trap entry point.
#[no_mangle]
pub extern "C" fn machine_trap_handler() {
    let cause = arch::read_mcause();
    if cause & arch::MCAUSE_INTERRUPT != 0 {
        handle_interrupt(cause & !arch::MCAUSE_INTERRUPT);
    } else {
        handle_exception(cause);
    }
}

pub(crate) fn handle_interrupt(code: usize) {
    let hs = hart::current();
    match code {
        IRQ_SOFT => ipi::handle(hs),
        IRQ_TIMER => timer::handle_interrupt(hs),
        IRQ_EXTERNAL => handle_external(hs),
        _ => log::warn!("unexpected interrupt {code} on hart {}", hs.hart_id()),
    }
}

#[cfg(feature = "aplic-msi")]
fn handle_external(hs: &HartState) {
    // Claim at the hart's interrupt file; IPIs share the external wire
    // with device interrupts and are told apart by identity.
    let identity = ipi::imsic::claim();
    if identity == crate::config::IPI_IDENTITY {
        ipi::handle(hs);
    } else {
        irq::dispatch(hs, identity);
    }
}

#[cfg(not(feature = "aplic-msi"))]
fn handle_external(hs: &HartState) {
    irq::dispatch(hs, 0);
}

/// What to do about an exception, decided from the cause and the faulting
/// instruction alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Record the error on the hart and resume `advance` bytes past the
    /// faulting instruction.
    RecordAndSkip(HartError, usize),
    /// Hand to the ecall hook, then resume past the `ecall`.
    Ecall(usize),
    /// Hand to the breakpoint hook, then resume past the `ebreak`.
    Breakpoint(usize),
    /// Not survivable; park the hart.
    Fatal,
}

fn insn_len(insn: u32) -> usize {
    if insn & 0b11 == 0b11 {
        4
    } else {
        2
    }
}

fn classify(cause: usize, insn: u32) -> Disposition {
    match cause {
        // CSR probes for absent extensions land here; anything else
        // illegal is a real bug.
        EX_ILLEGAL if insn & 0x7F == OPCODE_SYSTEM => {
            Disposition::RecordAndSkip(HartError::Unimplemented, insn_len(insn))
        }
        EX_ILLEGAL => Disposition::Fatal,
        EX_BREAKPOINT => Disposition::Breakpoint(insn_len(insn)),
        EX_ECALL_M => Disposition::Ecall(4),
        // The faulting fetch leaves no instruction to measure; resumable
        // fetch probes are uncompressed by convention.
        EX_FETCH_PAGE_FAULT => Disposition::RecordAndSkip(HartError::OutOfMemory, 4),
        EX_LOAD_PAGE_FAULT | EX_STORE_PAGE_FAULT => {
            Disposition::RecordAndSkip(HartError::OutOfMemory, insn_len(insn))
        }
        _ => Disposition::Fatal,
    }
}

fn handle_exception(cause: usize) {
    let hs = hart::current();
    let epc = arch::read_mepc();
    let insn = match cause {
        // mtval carries the offending bits for illegal instructions; fall
        // back to a fetch when the implementation leaves it zero.
        EX_ILLEGAL => match arch::read_mtval() as u32 {
            0 => arch::fetch_trapped_instruction(epc),
            tval => tval,
        },
        EX_FETCH_PAGE_FAULT => 0,
        _ => arch::fetch_trapped_instruction(epc),
    };

    match classify(cause, insn) {
        Disposition::RecordAndSkip(err, advance) => {
            hs.set_error(err);
            arch::write_mepc(epc + advance);
        }
        Disposition::Ecall(advance) => {
            hooks().on_ecall(hs);
            arch::write_mepc(epc + advance);
        }
        Disposition::Breakpoint(advance) => {
            hooks().on_breakpoint(hs);
            arch::write_mepc(epc + advance);
        }
        Disposition::Fatal => fatal(hs, cause, epc),
    }
}

fn fatal(hs: &HartState, cause: usize, epc: usize) {
    log::error!(
        "fatal trap on hart {}: mcause={cause:#x} mepc={epc:#x} mtval={:#x} mstatus={:#x}",
        hs.hart_id(),
        arch::read_mtval(),
        arch::read_mstatus(),
    );
    hs.set_error(HartError::BootFailed);
    // Parking happens on the way out of the trap.
    arch::write_mepc(hart::lifecycle::hang as usize);
}

#[cfg(test)]
pub(crate) use test_support::{reset_hooks_for_test, test_hook_timer_count};
