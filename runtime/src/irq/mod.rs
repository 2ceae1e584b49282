//! External interrupt routing.
//!
//! Exactly one controller backend is active per build, selected by feature
//! flag: a PLIC, an APLIC in direct delivery mode, or an APLIC driving
//! per-hart IMSIC files with MSIs. All backends implement the sealed
//! [`InterruptController`] trait and route claimed identities through the
//! build-time [`IRQ_SOURCES`] table.

pub mod aplic;
pub mod plic;

use conquer_once::spin::OnceCell;
use linkme::distributed_slice;

use crate::config;
use crate::error::ConfigError;
use crate::hart::HartState;
use crate::mmio::MmioRegion;

pub use aplic::{Aplic, DirectDelivery, MsiDelivery};
pub use plic::Plic;

/// Coarse priority classes, mapped to controller-native values by each
/// backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// The source is configured but left masked.
    Disabled,
    Low,
    Medium,
    High,
}

/// Source trigger modes, following the APLIC source-mode encoding. The
/// PLIC fixes trigger semantics in hardware and ignores this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    EdgeRising,
    EdgeFalling,
    LevelHigh,
    LevelLow,
}

/// One entry in the build-time interrupt source table.
///
/// Register sources with `#[distributed_slice(IRQ_SOURCES)]`; the linker
/// collects them into [`IRQ_SOURCES`] and the active backend programs them
/// all during init.
#[derive(Debug)]
pub struct IrqSourceMapping {
    pub name: &'static str,
    /// Controller-global source identity (PLIC source number or APLIC/MSI
    /// interrupt identity).
    pub identity: u16,
    pub priority: Priority,
    pub trigger: TriggerMode,
    /// Index into the target map naming the hart this source is routed to.
    pub target: u16,
    pub handler: fn(u16),
}

/// Controller-specific way of reaching one hart. The variants are mutually
/// exclusive per build; the tag exists so a map built for the wrong backend
/// is caught at init instead of programming garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqTarget {
    /// Machine-mode claim/complete context number of a PLIC.
    PlicContext(u32),
    /// Interrupt delivery control (IDC) structure index of an APLIC.
    DeliveryContext(u32),
    /// Hart index within the contiguous IMSIC interrupt-file array.
    MsiHartIndex(u32),
}

/// One entry of the interrupt target map: a physical hart id and how the
/// active controller reaches it. Each hart resolves its own entry once
/// during bring-up and caches the index in its state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqTargetMapping {
    pub hart_id: u64,
    pub target: IrqTarget,
}

/// Index of the unique entry in `targets` naming `hart_id`. `None` when
/// the hart is absent from the map or listed more than once.
pub fn resolve_target(targets: &[IrqTargetMapping], hart_id: u64) -> Option<usize> {
    let mut found = None;
    for (i, t) in targets.iter().enumerate() {
        if t.hart_id == hart_id {
            if found.is_some() {
                return None;
            }
            found = Some(i);
        }
    }
    found
}

/// The source table. Populated across the crate (and by embedders) through
/// `linkme`; no runtime registration exists.
#[distributed_slice]
pub static IRQ_SOURCES: [IrqSourceMapping];

/// Reject a target map that lists the same physical hart twice; a duplicate
/// would make [`resolve_target`] ambiguous on that hart.
pub fn validate_targets(targets: &[IrqTargetMapping]) -> Result<(), ConfigError> {
    for (i, t) in targets.iter().enumerate() {
        if targets[..i].iter().any(|p| p.hart_id == t.hart_id) {
            return Err(ConfigError::DuplicateTarget(t.hart_id));
        }
    }
    Ok(())
}

mod sealed {
    pub trait Sealed {}
}

/// One external interrupt controller backend.
///
/// Implementations are sealed; the set of backends is fixed at build time
/// and exactly one of them is compiled in as [`ActiveController`].
pub trait InterruptController: sealed::Sealed {
    /// Program the controller from the source and target tables.
    fn init(&self) -> Result<(), ConfigError>;

    /// Unmask `identity` at the controller.
    fn enable(&self, identity: u16);

    /// Mask `identity` at the controller.
    fn disable(&self, identity: u16);

    /// Handle one external interrupt on the calling hart. `claimed` is an
    /// identity already retired at the hart (message-signaled delivery);
    /// wire-routed backends ignore it and claim from the controller.
    fn dispatch(&self, hs: &HartState, claimed: u16);
}

impl sealed::Sealed for Plic {}
impl sealed::Sealed for Aplic<DirectDelivery> {}
impl sealed::Sealed for Aplic<MsiDelivery> {}

#[cfg(feature = "plic")]
pub type ActiveController = Plic;
#[cfg(feature = "aplic-direct")]
pub type ActiveController = Aplic<DirectDelivery>;
#[cfg(feature = "aplic-msi")]
pub type ActiveController = Aplic<MsiDelivery>;

static CONTROLLER: OnceCell<ActiveController> = OnceCell::uninit();

/// Build and program the active controller. Called once on the boot hart.
pub fn init() -> Result<(), ConfigError> {
    let ctl = CONTROLLER.get_or_init(|| {
        #[cfg(feature = "plic")]
        // SAFETY: the platform constant names the PLIC register block.
        let ctl = Plic::new(
            unsafe { MmioRegion::new(config::PLIC_BASE) },
            &IRQ_SOURCES,
            &config::INTC_MAP,
        );
        #[cfg(feature = "aplic-direct")]
        // SAFETY: the platform constant names the APLIC register block.
        let ctl = Aplic::direct(
            unsafe { MmioRegion::new(config::APLIC_BASE) },
            &IRQ_SOURCES,
            &config::INTC_MAP,
        );
        #[cfg(feature = "aplic-msi")]
        // SAFETY: the platform constant names the APLIC register block.
        let ctl = Aplic::msi(
            unsafe { MmioRegion::new(config::APLIC_BASE) },
            &IRQ_SOURCES,
            &config::INTC_MAP,
        );
        ctl
    });
    ctl.init()
}

fn controller() -> &'static ActiveController {
    CONTROLLER
        .get()
        .expect("interrupt controller accessed before init")
}

pub fn enable(identity: u16) {
    controller().enable(identity);
}

pub fn disable(identity: u16) {
    controller().disable(identity);
}

/// Entry point from the external-interrupt trap path.
pub fn dispatch(hs: &HartState, claimed: u16) {
    controller().dispatch(hs, claimed);
}

/// Look up `identity` in the source table and run its handler. A claimed
/// identity with no table entry is logged and dropped.
pub(crate) fn route(sources: &[IrqSourceMapping], identity: u16) {
    match sources.iter().find(|s| s.identity == identity) {
        Some(src) => (src.handler)(identity),
        None => log::warn!("external interrupt {identity} has no registered source"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU16, Ordering};

    static ROUTED: AtomicU16 = AtomicU16::new(0);

    fn record(identity: u16) {
        ROUTED.store(identity, Ordering::SeqCst);
    }

    #[test]
    fn route_finds_the_matching_source() {
        let sources = [
            IrqSourceMapping {
                name: "uart",
                identity: 10,
                priority: Priority::High,
                trigger: TriggerMode::LevelHigh,
                target: 0,
                handler: record,
            },
            IrqSourceMapping {
                name: "rtc",
                identity: 11,
                priority: Priority::Low,
                trigger: TriggerMode::EdgeRising,
                target: 0,
                handler: record,
            },
        ];
        ROUTED.store(0, Ordering::SeqCst);
        route(&sources, 11);
        assert_eq!(ROUTED.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn route_drops_unknown_identities() {
        ROUTED.store(0, Ordering::SeqCst);
        route(&[], 99);
        assert_eq!(ROUTED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn target_resolution_wants_exactly_one_entry() {
        let targets = [
            IrqTargetMapping { hart_id: 0, target: IrqTarget::PlicContext(0) },
            IrqTargetMapping { hart_id: 2, target: IrqTarget::PlicContext(4) },
            IrqTargetMapping { hart_id: 2, target: IrqTarget::PlicContext(6) },
        ];
        assert_eq!(resolve_target(&targets, 0), Some(0));
        assert_eq!(resolve_target(&targets, 1), None);
        // Ambiguous: hart 2 appears twice.
        assert_eq!(resolve_target(&targets, 2), None);
    }

    #[test]
    fn duplicate_harts_fail_validation() {
        use crate::error::ConfigError;

        assert_eq!(crate::irq::validate_targets(&crate::config::INTC_MAP), Ok(()));
        let dup = [
            IrqTargetMapping { hart_id: 1, target: IrqTarget::PlicContext(2) },
            IrqTargetMapping { hart_id: 1, target: IrqTarget::PlicContext(4) },
        ];
        assert_eq!(
            validate_targets(&dup),
            Err(ConfigError::DuplicateTarget(1))
        );
    }
}
