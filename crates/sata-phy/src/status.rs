//! Control registers, composite readiness status and diagnostic counters.
//!
//! This is the whole upper-layer observability surface: there are no
//! propagating errors in steady state, only these registered values,
//! recomputed every system tick. Polling replaces exceptions.

use bitflags::bitflags;

/// Externally writable control registers. `enable` deassert-then-assert is
/// the canonical way to force a full re-initialization from software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegisters {
    pub enable: bool,
    pub oob_enable: bool,
}

impl Default for ControlRegisters {
    fn default() -> Self {
        ControlRegisters {
            enable: true,
            oob_enable: true,
        }
    }
}

/// Composite readiness, derived every system tick. `ctrl_ready` implies
/// `tx_ready && rx_ready` by construction; `phy_ready` additionally
/// requires the transceiver's own lock input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyStatus {
    pub phy_ready: bool,
    pub tx_ready: bool,
    pub rx_ready: bool,
    pub ctrl_ready: bool,
}

bitflags! {
    /// Packed status word for an external debug/diagnostic collector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PhyStatusBits: u32 {
        const PHY_READY  = 1 << 0;
        const TX_READY   = 1 << 1;
        const RX_READY   = 1 << 2;
        const CTRL_READY = 1 << 3;
    }
}

impl ReadyStatus {
    pub fn bits(&self) -> PhyStatusBits {
        let mut bits = PhyStatusBits::empty();
        bits.set(PhyStatusBits::PHY_READY, self.phy_ready);
        bits.set(PhyStatusBits::TX_READY, self.tx_ready);
        bits.set(PhyStatusBits::RX_READY, self.rx_ready);
        bits.set(PhyStatusBits::CTRL_READY, self.ctrl_ready);
        bits
    }

    pub fn all_ready(&self) -> bool {
        self.phy_ready && self.tx_ready && self.rx_ready && self.ctrl_ready
    }
}

/// Diagnostic counters. Written by whichever domain owns the underlying
/// event; read-only outside. Purely observational — none of these feed
/// back into control decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhyStats {
    /// Alignment losses that forced a retrain.
    pub misalign_events: u64,
    /// Full retrains triggered from `Ready`.
    pub retrains: u64,
    /// COMRESET retries issued while waiting for COMINIT.
    pub oob_retries: u64,
    pub elastic_overflows: u64,
    pub elastic_underflows: u64,
}
