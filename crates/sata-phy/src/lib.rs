//! SATA host PHY bring-up and maintenance core.
//!
//! A cycle-accurate software model of the physical-link layer between a
//! SATA command core and a transceiver: out-of-band signaling (COMRESET /
//! COMINIT / COMWAKE), byte/word alignment on the received symbol stream,
//! and the TX-init/RX-init control FSMs that sequence the handshake and
//! derive a composite ready status. The transceiver itself (SERDES, clock
//! recovery, 8b/10b) is an external collaborator: this crate consumes a
//! byte-parallel word stream with control-character flags plus raw
//! electrical-idle/comma pulses, and produces a byte-aligned word stream
//! plus transmit words and an electrical-idle assert.
//!
//! Execution is tick-driven across three independent clock domains:
//! [`SataPhy::tick_rx`] (RX line clock), [`SataPhy::tick_tx`] (TX line
//! clock) and [`SataPhy::tick_sys`] (system/control clock). Every signal
//! that crosses a domain goes through a synchronization stage; nothing is
//! read directly across a boundary.
//!
//! Failure is not an error type here: signal loss, malformed OOB and
//! misalignment all fold into automatic retries, observable only as
//! [`ReadyStatus`] bits dropping and [`PhyStats`] counters moving. The one
//! fatal class is an unbuildable configuration, rejected by
//! [`SataPhy::new`].

pub mod align;
pub mod config;
pub mod ctrl;
pub mod datapath;
pub mod oob;
pub mod status;
pub mod sync;

pub use align::{AlignmentState, Symbol, SymbolWord};
pub use config::{ConfigError, Gen, PhyConfig};
pub use ctrl::{RxInitState, TxInitState};
pub use oob::{OobEvent, OobEventKind};
pub use status::{ControlRegisters, PhyStats, PhyStatusBits, ReadyStatus};

use align::{AlignDetector, IdleFilter};
use config::{LinkTiming, OobTiming};
use ctrl::{RxInit, RxInitIn, TxInit, TxInitIn};
use datapath::{RxRealign, TxMux};
use oob::{OobRole, OobRx};
use sync::{ElasticBuffer, Sync2};

/// System ticks an explicit restart request stays asserted, so the line
/// domains reliably observe it through their synchronizers.
const RESTART_STRETCH: u32 = 8;

/// Transceiver-adapter inputs, sampled once per RX line clock.
#[derive(Debug, Clone, Copy)]
pub struct RxLineIn {
    pub word: SymbolWord,
    /// Raw electrical-idle detect (pre-debounce).
    pub electrical_idle: bool,
    /// Raw comma-detected pulse from the transceiver.
    pub comma: bool,
}

impl RxLineIn {
    pub fn idle() -> Self {
        RxLineIn {
            word: SymbolWord::default(),
            electrical_idle: true,
            comma: false,
        }
    }

    pub fn active(word: SymbolWord) -> Self {
        let comma = word
            .lanes
            .iter()
            .any(|s| s.is_control && s.data == align::K28_5);
        RxLineIn {
            word,
            electrical_idle: false,
            comma,
        }
    }
}

/// Transceiver-adapter outputs, driven once per TX line clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLineOut {
    pub word: Option<SymbolWord>,
    pub electrical_idle: bool,
}

/// System-domain inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysIn {
    /// Transceiver PLL/CDR lock, passed through into `phy_ready`.
    pub transceiver_lock: bool,
}

/// One SATA link instance. Construct one per port; there is no shared
/// process-wide state, so tests can run many simulated links side by side.
#[derive(Debug)]
pub struct SataPhy {
    config: PhyConfig,

    // RX line domain.
    rx_init: RxInit,
    align: AlignDetector,
    idle_filter: IdleFilter,
    oob_rx: OobRx,
    realign: RxRealign,
    elastic: ElasticBuffer,
    rx_in_reset_raw: bool,
    rx_aligned_raw: bool,
    rx_ready_raw: bool,
    comwake_req_raw: bool,
    comreset_req_raw: bool,

    // TX line domain.
    tx_init: TxInit,
    tx_mux: TxMux,
    tx_ready_raw: bool,
    comreset_done_raw: bool,
    comwake_done_raw: bool,

    // System domain.
    regs: ControlRegisters,
    status: ReadyStatus,
    stats: PhyStats,
    restart_ticks: u32,
    restart_raw: bool,

    // Domain-crossing synchronizers, named for their destination domain.
    tx_sync_restart: Sync2<bool>,
    tx_sync_oob_enable: Sync2<bool>,
    tx_sync_rx_in_reset: Sync2<bool>,
    tx_sync_comreset_req: Sync2<bool>,
    tx_sync_comwake_req: Sync2<bool>,
    tx_sync_rx_aligned: Sync2<bool>,
    tx_sync_rx_ready: Sync2<bool>,
    rx_sync_restart: Sync2<bool>,
    rx_sync_oob_enable: Sync2<bool>,
    rx_sync_comreset_done: Sync2<bool>,
    rx_sync_comwake_done: Sync2<bool>,
    sys_sync_tx_ready: Sync2<bool>,
    sys_sync_rx_ready: Sync2<bool>,
}

impl SataPhy {
    pub fn new(config: PhyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let oob_timing = OobTiming::derive(config.symbol_word_clock_hz())?;
        let link_timing = LinkTiming::derive(&config)?;

        Ok(SataPhy {
            rx_init: RxInit::new(link_timing),
            align: AlignDetector::new(&config),
            idle_filter: IdleFilter::new(config.idle_debounce),
            oob_rx: OobRx::new(oob_timing, OobRole::Host),
            realign: RxRealign::new(),
            elastic: ElasticBuffer::new(),
            rx_in_reset_raw: true,
            rx_aligned_raw: false,
            rx_ready_raw: false,
            comwake_req_raw: false,
            comreset_req_raw: false,

            tx_init: TxInit::new(oob_timing),
            tx_mux: TxMux::new(),
            tx_ready_raw: false,
            comreset_done_raw: false,
            comwake_done_raw: false,

            regs: ControlRegisters::default(),
            status: ReadyStatus::default(),
            stats: PhyStats::default(),
            restart_ticks: 0,
            restart_raw: false,

            tx_sync_restart: Sync2::new(false),
            tx_sync_oob_enable: Sync2::new(true),
            tx_sync_rx_in_reset: Sync2::new(true),
            tx_sync_comreset_req: Sync2::new(false),
            tx_sync_comwake_req: Sync2::new(false),
            tx_sync_rx_aligned: Sync2::new(false),
            tx_sync_rx_ready: Sync2::new(false),
            rx_sync_restart: Sync2::new(false),
            rx_sync_oob_enable: Sync2::new(true),
            rx_sync_comreset_done: Sync2::new(false),
            rx_sync_comwake_done: Sync2::new(false),
            sys_sync_tx_ready: Sync2::new(false),
            sys_sync_rx_ready: Sync2::new(false),

            config,
        })
    }

    // --- Status & control surface (system domain) ---

    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    pub fn control(&self) -> ControlRegisters {
        self.regs
    }

    /// Composite readiness as of the most recent system tick.
    pub fn status(&self) -> ReadyStatus {
        self.status
    }

    pub fn stats(&self) -> PhyStats {
        self.stats
    }

    pub fn alignment(&self) -> AlignmentState {
        self.align.state()
    }

    pub fn tx_init_state(&self) -> TxInitState {
        self.tx_init.state()
    }

    pub fn rx_init_state(&self) -> RxInitState {
        self.rx_init.state()
    }

    /// COMRESET/COMINIT round trips since the last successful bring-up or
    /// explicit restart.
    pub fn bringup_attempts(&self) -> u32 {
        self.rx_init.attempts()
    }

    pub fn retries_exhausted(&self) -> bool {
        self.rx_init.retries_exhausted()
    }

    pub fn set_enable(&mut self, enable: bool) {
        self.regs.enable = enable;
    }

    pub fn set_oob_enable(&mut self, oob_enable: bool) {
        self.regs.oob_enable = oob_enable;
    }

    /// Explicit command-layer reset request; equivalent to a short
    /// enable-off/enable-on pulse.
    pub fn request_restart(&mut self) {
        self.restart_ticks = RESTART_STRETCH;
    }

    /// Drain one word of the aligned receive stream (system domain).
    /// Returns nothing until `rx_ready`.
    pub fn pop_rx_word(&mut self) -> Option<SymbolWord> {
        if self.status.rx_ready {
            self.elastic.pop_expected()
        } else {
            self.elastic.pop()
        }
    }

    // --- Clock domain tick entry points ---

    /// Advance the RX line clock domain by one cycle.
    pub fn tick_rx(&mut self, line: RxLineIn) {
        let restart = self.rx_sync_restart.sample(self.restart_raw);
        let oob_enable = self.rx_sync_oob_enable.sample(self.regs.oob_enable);
        let comreset_done = self.rx_sync_comreset_done.sample(self.comreset_done_raw);
        let comwake_done = self.rx_sync_comwake_done.sample(self.comwake_done_raw);

        let idle = self.idle_filter.tick(line.electrical_idle);
        let oob_event = self.oob_rx.tick(idle);

        if !idle {
            self.align.tick(line.word, line.comma);
        }
        let misalign = self.align.misalign();
        if misalign {
            self.stats.misalign_events += 1;
        }

        let out = self.rx_init.tick(RxInitIn {
            restart,
            oob_enable,
            comreset_done,
            comwake_done,
            oob_event,
            aligned: self.align.aligned(),
            misalign,
            idle,
        });

        if out.in_reset {
            self.align.reset();
            self.realign.reset();
            self.elastic.clear();
            self.oob_rx.reset();
            self.idle_filter.reset();
        }
        if out.retrain {
            self.stats.retrains += 1;
        }
        if out.comreset_req && !self.comreset_req_raw {
            self.stats.oob_retries += 1;
        }

        if out.ready && !idle {
            if let Some(word) = self.realign.tick(line.word, self.align.state().shift) {
                self.elastic.push(word);
            }
        }

        self.rx_in_reset_raw = out.in_reset;
        self.rx_ready_raw = out.ready;
        self.rx_aligned_raw = self.align.aligned();
        self.comwake_req_raw = out.comwake_req;
        self.comreset_req_raw = out.comreset_req;
    }

    /// Advance the TX line clock domain by one cycle, producing the line
    /// word to transmit. `payload` is the upper layer's word for this
    /// cycle; it is only consumed once TX-init is `Ready`.
    pub fn tick_tx(&mut self, payload: Option<SymbolWord>) -> TxLineOut {
        let restart = self.tx_sync_restart.sample(self.restart_raw);
        let oob_enable = self.tx_sync_oob_enable.sample(self.regs.oob_enable);
        let rx_in_reset = self.tx_sync_rx_in_reset.sample(self.rx_in_reset_raw);
        let comreset_req = self.tx_sync_comreset_req.sample(self.comreset_req_raw);
        let comwake_req = self.tx_sync_comwake_req.sample(self.comwake_req_raw);
        let rx_aligned = self.tx_sync_rx_aligned.sample(self.rx_aligned_raw);
        let rx_ready = self.tx_sync_rx_ready.sample(self.rx_ready_raw);

        let out = self.tx_init.tick(TxInitIn {
            restart,
            oob_enable,
            rx_in_reset,
            comreset_req,
            comwake_req,
            rx_aligned,
            rx_ready,
        });

        self.comreset_done_raw = self.tx_init.comreset_done();
        self.comwake_done_raw = self.tx_init.comwake_done();
        self.tx_ready_raw = out.ready;

        if out.burst {
            // OOB bursts carry ALIGN content on the wire.
            return TxLineOut {
                word: Some(SymbolWord::align_low()),
                electrical_idle: false,
            };
        }
        if out.electrical_idle {
            self.tx_mux.reset();
            return TxLineOut {
                word: None,
                electrical_idle: true,
            };
        }

        // In Ready the line must stay active even without payload: fill
        // with ALIGN primitives rather than dropping to electrical idle.
        let fill = out.ready && payload.is_none();
        let word = self
            .tx_mux
            .tick(out.send_align || fill, if out.ready { payload } else { None });
        match word {
            Some(word) => TxLineOut {
                word: Some(word),
                electrical_idle: false,
            },
            None => TxLineOut {
                word: None,
                electrical_idle: true,
            },
        }
    }

    /// Advance the system/control clock domain by one cycle, recomputing
    /// `ReadyStatus` from the synchronized sub-FSM flags.
    pub fn tick_sys(&mut self, input: SysIn) {
        self.restart_raw = !self.regs.enable || self.restart_ticks > 0;
        self.restart_ticks = self.restart_ticks.saturating_sub(1);

        let tx_ready = self.sys_sync_tx_ready.sample(self.tx_ready_raw);
        let rx_ready = self.sys_sync_rx_ready.sample(self.rx_ready_raw);
        let ctrl_ready = tx_ready && rx_ready;
        self.status = ReadyStatus {
            phy_ready: ctrl_ready && input.transceiver_lock,
            tx_ready,
            rx_ready,
            ctrl_ready,
        };

        self.stats.elastic_overflows = self.elastic.overflows();
        self.stats.elastic_underflows = self.elastic.underflows();
    }
}
