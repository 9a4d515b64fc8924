//! Simulation harness for the SATA PHY: a device-side far end and a
//! lockstep link wiring the two together.
//!
//! [`FarEnd`] is a behavioral model of the device side of the cable. It
//! detects host OOB sequences with the same detector the host uses (in
//! the device role), answers COMRESET with COMINIT and COMWAKE with
//! COMWAKE, then streams ALIGN primitives until it sees another COMRESET.
//! It is deliberately simple: no elasticity, no payload, just enough
//! behavior to drive the host FSMs through every bring-up path.
//!
//! [`LinkSim`] steps the host PHY's three clock domains and the far end
//! in lockstep, one cycle each per [`LinkSim::step`]. Lockstep is a
//! degenerate but legal phase relationship between the domains; the
//! synchronizers inside the PHY still see their full crossing latency.

use sata_phy::align::IdleFilter;
use sata_phy::config::OobTiming;
use sata_phy::oob::{OobRole, OobRx, OobSignal, OobTx};
use sata_phy::{
    ConfigError, Gen, OobEventKind, PhyConfig, RxLineIn, SataPhy, Symbol, SymbolWord, SysIn,
    TxLineOut,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FarEndState {
    /// Quiet until a COMRESET arrives.
    Idle,
    /// COMRESET answered; quiet until the host's COMWAKE arrives.
    AwaitComwake,
    /// Idle pause before transmitting the queued OOB reply.
    Wait { left: u32, reply: OobSignal },
    /// OOB reply in flight.
    Reply { signal: OobSignal },
    /// Idle pause after COMWAKE so the host detector sees the final burst
    /// terminate before the ALIGN stream starts.
    WakeGap { left: u32 },
    /// Continuous ALIGN primitives.
    Streaming,
}

/// Behavioral device-side link partner.
#[derive(Debug)]
pub struct FarEnd {
    oob_tx: OobTx,
    oob_rx: OobRx,
    idle_filter: IdleFilter,
    state: FarEndState,
    /// A silent far end models an empty port: it never answers anything.
    present: bool,
    /// Idle cycles between detecting a host sequence and replying. Longer
    /// than the detector's maximum gap, so the host detector re-arms from
    /// any mid-stream state before the reply begins.
    response_delay: u32,
    /// Pending transmit-word corruptions (invalid control characters).
    corrupt_left: u32,
    align_half: bool,
}

impl FarEnd {
    pub fn new(gen: Gen) -> Result<Self, ConfigError> {
        let timing = OobTiming::derive(gen.word_clock_hz(16))?;
        Ok(FarEnd {
            oob_tx: OobTx::new(timing),
            oob_rx: OobRx::new(timing, OobRole::Device),
            idle_filter: IdleFilter::new(2),
            state: FarEndState::Idle,
            present: true,
            response_delay: timing.gap_max * 2 + 2,
            corrupt_left: 0,
            align_half: false,
        })
    }

    /// An empty port: detects everything, answers nothing.
    pub fn silent(gen: Gen) -> Result<Self, ConfigError> {
        let mut device = FarEnd::new(gen)?;
        device.present = false;
        Ok(device)
    }

    /// A far end that skips OOB entirely and streams ALIGN from the first
    /// cycle, for exercising the host's OOB-bypass mode.
    pub fn align_source(gen: Gen) -> Result<Self, ConfigError> {
        let mut device = FarEnd::new(gen)?;
        device.state = FarEndState::Streaming;
        Ok(device)
    }

    /// Replace the next `words` transmitted words with an invalid control
    /// character, forcing misalignment at the host.
    pub fn corrupt_words(&mut self, words: u32) {
        self.corrupt_left = words;
    }

    pub fn is_streaming(&self) -> bool {
        self.state == FarEndState::Streaming
    }

    fn set_state(&mut self, next: FarEndState) {
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "far end transition");
            self.state = next;
        }
    }

    fn stream_word(&mut self) -> RxLineIn {
        let word = if self.align_half {
            SymbolWord::align_high()
        } else {
            SymbolWord::align_low()
        };
        self.align_half = !self.align_half;
        let word = if self.corrupt_left > 0 {
            self.corrupt_left -= 1;
            SymbolWord::new(Symbol::control(0x5C), Symbol::data(0x00))
        } else {
            word
        };
        RxLineIn::active(word)
    }

    /// Advance one line clock: observe the host's transmit line, produce
    /// this cycle's receive-line input for the host.
    pub fn tick(&mut self, from_host: TxLineOut) -> RxLineIn {
        let host_idle = self.idle_filter.tick(from_host.electrical_idle);
        let event = self.oob_rx.tick(host_idle);

        if self.present {
            if let Some(event) = event {
                match event.kind {
                    OobEventKind::ComresetDetected => {
                        // COMRESET restarts the handshake from any state,
                        // including a retrain arriving mid-stream.
                        self.oob_tx.abort();
                        self.set_state(FarEndState::Wait {
                            left: self.response_delay,
                            reply: OobSignal::Cominit,
                        });
                    }
                    OobEventKind::ComwakeDetected => {
                        if self.state == FarEndState::AwaitComwake {
                            self.set_state(FarEndState::Wait {
                                left: self.response_delay,
                                reply: OobSignal::Comwake,
                            });
                        }
                    }
                    OobEventKind::CominitDetected => {}
                }
            }
        }

        match self.state {
            FarEndState::Idle | FarEndState::AwaitComwake => RxLineIn::idle(),
            FarEndState::Wait { left, reply } => {
                if left == 0 {
                    self.oob_tx.start(reply);
                    self.set_state(FarEndState::Reply { signal: reply });
                } else {
                    self.state = FarEndState::Wait {
                        left: left - 1,
                        reply,
                    };
                }
                RxLineIn::idle()
            }
            FarEndState::Reply { signal } => {
                let burst = self.oob_tx.tick();
                if self.oob_tx.done() {
                    let next = match signal {
                        OobSignal::Comwake => FarEndState::WakeGap {
                            left: self.response_delay,
                        },
                        _ => FarEndState::AwaitComwake,
                    };
                    self.set_state(next);
                }
                if burst {
                    // Bursts carry ALIGN content on the wire.
                    RxLineIn::active(SymbolWord::align_low())
                } else {
                    RxLineIn::idle()
                }
            }
            FarEndState::WakeGap { left } => {
                if left == 0 {
                    self.set_state(FarEndState::Streaming);
                    self.stream_word()
                } else {
                    self.state = FarEndState::WakeGap { left: left - 1 };
                    RxLineIn::idle()
                }
            }
            FarEndState::Streaming => self.stream_word(),
        }
    }
}

/// A host PHY wired to a far end, stepped one cycle at a time.
#[derive(Debug)]
pub struct LinkSim {
    pub phy: SataPhy,
    pub device: FarEnd,
    /// Fed into `phy_ready` every system tick.
    pub transceiver_lock: bool,
    cycles: u64,
}

impl LinkSim {
    pub fn new(config: PhyConfig) -> Result<Self, ConfigError> {
        let device = FarEnd::new(config.gen)?;
        LinkSim::with_device(config, device)
    }

    pub fn with_device(config: PhyConfig, device: FarEnd) -> Result<Self, ConfigError> {
        Ok(LinkSim {
            phy: SataPhy::new(config)?,
            device,
            transceiver_lock: true,
            cycles: 0,
        })
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn step(&mut self) {
        self.step_with_payload(None);
    }

    /// One cycle of every clock domain. Returns what the host drove onto
    /// the line, so tests can observe the transmit side directly.
    pub fn step_with_payload(&mut self, payload: Option<SymbolWord>) -> TxLineOut {
        let tx = self.phy.tick_tx(payload);
        let rx_in = self.device.tick(tx);
        self.phy.tick_rx(rx_in);
        self.phy.tick_sys(SysIn {
            transceiver_lock: self.transceiver_lock,
        });
        self.cycles += 1;
        tx
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Step until `ctrl_ready` asserts; `None` if it never does within
    /// `budget` cycles.
    pub fn run_until_ready(&mut self, budget: u64) -> Option<u64> {
        for _ in 0..budget {
            self.step();
            if self.phy.status().ctrl_ready {
                return Some(self.cycles);
            }
        }
        None
    }
}
