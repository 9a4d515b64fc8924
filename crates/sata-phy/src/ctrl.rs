//! Link control: the TX-init and RX-init sub-FSMs.
//!
//! TX-init owns the transmit OOB sequencer and the ALIGN transmission
//! phases; RX-init owns the handshake ordering (COMINIT, COMWAKE, ALIGN
//! acquisition) and the retry ladder. Each runs in its own line clock
//! domain; every signal between them, and every signal to or from the
//! system domain, crosses through a synchronizer in `SataPhy`.
//!
//! `restart` is the highest-priority input for both FSMs: it returns them
//! to `Reset` unconditionally and is a no-op when already there.

use crate::config::{LinkTiming, OobTiming};
use crate::oob::{OobEvent, OobEventKind, OobSignal, OobTx};

/// Cycles both FSMs dwell in `Reset`, so the cascaded reset is reliably
/// observable across the domain-crossing synchronizers.
const RESET_HOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxInitState {
    Reset,
    Comreset,
    Align,
    Comwake,
    SendAlign,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxInitState {
    Reset,
    AwaitCominit,
    SendComwake,
    AwaitComwake,
    AwaitAlign,
    Align,
    Ready,
}

/// Inputs to one TX-init tick, already synchronized into the TX domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxInitIn {
    pub restart: bool,
    pub oob_enable: bool,
    /// RX-init is in `Reset`; cascade it.
    pub rx_in_reset: bool,
    /// RX-init asks for another COMRESET (COMINIT retry ladder).
    pub comreset_req: bool,
    /// RX-init asks for the COMWAKE burst.
    pub comwake_req: bool,
    pub rx_aligned: bool,
    pub rx_ready: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxInitOut {
    /// Drive an OOB burst this cycle.
    pub burst: bool,
    pub electrical_idle: bool,
    /// Insert ALIGN primitives into the transmit stream.
    pub send_align: bool,
    pub ready: bool,
}

#[derive(Debug)]
pub struct TxInit {
    state: TxInitState,
    oob: OobTx,
    reset_hold: u32,
    /// Idle cycles still to hold after COMWAKE so the far end's detector
    /// sees the final burst terminate before the ALIGN stream starts.
    release: u32,
    release_cycles: u32,
    comreset_done: bool,
    comwake_done: bool,
}

impl TxInit {
    pub fn new(timing: OobTiming) -> Self {
        TxInit {
            state: TxInitState::Reset,
            oob: OobTx::new(timing),
            reset_hold: RESET_HOLD,
            release: 0,
            release_cycles: timing.cominit_gap * 2,
            comreset_done: false,
            comwake_done: false,
        }
    }

    pub fn state(&self) -> TxInitState {
        self.state
    }

    /// COMRESET transmission finished; exported to the RX domain so its
    /// COMINIT timeout only counts after the burst went out.
    pub fn comreset_done(&self) -> bool {
        self.comreset_done
    }

    pub fn comwake_done(&self) -> bool {
        self.comwake_done
    }

    fn set_state(&mut self, next: TxInitState) {
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "tx_init transition");
            self.state = next;
        }
    }

    fn enter_reset(&mut self) {
        self.set_state(TxInitState::Reset);
        self.oob.abort();
        self.reset_hold = RESET_HOLD;
        self.release = 0;
        self.comreset_done = false;
        self.comwake_done = false;
    }

    pub fn tick(&mut self, input: TxInitIn) -> TxInitOut {
        let mut out = TxInitOut {
            electrical_idle: true,
            ..TxInitOut::default()
        };

        if input.restart || input.rx_in_reset {
            self.enter_reset();
            return out;
        }

        match self.state {
            TxInitState::Reset => {
                if self.reset_hold > 0 {
                    self.reset_hold -= 1;
                } else if input.oob_enable {
                    self.oob.start(OobSignal::Comreset);
                    self.set_state(TxInitState::Comreset);
                } else {
                    self.set_state(TxInitState::Align);
                }
            }
            TxInitState::Comreset => {
                out.burst = self.oob.tick();
                out.electrical_idle = !out.burst;
                if self.oob.done() {
                    self.comreset_done = true;
                    self.set_state(TxInitState::Align);
                }
            }
            TxInitState::Align => {
                if input.oob_enable && !self.comwake_done {
                    // Quiet period of the negotiation: the device answers our
                    // COMRESET with COMINIT while we hold the line idle.
                    if input.comreset_req {
                        self.comreset_done = false;
                        self.oob.start(OobSignal::Comreset);
                        self.set_state(TxInitState::Comreset);
                    } else if input.comwake_req {
                        self.oob.start(OobSignal::Comwake);
                        self.set_state(TxInitState::Comwake);
                    }
                } else if self.release > 0 {
                    self.release -= 1;
                } else {
                    out.electrical_idle = false;
                    out.send_align = true;
                    if input.rx_aligned {
                        self.set_state(TxInitState::SendAlign);
                    }
                }
            }
            TxInitState::Comwake => {
                out.burst = self.oob.tick();
                out.electrical_idle = !out.burst;
                if self.oob.done() {
                    self.comwake_done = true;
                    self.release = self.release_cycles;
                    self.set_state(TxInitState::Align);
                }
            }
            TxInitState::SendAlign => {
                out.electrical_idle = false;
                out.send_align = true;
                if input.rx_ready {
                    self.set_state(TxInitState::Ready);
                }
            }
            TxInitState::Ready => {
                out.electrical_idle = false;
                out.ready = true;
            }
        }
        out
    }
}

/// Inputs to one RX-init tick, already synchronized into the RX domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RxInitIn {
    pub restart: bool,
    pub oob_enable: bool,
    pub comreset_done: bool,
    pub comwake_done: bool,
    pub oob_event: Option<OobEvent>,
    pub aligned: bool,
    pub misalign: bool,
    /// Debounced electrical idle on the receive line.
    pub idle: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RxInitOut {
    pub in_reset: bool,
    pub ready: bool,
    pub comwake_req: bool,
    pub comreset_req: bool,
    /// Pulsed when misalignment in `Ready` forced a retrain.
    pub retrain: bool,
}

#[derive(Debug)]
pub struct RxInit {
    state: RxInitState,
    timing: LinkTiming,
    timer: u64,
    hold: u32,
    reset_hold: u32,
    /// Consecutive idle cycles seen while `Ready`.
    idle_run: u64,
    attempts: u32,
    comwake_req: bool,
    comreset_req: bool,
}

impl RxInit {
    pub fn new(timing: LinkTiming) -> Self {
        RxInit {
            state: RxInitState::Reset,
            timing,
            timer: 0,
            hold: 0,
            reset_hold: RESET_HOLD,
            idle_run: 0,
            attempts: 0,
            comwake_req: false,
            comreset_req: false,
        }
    }

    pub fn state(&self) -> RxInitState {
        self.state
    }

    /// COMRESET/COMINIT round trips attempted since the last successful
    /// bring-up or explicit restart. Saturates; retries never stop.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The attempt counter passed the configured retry limit; the link keeps
    /// retrying, this is observability only.
    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= self.timing.retry_limit
    }

    fn set_state(&mut self, next: RxInitState) {
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "rx_init transition");
            self.state = next;
        }
    }

    fn enter_reset(&mut self) {
        self.set_state(RxInitState::Reset);
        self.reset_hold = RESET_HOLD;
        self.timer = 0;
        self.hold = 0;
        self.idle_run = 0;
        self.comwake_req = false;
        self.comreset_req = false;
    }

    fn retry(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        tracing::debug!(attempts = self.attempts, "bring-up attempt failed, retrying");
        self.enter_reset();
    }

    fn event_is(input: &RxInitIn, kind: OobEventKind) -> bool {
        input.oob_event.is_some_and(|e| e.kind == kind)
    }

    pub fn tick(&mut self, input: RxInitIn) -> RxInitOut {
        let mut retrain = false;

        if input.restart {
            // Idempotent: restart while already in Reset holds it there.
            self.enter_reset();
            self.attempts = 0;
        } else {
            match self.state {
                RxInitState::Reset => {
                    if self.reset_hold > 0 {
                        self.reset_hold -= 1;
                    } else if input.oob_enable {
                        self.set_state(RxInitState::AwaitCominit);
                        self.timer = 0;
                    } else {
                        self.set_state(RxInitState::AwaitAlign);
                        self.timer = 0;
                    }
                }
                RxInitState::AwaitCominit => {
                    if Self::event_is(&input, OobEventKind::CominitDetected) {
                        self.comwake_req = true;
                        self.set_state(RxInitState::SendComwake);
                        self.timer = 0;
                    } else {
                        if self.comreset_req && !input.comreset_done {
                            // TX picked up the retry request.
                            self.comreset_req = false;
                        }
                        if input.comreset_done {
                            self.timer += 1;
                            if self.timer >= self.timing.cominit_timeout {
                                self.comreset_req = true;
                                self.attempts = self.attempts.saturating_add(1);
                                self.timer = 0;
                                tracing::debug!(
                                    attempts = self.attempts,
                                    "no COMINIT, requesting another COMRESET"
                                );
                            }
                        }
                    }
                }
                RxInitState::SendComwake => {
                    if input.comwake_done {
                        self.comwake_req = false;
                        self.set_state(RxInitState::AwaitComwake);
                        self.timer = 0;
                    }
                }
                RxInitState::AwaitComwake => {
                    if Self::event_is(&input, OobEventKind::ComwakeDetected) {
                        self.set_state(RxInitState::AwaitAlign);
                        self.timer = 0;
                    } else {
                        self.timer += 1;
                        if self.timer >= self.timing.comwake_timeout {
                            self.retry();
                        }
                    }
                }
                RxInitState::AwaitAlign => {
                    self.timer += 1;
                    if input.aligned {
                        self.hold = 0;
                        self.set_state(RxInitState::Align);
                    } else if self.timer >= self.timing.align_timeout {
                        self.retry();
                    }
                }
                RxInitState::Align => {
                    self.timer += 1;
                    if !input.aligned {
                        self.set_state(RxInitState::AwaitAlign);
                    } else if input.idle {
                        // Alignment is only confirmed against live data;
                        // the hold pauses while the line is idle.
                        if self.timer >= self.timing.align_timeout {
                            self.retry();
                        }
                    } else {
                        self.hold += 1;
                        if self.hold >= self.timing.align_hold {
                            self.attempts = 0;
                            self.set_state(RxInitState::Ready);
                        } else if self.timer >= self.timing.align_timeout {
                            self.retry();
                        }
                    }
                }
                RxInitState::Ready => {
                    if input.misalign {
                        retrain = true;
                        self.retry();
                    } else if input.idle {
                        // A live line is never idle; sustained idle is loss
                        // of signal, not a pause.
                        self.idle_run += 1;
                        if self.idle_run >= self.timing.loss_timeout {
                            tracing::debug!(
                                cycles = self.idle_run,
                                "signal lost while ready, retraining"
                            );
                            retrain = true;
                            self.retry();
                        }
                    } else {
                        self.idle_run = 0;
                    }
                }
            }
        }

        RxInitOut {
            in_reset: self.state == RxInitState::Reset,
            ready: self.state == RxInitState::Ready,
            comwake_req: self.comwake_req,
            comreset_req: self.comreset_req,
            retrain,
        }
    }
}
