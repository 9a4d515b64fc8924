//! Out-of-band signaling: burst/gap sequencing on the transmit side and
//! burst/gap pattern classification on the receive side.
//!
//! OOB patterns are trains of six bursts separated by idle gaps; the gap
//! length is the only thing distinguishing COMRESET/COMINIT (320 ns) from
//! COMWAKE (106.7 ns). The detector gives no partial credit: any burst or
//! gap outside its tolerance window restarts classification from scratch.

use crate::config::OobTiming;

/// OOB signal to transmit. COMRESET and COMINIT share one timing; the name
/// depends on which end sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobSignal {
    Comreset,
    Cominit,
    Comwake,
}

impl OobSignal {
    fn gap_cycles(self, timing: &OobTiming) -> u32 {
        match self {
            OobSignal::Comreset | OobSignal::Cominit => timing.cominit_gap,
            OobSignal::Comwake => timing.comwake_gap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobTxState {
    Idle,
    Burst,
    Gap,
    Done,
}

/// Transmit-side OOB sequencer: `Idle -> Burst -> Gap -> ... -> Done`,
/// passive in `Done` until the next `start`.
#[derive(Debug)]
pub struct OobTx {
    state: OobTxState,
    signal: OobSignal,
    timer: u32,
    bursts_left: u32,
    timing: OobTiming,
}

impl OobTx {
    pub fn new(timing: OobTiming) -> Self {
        OobTx {
            state: OobTxState::Idle,
            signal: OobSignal::Comreset,
            timer: 0,
            bursts_left: 0,
            timing,
        }
    }

    pub fn state(&self) -> OobTxState {
        self.state
    }

    pub fn start(&mut self, signal: OobSignal) {
        self.signal = signal;
        self.state = OobTxState::Burst;
        self.timer = self.timing.burst;
        self.bursts_left = self.timing.bursts;
        tracing::debug!(?signal, "oob tx sequence start");
    }

    pub fn abort(&mut self) {
        self.state = OobTxState::Idle;
        self.timer = 0;
        self.bursts_left = 0;
    }

    pub fn done(&self) -> bool {
        self.state == OobTxState::Done
    }

    /// Advance one line clock; returns true while the line must drive a
    /// burst (idle-break pattern) and false while it must drive idle.
    pub fn tick(&mut self) -> bool {
        match self.state {
            OobTxState::Idle | OobTxState::Done => false,
            OobTxState::Burst => {
                self.timer -= 1;
                if self.timer == 0 {
                    self.bursts_left -= 1;
                    if self.bursts_left == 0 {
                        self.state = OobTxState::Done;
                    } else {
                        self.state = OobTxState::Gap;
                        self.timer = self.signal.gap_cycles(&self.timing);
                    }
                }
                true
            }
            OobTxState::Gap => {
                self.timer -= 1;
                if self.timer == 0 {
                    self.state = OobTxState::Burst;
                    self.timer = self.timing.burst;
                }
                false
            }
        }
    }
}

/// Which end of the cable this detector sits on. The long-gap pattern is
/// COMRESET when received by a device and COMINIT when received by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobRole {
    Host,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobEventKind {
    ComresetDetected,
    CominitDetected,
    ComwakeDetected,
}

/// A fully classified OOB sequence, stamped with the detector's burst/gap
/// cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OobEvent {
    pub kind: OobEventKind,
    pub at_cycle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapClass {
    Wake,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OobRxState {
    Idle,
    Burst { len: u32 },
    Gap { len: u32 },
    /// A malformed burst was seen while the line is active; wait out a long
    /// idle before re-arming so mid-stream data cannot masquerade as OOB.
    Resync { idle_len: u32 },
}

/// Receive-side OOB detector, driven from the debounced rx-idle line.
#[derive(Debug)]
pub struct OobRx {
    state: OobRxState,
    class: Option<GapClass>,
    bursts_seen: u32,
    cycle: u64,
    timing: OobTiming,
    role: OobRole,
}

impl OobRx {
    pub fn new(timing: OobTiming, role: OobRole) -> Self {
        OobRx {
            state: OobRxState::Idle,
            class: None,
            bursts_seen: 0,
            cycle: 0,
            timing,
            role,
        }
    }

    pub fn reset(&mut self) {
        self.state = OobRxState::Idle;
        self.class = None;
        self.bursts_seen = 0;
    }

    fn burst_ok(&self, len: u32) -> bool {
        len >= self.timing.gap_min && len < self.timing.wake_init_split
    }

    fn classify_gap(&self, len: u32) -> Option<GapClass> {
        if len >= self.timing.gap_min && len < self.timing.wake_init_split {
            Some(GapClass::Wake)
        } else if len >= self.timing.wake_init_split && len <= self.timing.gap_max {
            Some(GapClass::Init)
        } else {
            None
        }
    }

    fn event_kind(&self, class: GapClass) -> OobEventKind {
        match (class, self.role) {
            (GapClass::Wake, _) => OobEventKind::ComwakeDetected,
            (GapClass::Init, OobRole::Host) => OobEventKind::CominitDetected,
            (GapClass::Init, OobRole::Device) => OobEventKind::ComresetDetected,
        }
    }

    /// Advance one line clock with the debounced rx-idle value. Emits an
    /// event on the cycle the final burst of a well-formed sequence ends.
    pub fn tick(&mut self, idle: bool) -> Option<OobEvent> {
        self.cycle += 1;
        match self.state {
            OobRxState::Idle => {
                if !idle {
                    self.state = OobRxState::Burst { len: 1 };
                    self.bursts_seen = 0;
                    self.class = None;
                }
                None
            }
            OobRxState::Burst { len } => {
                if !idle {
                    let len = len + 1;
                    if len >= self.timing.wake_init_split {
                        // Too long for a burst; this is data, not OOB.
                        self.state = OobRxState::Resync { idle_len: 0 };
                    } else {
                        self.state = OobRxState::Burst { len };
                    }
                    return None;
                }
                // Burst ended.
                if !self.burst_ok(len) {
                    self.state = OobRxState::Idle;
                    self.class = None;
                    self.bursts_seen = 0;
                    return None;
                }
                self.bursts_seen += 1;
                if self.bursts_seen == self.timing.bursts {
                    let Some(class) = self.class else {
                        self.reset();
                        return None;
                    };
                    let event = OobEvent {
                        kind: self.event_kind(class),
                        at_cycle: self.cycle,
                    };
                    tracing::debug!(kind = ?event.kind, cycle = event.at_cycle, "oob sequence detected");
                    self.reset();
                    return Some(event);
                }
                self.state = OobRxState::Gap { len: 1 };
                None
            }
            OobRxState::Gap { len } => {
                if idle {
                    let len = len + 1;
                    if len > self.timing.gap_max {
                        // Sequence died out; the line is already idle.
                        self.reset();
                    } else {
                        self.state = OobRxState::Gap { len };
                    }
                    return None;
                }
                // Gap ended, a new burst begins. Classify the gap; any
                // mismatch restarts with this burst as a fresh first one.
                match self.classify_gap(len) {
                    Some(class) if self.class.is_none() || self.class == Some(class) => {
                        self.class = Some(class);
                    }
                    _ => {
                        self.class = None;
                        self.bursts_seen = 0;
                    }
                }
                self.state = OobRxState::Burst { len: 1 };
                None
            }
            OobRxState::Resync { idle_len } => {
                if idle {
                    let idle_len = idle_len + 1;
                    if idle_len > self.timing.gap_max {
                        self.state = OobRxState::Idle;
                    } else {
                        self.state = OobRxState::Resync { idle_len };
                    }
                } else {
                    self.state = OobRxState::Resync { idle_len: 0 };
                }
                None
            }
        }
    }
}
