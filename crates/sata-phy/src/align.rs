//! Comma detection and byte/word alignment.
//!
//! The transceiver hands us a free-running stream of 16-bit symbol words
//! with per-byte control-character flags; the word boundary it picked is
//! arbitrary. This module finds the K28.5 comma carried by the ALIGN
//! primitive, latches which byte lane it lands on, and reports alignment
//! plus a saturating misalignment count once locked. Loss of tracking is
//! signalled upward; re-detection is forced by the link control FSM.

use crate::config::PhyConfig;

/// K28.5, the comma byte that opens the ALIGN primitive.
pub const K28_5: u8 = 0xBC;
/// K28.3, the control byte opening every other SATA primitive.
pub const K28_3: u8 = 0x7C;
/// ALIGN primitive dword: D27.3 D10.2 D10.2 K28.5.
pub const ALIGN_DWORD: u32 = 0x7B4A_4ABC;

/// One 8b/10b-decoded byte: data value plus control-character flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Symbol {
    pub data: u8,
    pub is_control: bool,
}

impl Symbol {
    pub fn data(data: u8) -> Self {
        Symbol {
            data,
            is_control: false,
        }
    }

    pub fn control(data: u8) -> Self {
        Symbol {
            data,
            is_control: true,
        }
    }
}

/// One 16-bit line word; lane 0 is transmitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolWord {
    pub lanes: [Symbol; 2],
}

impl SymbolWord {
    pub fn new(first: Symbol, second: Symbol) -> Self {
        SymbolWord {
            lanes: [first, second],
        }
    }

    pub fn from_data(value: u16) -> Self {
        SymbolWord::new(Symbol::data(value as u8), Symbol::data((value >> 8) as u8))
    }

    /// First half of the ALIGN primitive (K28.5 + D10.2).
    pub fn align_low() -> Self {
        SymbolWord::new(
            Symbol::control(ALIGN_DWORD as u8),
            Symbol::data((ALIGN_DWORD >> 8) as u8),
        )
    }

    /// Second half of the ALIGN primitive (D10.2 + D27.3).
    pub fn align_high() -> Self {
        SymbolWord::new(
            Symbol::data((ALIGN_DWORD >> 16) as u8),
            Symbol::data((ALIGN_DWORD >> 24) as u8),
        )
    }

    pub fn has_control(&self) -> bool {
        self.lanes.iter().any(|s| s.is_control)
    }

    fn comma_lanes(&self) -> (bool, bool) {
        let comma = |s: &Symbol| s.is_control && s.data == K28_5;
        (comma(&self.lanes[0]), comma(&self.lanes[1]))
    }
}

/// Alignment tracking state, exported read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlignmentState {
    pub aligned: bool,
    /// Byte lane the comma was confirmed on (0 or 1).
    pub shift: u8,
    /// Saturating count of misalignment samples while aligned.
    pub misalign_count: u8,
}

// Comma-to-comma spacing in an ALIGN stream is two words; allow a little
// slack before a candidate run is abandoned during acquisition.
const CANDIDATE_GAP_LIMIT: u32 = 4;

#[derive(Debug)]
pub struct AlignDetector {
    state: AlignmentState,
    candidate_lane: u8,
    candidate_run: u32,
    words_since_comma: u32,
    misalign_pulse: bool,
    debounce: u32,
    interval: u32,
    threshold: u8,
}

impl AlignDetector {
    pub fn new(config: &PhyConfig) -> Self {
        AlignDetector {
            state: AlignmentState::default(),
            candidate_lane: 0,
            candidate_run: 0,
            words_since_comma: 0,
            misalign_pulse: false,
            debounce: config.align_debounce,
            interval: config.align_interval,
            threshold: config.misalign_threshold,
        }
    }

    pub fn state(&self) -> AlignmentState {
        self.state
    }

    pub fn aligned(&self) -> bool {
        self.state.aligned
    }

    /// True for the one cycle on which alignment was dropped.
    pub fn misalign(&self) -> bool {
        self.misalign_pulse
    }

    pub fn reset(&mut self) {
        self.state = AlignmentState::default();
        self.candidate_run = 0;
        self.words_since_comma = 0;
        self.misalign_pulse = false;
    }

    /// Advance one line word clock. `comma_hint` is the transceiver's raw
    /// comma-detected pulse; lane resolution still comes from scanning the
    /// word itself.
    pub fn tick(&mut self, word: SymbolWord, comma_hint: bool) {
        self.misalign_pulse = false;
        let (lane0, lane1) = word.comma_lanes();

        if !self.state.aligned {
            self.acquire(lane0, lane1, comma_hint);
        } else {
            self.track(word, lane0, lane1);
        }
    }

    fn acquire(&mut self, lane0: bool, lane1: bool, comma_hint: bool) {
        if lane0 && lane1 {
            // Ambiguous sample: keep the current candidate, count nothing.
            return;
        }
        let lane = match (lane0, lane1) {
            (true, false) => Some(0u8),
            (false, true) => Some(1u8),
            _ => None,
        };
        match lane {
            Some(lane) => {
                if self.candidate_run > 0 && lane == self.candidate_lane {
                    self.candidate_run += 1;
                } else {
                    self.candidate_lane = lane;
                    self.candidate_run = 1;
                }
                self.words_since_comma = 0;
                if self.candidate_run >= self.debounce {
                    self.state.aligned = true;
                    self.state.shift = self.candidate_lane;
                    self.state.misalign_count = 0;
                    self.words_since_comma = 0;
                    tracing::debug!(lane = self.candidate_lane, "byte alignment acquired");
                }
            }
            None => {
                // The raw comma pulse alone cannot resolve a lane; it only
                // keeps an in-progress candidate alive.
                self.words_since_comma += 1;
                if !comma_hint && self.words_since_comma > CANDIDATE_GAP_LIMIT {
                    self.candidate_run = 0;
                }
            }
        }
    }

    fn track(&mut self, word: SymbolWord, lane0: bool, lane1: bool) {
        let expected = if self.state.shift == 0 { lane0 } else { lane1 };
        let other = if self.state.shift == 0 { lane1 } else { lane0 };

        if expected {
            self.words_since_comma = 0;
        } else {
            self.words_since_comma += 1;
            if other && !expected {
                // Comma on the wrong lane only: the boundary slipped.
                self.count_misalign();
            }
            if self.words_since_comma > self.interval {
                self.words_since_comma = 0;
                self.count_misalign();
            }
        }

        // Control bytes other than K28.5/K28.3 are neither data nor an
        // expected primitive and count as misalignment samples.
        for symbol in &word.lanes {
            if symbol.is_control && symbol.data != K28_5 && symbol.data != K28_3 {
                self.count_misalign();
            }
        }
    }

    fn count_misalign(&mut self) {
        if !self.state.aligned {
            return;
        }
        self.state.misalign_count = self.state.misalign_count.saturating_add(1);
        if self.state.misalign_count > self.threshold {
            self.state.aligned = false;
            self.candidate_run = 0;
            self.misalign_pulse = true;
            tracing::debug!(
                count = self.state.misalign_count,
                "alignment lost, forcing re-detection"
            );
        }
    }
}

/// Debounce for the raw electrical-idle input. OOB burst/gap measurement
/// runs off this filtered value, so enter/exit latency is symmetric and
/// cancels out of the gap arithmetic.
#[derive(Debug)]
pub struct IdleFilter {
    value: bool,
    run: u32,
    debounce: u32,
}

impl IdleFilter {
    pub fn new(debounce: u32) -> Self {
        // The line is idle at power-on.
        IdleFilter {
            value: true,
            run: 0,
            debounce,
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = true;
        self.run = 0;
    }

    pub fn tick(&mut self, raw_idle: bool) -> bool {
        if raw_idle == self.value {
            self.run = 0;
        } else {
            self.run += 1;
            if self.run >= self.debounce {
                self.value = raw_idle;
                self.run = 0;
            }
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Gen, PhyConfig};

    fn detector() -> AlignDetector {
        AlignDetector::new(&PhyConfig::new(Gen::Gen2, 150_000_000))
    }

    fn feed_align_stream(det: &mut AlignDetector, pairs: u32) {
        for _ in 0..pairs {
            det.tick(SymbolWord::align_low(), true);
            det.tick(SymbolWord::align_high(), false);
        }
    }

    #[test]
    fn align_stream_on_lane0_locks_after_debounce() {
        let mut det = detector();
        feed_align_stream(&mut det, 3);
        assert!(!det.aligned(), "three commas are under the debounce of 4");
        feed_align_stream(&mut det, 1);
        assert!(det.aligned());
        assert_eq!(det.state().shift, 0);
    }

    #[test]
    fn shifted_align_stream_latches_lane1() {
        let mut det = detector();
        // Word boundary off by one byte: K28.5 arrives in the high lane.
        let shifted_low = SymbolWord::new(Symbol::data(0x7B), Symbol::control(K28_5));
        let shifted_high = SymbolWord::new(Symbol::data(0x4A), Symbol::data(0x4A));
        for _ in 0..4 {
            det.tick(shifted_low, true);
            det.tick(shifted_high, false);
        }
        assert!(det.aligned());
        assert_eq!(det.state().shift, 1);
    }

    #[test]
    fn comma_on_both_lanes_does_not_flip_a_candidate() {
        let mut det = detector();
        feed_align_stream(&mut det, 3);
        let ambiguous = SymbolWord::new(Symbol::control(K28_5), Symbol::control(K28_5));
        det.tick(ambiguous, true);
        assert!(!det.aligned(), "ambiguous samples are discarded, not counted");
        feed_align_stream(&mut det, 1);
        assert!(det.aligned());
        assert_eq!(det.state().shift, 0, "confirmed lane survives ambiguity");
    }

    #[test]
    fn lane_switch_restarts_the_debounce_run() {
        let mut det = detector();
        feed_align_stream(&mut det, 3);
        let shifted = SymbolWord::new(Symbol::data(0x7B), Symbol::control(K28_5));
        det.tick(shifted, true);
        feed_align_stream(&mut det, 3);
        assert!(!det.aligned(), "run restarted when the comma moved lanes");
    }

    #[test]
    fn unexpected_control_bytes_accumulate_and_drop_alignment() {
        let mut det = detector();
        feed_align_stream(&mut det, 4);
        assert!(det.aligned());

        // K28.3-framed primitives are expected traffic.
        det.tick(
            SymbolWord::new(Symbol::control(K28_3), Symbol::data(0x95)),
            false,
        );
        assert_eq!(det.state().misalign_count, 0);

        let junk = SymbolWord::new(Symbol::control(0x5C), Symbol::data(0x00));
        for n in 1..=4u8 {
            det.tick(junk, false);
            assert_eq!(det.state().misalign_count, n);
            assert!(det.aligned());
            assert!(!det.misalign());
        }
        det.tick(junk, false);
        assert!(!det.aligned(), "count above threshold drops alignment");
        assert!(det.misalign(), "loss is pulsed upward exactly once");
        det.tick(SymbolWord::from_data(0), false);
        assert!(!det.misalign());
    }

    #[test]
    fn missing_align_cadence_counts_misalignment() {
        let mut config = PhyConfig::new(Gen::Gen2, 150_000_000);
        config.align_interval = 8;
        let mut det = AlignDetector::new(&config);
        feed_align_stream(&mut det, 4);
        assert!(det.aligned());

        for _ in 0..9 {
            det.tick(SymbolWord::from_data(0x1234), false);
        }
        assert_eq!(det.state().misalign_count, 1);
    }

    #[test]
    fn idle_filter_needs_consecutive_samples_to_flip() {
        let mut filter = IdleFilter::new(2);
        assert!(filter.value());
        assert!(filter.tick(false), "one active sample is not enough");
        assert!(!filter.tick(false), "second consecutive sample flips");
        assert!(!filter.tick(true));
        filter.tick(false); // interrupted run starts over
        assert!(!filter.tick(true));
        assert!(filter.tick(true));
    }
}
