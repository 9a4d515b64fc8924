//! Link configuration: generation selection, clocking, and the SATA OOB
//! timing tables.
//!
//! All timing in this crate is expressed as cycle counts derived once at
//! construction from nanosecond constants; nothing is renegotiated at
//! runtime. A configuration that cannot express the OOB windows (clock too
//! slow) is rejected up front rather than degraded.

use std::str::FromStr;

use thiserror::Error;

/// SATA link speed generation (1.5 / 3 / 6 Gbit/s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gen {
    Gen1,
    Gen2,
    Gen3,
}

impl Gen {
    /// Serial line rate in bits per second.
    pub fn line_rate_bps(self) -> u64 {
        match self {
            Gen::Gen1 => 1_500_000_000,
            Gen::Gen2 => 3_000_000_000,
            Gen::Gen3 => 6_000_000_000,
        }
    }

    /// Word clock of the byte-parallel transceiver interface for a bus of
    /// `data_width` bits. 8b/10b carries one data byte per ten line bits, so
    /// a 16-bit bus at Gen2 runs at 150 MHz.
    pub fn word_clock_hz(self, data_width: u32) -> u64 {
        self.line_rate_bps() / 10 / u64::from(data_width / 8)
    }
}

impl FromStr for Gen {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "gen1" => Ok(Gen::Gen1),
            "gen2" => Ok(Gen::Gen2),
            "gen3" => Ok(Gen::Gen3),
            other => Err(ConfigError::UnsupportedGen(other.to_string())),
        }
    }
}

/// Fatal construction-time configuration errors. Steady-state operation
/// never returns errors; the ready/status surface is the only runtime
/// observability channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported SATA generation `{0}` (expected gen1, gen2 or gen3)")]
    UnsupportedGen(String),
    #[error("unsupported transceiver data width {0} (expected 16 or 32)")]
    UnsupportedDataWidth(u32),
    #[error("{clk_hz} Hz clock is too slow to resolve the {what} OOB window")]
    ClockTooSlow { clk_hz: u64, what: &'static str },
}

// OOB burst/gap durations mandated by the SATA specification. OOB is
// signaled at Gen1 UI timing regardless of the negotiated generation: a
// burst is 160 UI (~106.7 ns), COMRESET/COMINIT gaps are 480 UI (320 ns)
// and COMWAKE gaps equal the burst length.
pub const OOB_BURST_NS: u64 = 107;
pub const OOB_COMINIT_GAP_NS: u64 = 320;
pub const OOB_COMWAKE_GAP_NS: u64 = 107;
pub const OOB_BURSTS: u32 = 6;

// Detector tolerance windows: COMWAKE gaps are accepted in 55..175 ns,
// COMRESET/COMINIT gaps in 175..=525 ns. Bursts use the COMWAKE window.
pub const OOB_GAP_MIN_NS: u64 = 55;
pub const OOB_WAKE_INIT_SPLIT_NS: u64 = 175;
pub const OOB_GAP_MAX_NS: u64 = 525;

/// Convert a nanosecond duration into clock cycles, rounding to nearest.
pub fn cycles_from_ns(ns: u64, clk_hz: u64) -> u64 {
    ((u128::from(ns) * u128::from(clk_hz) + 500_000_000) / 1_000_000_000) as u64
}

/// OOB burst/gap timing resolved to cycles of one line word clock.
#[derive(Debug, Clone, Copy)]
pub struct OobTiming {
    pub burst: u32,
    pub cominit_gap: u32,
    pub comwake_gap: u32,
    /// Shortest burst or gap the detector accepts.
    pub gap_min: u32,
    /// Gaps below this are COMWAKE-class, at or above are COMINIT-class.
    pub wake_init_split: u32,
    /// Longest gap still considered part of an OOB sequence.
    pub gap_max: u32,
    pub bursts: u32,
}

impl OobTiming {
    pub fn derive(clk_hz: u64) -> Result<Self, ConfigError> {
        let timing = OobTiming {
            burst: cycles_from_ns(OOB_BURST_NS, clk_hz) as u32,
            cominit_gap: cycles_from_ns(OOB_COMINIT_GAP_NS, clk_hz) as u32,
            comwake_gap: cycles_from_ns(OOB_COMWAKE_GAP_NS, clk_hz) as u32,
            gap_min: cycles_from_ns(OOB_GAP_MIN_NS, clk_hz) as u32,
            wake_init_split: cycles_from_ns(OOB_WAKE_INIT_SPLIT_NS, clk_hz) as u32,
            gap_max: cycles_from_ns(OOB_GAP_MAX_NS, clk_hz) as u32,
            bursts: OOB_BURSTS,
        };
        if timing.gap_min == 0 || timing.burst < 2 {
            return Err(ConfigError::ClockTooSlow {
                clk_hz,
                what: "burst",
            });
        }
        if timing.wake_init_split <= timing.gap_min || timing.gap_max <= timing.wake_init_split {
            return Err(ConfigError::ClockTooSlow {
                clk_hz,
                what: "gap classification",
            });
        }
        Ok(timing)
    }
}

/// Construction-time link configuration. Nothing here is runtime
/// reconfigurable; re-initialization goes through the `enable` control
/// register instead.
#[derive(Debug, Clone)]
pub struct PhyConfig {
    pub gen: Gen,
    /// System/control clock in Hz (the domain holding the control and status
    /// registers).
    pub clk_freq_hz: u64,
    /// Transceiver parallel bus width in bits: 16 or 32.
    pub data_width: u32,
    /// Saturating misalignment count above which alignment is dropped and
    /// the link retrains.
    pub misalign_threshold: u8,
    /// Consecutive comma observations on one byte lane required before
    /// declaring alignment.
    pub align_debounce: u32,
    /// Cycles `aligned` must hold continuously before RX-init leaves Align
    /// for Ready.
    pub align_hold: u32,
    /// Expected ALIGN cadence while aligned, in 16-bit words. SATA sends an
    /// ALIGN pair at least every 256 dwords.
    pub align_interval: u32,
    /// Consecutive raw cycles before the debounced rx-idle flips.
    pub idle_debounce: u32,
    /// COMRESET/COMINIT round trips before the attempt counter saturates.
    /// Retries continue indefinitely either way; absence of a device is a
    /// valid operating state.
    pub retry_limit: u32,
    /// Interval between COMRESET retries while no COMINIT is seen.
    pub retry_timeout_ns: u64,
    /// Budget for the COMWAKE response and for ALIGN acquisition.
    pub align_timeout_ns: u64,
    /// Sustained electrical idle while `Ready` before the link declares
    /// loss of signal and retrains. A live SATA line never idles; it is
    /// filled with ALIGN primitives.
    pub loss_timeout_ns: u64,
}

impl PhyConfig {
    pub fn new(gen: Gen, clk_freq_hz: u64) -> Self {
        PhyConfig {
            gen,
            clk_freq_hz,
            data_width: 16,
            misalign_threshold: 4,
            align_debounce: 4,
            align_hold: 32,
            align_interval: 512,
            idle_debounce: 2,
            retry_limit: 8,
            retry_timeout_ns: 10_000_000,
            align_timeout_ns: 873_800,
            loss_timeout_ns: 1_000,
        }
    }

    /// Clock of the internal 16-bit symbol word stream. A 32-bit transceiver
    /// bus is presented to the alignment logic as two 16-bit words per line
    /// clock, so this rate is independent of `data_width`.
    pub fn symbol_word_clock_hz(&self) -> u64 {
        self.gen.word_clock_hz(16)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_width != 16 && self.data_width != 32 {
            return Err(ConfigError::UnsupportedDataWidth(self.data_width));
        }
        OobTiming::derive(self.symbol_word_clock_hz())?;
        LinkTiming::derive(self)?;
        Ok(())
    }
}

/// Link control FSM timeouts resolved to cycles of the line word clock.
#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    pub cominit_timeout: u64,
    pub comwake_timeout: u64,
    pub align_timeout: u64,
    pub loss_timeout: u64,
    pub align_hold: u32,
    pub retry_limit: u32,
}

impl LinkTiming {
    pub fn derive(config: &PhyConfig) -> Result<Self, ConfigError> {
        let clk_hz = config.symbol_word_clock_hz();
        let timing = LinkTiming {
            cominit_timeout: cycles_from_ns(config.retry_timeout_ns, clk_hz),
            comwake_timeout: cycles_from_ns(config.align_timeout_ns, clk_hz),
            align_timeout: cycles_from_ns(config.align_timeout_ns, clk_hz),
            loss_timeout: cycles_from_ns(config.loss_timeout_ns, clk_hz),
            align_hold: config.align_hold,
            retry_limit: config.retry_limit,
        };
        if timing.cominit_timeout == 0 || timing.align_timeout == 0 || timing.loss_timeout == 0 {
            return Err(ConfigError::ClockTooSlow {
                clk_hz,
                what: "retry timeout",
            });
        }
        Ok(timing)
    }
}
