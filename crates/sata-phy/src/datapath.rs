//! PHY datapath: byte realignment on receive and primitive insertion on
//! transmit.
//!
//! The comma detector only discovers *where* the word boundary is; this
//! module applies it. With `shift == 1` each output word is stitched from
//! the high byte of the previous raw word and the low byte of the current
//! one. On the transmit side a mux inserts the two-word ALIGN primitive
//! whenever the TX-init FSM asks for it, and passes payload through
//! otherwise.

use crate::align::SymbolWord;

/// Receive-side byte realignment.
#[derive(Debug, Default)]
pub struct RxRealign {
    prev: Option<SymbolWord>,
}

impl RxRealign {
    pub fn new() -> Self {
        RxRealign::default()
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Apply the latched shift to one raw word. With a one-byte shift the
    /// first output needs two raw words, so the very first call yields
    /// nothing.
    pub fn tick(&mut self, raw: SymbolWord, shift: u8) -> Option<SymbolWord> {
        if shift == 0 {
            self.prev = Some(raw);
            return Some(raw);
        }
        let out = self
            .prev
            .map(|prev| SymbolWord::new(prev.lanes[1], raw.lanes[0]));
        self.prev = Some(raw);
        out
    }
}

/// Transmit-side source mux: ALIGN primitive words while requested,
/// payload otherwise. The two ALIGN halves always go out in order.
#[derive(Debug, Default)]
pub struct TxMux {
    second_half: bool,
}

impl TxMux {
    pub fn new() -> Self {
        TxMux::default()
    }

    pub fn reset(&mut self) {
        self.second_half = false;
    }

    pub fn tick(&mut self, send_align: bool, payload: Option<SymbolWord>) -> Option<SymbolWord> {
        if send_align || self.second_half {
            let word = if self.second_half {
                SymbolWord::align_high()
            } else {
                SymbolWord::align_low()
            };
            self.second_half = !self.second_half;
            return Some(word);
        }
        payload
    }
}
