//! Clock-domain-crossing primitives.
//!
//! The three clock domains (system, TX line, RX line) are modelled as
//! independent stepping functions with no phase relationship. Nothing
//! crosses a domain boundary directly: scalar flags go through [`Sync2`]
//! (the software analogue of a two-flop synchronizer — a value change is
//! visible to the destination only after two destination ticks) and the
//! data stream goes through the bounded [`ElasticBuffer`].

/// Two-stage synchronizer. Constructed with the reset value of the signal;
/// the destination domain calls [`Sync2::sample`] once per tick with the
/// current source-domain value.
#[derive(Debug, Clone, Copy)]
pub struct Sync2<T: Copy> {
    stages: [T; 2],
}

impl<T: Copy> Sync2<T> {
    pub fn new(reset_value: T) -> Self {
        Sync2 {
            stages: [reset_value; 2],
        }
    }

    /// Shift the source value in and return the synchronized one.
    pub fn sample(&mut self, input: T) -> T {
        let out = self.stages[1];
        self.stages[1] = self.stages[0];
        self.stages[0] = input;
        out
    }

    /// The currently visible (already synchronized) value.
    pub fn value(&self) -> T {
        self.stages[1]
    }
}

use crate::align::SymbolWord;

/// Bounded ring buffer carrying the aligned word stream from the RX line
/// domain into the system domain. Overflow drops the incoming word and
/// underflow returns nothing; both are counted, neither is fatal — the
/// counters feed the diagnostic surface.
#[derive(Debug)]
pub struct ElasticBuffer {
    slots: [SymbolWord; Self::CAPACITY],
    head: usize,
    len: usize,
    overflows: u64,
    underflows: u64,
}

impl ElasticBuffer {
    pub const CAPACITY: usize = 8;

    pub fn new() -> Self {
        ElasticBuffer {
            slots: [SymbolWord::default(); Self::CAPACITY],
            head: 0,
            len: 0,
            overflows: 0,
            underflows: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// RX-domain side: returns false (and counts) when the word was dropped.
    pub fn push(&mut self, word: SymbolWord) -> bool {
        if self.len == Self::CAPACITY {
            self.overflows += 1;
            return false;
        }
        let tail = (self.head + self.len) % Self::CAPACITY;
        self.slots[tail] = word;
        self.len += 1;
        true
    }

    /// System-domain side.
    pub fn pop(&mut self) -> Option<SymbolWord> {
        if self.len == 0 {
            return None;
        }
        let word = self.slots[self.head];
        self.head = (self.head + 1) % Self::CAPACITY;
        self.len -= 1;
        Some(word)
    }

    /// Like [`ElasticBuffer::pop`] but counts an underflow when the reader
    /// expected data and found none.
    pub fn pop_expected(&mut self) -> Option<SymbolWord> {
        let word = self.pop();
        if word.is_none() {
            self.underflows += 1;
        }
        word
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn underflows(&self) -> u64 {
        self.underflows
    }
}

impl Default for ElasticBuffer {
    fn default() -> Self {
        Self::new()
    }
}
