// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! `SignalValue`: the per-signal record in the bus-facing store (spec §3).

use crate::error::{SimResult, SimbusError};

/// Per-signal record. `uid == 0` means "not yet resolved" by the bus.
#[derive(Debug, Clone)]
pub struct SignalValue {
    pub name: String,
    pub uid: u32,
    /// Last committed scalar value.
    pub val: f64,
    /// Tentative scalar written this step; `final_val != val` marks a delta.
    pub final_val: f64,
    bin: Vec<u8>,
    bin_size: usize,
    reset_called: bool,
}

impl SignalValue {
    pub fn new(name: impl Into<String>) -> Self {
        SignalValue {
            name: name.into(),
            uid: 0,
            val: 0.0,
            final_val: 0.0,
            bin: Vec::new(),
            bin_size: 0,
            reset_called: false,
        }
    }

    /// `bin_size != 0` means the binary payload carries a delta this step.
    pub fn bin_size(&self) -> usize {
        self.bin_size
    }

    /// Backing capacity; never shrinks across steps (a performance choice
    /// noted in spec §9).
    pub fn bin_buffer_size(&self) -> usize {
        self.bin.capacity()
    }

    /// The currently held binary payload, `[0..bin_size)`.
    pub fn binary(&self) -> &[u8] {
        &self.bin[..self.bin_size]
    }

    /// `reset(index)` must precede `append` (spec §3 invariant, §4.6 binary
    /// reset discipline).
    pub fn reset(&mut self) {
        self.bin_size = 0;
        self.reset_called = true;
    }

    /// Append bytes to the binary payload. Errors with `Eproto` if `reset`
    /// was not called first this step (echo protection).
    pub fn append(&mut self, data: &[u8]) -> SimResult<()> {
        if !self.reset_called {
            return Err(SimbusError::Eproto(0));
        }
        let end = self.bin_size + data.len();
        if self.bin.len() < end {
            self.bin.resize(end, 0);
        }
        self.bin[self.bin_size..end].copy_from_slice(data);
        self.bin_size = end;
        Ok(())
    }

    /// Replace the binary payload wholesale (used when decoding an inbound
    /// delta where no reset/append sequencing applies, e.g. bus-side writes).
    pub fn set_binary(&mut self, data: &[u8]) {
        self.bin.clear();
        self.bin.extend_from_slice(data);
        self.bin_size = data.len();
    }

    /// `true` if this signal carries a delta to be included in the next
    /// outgoing payload: `final_val != val` or a non-empty binary payload.
    pub fn has_delta(&self) -> bool {
        self.val != self.final_val || self.bin_size > 0
    }

    /// Commit the tentative value: `val := final_val`, mark the binary
    /// payload consumed. Used by the coordinator's resolution step.
    pub fn commit(&mut self) {
        self.val = self.final_val;
        self.bin_size = 0;
        self.reset_called = false;
    }

    /// Mark the binary payload consumed without clearing `reset_called`
    /// (used by the adapter after emitting a delta mid-step).
    pub fn mark_binary_consumed(&mut self) {
        self.bin_size = 0;
    }

    /// Reset `final_val` to `val` and clear `reset_called`, as happens on
    /// every inbound marshal (`adapter.c::process_signal_value_data`): "no
    /// phantom delta on next send".
    pub fn clear_delta(&mut self) {
        self.final_val = self.val;
        self.reset_called = false;
    }
}
