// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! `MarshalSignalMap` (spec §4.8 "Marshal to/from SignalVector"): pairs
//! transform-matrix signal rows with a model's `Channel` by name, so that
//! after an Rx decode the matrix's `phys` column can be copied into the
//! model's signal vector, and before a Tx encode the vector can be copied
//! back into `phys`.
//!
//! Grounded on `simbus_core::marshal`'s channel-to-channel copy pattern,
//! generalized to copy between a `TransformMatrix`'s rows and a `Channel`.

use crate::matrix::TransformMatrix;
use simbus_core::channel::Channel;

/// One `(pdu_idx, name)` pairing between a matrix row and a channel signal.
#[derive(Debug, Clone)]
pub struct MarshalSignalMap {
    pairs: Vec<(usize, String)>,
}

impl MarshalSignalMap {
    pub fn new() -> Self {
        MarshalSignalMap { pairs: Vec::new() }
    }

    pub fn bind(&mut self, pdu_idx: usize, signal_name: impl Into<String>) {
        self.pairs.push((pdu_idx, signal_name.into()));
    }

    pub fn pairs_len(&self) -> usize {
        self.pairs.len()
    }

    /// After Rx decode: matrix `phys` -> channel `final_val` (the adapter's
    /// marshaller treats `final_val` as the tentative value pending commit).
    pub fn copy_from_matrix(&self, matrix: &TransformMatrix, channel: &mut Channel) {
        for (pdu_idx, name) in &self.pairs {
            if let Some(row) = matrix.rows().iter().find(|r| r.pdu_idx == *pdu_idx && &r.name == name) {
                if let Some(sv) = channel.get_mut(name) {
                    sv.final_val = row.phys;
                }
            }
        }
    }

    /// Before Tx encode: channel `val` -> matrix `phys`.
    pub fn copy_to_matrix(&self, channel: &Channel, matrix: &mut TransformMatrix) {
        for (pdu_idx, name) in &self.pairs {
            let value = channel.get(name).map(|sv| sv.val);
            if let Some(value) = value {
                if let Some(row) = matrix.rows_mut().iter_mut().find(|r| r.pdu_idx == *pdu_idx && &r.name == name) {
                    row.phys = value;
                }
            }
        }
    }
}

impl Default for MarshalSignalMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixRow;

    #[test]
    fn copy_to_then_from_matrix_round_trips() {
        let mut matrix = TransformMatrix::new();
        let mut row = MatrixRow::new(0, 0, "SIG_A", 4, 12);
        row.factor = 0.1;
        row.offset = -40.0;
        matrix.push(row);

        let mut channel = Channel::new("net");
        channel.get_or_create("SIG_A").val = 10.0;

        let mut map = MarshalSignalMap::new();
        map.bind(0, "SIG_A");
        map.copy_to_matrix(&channel, &mut matrix);
        assert_eq!(matrix.rows()[0].phys, 10.0);

        matrix.rows_mut()[0].phys = 12.5;
        map.copy_from_matrix(&matrix, &mut channel);
        assert_eq!(channel.get("SIG_A").unwrap().final_val, 12.5);
    }
}
