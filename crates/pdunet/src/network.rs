// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! PDU Network (spec §4.8): PDU definitions, the scheduler, and the
//! encode/decode passes tying a `TransformMatrix` to wire payloads.
//!
//! Grounded on `original_source/dse/modelc/model/pdunet/network.c`: the
//! FNV-1a checksum constants, the interval/phase scheduler algorithm, and the
//! `spec/metadata/flexray` YAML probe that selects the FlexRay transport.

use crate::matrix::{pack_bits, unpack_bits, MatrixRow, TransformMatrix};
use crate::script::ScriptEngine;
use simbus_core::error::{SimResult, SimbusError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduDirection {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    None,
    Can,
    Ip,
    FlexRay,
}

/// `interval`/`phase`/`epoch_offset` normalized to step counts at
/// construction time (spec §4.8 "in steps"), avoiding float-modulo drift
/// across a long-running simulation.
#[derive(Debug, Clone, Copy)]
pub struct PduSchedule {
    pub interval_steps: u64,
    pub phase_steps: u64,
    pub epoch_offset_steps: u64,
}

impl PduSchedule {
    pub fn from_seconds(phase: f64, interval: f64, epoch_offset: f64, step_size: f64) -> Self {
        PduSchedule {
            interval_steps: (interval / step_size).round() as u64,
            phase_steps: (phase / step_size).round() as u64,
            epoch_offset_steps: (epoch_offset / step_size).round() as u64,
        }
    }

    /// `interval == 0` PDUs are always eligible (spec §4.8: "always eligible
    /// (Tx if checksum changed)").
    ///
    /// Eligibility is `(step - epoch_offset + phase) mod interval == 0`: the
    /// PDU becomes due `phase` steps *before* each interval boundary rather
    /// than `phase` steps after the epoch. Grounded against spec §8
    /// scenario 5's worked numbers (`phase=0.001`, `interval=0.005`,
    /// `step_size=0.0005` gives first Tx at `t=0.004`, i.e. step 8, which is
    /// `interval_steps(10) - phase_steps(2)`, not `phase_steps` itself) —
    /// the literal "base = epoch_offset + phase" wording in spec.md §4.8 is
    /// ambiguous about the sign and this is the reading consistent with the
    /// scenario.
    pub fn is_due(&self, step: u64) -> bool {
        if self.interval_steps == 0 {
            return true;
        }
        if step < self.epoch_offset_steps {
            return false;
        }
        let elapsed = step - self.epoch_offset_steps;
        (elapsed + self.phase_steps) % self.interval_steps == 0
    }
}

#[derive(Debug)]
pub struct PduDef {
    pub id: u32,
    pub name: String,
    pub length: usize,
    pub direction: PduDirection,
    pub schedule: PduSchedule,
    pub transport_type: TransportType,
    pub swc_id: u32,
    pub ecu_id: u32,
    /// PDU-level encode/decode hook, invoked with the whole payload after
    /// every signal is packed (encode) or before any signal is unpacked
    /// (decode).
    pub pdu_encode_hook: Option<usize>,
    pub pdu_decode_hook: Option<usize>,
    payload: Vec<u8>,
    checksum: u32,
    update_signals: bool,
}

impl PduDef {
    pub fn new(id: u32, name: impl Into<String>, length: usize, direction: PduDirection, schedule: PduSchedule) -> Self {
        PduDef {
            id,
            name: name.into(),
            length,
            direction,
            schedule,
            transport_type: TransportType::None,
            swc_id: 0,
            ecu_id: 0,
            pdu_encode_hook: None,
            pdu_decode_hook: None,
            payload: vec![0u8; length],
            checksum: 0,
            update_signals: false,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Set after a Rx decode; cleared once the decoded values have been
    /// marshalled into the model's SignalVector (spec §4.8 "Decode").
    pub fn update_signals(&self) -> bool {
        self.update_signals
    }

    pub fn clear_update_signals(&mut self) {
        self.update_signals = false;
    }
}

/// FNV-1a, 32-bit, matching `simbus-core::simbus`'s constants (both trace
/// back to `network.c`'s checksum routine).
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// PDUs, their transform matrix rows, and per-tick encode/decode/scheduling.
pub struct PduNetwork {
    pdus: Vec<PduDef>,
    matrix: TransformMatrix,
    scripts: Box<dyn ScriptEngine>,
}

impl PduNetwork {
    pub fn new(scripts: Box<dyn ScriptEngine>) -> Self {
        PduNetwork {
            pdus: Vec::new(),
            matrix: TransformMatrix::new(),
            scripts,
        }
    }

    pub fn add_pdu(&mut self, pdu: PduDef) -> usize {
        self.pdus.push(pdu);
        self.pdus.len() - 1
    }

    pub fn add_signal(&mut self, row: MatrixRow) {
        self.matrix.push(row);
    }

    pub fn sort_rx_before_tx(&mut self) {
        let directions: Vec<PduDirection> = self.pdus.iter().map(|p| p.direction).collect();
        self.matrix.sort_rx_before_tx(|idx| directions[idx] == PduDirection::Rx);
    }

    pub fn pdu(&self, idx: usize) -> &PduDef {
        &self.pdus[idx]
    }

    pub fn pdu_mut(&mut self, idx: usize) -> &mut PduDef {
        &mut self.pdus[idx]
    }

    pub fn pdus(&self) -> &[PduDef] {
        &self.pdus
    }

    /// The underlying transform matrix, for `MarshalSignalMap` callers that
    /// copy values to/from the model's `Channel` around an encode/decode pass.
    pub fn matrix(&self) -> &TransformMatrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut TransformMatrix {
        &mut self.matrix
    }

    /// Look up a signal's matrix row by PDU index and name, e.g. to seed
    /// `phys` before an encode pass or read it back after a decode pass.
    pub fn matrix_row_mut(&mut self, pdu_idx: usize, name: &str) -> &mut MatrixRow {
        self.matrix
            .row_by_name_mut(pdu_idx, name)
            .unwrap_or_else(|| panic!("no signal '{name}' on PDU {pdu_idx}"))
    }

    /// Advance the scheduler by one step: mark every PDU's signal rows
    /// `skip` according to `PduSchedule::is_due`, and zero the PDU's
    /// checksum when newly due (forcing re-emission per spec §4.8
    /// "Scheduler").
    pub fn tick(&mut self, step: u64) {
        for (idx, pdu) in self.pdus.iter_mut().enumerate() {
            let due = pdu.schedule.is_due(step);
            if due {
                pdu.checksum = 0;
            }
            for row in self.matrix.rows_for_pdu_mut(idx) {
                row.skip = !due;
            }
        }
    }

    /// Encode (Tx) pass for `pdu_idx` (spec §4.8 "Encode (Tx)"). Returns the
    /// payload if `needs_tx` (checksum changed, or the scheduler just forced
    /// this PDU due), else `None`.
    pub fn encode_tx(&mut self, pdu_idx: usize) -> SimResult<Option<Vec<u8>>> {
        let length = self.pdus[pdu_idx].length;
        let mut payload = vec![0u8; length];
        let was_forced = self.pdus[pdu_idx].checksum == 0;

        for row_idx in 0..self.matrix.rows().len() {
            if self.matrix.rows()[row_idx].pdu_idx != pdu_idx || self.matrix.rows()[row_idx].skip {
                continue;
            }
            let mut raw = match self.matrix.rows()[row_idx].phys_to_raw() {
                Some(r) => r,
                None => continue,
            };
            if let Some(hook) = self.matrix.rows()[row_idx].encode_hook {
                let row = &self.matrix.rows()[row_idx];
                let out = self.scripts.call_signal(hook, row.phys, raw, &payload)?;
                if out.err != 0 {
                    return Err(SimbusError::Einval(format!(
                        "encode hook for {} returned err {}: {}",
                        row.name, out.err, out.errmsg
                    )));
                }
                if let Some(new_phys) = out.phys {
                    let row = &mut self.matrix.rows_mut()[row_idx];
                    row.phys = new_phys;
                    raw = match row.phys_to_raw() {
                        Some(r) => r,
                        None => continue,
                    };
                }
                if let Some(new_raw) = out.raw {
                    raw = new_raw;
                }
            }
            let row = &self.matrix.rows()[row_idx];
            pack_bits(&mut payload, row.start_bit, row.length_bits, raw);
        }

        if let Some(hook) = self.pdus[pdu_idx].pdu_encode_hook {
            let out = self.scripts.call_pdu(hook, &payload)?;
            if out.err != 0 {
                return Err(SimbusError::Einval(format!("PDU encode hook returned err {}: {}", out.err, out.errmsg)));
            }
            if let Some(new_payload) = out.payload {
                payload = new_payload;
            }
        }

        let checksum = fnv1a(&payload);
        let pdu = &mut self.pdus[pdu_idx];
        let changed = checksum != pdu.checksum;
        pdu.payload = payload.clone();
        pdu.checksum = checksum;
        if changed || was_forced {
            Ok(Some(payload))
        } else {
            Ok(None)
        }
    }

    /// Decode (Rx) pass (spec §4.8 "Decode"): PDU hook first, then unpack
    /// each signal's raw, then signal hook, then `phys = raw*factor+offset`
    /// clamped. Sets `update_signals`.
    pub fn decode_rx(&mut self, pdu_idx: usize, mut payload: Vec<u8>) -> SimResult<()> {
        if let Some(hook) = self.pdus[pdu_idx].pdu_decode_hook {
            let out = self.scripts.call_pdu(hook, &payload)?;
            if out.err != 0 {
                return Err(SimbusError::Einval(format!("PDU decode hook returned err {}: {}", out.err, out.errmsg)));
            }
            if let Some(new_payload) = out.payload {
                payload = new_payload;
            }
        }

        for row_idx in 0..self.matrix.rows().len() {
            if self.matrix.rows()[row_idx].pdu_idx != pdu_idx {
                continue;
            }
            let (start_bit, length_bits) = {
                let row = &self.matrix.rows()[row_idx];
                (row.start_bit, row.length_bits)
            };
            let mut raw = unpack_bits(&payload, start_bit, length_bits);
            if let Some(hook) = self.matrix.rows()[row_idx].decode_hook {
                let row = &self.matrix.rows()[row_idx];
                let out = self.scripts.call_signal(hook, row.raw_to_phys(raw), raw, &payload)?;
                if out.err != 0 {
                    return Err(SimbusError::Einval(format!(
                        "decode hook for {} returned err {}: {}",
                        row.name, out.err, out.errmsg
                    )));
                }
                if let Some(new_raw) = out.raw {
                    raw = new_raw;
                }
            }
            let row = &mut self.matrix.rows_mut()[row_idx];
            row.raw = raw;
            row.phys = row.raw_to_phys(raw);
        }

        self.pdus[pdu_idx].payload = payload;
        self.pdus[pdu_idx].update_signals = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NoopScriptEngine;

    fn one_signal_network(phase: f64, interval: f64, step_size: f64) -> (PduNetwork, usize) {
        let mut net = PduNetwork::new(Box::new(NoopScriptEngine));
        let schedule = PduSchedule::from_seconds(phase, interval, 0.0, step_size);
        let pdu_idx = net.add_pdu(PduDef::new(1, "ONE", 8, PduDirection::Tx, schedule));
        let mut row = MatrixRow::new(pdu_idx, 0, "SIG_A", 4, 12);
        row.factor = 0.1;
        row.offset = -40.0;
        net.add_signal(row);
        (net, pdu_idx)
    }

    /// Spec §8 scenario 5: phase=0.001, interval=0.005, step_size=0.0005 ->
    /// no Tx at steps 0..=6, first Tx at step 8, next at step 18.
    #[test]
    fn scenario_5_flexray_style_schedule() {
        let (mut net, idx) = one_signal_network(0.001, 0.005, 0.0005);
        for step in 0..=6u64 {
            net.tick(step);
            assert!(!net.pdu(idx).schedule.is_due(step), "step {step} should not be due");
        }
        net.tick(8);
        assert!(net.pdu(idx).schedule.is_due(8));
        net.tick(18);
        assert!(net.pdu(idx).schedule.is_due(18));
        assert!(!net.pdu(idx).schedule.is_due(9));
    }

    /// Spec §8 scenario 4: round trip through encode_tx/decode_rx preserves
    /// phys modulo quantization.
    #[test]
    fn scenario_4_encode_then_decode_round_trips() {
        let (mut net, idx) = one_signal_network(0.0, 0.0, 0.0005);
        net.tick(0);
        net.matrix.row_by_name_mut(idx, "SIG_A").unwrap().phys = 10.0;
        let payload = net.encode_tx(idx).unwrap().expect("checksum forced on first tick");

        net.decode_rx(idx, payload).unwrap();
        let phys = net.matrix.row_by_name_mut(idx, "SIG_A").unwrap().phys;
        assert!((phys - 10.0).abs() < 1e-6);
        assert!(net.pdu(idx).update_signals());
    }

    #[test]
    fn encode_tx_is_none_when_unchanged_and_not_forced() {
        let (mut net, idx) = one_signal_network(0.0, 0.0, 0.0005);
        net.tick(0);
        net.matrix.row_by_name_mut(idx, "SIG_A").unwrap().phys = 10.0;
        net.encode_tx(idx).unwrap().expect("first emission forced");
        // Checksum no longer zero; unchanged payload should suppress re-tx.
        let second = net.encode_tx(idx).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn interval_zero_pdu_is_always_due() {
        let schedule = PduSchedule::from_seconds(0.0, 0.0, 0.0, 0.0005);
        assert!(schedule.is_due(0));
        assert!(schedule.is_due(12345));
    }
}
