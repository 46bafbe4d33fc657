// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! FlexRay transport overlay (spec §4.8 "FlexRay transport"): on first Tx,
//! emit a `Config` PDU (frame table + static slot parameters); thereafter,
//! per tick, emit Tx LPDUs and "not received" markers for Rx slots; on
//! incoming `Status` PDUs, realign `epoch_offset` to the bus cycle.

use crate::network::PduDirection;

/// One row of the FlexRay frame table advertised in the `Config` PDU.
#[derive(Debug, Clone)]
pub struct FrameTableEntry {
    pub pdu_id: u32,
    pub slot_id: u32,
    pub direction: PduDirection,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct StaticSlotParams {
    pub bit_rate_kbps: u32,
    pub channel_a_enabled: bool,
    pub channel_b_enabled: bool,
}

impl Default for StaticSlotParams {
    fn default() -> Self {
        StaticSlotParams {
            bit_rate_kbps: 10_000,
            channel_a_enabled: true,
            channel_b_enabled: false,
        }
    }
}

/// An LPDU emitted or armed for one PDU this tick.
#[derive(Debug, Clone)]
pub enum Lpdu {
    /// Tx slot with its encoded payload.
    Tx { pdu_id: u32, payload: Vec<u8> },
    /// Rx slot armed with an empty "not received" marker, cleared once the
    /// real frame arrives.
    RxNotReceived { pdu_id: u32 },
}

/// Transport-level effects a `PduNetwork` tick produces, independent of the
/// CAN/generic path (spec §4.8 distinguishes `transport_type ∈ {None, Can,
/// Ip, FlexRay}`; only FlexRay needs this extra bookkeeping).
pub trait PduTransport: Send {
    /// Called once before the first Tx; `None` for transports with no
    /// config handshake.
    fn config(&mut self, frame_table: &[FrameTableEntry], params: &StaticSlotParams) -> Option<Vec<u8>>;

    /// Called every tick after `PduNetwork::tick`'s scheduling decision,
    /// producing whatever LPDUs this transport wants to emit this cycle.
    fn tick(&mut self, due_tx: &[(u32, Vec<u8>)], due_rx: &[u32]) -> Vec<Lpdu>;

    /// Feed a decoded `Status` PDU's `(cycle, macrotick, cycle_time)` so the
    /// transport can realign scheduling to the bus cycle.
    fn on_status(&mut self, cycle: u32, macrotick: u32, cycle_time: f64, simulation_time: f64) -> Option<f64>;
}

/// CAN/generic transports have no config handshake or cycle realignment:
/// every due PDU is simply a Tx LPDU, and Rx needs no arming marker.
#[derive(Debug, Default)]
pub struct DefaultTransport;

impl PduTransport for DefaultTransport {
    fn config(&mut self, _frame_table: &[FrameTableEntry], _params: &StaticSlotParams) -> Option<Vec<u8>> {
        None
    }

    fn tick(&mut self, due_tx: &[(u32, Vec<u8>)], _due_rx: &[u32]) -> Vec<Lpdu> {
        due_tx
            .iter()
            .map(|(pdu_id, payload)| Lpdu::Tx {
                pdu_id: *pdu_id,
                payload: payload.clone(),
            })
            .collect()
    }

    fn on_status(&mut self, _cycle: u32, _macrotick: u32, _cycle_time: f64, _simulation_time: f64) -> Option<f64> {
        None
    }
}

/// FlexRay: config-on-first-tx, Rx arming, and cycle realignment.
#[derive(Debug)]
pub struct FlexRayTransport {
    params: StaticSlotParams,
    frame_table: Vec<FrameTableEntry>,
    config_sent: bool,
    last_cycle: Option<u32>,
}

impl FlexRayTransport {
    pub fn new(frame_table: Vec<FrameTableEntry>, params: StaticSlotParams) -> Self {
        FlexRayTransport {
            params,
            frame_table,
            config_sent: false,
            last_cycle: None,
        }
    }

    fn build_config(&self) -> Vec<u8> {
        // Static slot params (bit-rate + channel enablement) followed by one
        // fixed-width row per frame table entry: {pdu_id, slot_id, dir, len}.
        let mut payload = Vec::with_capacity(8 + self.frame_table.len() * 10);
        payload.extend_from_slice(&self.params.bit_rate_kbps.to_le_bytes());
        payload.push(self.params.channel_a_enabled as u8);
        payload.push(self.params.channel_b_enabled as u8);
        for entry in &self.frame_table {
            payload.extend_from_slice(&entry.pdu_id.to_le_bytes());
            payload.extend_from_slice(&entry.slot_id.to_le_bytes());
            payload.push(matches!(entry.direction, PduDirection::Tx) as u8);
            payload.extend_from_slice(&(entry.length as u16).to_le_bytes());
        }
        payload
    }
}

impl PduTransport for FlexRayTransport {
    fn config(&mut self, frame_table: &[FrameTableEntry], params: &StaticSlotParams) -> Option<Vec<u8>> {
        self.frame_table = frame_table.to_vec();
        self.params = params.clone();
        self.config_sent = true;
        Some(self.build_config())
    }

    fn tick(&mut self, due_tx: &[(u32, Vec<u8>)], due_rx: &[u32]) -> Vec<Lpdu> {
        let mut lpdus = Vec::new();
        if !self.config_sent && !due_tx.is_empty() {
            lpdus.extend(self.config(&self.frame_table.clone(), &self.params.clone()).map(|payload| Lpdu::Tx {
                pdu_id: 0,
                payload,
            }));
        }
        for (pdu_id, payload) in due_tx {
            lpdus.push(Lpdu::Tx {
                pdu_id: *pdu_id,
                payload: payload.clone(),
            });
        }
        for pdu_id in due_rx {
            lpdus.push(Lpdu::RxNotReceived { pdu_id: *pdu_id });
        }
        lpdus
    }

    /// Realign `epoch_offset` to `simulation_time mod cycle_time` whenever
    /// `cycle` changes (spec §4.8), so local scheduling stays coherent with
    /// the bus cycle rather than drifting from this process's own clock.
    fn on_status(&mut self, cycle: u32, _macrotick: u32, cycle_time: f64, simulation_time: f64) -> Option<f64> {
        let changed = self.last_cycle != Some(cycle);
        self.last_cycle = Some(cycle);
        if changed && cycle_time > 0.0 {
            Some(simulation_time.rem_euclid(cycle_time))
        } else {
            None
        }
    }
}
