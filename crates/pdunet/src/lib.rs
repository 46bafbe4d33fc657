// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! PDU Network overlay (spec §4.8): the binary-signal transport layer on
//! top of `simbus-core`'s NCodec. Parses a declarative PDU/signal layout
//! from `simbus-config`'s `NetworkDoc`, maintains the transform matrix,
//! schedules transmission, and carries FlexRay-specific transport
//! bookkeeping. The Lua hook interpreter itself is out of scope (spec.md §1
//! Non-goals); only the call contract (`script`) is implemented here.

pub mod flexray;
pub mod matrix;
pub mod network;
pub mod script;
pub mod signal_map;

use serde::Deserialize;
use simbus_config::NetworkDoc;
use simbus_core::error::{SimResult, SimbusError};

use matrix::MatrixRow;
use network::{PduDef, PduDirection, PduNetwork, PduSchedule, TransportType};
use script::NoopScriptEngine;
use signal_map::MarshalSignalMap;

/// `NetworkDoc.spec.pdus[]` entries parse generically in `simbus-config`
/// (the PDU/signal schema is this crate's domain, not the YAML loader's);
/// these mirror spec §3's `PduItem`/`PduSignalItem` shapes for that parse.
#[derive(Debug, Deserialize)]
struct PduYaml {
    id: u32,
    name: String,
    length: usize,
    direction: String,
    #[serde(default)]
    schedule: PduScheduleYaml,
    #[serde(default)]
    signals: Vec<PduSignalYaml>,
}

#[derive(Debug, Default, Deserialize)]
struct PduScheduleYaml {
    #[serde(default)]
    phase: f64,
    #[serde(default)]
    interval: f64,
}

#[derive(Debug, Deserialize)]
struct PduSignalYaml {
    name: String,
    start_bit: u16,
    length_bits: u16,
    #[serde(default = "default_factor")]
    factor: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

fn default_factor() -> f64 {
    1.0
}

/// Build a `PduNetwork` from a parsed `Network` YAML document (spec §6:
/// `Network.spec.{pdus[], metadata.<transport>, functions.global, schedule}`),
/// along with the `MarshalSignalMap` binding every parsed signal to a
/// same-named entry in whatever `Channel` the caller marshals against (spec
/// §4.8 "Marshal to/from SignalVector"). `step_size` comes from the owning
/// stack's runtime configuration; a `Network` document on its own carries
/// only phase/interval/epoch_offset in seconds (spec §4.8 "Parse").
pub fn build_network(doc: &NetworkDoc, step_size: f64) -> SimResult<(PduNetwork, MarshalSignalMap)> {
    if step_size <= 0.0 {
        return Err(SimbusError::Configuration("PDU network requires a positive step_size".into()));
    }
    let epoch_offset = doc.spec.schedule.epoch_offset.unwrap_or(0.0);
    let transport_type = if doc.is_flexray() {
        TransportType::FlexRay
    } else if doc.spec.metadata.contains_key("can") {
        TransportType::Can
    } else if doc.spec.metadata.contains_key("ip") {
        TransportType::Ip
    } else {
        TransportType::None
    };

    let mut net = PduNetwork::new(Box::new(NoopScriptEngine));
    let mut map = MarshalSignalMap::new();

    for pdu_value in &doc.spec.pdus {
        let pdu: PduYaml = serde_yaml::from_value(pdu_value.clone())
            .map_err(|e| SimbusError::Configuration(format!("malformed PDU entry: {e}")))?;
        let direction = match pdu.direction.as_str() {
            "Rx" | "rx" => PduDirection::Rx,
            "Tx" | "tx" => PduDirection::Tx,
            other => {
                return Err(SimbusError::Configuration(format!(
                    "PDU '{}' has unknown direction '{}'",
                    pdu.name, other
                )))
            }
        };
        let schedule = PduSchedule::from_seconds(pdu.schedule.phase, pdu.schedule.interval, epoch_offset, step_size);
        let mut def = PduDef::new(pdu.id, pdu.name.clone(), pdu.length, direction, schedule);
        def.transport_type = transport_type;
        let pdu_idx = net.add_pdu(def);

        for (signal_idx, signal) in pdu.signals.iter().enumerate() {
            let mut row = MatrixRow::new(pdu_idx, signal_idx, signal.name.clone(), signal.start_bit, signal.length_bits);
            row.factor = signal.factor;
            row.offset = signal.offset;
            row.min = signal.min.unwrap_or(f64::NEG_INFINITY);
            row.max = signal.max.unwrap_or(f64::INFINITY);
            net.add_signal(row);
            map.bind(pdu_idx, signal.name.clone());
        }
    }

    net.sort_rx_before_tx();
    Ok((net, map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_network_parses_scenario_4_pdu_from_yaml() {
        let yaml = r#"
kind: Network
metadata:
  name: test-net
spec:
  pdus:
    - id: 1
      name: ONE
      length: 8
      direction: Tx
      schedule:
        phase: 0.0
        interval: 0.0
      signals:
        - name: SIG_A
          start_bit: 4
          length_bits: 12
          factor: 0.1
          offset: -40.0
  schedule:
    epoch_offset: 0.0
"#;
        let doc: NetworkDoc = match serde_yaml::from_str::<simbus_config::Document>(yaml).unwrap() {
            simbus_config::Document::Network(n) => n,
            _ => panic!("expected Network document"),
        };

        let (mut net, map) = build_network(&doc, 0.0005).unwrap();
        assert_eq!(map.pairs_len(), 1);
        net.tick(0);
        net.matrix_row_mut(0, "SIG_A").phys = 10.0;
        let payload = net.encode_tx(0).unwrap().expect("checksum forced on first tick");
        assert_eq!(payload[0], 0x40);
    }

    #[test]
    fn build_network_rejects_zero_step_size() {
        let doc: NetworkDoc = NetworkDoc {
            metadata: simbus_config::Metadata::default(),
            spec: simbus_config::NetworkSpec {
                pdus: Vec::new(),
                metadata: Default::default(),
                functions: Default::default(),
                schedule: Default::default(),
            },
        };
        assert!(build_network(&doc, 0.0).is_err());
    }

    #[test]
    fn build_network_binds_every_parsed_signal_into_the_marshal_map() {
        let yaml = r#"
kind: Network
metadata:
  name: test-net
spec:
  pdus:
    - id: 1
      name: ONE
      length: 8
      direction: Rx
      signals:
        - name: SIG_A
          start_bit: 0
          length_bits: 8
    - id: 2
      name: TWO
      length: 8
      direction: Tx
      signals:
        - name: SIG_B
          start_bit: 0
          length_bits: 8
"#;
        let doc: NetworkDoc = match serde_yaml::from_str::<simbus_config::Document>(yaml).unwrap() {
            simbus_config::Document::Network(n) => n,
            _ => panic!("expected Network document"),
        };
        let (_, map) = build_network(&doc, 0.0005).unwrap();
        assert_eq!(map.pairs_len(), 2);
    }
}
