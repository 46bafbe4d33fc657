// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SimBus coordinator state machine (spec §4.5): the central authority that
//! tracks per-channel register/ready sets, resolves a step once every
//! participating model is ready, and advances `bus_time` via Kahan
//! summation.
//!
//! Grounded on `original_source/dse/modelc/adapter/simbus/handler.c`:
//! `_process_signal_lookup` (UID assignment), `process_signal_read_message`
//! (empty-blob-on-read rule), `resolve_channel`/`resolve_and_notify` (the
//! commit-then-broadcast ordering), and the Kahan-summation statement shared
//! by `simbus_handle_notify_message` and `simbus_handle_message`.

use crate::adapter::{encode_channel_delta_and_consume, encode_signal_read_reply};
use crate::channel::Channel;
use crate::endpoint::{Endpoint, EndpointChannel, RecvOutcome};
use crate::error::{SimResult, SimbusError};
use crate::wire::{
    decode_next, decode_payload, encode_channel_message, encode_notify_message, ChannelMessage,
    ChannelMessageBody, Frame, NotifyMessage, PayloadValue, SignalVectorPayload,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Reserved model uid identifying the bus itself on the shared fabric, used
/// by models to address their requests (`Endpoint::send(.., Some(BUS_UID))`).
pub const BUS_UID: u32 = 0;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Deterministic name -> uid assignment (spec §4.5: "assign `uid =
/// hash(name)` deterministically"). `uid == 0` is reserved for "unresolved",
/// so a zero hash is nudged to 1.
pub fn assign_uid(name: &str) -> u32 {
    match fnv1a(name.as_bytes()) {
        0 => 1,
        h => h,
    }
}

/// The coordinator's aggregate state: every known channel, each with a
/// register set and a ready set keyed by `model_uid`.
pub struct SimBus<E: Endpoint> {
    endpoint: E,
    endpoint_channels: HashMap<String, EndpointChannel>,
    channels: HashMap<String, Channel>,
    channel_order: Vec<String>,
    register_sets: HashMap<String, HashSet<u32>>,
    ready_sets: HashMap<String, HashSet<u32>>,
    expected_models: HashSet<u32>,
    pub bus_time: f64,
    kahan_c: f64,
    pub step_size: f64,
}

impl<E: Endpoint> SimBus<E> {
    pub fn new(endpoint: E, step_size: f64) -> Self {
        SimBus {
            endpoint,
            endpoint_channels: HashMap::new(),
            channels: HashMap::new(),
            channel_order: Vec::new(),
            register_sets: HashMap::new(),
            ready_sets: HashMap::new(),
            expected_models: HashSet::new(),
            bus_time: 0.0,
            kahan_c: 0.0,
            step_size,
        }
    }

    /// Purge any prior state on the underlying transport before use.
    pub fn start(&mut self) -> SimResult<()> {
        self.endpoint.start()
    }

    fn endpoint_channel(&mut self, name: &str) -> SimResult<EndpointChannel> {
        if let Some(c) = self.endpoint_channels.get(name) {
            return Ok(c.clone());
        }
        let c = self.endpoint.create_channel(name)?;
        self.endpoint_channels.insert(name.to_string(), c.clone());
        Ok(c)
    }

    fn ensure_channel(&mut self, name: &str) {
        if !self.channels.contains_key(name) {
            self.channels.insert(name.to_string(), Channel::new(name));
            self.channel_order.push(name.to_string());
        }
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    fn apply_delta(&mut self, channel_name: &str, data: &[u8]) -> SimResult<()> {
        let entries = decode_payload(data)?;
        let channel = self.channels.get_mut(channel_name).expect("channel ensured by caller");
        for (uid, value) in entries {
            match channel.find_by_uid_mut(uid) {
                Some(sv) => {
                    let previous = sv.val;
                    match value {
                        PayloadValue::Bin(bytes) => {
                            sv.reset();
                            let _ = sv.append(&bytes);
                        }
                        PayloadValue::F64(v) => sv.final_val = v,
                        PayloadValue::F32(v) => sv.final_val = v as f64,
                        PayloadValue::UInt(v) => sv.final_val = v as f64,
                        PayloadValue::Int(v) => sv.final_val = v as f64,
                    }
                    tracing::debug!(uid, previous, final_val = sv.final_val, "signal delta applied");
                }
                None => tracing::debug!(uid, "delta for unknown uid discarded"),
            }
        }
        Ok(())
    }

    /// Pure dispatch of one incoming `ChannelMessage` (spec §4.5's SBCH
    /// handling table), returning the synchronous reply to send back, if
    /// any.
    pub fn handle_channel_message(&mut self, msg: ChannelMessage) -> SimResult<Option<ChannelMessage>> {
        let channel_name = msg.channel_name.clone();
        self.ensure_channel(&channel_name);
        match msg.body {
            ChannelMessageBody::ModelRegister { step_size } => {
                if self.step_size == 0.0 {
                    self.step_size = step_size;
                } else if (self.step_size - step_size).abs() > f64::EPSILON {
                    return Err(SimbusError::Configuration(format!(
                        "model {} registered with step_size {} but bus step_size is {}",
                        msg.model_uid, step_size, self.step_size
                    )));
                }
                self.expected_models.insert(msg.model_uid);
                self.register_sets.entry(channel_name.clone()).or_default().insert(msg.model_uid);
                let expected = self.expected_models.clone();
                let complete = self
                    .channel_order
                    .iter()
                    .all(|c| self.register_sets.get(c).map(|s| !s.is_empty() && *s == expected).unwrap_or(false));
                if complete {
                    tracing::info!("network complete");
                }
                Ok(Some(
                    ChannelMessage::new(msg.model_uid, channel_name, ChannelMessageBody::ModelRegister { step_size })
                        .with_token(msg.token),
                ))
            }
            ChannelMessageBody::SignalIndex { lookups } => {
                let channel = self.channels.get_mut(&channel_name).expect("ensured above");
                let mut resolved = Vec::with_capacity(lookups.len());
                for lookup in lookups {
                    let sv = channel.get_or_create(&lookup.name);
                    if sv.uid == 0 {
                        sv.uid = assign_uid(&lookup.name);
                    }
                    resolved.push(crate::wire::SignalLookup { name: lookup.name, signal_uid: sv.uid });
                }
                Ok(Some(
                    ChannelMessage::new(msg.model_uid, channel_name, ChannelMessageBody::SignalIndex { lookups: resolved })
                        .with_token(msg.token),
                ))
            }
            ChannelMessageBody::SignalRead { data } => {
                let requested = decode_payload(&data)?;
                let uids: Vec<u32> = requested.into_iter().map(|(u, _)| u).collect();
                let channel = self.channels.get(&channel_name).expect("ensured above");
                let reply_data = encode_signal_read_reply(channel, &uids);
                Ok(Some(
                    ChannelMessage::new(msg.model_uid, channel_name, ChannelMessageBody::SignalValue { data: reply_data })
                        .with_token(msg.token),
                ))
            }
            ChannelMessageBody::SignalWrite { data } => {
                self.apply_delta(&channel_name, &data)?;
                Ok(None)
            }
            ChannelMessageBody::ModelReady { data, .. } => {
                if let Some(data) = data {
                    self.apply_delta(&channel_name, &data)?;
                }
                self.ready_sets.entry(channel_name).or_default().insert(msg.model_uid);
                Ok(None)
            }
            ChannelMessageBody::ModelExit => {
                for set in self.register_sets.values_mut() {
                    set.remove(&msg.model_uid);
                }
                for set in self.ready_sets.values_mut() {
                    set.remove(&msg.model_uid);
                }
                self.expected_models.remove(&msg.model_uid);
                Ok(None)
            }
            ChannelMessageBody::SignalValue { .. } | ChannelMessageBody::ModelStart { .. } => {
                tracing::debug!(model_uid = msg.model_uid, "message type not expected in bus mode, ignored");
                Ok(None)
            }
        }
    }

    /// Apply a model's aggregated Notify: each `SignalVectorPayload` is a
    /// delta into that channel, and every model uid the Notify carries is
    /// marked ready for every channel it addressed (spec §4.5: "ModelReady /
    /// Notify: add model to `model_ready_set` for every channel it
    /// addressed"). One adapter process may aggregate several local model
    /// instances into a single Notify (spec §9 multi-instance); this applies
    /// the same ready marking to all of them.
    pub fn handle_notify_message(&mut self, notify: NotifyMessage) -> SimResult<()> {
        let mut touched_channels = Vec::new();
        for payload in &notify.signal_vectors {
            self.ensure_channel(&payload.channel_name);
            self.apply_delta(&payload.channel_name, &payload.data)?;
            if !touched_channels.contains(&payload.channel_name) {
                touched_channels.push(payload.channel_name.clone());
            }
        }
        for channel_name in touched_channels {
            let set = self.ready_sets.entry(channel_name).or_default();
            for &model_uid in &notify.model_uids {
                set.insert(model_uid);
            }
        }
        Ok(())
    }

    /// Resolve if every channel's ready set matches its register set;
    /// otherwise `None`. See `resolve` for the five-step algorithm.
    pub fn try_resolve(&mut self) -> Option<NotifyMessage> {
        if self.channel_order.is_empty() {
            return None;
        }
        let ready = self.channel_order.iter().all(|name| {
            let reg = self.register_sets.get(name).cloned().unwrap_or_default();
            let rdy = self.ready_sets.get(name).cloned().unwrap_or_default();
            reg == rdy
        });
        if !ready {
            return None;
        }
        Some(self.resolve())
    }

    /// The resolution algorithm (spec §4.5 steps 1-5). Encoding each
    /// channel's committed delta happens before the commit that clears it —
    /// `resolve_and_notify` calls `sv_delta_to_msgpack` before
    /// `resolve_channel` in the original source, so the broadcast reads the
    /// pre-commit `final_val`/binary payload.
    fn resolve(&mut self) -> NotifyMessage {
        let mut signal_vectors = Vec::with_capacity(self.channel_order.len());
        for name in self.channel_order.clone() {
            let channel = self.channels.get_mut(&name).expect("channel in channel_order");
            let data = encode_channel_delta_and_consume(channel);
            signal_vectors.push(SignalVectorPayload { channel_name: name, model_uid: BUS_UID, data });
        }

        for name in &self.channel_order {
            let channel = self.channels.get_mut(name).expect("channel in channel_order");
            let names = channel.names_in_order().to_vec();
            for sig_name in names {
                if let Some(sv) = channel.get_mut(&sig_name) {
                    sv.commit();
                }
            }
        }

        let y = self.step_size - self.kahan_c;
        let t = self.bus_time + y;
        self.kahan_c = (t - self.bus_time) - y;
        self.bus_time = t;

        let notify = NotifyMessage {
            model_uids: self.expected_models.iter().copied().collect(),
            model_time: self.bus_time,
            schedule_time: self.bus_time + self.step_size,
            signal_vectors,
            benchmark: None,
            embedded: None,
        };

        for set in self.ready_sets.values_mut() {
            set.clear();
        }
        notify
    }

    /// One receive-and-react cycle: pump a single inbound message, reply
    /// synchronously if needed, then attempt resolution. Returns `true` if a
    /// resolved broadcast went out this call. `Etime` on the receive is
    /// swallowed (non-fatal for the bus, per spec §4.3/§7).
    pub fn pump_once(&mut self, timeout: Duration) -> SimResult<bool> {
        match self.endpoint.recv_timed(timeout) {
            Ok(RecvOutcome::Message { data, .. }) => {
                let mut buf = data.as_slice();
                match decode_next(&mut buf)? {
                    Some(Frame::Channel(msg)) => {
                        let model_uid = msg.model_uid;
                        let channel_name = msg.channel_name.clone();
                        if let Some(reply) = self.handle_channel_message(msg)? {
                            let ep = self.endpoint_channel(&channel_name)?;
                            self.endpoint.send(&ep, &encode_channel_message(&reply)?, Some(model_uid))?;
                        }
                    }
                    Some(Frame::Notify(notify)) => self.handle_notify_message(notify)?,
                    None => {}
                }
            }
            Ok(RecvOutcome::NoMessage) => {}
            Err(SimbusError::Etime) => {}
            Err(e) => return Err(e),
        }
        if let Some(notify) = self.try_resolve() {
            self.broadcast(&notify)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn broadcast(&mut self, notify: &NotifyMessage) -> SimResult<()> {
        let frame = encode_notify_message(notify)?;
        let ep = self.endpoint_channel("__bus__")?;
        for model_uid in self.expected_models.clone() {
            self.endpoint.send(&ep, &frame, Some(model_uid))?;
        }
        Ok(())
    }
}
