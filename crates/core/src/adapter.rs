// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Adapter state machine, model side (spec §4.4):
//! `IDLE -> REGISTERING -> INDEXING -> READING -> READY_LOOP <-> RUNNING -> EXITING -> TERMINATED`.
//!
//! Grounded on `original_source/dse/modelc/adapter/adapter.c`: `_adapter_connect`,
//! `_adapter_register`, `notify_encode_model`, `process_signal_value_data`
//! (resets both `val` and `final_val` on inbound marshal), `handle_channel_message`,
//! `handle_notify_message`.

use crate::channel::Channel;
use crate::endpoint::{Endpoint, EndpointChannel, RecvOutcome};
use crate::error::{SimResult, SimbusError};
use crate::simbus::BUS_UID;
use crate::wire::{
    decode_next, decode_payload, encode_channel_message, encode_notify_message, encode_payload,
    ChannelMessage, ChannelMessageBody, Frame, NotifyMessage, PayloadValue, SignalLookup,
    SignalVectorPayload,
};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Registering,
    Indexing,
    Reading,
    ReadyLoop,
    Running,
    Exiting,
    Terminated,
}

/// One local model instance: its own time cursor and its channels.
#[derive(Debug)]
pub struct AdapterModel {
    pub model_uid: u32,
    pub model_time: f64,
    pub stop_time: f64,
    channels: HashMap<String, Channel>,
    channel_order: Vec<String>,
}

impl AdapterModel {
    pub fn new(model_uid: u32) -> Self {
        AdapterModel {
            model_uid,
            model_time: 0.0,
            stop_time: 0.0,
            channels: HashMap::new(),
            channel_order: Vec::new(),
        }
    }

    pub fn channel_mut(&mut self, name: &str) -> &mut Channel {
        if !self.channels.contains_key(name) {
            self.channels.insert(name.to_string(), Channel::new(name));
            self.channel_order.push(name.to_string());
        }
        self.channels.get_mut(name).expect("just inserted")
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_order
    }
}

/// The model-side adapter: one endpoint, one or more local model instances
/// (multi-instance-per-adapter, spec §9), and the state machine driving them.
pub struct Adapter<E: Endpoint> {
    endpoint: E,
    endpoint_channels: HashMap<String, EndpointChannel>,
    pub models: HashMap<u32, AdapterModel>,
    pub model_order: Vec<u32>,
    pub stop_request: bool,
    next_token: u32,
    pub state: AdapterState,
}

impl<E: Endpoint> Adapter<E> {
    pub fn new(endpoint: E) -> Self {
        Adapter {
            endpoint,
            endpoint_channels: HashMap::new(),
            models: HashMap::new(),
            model_order: Vec::new(),
            stop_request: false,
            next_token: 0,
            state: AdapterState::Idle,
        }
    }

    /// Purge any prior state on the underlying transport before use.
    pub fn start(&mut self) -> SimResult<()> {
        self.endpoint.start()
    }

    pub fn add_model(&mut self, model_uid: u32) -> &mut AdapterModel {
        if !self.models.contains_key(&model_uid) {
            self.models.insert(model_uid, AdapterModel::new(model_uid));
            self.model_order.push(model_uid);
        }
        self.models.get_mut(&model_uid).expect("just inserted")
    }

    fn endpoint_channel(&mut self, name: &str) -> SimResult<EndpointChannel> {
        if let Some(c) = self.endpoint_channels.get(name) {
            return Ok(c.clone());
        }
        let c = self.endpoint.create_channel(name)?;
        self.endpoint_channels.insert(name.to_string(), c.clone());
        Ok(c)
    }

    fn next_token(&mut self) -> u32 {
        self.next_token = self.next_token.wrapping_add(1);
        if self.next_token == 0 {
            self.next_token = 1;
        }
        self.next_token
    }

    fn channel_union(&self) -> Vec<(u32, String)> {
        let mut out = Vec::new();
        for &uid in &self.model_order {
            for name in self.models[&uid].channel_names() {
                out.push((uid, name.clone()));
            }
        }
        out
    }

    fn await_channel_reply(&mut self, timeout: Duration) -> SimResult<ChannelMessage> {
        match self.endpoint.recv_timed(timeout)? {
            RecvOutcome::Message { data, .. } => {
                let mut buf = data.as_slice();
                match decode_next(&mut buf)? {
                    Some(Frame::Channel(msg)) => Ok(msg),
                    _ => Err(SimbusError::Protocol("expected a channel message reply".into())),
                }
            }
            RecvOutcome::NoMessage => Err(SimbusError::Etime),
        }
    }

    /// REGISTERING: per channel, send `ModelRegister` with retry, bounded,
    /// exits early on `stop_request`.
    pub fn register(&mut self, step_size: f64, retries: u32, attempt_timeout: Duration) -> SimResult<()> {
        self.state = AdapterState::Registering;
        for (model_uid, channel_name) in self.channel_union() {
            let ep = self.endpoint_channel(&channel_name)?;
            let mut acked = false;
            for _ in 0..retries.max(1) {
                if self.stop_request {
                    return Ok(());
                }
                let token = self.next_token();
                let msg = ChannelMessage::new(
                    model_uid,
                    channel_name.clone(),
                    ChannelMessageBody::ModelRegister { step_size },
                )
                .with_token(token);
                self.endpoint.send(&ep, &encode_channel_message(&msg)?, Some(BUS_UID))?;
                match self.await_channel_reply(attempt_timeout) {
                    Ok(reply) if reply.token == token && reply.model_uid == model_uid => {
                        if matches!(reply.body, ChannelMessageBody::ModelRegister { .. }) {
                            acked = true;
                            break;
                        }
                    }
                    _ => continue,
                }
            }
            if !acked {
                tracing::warn!(model_uid, channel_name = %channel_name, "model register not acknowledged after retries");
            }
        }
        Ok(())
    }

    /// INDEXING: per channel, send `SignalIndex` with all local names; block
    /// for the reply that populates UIDs.
    pub fn index(&mut self, retries: u32, attempt_timeout: Duration) -> SimResult<()> {
        self.state = AdapterState::Indexing;
        for (model_uid, channel_name) in self.channel_union() {
            let ep = self.endpoint_channel(&channel_name)?;
            let names: Vec<String> = self.models[&model_uid]
                .channel(&channel_name)
                .expect("channel exists")
                .names_in_order()
                .to_vec();
            let lookups: Vec<SignalLookup> = names
                .iter()
                .map(|n| SignalLookup { name: n.clone(), signal_uid: 0 })
                .collect();
            let mut indexed = false;
            for _ in 0..retries.max(1) {
                let token = self.next_token();
                let msg = ChannelMessage::new(
                    model_uid,
                    channel_name.clone(),
                    ChannelMessageBody::SignalIndex { lookups: lookups.clone() },
                )
                .with_token(token);
                self.endpoint.send(&ep, &encode_channel_message(&msg)?, Some(BUS_UID))?;
                match self.await_channel_reply(attempt_timeout) {
                    Ok(reply) if reply.token == token && reply.model_uid == model_uid => {
                        if let ChannelMessageBody::SignalIndex { lookups } = reply.body {
                            apply_signal_index_reply(
                                self.models.get_mut(&model_uid).expect("model exists").channel_mut(&channel_name),
                                &lookups,
                            );
                            indexed = true;
                            break;
                        }
                    }
                    _ => continue,
                }
            }
            if !indexed {
                return Err(SimbusError::Etime);
            }
        }
        Ok(())
    }

    /// READING: per channel, send `SignalRead` for every known non-zero UID;
    /// block for the `SignalValue` reply.
    pub fn read(&mut self, attempt_timeout: Duration) -> SimResult<()> {
        self.state = AdapterState::Reading;
        for (model_uid, channel_name) in self.channel_union() {
            let ep = self.endpoint_channel(&channel_name)?;
            let uids: Vec<u32> = {
                let ch = self.models[&model_uid].channel(&channel_name).expect("channel exists");
                ch.names_in_order()
                    .iter()
                    .filter_map(|n| ch.get(n).map(|sv| sv.uid))
                    .filter(|&u| u != 0)
                    .collect()
            };
            let payload = encode_payload(
                &uids.iter().map(|&u| (u, PayloadValue::UInt(0))).collect::<Vec<_>>(),
            );
            let token = self.next_token();
            let msg = ChannelMessage::new(
                model_uid,
                channel_name.clone(),
                ChannelMessageBody::SignalRead { data: payload },
            )
            .with_token(token);
            self.endpoint.send(&ep, &encode_channel_message(&msg)?, Some(BUS_UID))?;
            let reply = self.await_channel_reply(attempt_timeout)?;
            if let ChannelMessageBody::SignalValue { data } = reply.body {
                apply_signal_value_reply(
                    self.models.get_mut(&model_uid).expect("model exists").channel_mut(&channel_name),
                    &data,
                )?;
            }
        }
        Ok(())
    }

    /// One READY_LOOP iteration: build a single Notify aggregating deltas
    /// from every channel of every local model instance, emit it, and block
    /// for the bus's resolved reply.
    pub fn ready_loop_once(&mut self, timeout: Duration) -> SimResult<()> {
        self.state = AdapterState::ReadyLoop;
        let notify = self.build_ready_notify();
        let frame = encode_notify_message(&notify)?;
        let bus_channel = self.endpoint_channel("__bus__")?;
        self.endpoint.send(&bus_channel, &frame, Some(BUS_UID))?;

        match self.endpoint.recv_timed(timeout)? {
            RecvOutcome::Message { data, .. } => {
                let mut buf = data.as_slice();
                match decode_next(&mut buf)? {
                    Some(Frame::Notify(reply)) => self.apply_notify(&reply)?,
                    _ => return Err(SimbusError::Protocol("expected a notify reply".into())),
                }
            }
            RecvOutcome::NoMessage => return Err(SimbusError::Etime),
        }
        self.state = AdapterState::Running;
        Ok(())
    }

    fn build_ready_notify(&mut self) -> NotifyMessage {
        let mut signal_vectors = Vec::new();
        let model_uids = self.model_order.clone();
        let mut model_time = 0.0;
        for &model_uid in &model_uids {
            let model = self.models.get_mut(&model_uid).expect("model exists");
            model_time = model.model_time;
            let channel_names = model.channel_names().to_vec();
            for channel_name in channel_names {
                let channel = model.channel_mut(&channel_name);
                let data = encode_channel_delta_and_consume(channel);
                signal_vectors.push(SignalVectorPayload { channel_name, model_uid, data });
            }
        }
        NotifyMessage {
            model_uids,
            model_time,
            schedule_time: 0.0,
            signal_vectors,
            benchmark: None,
            embedded: None,
        }
    }

    fn apply_notify(&mut self, notify: &NotifyMessage) -> SimResult<()> {
        // The bus stamps each resolved SignalVectorPayload with BUS_UID, not a
        // recipient model_uid (it is the bus's own committed channel state,
        // broadcast to everyone) — so dispatch by channel name to every local
        // model instance that owns that channel, not by matching model_uid.
        for sv_payload in &notify.signal_vectors {
            for &model_uid in &self.model_order.clone() {
                let model = self.models.get_mut(&model_uid).expect("model exists");
                if model.channel(&sv_payload.channel_name).is_some() {
                    let channel = model.channel_mut(&sv_payload.channel_name);
                    apply_signal_value_reply(channel, &sv_payload.data)?;
                }
            }
        }
        for model in self.models.values_mut() {
            model.model_time = notify.model_time;
            model.stop_time = notify.schedule_time;
        }
        Ok(())
    }

    /// RUNNING: invoke `step_fn(model_uid, model_time, stop_time) -> rc` for
    /// every local model instance; returns the bitwise-OR'd session rc (spec
    /// §7: positive requests orderly exit, negative aborts the run).
    pub fn run_step<F>(&mut self, mut step_fn: F) -> SimResult<i32>
    where
        F: FnMut(u32, f64, f64) -> SimResult<i32>,
    {
        self.state = AdapterState::Running;
        let mut rc = 0i32;
        for &model_uid in &self.model_order.clone() {
            let (model_time, stop_time) = {
                let m = &self.models[&model_uid];
                (m.model_time, m.stop_time)
            };
            let step_rc = step_fn(model_uid, model_time, stop_time)?;
            rc |= step_rc;
            if let Some(m) = self.models.get_mut(&model_uid) {
                m.model_time = stop_time;
            }
        }
        self.state = AdapterState::ReadyLoop;
        Ok(rc)
    }

    /// EXITING: emit `ModelExit` on every channel and disconnect.
    pub fn exit(&mut self) -> SimResult<()> {
        self.state = AdapterState::Exiting;
        for (model_uid, channel_name) in self.channel_union() {
            let ep = self.endpoint_channel(&channel_name)?;
            let msg = ChannelMessage::new(model_uid, channel_name, ChannelMessageBody::ModelExit);
            self.endpoint.send(&ep, &encode_channel_message(&msg)?, Some(BUS_UID))?;
        }
        self.endpoint.disconnect()?;
        self.state = AdapterState::Terminated;
        Ok(())
    }
}

// --------------------------------------------------------- pure helpers ---

/// Apply a `SignalIndex` reply: match by name and set `uid`.
pub fn apply_signal_index_reply(channel: &mut Channel, lookups: &[SignalLookup]) {
    for lookup in lookups {
        if let Some(sv) = channel.get_mut(&lookup.name) {
            sv.uid = lookup.signal_uid;
        }
    }
}

/// Apply a `SignalValue` reply (or a resolved Notify's embedded vector):
/// updates `val` and resets `final_val := val`, per spec §4.4 dispatch table.
pub fn apply_signal_value_reply(channel: &mut Channel, payload: &[u8]) -> SimResult<()> {
    let entries = decode_payload(payload)?;
    for (uid, value) in entries {
        if let Some(sv) = channel.find_by_uid_mut(uid) {
            match value {
                PayloadValue::Bin(bytes) => sv.set_binary(&bytes),
                PayloadValue::F64(v) => {
                    sv.val = v;
                    sv.final_val = v;
                }
                PayloadValue::F32(v) => {
                    sv.val = v as f64;
                    sv.final_val = v as f64;
                }
                PayloadValue::UInt(v) => {
                    sv.val = v as f64;
                    sv.final_val = v as f64;
                }
                PayloadValue::Int(v) => {
                    sv.val = v as f64;
                    sv.final_val = v as f64;
                }
            }
        } else {
            tracing::debug!(uid, "signal value reply for unknown uid discarded");
        }
    }
    Ok(())
}

/// Encode the channel's pending deltas (index order) as an embedded payload,
/// consuming each delta's binary payload as it is packed (mirrors
/// `adapter.c::sv_delta_to_msgpack`).
pub fn encode_channel_delta_and_consume(channel: &mut Channel) -> Vec<u8> {
    channel.refresh_index();
    let names = channel.names_in_order().to_vec();
    let mut entries = Vec::new();
    for name in &names {
        if let Some(sv) = channel.get_mut(name) {
            if sv.has_delta() {
                if sv.bin_size() > 0 {
                    let bytes = sv.binary().to_vec();
                    sv.mark_binary_consumed();
                    entries.push((sv.uid, PayloadValue::Bin(bytes)));
                } else {
                    entries.push((sv.uid, PayloadValue::F64(sv.final_val)));
                }
            }
        }
    }
    encode_payload(&entries)
}

/// Encode a `SignalRead` reply: scalar values reply with their current
/// `val`; binary signals always reply with an empty blob (spec §4.5 —
/// bulk binary content is reserved for resolved broadcasts).
pub fn encode_signal_read_reply(channel: &Channel, uids: &[u32]) -> Vec<u8> {
    let mut entries = Vec::with_capacity(uids.len());
    for &uid in uids {
        if let Some(sv) = channel.find_by_uid(uid) {
            if sv.bin_buffer_size() > 0 {
                entries.push((uid, PayloadValue::Bin(Vec::new())));
            } else {
                entries.push((uid, PayloadValue::F64(sv.val)));
            }
        }
    }
    encode_payload(&entries)
}

/// Model-mode dispatch on an unsolicited/broadcast `ChannelMessage` (spec
/// §4.4): `ModelRegister` ignored, `SignalIndex` updates uids, `SignalValue`
/// updates val/final_val, `ModelStart` updates time and its embedded vector,
/// `ModelExit` noted, anything else logged.
pub fn handle_channel_message_model_mode(model: &mut AdapterModel, msg: &ChannelMessage) -> SimResult<()> {
    match &msg.body {
        ChannelMessageBody::ModelRegister { .. } => {
            tracing::debug!(model_uid = msg.model_uid, "model register echo ignored");
        }
        ChannelMessageBody::SignalIndex { lookups } => {
            apply_signal_index_reply(model.channel_mut(&msg.channel_name), lookups);
        }
        ChannelMessageBody::SignalValue { data } => {
            apply_signal_value_reply(model.channel_mut(&msg.channel_name), data)?;
        }
        ChannelMessageBody::ModelStart { model_time, stop_time, data } => {
            model.model_time = *model_time;
            model.stop_time = *stop_time;
            if let Some(data) = data {
                apply_signal_value_reply(model.channel_mut(&msg.channel_name), data)?;
            }
        }
        ChannelMessageBody::ModelExit => {
            tracing::info!(model_uid = msg.model_uid, "model exit noted");
        }
        other => tracing::debug!(?other, "unhandled channel message in model mode"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_payload;

    #[test]
    fn signal_index_reply_sets_uids_by_name() {
        let mut ch = Channel::new("c");
        ch.get_or_create("a");
        ch.get_or_create("b");
        let lookups = vec![
            SignalLookup { name: "a".into(), signal_uid: 11 },
            SignalLookup { name: "b".into(), signal_uid: 22 },
        ];
        apply_signal_index_reply(&mut ch, &lookups);
        assert_eq!(ch.get("a").unwrap().uid, 11);
        assert_eq!(ch.get("b").unwrap().uid, 22);
    }

    #[test]
    fn signal_value_reply_updates_val_and_clears_delta() {
        let mut ch = Channel::new("c");
        ch.get_or_create("x").uid = 7;
        let payload = encode_payload(&[(7, PayloadValue::F64(42.0))]);
        apply_signal_value_reply(&mut ch, &payload).unwrap();
        let sv = ch.get("x").unwrap();
        assert_eq!(sv.val, 42.0);
        assert_eq!(sv.final_val, 42.0);
        assert!(!sv.has_delta());
    }

    #[test]
    fn delta_encode_only_includes_changed_signals() {
        let mut ch = Channel::new("c");
        ch.get_or_create("a").uid = 1;
        let b = ch.get_or_create("b");
        b.uid = 2;
        b.final_val = 99.0;
        let payload = encode_channel_delta_and_consume(&mut ch);
        let entries = decode_payload(&payload).unwrap();
        assert_eq!(entries, vec![(2, PayloadValue::F64(99.0))]);
    }

    #[test]
    fn signal_read_reply_sends_empty_blob_for_binary() {
        let mut ch = Channel::new("c");
        let sv = ch.get_or_create("can_bus");
        sv.uid = 5;
        sv.reset();
        sv.append(b"frame").unwrap();
        let payload = encode_signal_read_reply(&ch, &[5]);
        let entries = decode_payload(&payload).unwrap();
        assert_eq!(entries, vec![(5, PayloadValue::Bin(Vec::new()))]);
    }

    #[test]
    fn model_start_dispatch_updates_time_and_embedded_vector() {
        let mut model = AdapterModel::new(1);
        model.channel_mut("c").get_or_create("x").uid = 3;
        let embedded = encode_payload(&[(3, PayloadValue::F64(7.0))]);
        let msg = ChannelMessage::new(
            1,
            "c",
            ChannelMessageBody::ModelStart { model_time: 0.001, stop_time: 0.0015, data: Some(embedded) },
        );
        handle_channel_message_model_mode(&mut model, &msg).unwrap();
        assert_eq!(model.model_time, 0.001);
        assert_eq!(model.stop_time, 0.0015);
        assert_eq!(model.channel_mut("c").get("x").unwrap().val, 7.0);
    }
}
