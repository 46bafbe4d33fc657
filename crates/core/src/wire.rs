// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Wire codec (spec §4.2): length-prefixed binary framing of `SBCH`
//! (per-channel) and `SBNO` (notify) messages, and the embedded compact
//! `(UIDs, values)` MsgPack payload carried inside their `data: bytes`
//! fields.

use crate::error::{SimResult, SimbusError};
use rmpv::Value;
use serde::{Deserialize, Serialize};

pub const SBCH: &[u8; 4] = b"SBCH";
pub const SBNO: &[u8; 4] = b"SBNO";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLookup {
    pub name: String,
    pub signal_uid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessageBody {
    ModelRegister {
        step_size: f64,
    },
    SignalIndex {
        lookups: Vec<SignalLookup>,
    },
    SignalRead {
        data: Vec<u8>,
    },
    SignalValue {
        data: Vec<u8>,
    },
    SignalWrite {
        data: Vec<u8>,
    },
    ModelReady {
        model_time: f64,
        #[serde(default)]
        data: Option<Vec<u8>>,
    },
    ModelStart {
        model_time: f64,
        stop_time: f64,
        #[serde(default)]
        data: Option<Vec<u8>>,
    },
    ModelExit,
}

/// An `SBCH` message. Carries `{model_uid, channel_name, token}` plus the
/// tagged body. A nonzero `token` requires an ACK reply carrying the same
/// token; zero means "unsolicited" and is processed unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub model_uid: u32,
    pub channel_name: String,
    #[serde(default)]
    pub token: u32,
    pub body: ChannelMessageBody,
}

impl ChannelMessage {
    pub fn new(model_uid: u32, channel_name: impl Into<String>, body: ChannelMessageBody) -> Self {
        ChannelMessage {
            model_uid,
            channel_name: channel_name.into(),
            token: 0,
            body,
        }
    }

    pub fn with_token(mut self, token: u32) -> Self {
        self.token = token;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVectorPayload {
    pub channel_name: String,
    pub model_uid: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkCounters {
    pub model_execute_ns: u64,
    pub model_proc_ns: u64,
    pub network_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbeddedAck {
    ModelRegister { step_size: f64 },
    SignalIndex { lookups: Vec<SignalLookup> },
    ModelExit,
}

/// An `SBNO` message: cross-channel notify carrying one `SignalVector` per
/// channel plus scheduling/benchmark metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub model_uids: Vec<u32>,
    pub model_time: f64,
    pub schedule_time: f64,
    #[serde(default)]
    pub signal_vectors: Vec<SignalVectorPayload>,
    #[serde(default)]
    pub benchmark: Option<BenchmarkCounters>,
    #[serde(default)]
    pub embedded: Option<EmbeddedAck>,
}

// ----------------------------------------------------------- framing ---

fn encode_frame<T: Serialize>(ident: &[u8; 4], msg: &T) -> SimResult<Vec<u8>> {
    let body = rmp_serde::to_vec(msg).map_err(|e| SimbusError::Protocol(e.to_string()))?;
    let size = (4 + body.len()) as u32;
    let mut out = Vec::with_capacity(4 + body.len() + 4);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(ident);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn encode_channel_message(msg: &ChannelMessage) -> SimResult<Vec<u8>> {
    encode_frame(SBCH, msg)
}

pub fn encode_notify_message(msg: &NotifyMessage) -> SimResult<Vec<u8>> {
    encode_frame(SBNO, msg)
}

#[derive(Debug)]
pub enum Frame {
    Channel(ChannelMessage),
    Notify(NotifyMessage),
}

/// Decode exactly one frame from the front of `buf`, advancing `buf` past
/// it. Returns `Ok(None)` at a clean end of stream (buffer fully
/// consumed). A missing identifier or zero-size prefix aborts the stream
/// with a `Protocol` error, per spec §4.2.
pub fn decode_next(buf: &mut &[u8]) -> SimResult<Option<Frame>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < 4 {
        return Err(SimbusError::Protocol("truncated size prefix".into()));
    }
    let size = u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")) as usize;
    if size == 0 {
        return Err(SimbusError::Protocol("zero-size prefix".into()));
    }
    if size < 4 {
        return Err(SimbusError::Protocol("size prefix smaller than identifier".into()));
    }
    if buf.len() < 4 + size {
        return Err(SimbusError::Protocol("truncated frame body".into()));
    }
    let ident = &buf[4..8];
    let body = &buf[8..4 + size];
    let frame = if ident == SBCH {
        Frame::Channel(
            rmp_serde::from_slice(body).map_err(|e| SimbusError::Protocol(e.to_string()))?,
        )
    } else if ident == SBNO {
        Frame::Notify(
            rmp_serde::from_slice(body).map_err(|e| SimbusError::Protocol(e.to_string()))?,
        )
    } else {
        return Err(SimbusError::Protocol(format!(
            "unrecognized message identifier {:?}",
            ident
        )));
    };
    *buf = &buf[4 + size..];
    Ok(Some(frame))
}

/// Decode every frame in `buf` until the stream is exhausted or an error
/// aborts it.
pub fn decode_stream(mut buf: &[u8]) -> SimResult<Vec<Frame>> {
    let mut out = Vec::new();
    while let Some(frame) = decode_next(&mut buf)? {
        out.push(frame);
    }
    Ok(out)
}

// --------------------------------------------------- embedded payload ---

/// One value in the embedded `(UIDs, values)` payload (spec §4.2): unsigned
/// int, signed int, 32-bit float, 64-bit float, or a binary blob.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    UInt(u64),
    Int(i64),
    F32(f32),
    F64(f64),
    Bin(Vec<u8>),
}

/// Encode a list of `(uid, value)` pairs as `[[uids...], [values...]]`.
/// Mixing scalar and binary values in a single delta is permitted.
pub fn encode_payload(entries: &[(u32, PayloadValue)]) -> Vec<u8> {
    let uids = Value::Array(entries.iter().map(|(u, _)| Value::from(*u)).collect());
    let values = Value::Array(
        entries
            .iter()
            .map(|(_, v)| match v {
                PayloadValue::UInt(x) => Value::from(*x),
                PayloadValue::Int(x) => Value::from(*x),
                PayloadValue::F32(x) => Value::F32(*x),
                PayloadValue::F64(x) => Value::F64(*x),
                PayloadValue::Bin(b) => Value::Binary(b.clone()),
            })
            .collect(),
    );
    let root = Value::Array(vec![uids, values]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &root).expect("encoding to a Vec cannot fail");
    buf
}

/// Decode a `[[uids...], [values...]]` payload. Errors if the root shape is
/// wrong, the two arrays differ in length, or a value's type is not one of
/// `{UInt, Int, F32, F64, Bin}`.
pub fn decode_payload(bytes: &[u8]) -> SimResult<Vec<(u32, PayloadValue)>> {
    let mut cursor = bytes;
    let root = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| SimbusError::Protocol(e.to_string()))?;
    let arr = root
        .as_array()
        .ok_or_else(|| SimbusError::Protocol("embedded payload: expected root array".into()))?;
    if arr.len() != 2 {
        return Err(SimbusError::Protocol(
            "embedded payload: root array must have exactly 2 elements".into(),
        ));
    }
    let uids = arr[0]
        .as_array()
        .ok_or_else(|| SimbusError::Protocol("embedded payload: uids element not an array".into()))?;
    let values = arr[1].as_array().ok_or_else(|| {
        SimbusError::Protocol("embedded payload: values element not an array".into())
    })?;
    if uids.len() != values.len() {
        return Err(SimbusError::Protocol(
            "embedded payload: uids/values length mismatch".into(),
        ));
    }
    let mut out = Vec::with_capacity(uids.len());
    for (u, v) in uids.iter().zip(values.iter()) {
        let uid = u
            .as_u64()
            .ok_or_else(|| SimbusError::Protocol("embedded payload: uid not an integer".into()))?
            as u32;
        let pv = match v {
            Value::Integer(n) => {
                if let Some(unsigned) = n.as_u64() {
                    PayloadValue::UInt(unsigned)
                } else if let Some(signed) = n.as_i64() {
                    PayloadValue::Int(signed)
                } else {
                    return Err(SimbusError::Protocol(
                        "embedded payload: integer out of range".into(),
                    ));
                }
            }
            Value::F32(f) => PayloadValue::F32(*f),
            Value::F64(f) => PayloadValue::F64(*f),
            Value::Binary(b) => PayloadValue::Bin(b.clone()),
            _ => {
                return Err(SimbusError::Protocol(
                    "embedded payload: value type not in {UInt, Int, F32, F64, Bin}".into(),
                ))
            }
        };
        out.push((uid, pv));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_mixed_scalar_and_binary() {
        let entries = vec![
            (1u32, PayloadValue::F64(42.0)),
            (2u32, PayloadValue::Bin(b"Hello World".to_vec())),
            (3u32, PayloadValue::UInt(7)),
        ];
        let bytes = encode_payload(&entries);
        let decoded = decode_payload(&bytes).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn channel_message_frame_round_trips() {
        let msg = ChannelMessage::new(
            7,
            "data_channel",
            ChannelMessageBody::ModelRegister { step_size: 0.0005 },
        )
        .with_token(99);
        let frame = encode_channel_message(&msg).unwrap();
        let mut buf = frame.as_slice();
        match decode_next(&mut buf).unwrap().unwrap() {
            Frame::Channel(decoded) => {
                assert_eq!(decoded.model_uid, 7);
                assert_eq!(decoded.token, 99);
                assert!(matches!(
                    decoded.body,
                    ChannelMessageBody::ModelRegister { step_size } if step_size == 0.0005
                ));
            }
            Frame::Notify(_) => panic!("expected Channel frame"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_decodes_multiple_frames_in_order() {
        let a = encode_channel_message(&ChannelMessage::new(
            1,
            "c1",
            ChannelMessageBody::ModelExit,
        ))
        .unwrap();
        let b = encode_notify_message(&NotifyMessage {
            model_uids: vec![1, 2],
            model_time: 0.001,
            schedule_time: 0.0015,
            signal_vectors: vec![],
            benchmark: None,
            embedded: None,
        })
        .unwrap();
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);
        let frames = decode_stream(&stream).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Channel(_)));
        assert!(matches!(frames[1], Frame::Notify(_)));
    }

    #[test]
    fn zero_size_prefix_aborts_stream() {
        let mut buf: &[u8] = &[0, 0, 0, 0];
        let err = decode_next(&mut buf).unwrap_err();
        assert!(matches!(err, SimbusError::Protocol(_)));
    }

    #[test]
    fn unknown_identifier_aborts_stream() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&8u32.to_le_bytes());
        frame.extend_from_slice(b"XXXX");
        frame.extend_from_slice(&[0u8; 4]);
        let mut buf = frame.as_slice();
        let err = decode_next(&mut buf).unwrap_err();
        assert!(matches!(err, SimbusError::Protocol(_)));
    }
}
