// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Network codec (NCodec, spec §4.7): an opaque object layered over a
//! binary signal's growable buffer, stream-like, interpreting CAN frames or
//! generic/FlexRay PDUs.

use crate::error::{SimResult, SimbusError};
use crate::trace::TraceHooks;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    End,
    Reset,
}

/// The backing stream of a binary signal's buffer: `seek`/`tell`/`read`/
/// `write`. `Reset` additionally frees the underlying buffer.
pub trait Stream {
    fn seek(&mut self, offset: i64, whence: Whence) -> SimResult<u64>;
    fn tell(&self) -> u64;
    fn read(&mut self, dst: &mut [u8]) -> SimResult<usize>;
    fn write(&mut self, src: &[u8]) -> SimResult<usize>;
}

/// A plain growable-Vec-backed stream, bound 1:1 to one binary signal.
#[derive(Debug, Default)]
pub struct ByteStream {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteStream {
    pub fn new() -> Self {
        ByteStream::default()
    }
}

impl Stream for ByteStream {
    fn seek(&mut self, offset: i64, whence: Whence) -> SimResult<u64> {
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::End => self.buf.len() as i64,
            Whence::Reset => {
                self.buf.clear();
                self.pos = 0;
                return Ok(0);
            }
        };
        let target = base + offset;
        if target < 0 {
            return Err(SimbusError::Einval("seek before start of stream".into()));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn read(&mut self, dst: &mut [u8]) -> SimResult<usize> {
        let available = self.buf.len().saturating_sub(self.pos);
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, src: &[u8]) -> SimResult<usize> {
        let end = self.pos + src.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(src);
        self.pos = end;
        Ok(src.len())
    }
}

// --------------------------------------------------------- typed msgs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanSender {
    pub bus_id: u32,
    pub node_id: u32,
    pub interface_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanFrame {
    pub frame_id: u32,
    pub frame_type: u8,
    pub len: u32,
    pub buffer: Vec<u8>,
    pub sender: CanSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    None,
    Can,
    Ip,
    FlexRay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pdu {
    pub id: u32,
    pub payload: Vec<u8>,
    pub swc_id: u32,
    pub ecu_id: u32,
    pub transport_type: TransportType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Can(CanFrame),
    Pdu(Pdu),
}

#[derive(Debug, Clone)]
pub struct NCodecConfigEntry {
    pub name: String,
    pub value: String,
}

/// Opaque codec bound to one binary signal's stream. `write`/`flush`
/// append to the stream; `seek`+`read` walk it back. Echo suppression
/// elides messages whose sender matches the codec's configured identity.
pub struct NCodec<S: Stream = ByteStream> {
    stream: S,
    node_id: Option<u32>,
    swc_id: Option<u32>,
    config: Vec<NCodecConfigEntry>,
    trace: Option<TraceHooks>,
}

impl Default for NCodec<ByteStream> {
    fn default() -> Self {
        NCodec::new()
    }
}

impl NCodec<ByteStream> {
    pub fn new() -> Self {
        NCodec {
            stream: ByteStream::new(),
            node_id: None,
            swc_id: None,
            config: Vec::new(),
            trace: TraceHooks::from_env(),
        }
    }
}

impl<S: Stream> NCodec<S> {
    pub fn with_stream(stream: S) -> Self {
        NCodec {
            stream,
            node_id: None,
            swc_id: None,
            config: Vec::new(),
            trace: TraceHooks::from_env(),
        }
    }

    pub fn reset(&mut self) -> SimResult<()> {
        self.stream.seek(0, Whence::Reset)?;
        Ok(())
    }

    pub fn write(&mut self, msg: &Message) -> SimResult<()> {
        let body = rmp_serde::to_vec(msg).map_err(|e| SimbusError::Protocol(e.to_string()))?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);
        self.stream.write(&framed)?;
        if let Some(trace) = &self.trace {
            trace.on_write(msg);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> SimResult<u64> {
        Ok(self.stream.tell())
    }

    pub fn truncate(&mut self) -> SimResult<()> {
        self.stream.seek(0, Whence::Reset)?;
        Ok(())
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> SimResult<u64> {
        self.stream.seek(offset, whence)
    }

    pub fn tell(&self) -> u64 {
        self.stream.tell()
    }

    /// Bypass echo suppression / set identity via `{name, value}`, e.g.
    /// `{"node_id", "3"}` or `{"swc_id", "7"}`.
    pub fn config(&mut self, entry: NCodecConfigEntry) {
        match entry.name.as_str() {
            "node_id" => self.node_id = entry.value.parse().ok(),
            "swc_id" => self.swc_id = entry.value.parse().ok(),
            _ => {}
        }
        self.config.push(entry);
    }

    pub fn stat(&self, index: usize) -> Option<&NCodecConfigEntry> {
        self.config.get(index)
    }

    /// Returns `Err(Enomsg)` once the stream is exhausted — the expected
    /// end-of-stream sentinel per spec §7.
    pub fn read(&mut self) -> SimResult<Message> {
        loop {
            let mut len_buf = [0u8; 4];
            let n = self.stream.read(&mut len_buf)?;
            if n == 0 {
                return Err(SimbusError::Enomsg);
            }
            if n < 4 {
                return Err(SimbusError::Protocol("truncated ncodec length prefix".into()));
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            let read_len = self.stream.read(&mut body)?;
            if read_len != len {
                return Err(SimbusError::Protocol("truncated ncodec frame body".into()));
            }
            let msg: Message =
                rmp_serde::from_slice(&body).map_err(|e| SimbusError::Protocol(e.to_string()))?;
            if self.is_echo(&msg) {
                continue;
            }
            if let Some(trace) = &self.trace {
                trace.on_read(&msg);
            }
            return Ok(msg);
        }
    }

    fn is_echo(&self, msg: &Message) -> bool {
        match msg {
            Message::Can(frame) => self.node_id == Some(frame.sender.node_id),
            Message::Pdu(pdu) => self.swc_id == Some(pdu.swc_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// I6: `reset -> write -> flush -> (seek 0 SET) -> read -> read -> ...`
    /// returns the written message on first read and `-ENOMSG` thereafter;
    /// `tell()` after write+flush equals the flushed byte count.
    #[test]
    fn codec_call_sequence_matches_i6() {
        let mut codec = NCodec::new();
        codec.reset().unwrap();
        let msg = Message::Can(CanFrame {
            frame_id: 0x10,
            frame_type: 0,
            len: 11,
            buffer: b"Hello World".to_vec(),
            sender: CanSender {
                bus_id: 0,
                node_id: 1,
                interface_id: 0,
            },
        });
        codec.write(&msg).unwrap();
        let flushed = codec.flush().unwrap();
        assert_eq!(codec.tell(), flushed);

        codec.seek(0, Whence::Set).unwrap();
        let first = codec.read().unwrap();
        assert_eq!(first, msg);

        let second = codec.read().unwrap_err();
        assert!(matches!(second, SimbusError::Enomsg));
    }

    /// Scenario 3: model A writes a CAN frame; model B with a different
    /// node_id reads the frame back unaltered, and its own sends are
    /// elided by echo suppression.
    #[test]
    fn echo_suppression_elides_own_sender() {
        let mut codec = NCodec::new();
        codec.config(NCodecConfigEntry {
            name: "node_id".into(),
            value: "2".into(),
        });
        let mine = Message::Can(CanFrame {
            frame_id: 1,
            frame_type: 0,
            len: 0,
            buffer: vec![],
            sender: CanSender {
                bus_id: 0,
                node_id: 2,
                interface_id: 0,
            },
        });
        let theirs = Message::Can(CanFrame {
            frame_id: 0x10,
            frame_type: 0,
            len: 11,
            buffer: b"Hello World".to_vec(),
            sender: CanSender {
                bus_id: 0,
                node_id: 9,
                interface_id: 0,
            },
        });
        codec.write(&mine).unwrap();
        codec.write(&theirs).unwrap();
        codec.flush().unwrap();
        codec.seek(0, Whence::Set).unwrap();

        let received = codec.read().unwrap();
        assert_eq!(received, theirs);
        assert!(matches!(codec.read().unwrap_err(), SimbusError::Enomsg));
    }
}
