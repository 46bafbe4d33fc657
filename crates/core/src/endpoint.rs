// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Endpoint (spec §4.3): the abstract transport trait, plus a
//! `crossbeam-channel`-backed in-memory implementation standing in for the
//! out-of-scope concrete backends (POSIX MQ, Redis, named pipes).

use crate::error::{SimResult, SimbusError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Opaque handle returned by `create_channel`; passed back unchanged on
/// `send` so a backend may route on it if it wishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointChannel(pub String);

#[derive(Debug)]
pub enum RecvOutcome {
    Message { channel_name: String, data: Vec<u8> },
    NoMessage,
}

const POLL_TICK: Duration = Duration::from_secs(1);

/// Abstract transport. Concrete backends are plug-in; only this contract is
/// in scope.
pub trait Endpoint: Send {
    fn create_channel(&mut self, name: &str) -> SimResult<EndpointChannel>;

    /// May (re)create underlying resources and purge any prior state for
    /// the receive endpoint.
    fn start(&mut self) -> SimResult<()>;

    fn send(
        &mut self,
        channel: &EndpointChannel,
        buffer: &[u8],
        target_model_uid: Option<u32>,
    ) -> SimResult<()>;

    /// A single non-blocking poll attempt; `recv_timed` builds the 1-second
    /// tick loop on top of this.
    fn try_recv(&mut self) -> SimResult<RecvOutcome>;

    /// Unblocks any blocked `recv_timed` call.
    fn interrupt(&mut self);

    fn disconnect(&mut self) -> SimResult<()>;

    fn is_interrupted(&self) -> bool;

    fn clear_interrupt(&mut self);

    /// Timed poll loop (spec §4.3): on each internal 1-second tick, check
    /// the interrupt flag, then retry; `budget` is the caller's overall
    /// timeout. Returns `Err(Etime)` if the budget is exhausted,
    /// `Err(Ecanceled)` if interrupted.
    fn recv_timed(&mut self, budget: Duration) -> SimResult<RecvOutcome> {
        let deadline = Instant::now() + budget;
        loop {
            if self.is_interrupted() {
                self.clear_interrupt();
                return Err(SimbusError::Ecanceled);
            }
            match self.try_recv()? {
                RecvOutcome::Message { channel_name, data } => {
                    return Ok(RecvOutcome::Message { channel_name, data })
                }
                RecvOutcome::NoMessage => {}
            }
            if Instant::now() >= deadline {
                return Err(SimbusError::Etime);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(POLL_TICK).min(Duration::from_millis(5)));
        }
    }
}

// --------------------------------------------------------- mock fabric ---

type Inbox = crossbeam_channel::Sender<(String, Vec<u8>)>;

#[derive(Default)]
struct FabricInner {
    inboxes: HashMap<String, Inbox>,
}

/// A shared in-memory routing fabric. Each participant (the bus, or a
/// model identified by `model:<uid>`) registers an inbox; `send` with a
/// `target_model_uid` looks up `model:<uid>`'s inbox, and a broadcast (no
/// target) iterates every registered model inbox — the per-model push
/// routing described in spec §4.3.
#[derive(Clone, Default)]
pub struct MockFabric {
    inner: Arc<Mutex<FabricInner>>,
}

impl MockFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, identity: impl Into<String>) -> MockEndpoint {
        let identity = identity.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner
            .lock()
            .expect("fabric mutex poisoned")
            .inboxes
            .insert(identity.clone(), tx);
        MockEndpoint {
            identity,
            fabric: self.inner.clone(),
            rx,
            channels: HashMap::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub struct MockEndpoint {
    identity: String,
    fabric: Arc<Mutex<FabricInner>>,
    rx: crossbeam_channel::Receiver<(String, Vec<u8>)>,
    channels: HashMap<String, EndpointChannel>,
    interrupted: Arc<AtomicBool>,
}

impl Endpoint for MockEndpoint {
    fn create_channel(&mut self, name: &str) -> SimResult<EndpointChannel> {
        let ch = EndpointChannel(name.to_string());
        self.channels.insert(name.to_string(), ch.clone());
        Ok(ch)
    }

    fn start(&mut self) -> SimResult<()> {
        // Purge any pending messages from a prior run.
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn send(
        &mut self,
        channel: &EndpointChannel,
        buffer: &[u8],
        target_model_uid: Option<u32>,
    ) -> SimResult<()> {
        let fabric = self.fabric.lock().expect("fabric mutex poisoned");
        match target_model_uid {
            Some(uid) => {
                let key = format!("model:{uid}");
                if let Some(inbox) = fabric.inboxes.get(&key) {
                    let _ = inbox.send((channel.0.clone(), buffer.to_vec()));
                }
            }
            None => {
                for (identity, inbox) in fabric.inboxes.iter() {
                    if identity != &self.identity {
                        let _ = inbox.send((channel.0.clone(), buffer.to_vec()));
                    }
                }
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> SimResult<RecvOutcome> {
        match self.rx.try_recv() {
            Ok((channel_name, data)) => Ok(RecvOutcome::Message { channel_name, data }),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(RecvOutcome::NoMessage),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(SimbusError::Enodata),
        }
    }

    fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn disconnect(&mut self) -> SimResult<()> {
        self.fabric
            .lock()
            .expect("fabric mutex poisoned")
            .inboxes
            .remove(&self.identity);
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn clear_interrupt(&mut self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_with_target_routes_to_that_models_inbox() {
        let fabric = MockFabric::new();
        let mut bus = fabric.endpoint("bus");
        let mut model = fabric.endpoint("model:1");
        let ch = bus.create_channel("data_channel").unwrap();

        bus.send(&ch, b"hello", Some(1)).unwrap();

        match model.recv_timed(Duration::from_millis(200)).unwrap() {
            RecvOutcome::Message { channel_name, data } => {
                assert_eq!(channel_name, "data_channel");
                assert_eq!(data, b"hello");
            }
            RecvOutcome::NoMessage => panic!("expected a message"),
        }
    }

    #[test]
    fn broadcast_reaches_every_other_participant() {
        let fabric = MockFabric::new();
        let mut bus = fabric.endpoint("bus");
        let mut model_a = fabric.endpoint("model:1");
        let mut model_b = fabric.endpoint("model:2");
        let ch = bus.create_channel("link").unwrap();

        bus.send(&ch, b"notify", None).unwrap();

        assert!(matches!(
            model_a.recv_timed(Duration::from_millis(200)).unwrap(),
            RecvOutcome::Message { .. }
        ));
        assert!(matches!(
            model_b.recv_timed(Duration::from_millis(200)).unwrap(),
            RecvOutcome::Message { .. }
        ));
    }

    #[test]
    fn recv_timed_surfaces_etime_on_empty_budget() {
        let fabric = MockFabric::new();
        let mut ep = fabric.endpoint("model:9");
        let err = ep.recv_timed(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, SimbusError::Etime));
    }

    #[test]
    fn interrupt_unblocks_recv_with_ecanceled() {
        let fabric = MockFabric::new();
        let mut ep = fabric.endpoint("model:3");
        ep.interrupt();
        let err = ep.recv_timed(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SimbusError::Ecanceled));
    }
}
