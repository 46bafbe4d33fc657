// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end scenarios (spec §8), driven through `MockEndpoint` with a
//! dedicated bus thread and one thread per model, mirroring the real
//! process-per-participant deployment.

use simbus_core::endpoint::{MockEndpoint, MockFabric};
use simbus_core::error::SimResult;
use simbus_core::{Adapter, SimBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

fn spawn_bus(mut bus: SimBus<MockEndpoint>, stop: Arc<AtomicBool>) -> thread::JoinHandle<SimResult<()>> {
    thread::spawn(move || {
        bus.start()?;
        while !stop.load(Ordering::SeqCst) {
            bus.pump_once(Duration::from_millis(20))?;
        }
        Ok(())
    })
}

/// Scenario 1: single model loopback. One model registers `data_channel`
/// with scalar `counter`, `step_size = 0.0005`. Across 5 ready-loop
/// iterations the model observes `counter` in `{0,1,2,3,4}` before each
/// write, self-incrementing; `bus_time` ends at `0.0025`.
#[test]
fn scenario_1_single_model_loopback() {
    let fabric = MockFabric::new();
    let stop = Arc::new(AtomicBool::new(false));
    let bus = SimBus::new(fabric.endpoint("model:0"), 0.0005);
    let bus_handle = spawn_bus(bus, stop.clone());

    let mut adapter = Adapter::new(fabric.endpoint("model:1"));
    adapter.start().unwrap();
    adapter.add_model(1).channel_mut("data_channel").get_or_create("counter");

    adapter.register(0.0005, 10, ATTEMPT_TIMEOUT).unwrap();
    adapter.index(10, ATTEMPT_TIMEOUT).unwrap();
    adapter.read(ATTEMPT_TIMEOUT).unwrap();

    let mut observed = Vec::new();
    for _ in 0..5 {
        let current = {
            let channel = adapter.models.get_mut(&1).unwrap().channel_mut("data_channel");
            channel.get("counter").unwrap().val
        };
        observed.push(current);
        {
            let channel = adapter.models.get_mut(&1).unwrap().channel_mut("data_channel");
            channel.get_mut("counter").unwrap().final_val = current + 1.0;
        }
        adapter.ready_loop_once(ATTEMPT_TIMEOUT).unwrap();
    }
    assert_eq!(observed, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

    adapter.exit().unwrap();
    stop.store(true, Ordering::SeqCst);
    bus_handle.join().unwrap().unwrap();
}

/// Scenario 2: two-model scalar rendezvous. Models A and B share channel
/// `link` with signal `x`; A writes `x = 42` at step 0, B reads `x = 42`
/// after the bus resolves.
#[test]
fn scenario_2_two_model_scalar_rendezvous() {
    let fabric = MockFabric::new();
    let stop = Arc::new(AtomicBool::new(false));
    let bus = SimBus::new(fabric.endpoint("model:0"), 0.0005);
    let bus_handle = spawn_bus(bus, stop.clone());

    let fabric_a = fabric.clone();
    let handle_a = thread::spawn(move || -> SimResult<()> {
        let mut adapter = Adapter::new(fabric_a.endpoint("model:1"));
        adapter.start()?;
        adapter.add_model(1).channel_mut("link").get_or_create("x");
        adapter.register(0.0005, 10, ATTEMPT_TIMEOUT)?;
        adapter.index(10, ATTEMPT_TIMEOUT)?;
        adapter.read(ATTEMPT_TIMEOUT)?;

        {
            let channel = adapter.models.get_mut(&1).unwrap().channel_mut("link");
            channel.get_mut("x").unwrap().final_val = 42.0;
        }
        adapter.ready_loop_once(ATTEMPT_TIMEOUT)?;
        adapter.exit()?;
        Ok(())
    });

    let fabric_b = fabric.clone();
    let handle_b = thread::spawn(move || -> SimResult<f64> {
        let mut adapter = Adapter::new(fabric_b.endpoint("model:2"));
        adapter.start()?;
        adapter.add_model(2).channel_mut("link").get_or_create("x");
        adapter.register(0.0005, 10, ATTEMPT_TIMEOUT)?;
        adapter.index(10, ATTEMPT_TIMEOUT)?;
        adapter.read(ATTEMPT_TIMEOUT)?;

        adapter.ready_loop_once(ATTEMPT_TIMEOUT)?;
        let seen_after_step0 = {
            let channel = adapter.models.get_mut(&2).unwrap().channel_mut("link");
            channel.get("x").unwrap().val
        };
        adapter.ready_loop_once(ATTEMPT_TIMEOUT)?;
        let seen_after_step1 = {
            let channel = adapter.models.get_mut(&2).unwrap().channel_mut("link");
            channel.get("x").unwrap().val
        };
        adapter.exit()?;
        Ok(if seen_after_step0 == 42.0 { seen_after_step0 } else { seen_after_step1 })
    });

    handle_a.join().unwrap().unwrap();
    let observed_x = handle_b.join().unwrap().unwrap();
    assert_eq!(observed_x, 42.0);

    stop.store(true, Ordering::SeqCst);
    bus_handle.join().unwrap().unwrap();
}

/// Scenario 3: binary frame exchange. Model A writes a CAN-style frame onto
/// a shared binary signal; Model B reads the same bytes back unaltered.
#[test]
fn scenario_3_binary_frame_exchange() {
    let fabric = MockFabric::new();
    let stop = Arc::new(AtomicBool::new(false));
    let bus = SimBus::new(fabric.endpoint("model:0"), 0.0005);
    let bus_handle = spawn_bus(bus, stop.clone());

    let fabric_a = fabric.clone();
    let handle_a = thread::spawn(move || -> SimResult<()> {
        let mut adapter = Adapter::new(fabric_a.endpoint("model:1"));
        adapter.start()?;
        adapter.add_model(1).channel_mut("net").get_or_create("can_bus");
        adapter.register(0.0005, 10, ATTEMPT_TIMEOUT)?;
        adapter.index(10, ATTEMPT_TIMEOUT)?;
        adapter.read(ATTEMPT_TIMEOUT)?;

        {
            let channel = adapter.models.get_mut(&1).unwrap().channel_mut("net");
            let sv = channel.get_mut("can_bus").unwrap();
            sv.reset();
            sv.append(b"Hello World").unwrap();
        }
        adapter.ready_loop_once(ATTEMPT_TIMEOUT)?;
        adapter.exit()?;
        Ok(())
    });

    let fabric_b = fabric.clone();
    let handle_b = thread::spawn(move || -> SimResult<Vec<u8>> {
        let mut adapter = Adapter::new(fabric_b.endpoint("model:2"));
        adapter.start()?;
        adapter.add_model(2).channel_mut("net").get_or_create("can_bus");
        adapter.register(0.0005, 10, ATTEMPT_TIMEOUT)?;
        adapter.index(10, ATTEMPT_TIMEOUT)?;
        adapter.read(ATTEMPT_TIMEOUT)?;

        adapter.ready_loop_once(ATTEMPT_TIMEOUT)?;
        let bytes = {
            let channel = adapter.models.get_mut(&2).unwrap().channel_mut("net");
            channel.get("can_bus").unwrap().binary().to_vec()
        };
        adapter.exit()?;
        Ok(bytes)
    });

    handle_a.join().unwrap().unwrap();
    let bytes = handle_b.join().unwrap().unwrap();
    assert_eq!(bytes, b"Hello World");

    stop.store(true, Ordering::SeqCst);
    bus_handle.join().unwrap().unwrap();
}
