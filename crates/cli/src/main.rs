// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! `simbus` CLI (spec §6 external interfaces). Real transport backends
//! (POSIX MQ, Redis, named pipes) and dynamic model loading are out of
//! scope (spec.md §1 Non-goals), so this binary's only runnable mode is:
//! parse a Stack/SignalGroup/Network YAML set, stand up one coordinator and
//! one adapter per declared model over the in-process mock fabric, drive
//! each model with the `simbus-loader` no-op stand-in, and run until
//! `--endtime`/`--steps` is reached. Channels annotated `direct_index` share
//! a byte-addressed region (spec §4.1); channels bound to a `Network`
//! document carry PDU traffic (spec §4.8); `runtime.sequential: true`
//! switches to ordered, single-threaded model execution with forward/backward
//! channel merges (spec §4.6) instead of one thread per model.

use clap::Parser;
use simbus_core::channel::{Channel, DirectIndexBinding, DirectIndexRegion, STRIPE_SIZE};
use simbus_core::marshal::{sequential_backward_merge, sequential_forward_merge};
use simbus_core::profile::ProfileRegistry;
use simbus_core::{Adapter, MockFabric, SimBus, SimResult, SimbusError};
use simbus_loader::{ModelCompatLayer, NoopModelCompatLayer};
use simbus_pdunet::network::{PduDirection, PduNetwork};
use simbus_pdunet::signal_map::MarshalSignalMap;
use simbus_config::{ChannelSelector, Document, NetworkDoc, SignalGroupDoc, StackDoc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "simbus", author, version, about = "Co-simulation runtime core", long_about = None)]
struct Args {
    /// Label for this run's log lines.
    #[arg(long)]
    name: Option<String>,

    /// Transport backend. Only `mock` (the in-process fabric) is
    /// implemented; any other value is a fatal configuration error.
    #[arg(long, default_value = "mock")]
    transport: String,

    /// Transport URI; accepted for surface compatibility, unused by `mock`.
    #[arg(long)]
    uri: Option<String>,

    /// Simulation step size in seconds.
    #[arg(long)]
    stepsize: f64,

    /// Stop once bus time reaches this value, in seconds.
    #[arg(long)]
    endtime: Option<f64>,

    /// Stop after this many resolved steps.
    #[arg(long)]
    steps: Option<u64>,

    /// Run only the model with this uid (default: every model in the Stack).
    #[arg(long)]
    uid: Option<u32>,

    /// Per-attempt receive timeout, in seconds.
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Log verbosity 0 (off) through 6 (trace); overrides SIMBUS_LOGLEVEL.
    #[arg(long)]
    logger: Option<u8>,

    /// A single YAML document, in addition to the positional files.
    #[arg(long)]
    file: Option<PathBuf>,

    /// A directory to scan for `*.yaml`/`*.yml` documents.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Stack/Model/SignalGroup/Network YAML documents.
    files: Vec<PathBuf>,
}

fn init_logging(logger: Option<u8>) {
    let level = logger
        .or_else(|| std::env::var("SIMBUS_LOGLEVEL").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(3u8);
    let filter = match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn collect_documents(args: &Args) -> anyhow::Result<Vec<Document>> {
    let mut paths: Vec<PathBuf> = args.files.clone();
    if let Some(f) = &args.file {
        paths.push(f.clone());
    }
    if let Some(dir) = &args.path {
        for entry in std::fs::read_dir(dir)? {
            let p = entry?.path();
            if matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) {
                paths.push(p);
            }
        }
    }
    let mut docs = Vec::new();
    for path in paths {
        docs.extend(simbus_config::load_documents(&path)?);
    }
    Ok(docs)
}

/// Union of every signal name from `SignalGroup` documents whose
/// `metadata.labels` match `selector.selectors` (spec §6's channel binding).
fn resolve_signal_names(selector: &ChannelSelector, groups: &[SignalGroupDoc]) -> Vec<String> {
    let mut names = Vec::new();
    for group in groups {
        if selector.selectors.matches(&group.metadata) {
            for signal in &group.spec.signals {
                if !names.contains(&signal.signal) {
                    names.push(signal.signal.clone());
                }
            }
        }
    }
    names
}

/// One model's resolved view of a declared channel: its bound signals, and
/// whatever shared-memory/PDU wiring its matching SignalGroup/Network
/// documents ask for.
struct ChannelSpec {
    name: String,
    signal_names: Vec<String>,
    is_binary: bool,
    direct_index_key: Option<String>,
    direct_index: Option<(Arc<Mutex<DirectIndexRegion>>, DirectIndexBinding)>,
    pdu: Option<(PduNetwork, MarshalSignalMap)>,
}

struct ModelSpec {
    uid: u32,
    name: String,
    channels: Vec<ChannelSpec>,
}

fn resolve_models(
    stack: &StackDoc,
    groups: &[SignalGroupDoc],
    networks: &[NetworkDoc],
    step_size: f64,
    only_uid: Option<u32>,
) -> SimResult<Vec<ModelSpec>> {
    let mut models = Vec::new();
    for (i, m) in stack.spec.models.iter().enumerate() {
        let uid = m.uid.unwrap_or(i as u32 + 1);
        if only_uid.map(|want| want != uid).unwrap_or(false) {
            continue;
        }
        let mut channels = Vec::new();
        for c in &m.channels {
            let name = c.alias.clone().unwrap_or_else(|| c.name.clone());
            let group = groups.iter().find(|g| c.selectors.matches(&g.metadata));
            let is_binary = group.map(|g| g.vector_type() == simbus_config::VectorType::Binary).unwrap_or(false);
            let direct_index_key = group.and_then(|g| g.direct_index()).map(|s| s.to_string());
            let network = networks.iter().find(|n| c.selectors.matches(&n.metadata));
            let pdu = match network {
                Some(n) => Some(simbus_pdunet::build_network(n, step_size)?),
                None => None,
            };
            channels.push(ChannelSpec {
                name,
                signal_names: resolve_signal_names(c, groups),
                is_binary,
                direct_index_key,
                direct_index: None,
                pdu,
            });
        }
        models.push(ModelSpec { uid, name: m.name.clone(), channels });
    }
    Ok(models)
}

/// Bind every channel flagged `direct_index: <key>` (spec §4.1) to a shared
/// `DirectIndexRegion` sized to hold every participant's stripes, in two
/// passes: first total up each key's stripe count and record each channel's
/// stripe-unit offset into it, then allocate the regions and attach bindings.
fn plan_direct_index(models: &mut [ModelSpec]) {
    let mut stripe_totals: HashMap<String, usize> = HashMap::new();
    let mut assignments: Vec<(usize, usize, String, usize, usize)> = Vec::new();

    for (mi, model) in models.iter().enumerate() {
        for (ci, channel) in model.channels.iter().enumerate() {
            if let Some(key) = &channel.direct_index_key {
                let stripe_count = channel.signal_names.len().max(1);
                let stripe_offset = *stripe_totals.get(key).unwrap_or(&0);
                stripe_totals.insert(key.clone(), stripe_offset + stripe_count);
                assignments.push((mi, ci, key.clone(), stripe_offset, stripe_count));
            }
        }
    }

    let regions: HashMap<String, Arc<Mutex<DirectIndexRegion>>> = stripe_totals
        .into_iter()
        .map(|(key, total)| (key, Arc::new(Mutex::new(DirectIndexRegion::new(total)))))
        .collect();

    for (mi, ci, key, stripe_offset, stripe_count) in assignments {
        let binding = DirectIndexBinding {
            offset: stripe_offset * STRIPE_SIZE,
            stripe_count,
        };
        models[mi].channels[ci].direct_index = Some((regions[&key].clone(), binding));
    }
}

/// Prime a freshly-`add_model`ed adapter's channels: create every bound
/// signal, and for binary channels, append an initial zeroed payload so the
/// channel has a non-zero `bin_buffer_size` to advertise during Indexing.
fn prime_channels(adapter: &mut Adapter<simbus_core::MockEndpoint>, uid: u32, channels: &[ChannelSpec]) {
    let model = adapter.add_model(uid);
    for spec in channels {
        let channel = model.channel_mut(&spec.name);
        for signal_name in &spec.signal_names {
            let sv = channel.get_or_create(signal_name);
            if spec.is_binary {
                sv.reset();
                sv.append(&[0u8; 256]).expect("reset precedes append");
                sv.commit();
            }
        }
        if let Some((net, _)) = &spec.pdu {
            for pdu in net.pdus() {
                let sv = channel.get_or_create(&pdu.name);
                sv.reset();
                sv.append(&vec![0u8; pdu.length]).expect("reset precedes append");
                sv.commit();
            }
        }
    }
}

/// Tick every channel's bound `PduNetwork` one step: decode any pending Rx
/// payload into the matrix (then the channel's scalars), and encode any due
/// Tx payload back into the channel's binary signal (spec §4.8 "Tick").
fn drive_pdu_networks(channel: &mut Channel, spec: &mut ChannelSpec, step_count: u64) -> SimResult<()> {
    let (net, map) = match spec.pdu.as_mut() {
        Some(pair) => pair,
        None => return Ok(()),
    };
    net.tick(step_count);
    for idx in 0..net.pdus().len() {
        let (direction, pdu_name) = {
            let pdu = net.pdu(idx);
            (pdu.direction, pdu.name.clone())
        };
        match direction {
            PduDirection::Rx => {
                let payload = channel
                    .get(&pdu_name)
                    .filter(|sv| sv.bin_size() > 0)
                    .map(|sv| sv.binary().to_vec());
                if let Some(payload) = payload {
                    net.decode_rx(idx, payload)?;
                    map.copy_from_matrix(net.matrix(), channel);
                    net.pdu_mut(idx).clear_update_signals();
                }
            }
            PduDirection::Tx => {
                map.copy_to_matrix(channel, net.matrix_mut());
                if let Some(payload) = net.encode_tx(idx)? {
                    let sv = channel.get_or_create(&pdu_name);
                    sv.reset();
                    sv.append(&payload)?;
                }
            }
        }
    }
    Ok(())
}

fn run_model(
    fabric: MockFabric,
    spec: ModelSpec,
    step_size: f64,
    timeout: Duration,
    endtime: Option<f64>,
    steps: Option<u64>,
) -> SimResult<i32> {
    let ModelSpec { uid, name, mut channels } = spec;
    let mut adapter = Adapter::new(fabric.endpoint(format!("model:{uid}")));
    adapter.start()?;
    prime_channels(&mut adapter, uid, &channels);

    adapter.register(step_size, 20, timeout)?;
    adapter.index(20, timeout)?;
    adapter.read(timeout)?;

    let mut mcl = NoopModelCompatLayer::new();
    mcl.init(uid, 0.0)?;
    let mut profile = ProfileRegistry::new(step_size);
    let mut rc = 0i32;
    let mut step_count = 0u64;
    loop {
        let cycle_start = Instant::now();
        adapter.ready_loop_once(timeout)?;

        for spec in channels.iter_mut() {
            if let Some((region, binding)) = &spec.direct_index {
                let model = adapter.models.get_mut(&uid).expect("model registered above");
                let channel = model.channel_mut(&spec.name);
                let guard = region.lock().expect("direct-index region poisoned");
                channel.sync_from_region(&guard, *binding);
            }
        }

        let network_start = Instant::now();
        for spec in channels.iter_mut() {
            let model = adapter.models.get_mut(&uid).expect("model registered above");
            let channel = model.channel_mut(&spec.name);
            drive_pdu_networks(channel, spec, step_count)?;
        }
        let network_ns = network_start.elapsed().as_nanos() as u64;

        for spec in channels.iter() {
            let model = adapter.models.get_mut(&uid).expect("model registered above");
            mcl.marshal_in(model.channel_mut(&spec.name))?;
        }

        let execute_start = Instant::now();
        let step_rc = adapter.run_step(|_uid, model_time, stop_time| mcl.step(model_time, stop_time))?;
        let execute_ns = execute_start.elapsed().as_nanos() as u64;
        rc |= step_rc;

        let proc_start = Instant::now();
        for spec in channels.iter() {
            let model = adapter.models.get_mut(&uid).expect("model registered above");
            mcl.marshal_out(model.channel_mut(&spec.name))?;
        }

        for spec in channels.iter_mut() {
            if let Some((region, binding)) = &spec.direct_index {
                let model = adapter.models.get_mut(&uid).expect("model registered above");
                let channel = model.channel_mut(&spec.name);
                let mut guard = region.lock().expect("direct-index region poisoned");
                channel.sync_to_region(&mut guard, *binding);
            }
        }
        let proc_ns = proc_start.elapsed().as_nanos() as u64;
        let total_ns = cycle_start.elapsed().as_nanos() as u64;
        let wait_ns = total_ns.saturating_sub(execute_ns + proc_ns + network_ns);

        let samples_per_second = profile.samples_per_second();
        let profile_entry = profile.entry(uid);
        profile_entry.accumulate_model_part(execute_ns, proc_ns, network_ns);
        profile_entry.accumulate_bus_part(wait_ns, total_ns);
        profile_entry.update_averages(1, samples_per_second);

        step_count += 1;
        let model_time = adapter.models[&uid].model_time;
        let endtime_reached = endtime.map(|t| model_time >= t).unwrap_or(false);
        let steps_reached = steps.map(|s| step_count >= s).unwrap_or(false);
        if endtime_reached || steps_reached || rc != 0 {
            break;
        }
    }

    adapter.exit()?;
    mcl.unload()?;
    if let Some(p) = profile.get(uid) {
        tracing::debug!(uid, ma_model_execute = p.ma_model_execute, ma_total = p.ma_total, "model benchmark profile");
    }
    tracing::info!(name = %name, uid, step_count, rc, "model run complete");
    Ok(rc)
}

/// Sequential co-simulation (spec §4.6/§5): every model instance runs on
/// this one thread in declared order, with a forward merge before the step
/// round (each instance sees the previous instance's latest writes on a
/// shared channel) and a backward merge after it (every instance converges
/// on the same `final_val` for a shared signal before the bus resolves it).
/// This can't share `run_model`'s one-thread-per-model loop, since the
/// merges need ordered, exclusive access to every participating instance's
/// channel at once.
fn run_sequential(
    fabric: MockFabric,
    specs: Vec<ModelSpec>,
    step_size: f64,
    timeout: Duration,
    endtime: Option<f64>,
    steps: Option<u64>,
) -> SimResult<i32> {
    let n = specs.len();
    let mut uids = Vec::with_capacity(n);
    let mut names = Vec::with_capacity(n);
    let mut channel_specs: Vec<Vec<ChannelSpec>> = Vec::with_capacity(n);
    let mut adapters = Vec::with_capacity(n);
    let mut mcls = Vec::with_capacity(n);
    let mut profiles: Vec<ProfileRegistry> = Vec::with_capacity(n);

    for spec in specs {
        let ModelSpec { uid, name, channels } = spec;
        let mut adapter = Adapter::new(fabric.endpoint(format!("model:{uid}")));
        adapter.start()?;
        prime_channels(&mut adapter, uid, &channels);
        adapter.register(step_size, 20, timeout)?;
        adapter.index(20, timeout)?;
        adapter.read(timeout)?;
        let mut mcl = NoopModelCompatLayer::new();
        mcl.init(uid, 0.0)?;

        uids.push(uid);
        names.push(name);
        adapters.push(adapter);
        mcls.push(mcl);
        profiles.push(ProfileRegistry::new(step_size));
        channel_specs.push(channels);
    }

    let mut channel_names: Vec<String> = Vec::new();
    for specs in &channel_specs {
        for spec in specs {
            if !channel_names.contains(&spec.name) {
                channel_names.push(spec.name.clone());
            }
        }
    }

    let merge = |channel_specs: &[Vec<ChannelSpec>],
                 adapters: &mut [Adapter<simbus_core::MockEndpoint>],
                 uids: &[u32],
                 channel_name: &str,
                 pass: fn(&mut [Channel])| {
        let participants: Vec<usize> = (0..n).filter(|&i| channel_specs[i].iter().any(|c| c.name == channel_name)).collect();
        if participants.len() < 2 {
            return;
        }
        let mut taken: Vec<Channel> = participants
            .iter()
            .map(|&i| {
                std::mem::take(
                    adapters[i]
                        .models
                        .get_mut(&uids[i])
                        .expect("model registered above")
                        .channel_mut(channel_name),
                )
            })
            .collect();
        pass(&mut taken);
        for (&i, channel) in participants.iter().zip(taken) {
            *adapters[i]
                .models
                .get_mut(&uids[i])
                .expect("model registered above")
                .channel_mut(channel_name) = channel;
        }
    };

    let mut rc = 0i32;
    let mut step_count = 0u64;
    'sim: loop {
        for adapter in adapters.iter_mut() {
            adapter.ready_loop_once(timeout)?;
        }

        for i in 0..n {
            for spec in channel_specs[i].iter_mut() {
                if let Some((region, binding)) = &spec.direct_index {
                    let channel = adapters[i].models.get_mut(&uids[i]).expect("model registered above").channel_mut(&spec.name);
                    let guard = region.lock().expect("direct-index region poisoned");
                    channel.sync_from_region(&guard, *binding);
                }
            }
        }

        for channel_name in &channel_names {
            merge(&channel_specs, &mut adapters, &uids, channel_name, sequential_forward_merge);
        }

        for i in 0..n {
            let cycle_start = Instant::now();
            let network_start = Instant::now();
            for spec in channel_specs[i].iter_mut() {
                let channel = adapters[i].models.get_mut(&uids[i]).expect("model registered above").channel_mut(&spec.name);
                drive_pdu_networks(channel, spec, step_count)?;
            }
            let network_ns = network_start.elapsed().as_nanos() as u64;

            for spec in channel_specs[i].iter() {
                let channel = adapters[i].models.get_mut(&uids[i]).expect("model registered above").channel_mut(&spec.name);
                mcls[i].marshal_in(channel)?;
            }

            let execute_start = Instant::now();
            let step_rc = adapters[i].run_step(|_uid, model_time, stop_time| mcls[i].step(model_time, stop_time))?;
            let execute_ns = execute_start.elapsed().as_nanos() as u64;
            rc |= step_rc;

            for spec in channel_specs[i].iter() {
                let channel = adapters[i].models.get_mut(&uids[i]).expect("model registered above").channel_mut(&spec.name);
                mcls[i].marshal_out(channel)?;
            }

            for spec in channel_specs[i].iter_mut() {
                if let Some((region, binding)) = &spec.direct_index {
                    let channel = adapters[i].models.get_mut(&uids[i]).expect("model registered above").channel_mut(&spec.name);
                    let mut guard = region.lock().expect("direct-index region poisoned");
                    channel.sync_to_region(&mut guard, *binding);
                }
            }

            let total_ns = cycle_start.elapsed().as_nanos() as u64;
            let samples_per_second = profiles[i].samples_per_second();
            let entry = profiles[i].entry(uids[i]);
            entry.accumulate_model_part(execute_ns, 0, network_ns);
            entry.accumulate_bus_part(0, total_ns);
            entry.update_averages(1, samples_per_second);
        }

        for channel_name in &channel_names {
            merge(&channel_specs, &mut adapters, &uids, channel_name, sequential_backward_merge);
        }

        step_count += 1;
        let endtime_reached = endtime
            .map(|t| (0..n).all(|i| adapters[i].models[&uids[i]].model_time >= t))
            .unwrap_or(false);
        let steps_reached = steps.map(|s| step_count >= s).unwrap_or(false);
        if endtime_reached || steps_reached || rc != 0 {
            break 'sim;
        }
    }

    for i in 0..n {
        adapters[i].exit()?;
        mcls[i].unload()?;
        tracing::info!(name = %names[i], uid = uids[i], step_count, rc, "model run complete (sequential)");
    }
    Ok(rc)
}

fn run(args: Args) -> SimResult<i32> {
    if args.transport != "mock" {
        return Err(SimbusError::Configuration(format!(
            "transport backend '{}' is out of scope for this build; only 'mock' is implemented",
            args.transport
        )));
    }
    if args.endtime.is_none() && args.steps.is_none() {
        return Err(SimbusError::Configuration("one of --endtime or --steps is required".into()));
    }
    if args.stepsize <= 0.0 {
        return Err(SimbusError::Configuration("--stepsize must be positive".into()));
    }

    let docs = collect_documents(&args).map_err(|e| SimbusError::Configuration(e.to_string()))?;
    let stack = docs
        .iter()
        .find_map(|d| match d {
            Document::Stack(s) => Some(s.clone()),
            _ => None,
        })
        .ok_or_else(|| SimbusError::Configuration("no Stack document found among the given YAML files".into()))?;
    let groups: Vec<SignalGroupDoc> = docs
        .iter()
        .filter_map(|d| match d {
            Document::SignalGroup(g) => Some(g.clone()),
            _ => None,
        })
        .collect();
    let networks: Vec<NetworkDoc> = docs
        .into_iter()
        .filter_map(|d| match d {
            Document::Network(n) => Some(n),
            _ => None,
        })
        .collect();

    let mut models = resolve_models(&stack, &groups, &networks, args.stepsize, args.uid)?;
    if models.is_empty() {
        return Err(SimbusError::Configuration("Stack document declares no matching models".into()));
    }
    plan_direct_index(&mut models);

    let fabric = MockFabric::new();
    let step_size = args.stepsize;
    let timeout = Duration::from_secs_f64(args.timeout.max(0.001));
    let stop = Arc::new(AtomicBool::new(false));

    let bus_handle = {
        let stop = stop.clone();
        let fabric = fabric.clone();
        std::thread::spawn(move || -> SimResult<()> {
            let mut bus = SimBus::new(fabric.endpoint("model:0"), step_size);
            bus.start()?;
            while !stop.load(Ordering::SeqCst) {
                match bus.pump_once(Duration::from_millis(50)) {
                    Ok(_) | Err(SimbusError::Etime) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    };

    let endtime = args.endtime;
    let steps = args.steps;
    let sequential = stack.spec.runtime.sequential;

    let run_result = if sequential {
        run_sequential(fabric, models, step_size, timeout, endtime, steps)
    } else {
        let model_handles: Vec<_> = models
            .into_iter()
            .map(|spec| {
                let fabric = fabric.clone();
                std::thread::spawn(move || run_model(fabric, spec, step_size, timeout, endtime, steps))
            })
            .collect();

        let mut overall_rc = 0i32;
        let mut first_err: Option<SimbusError> = None;
        for handle in model_handles {
            match handle.join().expect("model thread panicked") {
                Ok(rc) => overall_rc |= rc,
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(overall_rc),
        }
    };

    stop.store(true, Ordering::SeqCst);
    let bus_result = bus_handle.join().expect("bus thread panicked");

    let rc = run_result?;
    bus_result?;
    Ok(rc)
}

fn main() {
    let args = Args::parse();
    init_logging(args.logger);

    match run(args) {
        Ok(rc) if rc < 0 => {
            tracing::error!(rc, "session aborted: a model step requested abort");
            std::process::exit(1);
        }
        Ok(_) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "simulation run failed");
            std::process::exit(e.exit_code());
        }
    }
}
