// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Benchmark/profile accumulators (C9): Welford running averages of
//! per-model execute, processing, network, and bus-wait times. Field set
//! grounded on `original_source/dse/modelc/adapter/simbus/profile.c`.

use std::collections::HashMap;

fn ns_to_sec(ns: u64) -> f64 {
    (ns as f64) / 1_000_000_000.0
}

/// One model's benchmark state: last sample, per-cycle accumulator, and
/// Welford moving averages.
#[derive(Debug, Clone, Default)]
pub struct ModelBenchmarkProfile {
    pub model_uid: u32,

    pub sample_model_execute_ns: u64,
    pub sample_model_proc_ns: u64,
    pub sample_network_ns: u64,

    acc_model_execute_ns: u64,
    acc_model_proc_ns: u64,
    acc_network_ns: u64,
    acc_simbus_wait_ns: u64,
    acc_total_ns: u64,

    ma_sample_count: u32,
    pub ma_model_execute: f64,
    pub ma_model_proc: f64,
    pub ma_network: f64,
    pub ma_simbus_wait: f64,
    pub ma_simbus_proc: f64,
    pub ma_total: f64,
}

fn welford_update(val: f64, mean: f64, n: u32) -> f64 {
    let delta = val - mean;
    mean + delta / (n as f64)
}

impl ModelBenchmarkProfile {
    fn new(model_uid: u32) -> Self {
        ModelBenchmarkProfile {
            model_uid,
            ..Default::default()
        }
    }

    /// Record the model-side portion (execute + processing + network
    /// times) of one step's profiling data.
    pub fn accumulate_model_part(&mut self, execute_ns: u64, proc_ns: u64, network_ns: u64) {
        self.sample_model_execute_ns = execute_ns;
        self.sample_model_proc_ns = proc_ns;
        self.sample_network_ns = network_ns;
        self.acc_model_execute_ns += execute_ns;
        self.acc_model_proc_ns += proc_ns;
        self.acc_network_ns += network_ns;
    }

    /// Record the bus-side wait and total-cycle times.
    pub fn accumulate_bus_part(&mut self, simbus_wait_ns: u64, total_ns: u64) {
        self.acc_simbus_wait_ns += simbus_wait_ns;
        self.acc_total_ns += total_ns;
    }

    /// Fold the current accumulation cycle into the running Welford
    /// averages, normalizing to a 1-second window if the cycle ran short,
    /// then clear the per-cycle accumulators.
    pub fn update_averages(&mut self, samples_this_cycle: u32, samples_per_second: u32) {
        if samples_this_cycle == 0 {
            return;
        }
        let mut model_execute = ns_to_sec(self.acc_model_execute_ns);
        let mut model_proc = ns_to_sec(self.acc_model_proc_ns);
        let mut network = ns_to_sec(self.acc_network_ns);
        let mut simbus_wait = ns_to_sec(self.acc_simbus_wait_ns);
        let mut total = ns_to_sec(self.acc_total_ns);

        if samples_this_cycle < samples_per_second && samples_per_second > 0 {
            let factor = samples_per_second as f64 / samples_this_cycle as f64;
            model_execute *= factor;
            model_proc *= factor;
            network *= factor;
            simbus_wait *= factor;
            total *= factor;
        }

        self.ma_sample_count += 1;
        let n = self.ma_sample_count;
        if n == 1 {
            self.ma_model_execute = model_execute;
            self.ma_model_proc = model_proc;
            self.ma_network = network;
            self.ma_simbus_wait = simbus_wait;
            self.ma_total = total;
        } else {
            self.ma_model_execute = welford_update(model_execute, self.ma_model_execute, n);
            self.ma_model_proc = welford_update(model_proc, self.ma_model_proc, n);
            self.ma_network = welford_update(network, self.ma_network, n);
            self.ma_simbus_wait = welford_update(simbus_wait, self.ma_simbus_wait, n);
            self.ma_total = welford_update(total, self.ma_total, n);
        }
        let model_total = self.ma_model_execute + self.ma_model_proc + self.ma_network;
        self.ma_simbus_proc = self.ma_total - model_total - self.ma_simbus_wait;

        self.acc_model_execute_ns = 0;
        self.acc_model_proc_ns = 0;
        self.acc_network_ns = 0;
        self.acc_simbus_wait_ns = 0;
        self.acc_total_ns = 0;
    }
}

/// Per-process profile registry, keyed by `model_uid`, matching
/// `profile.c`'s global `__model_data` hashmap.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    models: HashMap<u32, ModelBenchmarkProfile>,
    samples_per_second: u32,
}

impl ProfileRegistry {
    pub fn new(bus_step_size: f64) -> Self {
        let samples_per_second = if bus_step_size > 0.0 {
            (1.0 / bus_step_size).round() as u32
        } else {
            1
        };
        ProfileRegistry {
            models: HashMap::new(),
            samples_per_second,
        }
    }

    pub fn entry(&mut self, model_uid: u32) -> &mut ModelBenchmarkProfile {
        self.models
            .entry(model_uid)
            .or_insert_with(|| ModelBenchmarkProfile::new(model_uid))
    }

    pub fn get(&self, model_uid: u32) -> Option<&ModelBenchmarkProfile> {
        self.models.get(&model_uid)
    }

    pub fn samples_per_second(&self) -> u32 {
        self.samples_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut mbp = ModelBenchmarkProfile::new(1);
        mbp.accumulate_model_part(1_000_000, 500_000, 200_000);
        mbp.update_averages(1, 1);
        assert!((mbp.ma_model_execute - 0.001).abs() < 1e-9);
    }

    #[test]
    fn subsequent_samples_average_via_welford() {
        let mut mbp = ModelBenchmarkProfile::new(1);
        mbp.accumulate_model_part(1_000_000_000, 0, 0);
        mbp.update_averages(1, 1);
        mbp.accumulate_model_part(3_000_000_000, 0, 0);
        mbp.update_averages(1, 1);
        assert!((mbp.ma_model_execute - 2.0).abs() < 1e-9);
    }

    #[test]
    fn registry_creates_entries_on_demand() {
        let mut reg = ProfileRegistry::new(0.0005);
        reg.entry(7).accumulate_model_part(1, 2, 3);
        assert!(reg.get(7).is_some());
        assert!(reg.get(8).is_none());
    }
}
