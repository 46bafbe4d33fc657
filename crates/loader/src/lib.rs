// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Model-compatibility-layer contract (spec §9 "Polymorphism": `{load, init,
//! step, marshal_in, marshal_out, unload}`). Dynamic library loading and the
//! legacy MCL Mk1 shim are out of scope (spec.md §1 Non-goals); this crate
//! ships the trait boundary plus an in-memory stand-in so `simbus-core`'s
//! adapter pipeline can be exercised without a real loaded model.

use simbus_core::channel::Channel;
use simbus_core::error::SimResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A loaded simulation model, addressed by the adapter through this
/// capability set rather than a concrete dynlib or language binding.
pub trait ModelCompatLayer {
    fn load(&mut self, path: &Path) -> SimResult<()>;
    fn init(&mut self, model_uid: u32, model_time: f64) -> SimResult<()>;

    /// Advance the model; returns the step's `rc` (spec §7: ORed into the
    /// session rc, negative aborts, positive requests orderly exit).
    fn step(&mut self, model_time: f64, stop_time: f64) -> SimResult<i32>;

    /// ADAPTER -> MODEL: pull committed values into the model's own vector.
    fn marshal_in(&mut self, channel: &mut Channel) -> SimResult<()>;

    /// MODEL -> ADAPTER: push the model's tentative values back as deltas.
    fn marshal_out(&mut self, channel: &mut Channel) -> SimResult<()>;

    fn unload(&mut self) -> SimResult<()>;
}

/// An in-memory model with no step behavior of its own: `marshal_in` snapshots
/// every signal's `val`, `marshal_out` writes the same snapshot back as
/// `final_val` (identity passthrough). Useful for driving the adapter/bus
/// pipeline in tests without a loaded model.
#[derive(Debug, Default)]
pub struct NoopModelCompatLayer {
    path: Option<PathBuf>,
    model_uid: u32,
    snapshot: HashMap<String, f64>,
    loaded: bool,
}

impl NoopModelCompatLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelCompatLayer for NoopModelCompatLayer {
    fn load(&mut self, path: &Path) -> SimResult<()> {
        tracing::debug!(path = %path.display(), "noop MCL: recording model path, no dynlib loaded");
        self.path = Some(path.to_path_buf());
        self.loaded = true;
        Ok(())
    }

    fn init(&mut self, model_uid: u32, _model_time: f64) -> SimResult<()> {
        self.model_uid = model_uid;
        Ok(())
    }

    fn step(&mut self, _model_time: f64, _stop_time: f64) -> SimResult<i32> {
        Ok(0)
    }

    fn marshal_in(&mut self, channel: &mut Channel) -> SimResult<()> {
        channel.refresh_index();
        for name in channel.names_in_order().to_vec() {
            if let Some(sv) = channel.get(&name) {
                self.snapshot.insert(name, sv.val);
            }
        }
        Ok(())
    }

    fn marshal_out(&mut self, channel: &mut Channel) -> SimResult<()> {
        for (name, value) in &self.snapshot {
            if let Some(sv) = channel.get_mut(name) {
                sv.final_val = *value;
            }
        }
        Ok(())
    }

    fn unload(&mut self) -> SimResult<()> {
        self.loaded = false;
        self.snapshot.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_mcl_round_trips_a_scalar_unchanged() {
        let mut mcl = NoopModelCompatLayer::new();
        let mut channel = Channel::new("data_channel");
        channel.get_or_create("counter").val = 7.0;

        mcl.load(Path::new("model.yaml")).unwrap();
        mcl.init(1, 0.0).unwrap();
        mcl.marshal_in(&mut channel).unwrap();
        assert_eq!(mcl.step(0.0, 0.0005).unwrap(), 0);
        mcl.marshal_out(&mut channel).unwrap();

        assert_eq!(channel.get("counter").unwrap().final_val, 7.0);
        mcl.unload().unwrap();
    }

    #[test]
    fn unload_clears_snapshot() {
        let mut mcl = NoopModelCompatLayer::new();
        let mut channel = Channel::new("c");
        channel.get_or_create("x").val = 1.0;
        mcl.marshal_in(&mut channel).unwrap();
        mcl.unload().unwrap();
        let mut other = Channel::new("c");
        other.get_or_create("x");
        mcl.marshal_out(&mut other).unwrap();
        assert_eq!(other.get("x").unwrap().final_val, 0.0);
    }
}
