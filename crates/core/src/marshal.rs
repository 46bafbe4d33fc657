// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Signal marshaller (spec §4.6): copies and transforms signals between a
//! model's vector and the adapter's vector, applies per-signal linear
//! transforms, and implements the sequential co-simulation forward/backward
//! merge passes.

use crate::channel::Channel;
use crate::error::{SimResult, SimbusError};
use crate::signal::SignalValue;
use std::collections::HashMap;

/// Per-signal linear transform; absent is identity. `factor == 0` is
/// treated as identity rather than a division fault.
#[derive(Debug, Clone, Copy)]
pub struct SignalTransform {
    pub factor: f64,
    pub offset: f64,
}

impl SignalTransform {
    pub fn identity() -> Self {
        SignalTransform {
            factor: 1.0,
            offset: 0.0,
        }
    }

    /// `model_val = val * factor + offset`.
    pub fn to_model(&self, val: f64) -> f64 {
        if self.factor == 0.0 {
            val
        } else {
            val * self.factor + self.offset
        }
    }

    /// `final_val = (model_val - offset) / factor`.
    pub fn to_adapter(&self, model_val: f64) -> f64 {
        if self.factor == 0.0 {
            model_val
        } else {
            (model_val - self.offset) / self.factor
        }
    }
}

/// The model's own growable binary buffer for one binary signal, with the
/// same reset-before-append discipline as the adapter-side `SignalValue`.
#[derive(Debug, Default)]
pub struct ModelBinaryChannel {
    data: Vec<u8>,
    reset_called: bool,
}

impl ModelBinaryChannel {
    pub fn reset(&mut self) {
        self.data.clear();
        self.reset_called = true;
    }

    pub fn append(&mut self, bytes: &[u8]) -> SimResult<()> {
        if !self.reset_called {
            return Err(SimbusError::Eproto(0));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer (zeroing `length[i]`, per spec §4.6).
    fn take(&mut self) -> Vec<u8> {
        self.reset_called = false;
        std::mem::take(&mut self.data)
    }
}

/// ADAPTER -> MODEL, scalar: `model_val = val * factor + offset`.
pub fn marshal_in_scalar(adapter_sv: &SignalValue, transform: Option<SignalTransform>) -> f64 {
    transform.unwrap_or_else(SignalTransform::identity).to_model(adapter_sv.val)
}

/// ADAPTER -> MODEL, binary: append the adapter's buffer onto the model's,
/// then mark the adapter's payload consumed (`bin_size = 0`).
pub fn marshal_in_binary(adapter_sv: &mut SignalValue, model_channel: &mut ModelBinaryChannel) {
    if adapter_sv.bin_size() == 0 {
        return;
    }
    if !model_channel.reset_called {
        model_channel.reset();
    }
    model_channel.data.extend_from_slice(adapter_sv.binary());
    adapter_sv.mark_binary_consumed();
}

/// MODEL -> ADAPTER, scalar: inverse transform into `final_val`.
pub fn marshal_out_scalar(model_val: f64, transform: Option<SignalTransform>, adapter_sv: &mut SignalValue) {
    adapter_sv.final_val = transform.unwrap_or_else(SignalTransform::identity).to_adapter(model_val);
}

/// MODEL -> ADAPTER, binary: append the model's buffer onto the adapter's,
/// then zero the model's `length[i]` to mark consumed.
pub fn marshal_out_binary(
    model_channel: &mut ModelBinaryChannel,
    adapter_sv: &mut SignalValue,
) -> SimResult<()> {
    let bytes = model_channel.take();
    if bytes.is_empty() {
        return Ok(());
    }
    adapter_sv.reset();
    adapter_sv.append(&bytes)
}

// ------------------------------------------------ sequential co-sim ---

/// Forward merge: propagate `final_val` left-to-right across model
/// instances sharing a channel, so model N reads the latest write made by
/// any model before it. `instances` are channels in configured model
/// order.
pub fn sequential_forward_merge(instances: &mut [Channel]) {
    let mut latest: HashMap<String, f64> = HashMap::new();
    for channel in instances.iter_mut() {
        let names = channel.names_in_order().to_vec();
        for name in &names {
            if let Some(value) = latest.get(name) {
                if let Some(sv) = channel.get_mut(name) {
                    sv.final_val = *value;
                }
            }
            if let Some(sv) = channel.get(name) {
                latest.insert(name.clone(), sv.final_val);
            }
        }
    }
}

/// Backward merge: after all model instances have run, equalize every
/// instance's `final_val` for a shared signal to the last-written value, so
/// the bus's subsequent resolution is deterministic.
pub fn sequential_backward_merge(instances: &mut [Channel]) {
    let mut canonical: HashMap<String, f64> = HashMap::new();
    for channel in instances.iter() {
        for name in channel.names_in_order() {
            if let Some(sv) = channel.get(name) {
                canonical.insert(name.clone(), sv.final_val);
            }
        }
    }
    for channel in instances.iter_mut() {
        let names = channel.names_in_order().to_vec();
        for name in &names {
            if let Some(value) = canonical.get(name) {
                if let Some(sv) = channel.get_mut(name) {
                    sv.final_val = *value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_transform_round_trips() {
        let t = SignalTransform { factor: 0.1, offset: -40.0 };
        let raw = t.to_adapter(10.0);
        assert_eq!(raw, 500.0);
        assert_eq!(t.to_model(raw), 10.0);
    }

    #[test]
    fn zero_factor_is_treated_as_identity() {
        let t = SignalTransform { factor: 0.0, offset: 5.0 };
        assert_eq!(t.to_model(3.0), 3.0);
        assert_eq!(t.to_adapter(3.0), 3.0);
    }

    #[test]
    fn binary_marshal_in_consumes_adapter_payload() {
        let mut adapter_sv = SignalValue::new("can_bus");
        adapter_sv.reset();
        adapter_sv.append(b"frame").unwrap();
        let mut model_channel = ModelBinaryChannel::default();
        marshal_in_binary(&mut adapter_sv, &mut model_channel);
        assert_eq!(model_channel.data(), b"frame");
        assert_eq!(adapter_sv.bin_size(), 0);
    }

    #[test]
    fn binary_marshal_out_requires_nonempty_buffer() {
        let mut model_channel = ModelBinaryChannel::default();
        let mut adapter_sv = SignalValue::new("can_bus");
        marshal_out_binary(&mut model_channel, &mut adapter_sv).unwrap();
        assert_eq!(adapter_sv.bin_size(), 0);

        model_channel.reset();
        model_channel.append(b"payload").unwrap();
        marshal_out_binary(&mut model_channel, &mut adapter_sv).unwrap();
        assert_eq!(adapter_sv.binary(), b"payload");
    }

    #[test]
    fn forward_merge_propagates_latest_write_left_to_right() {
        let mut a = Channel::new("link");
        a.get_or_create("x").final_val = 42.0;
        let mut b = Channel::new("link");
        b.get_or_create("x");
        let mut instances = [a, b];
        sequential_forward_merge(&mut instances);
        assert_eq!(instances[1].get("x").unwrap().final_val, 42.0);
    }

    #[test]
    fn backward_merge_equalizes_all_instances() {
        let mut a = Channel::new("link");
        a.get_or_create("x").final_val = 1.0;
        let mut b = Channel::new("link");
        b.get_or_create("x").final_val = 2.0;
        let mut instances = [a, b];
        sequential_backward_merge(&mut instances);
        assert_eq!(instances[0].get("x").unwrap().final_val, 2.0);
        assert_eq!(instances[1].get("x").unwrap().final_val, 2.0);
    }
}
