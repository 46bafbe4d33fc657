// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Script hook call contract (spec §4.8 "Lua hooks" / spec.md §1 Non-goals:
//! "the Lua scripting interpreter used for optional PDU hooks (only the call
//! contract is specified)"). `ScriptEngine` is the seam a real Lua
//! interpreter (e.g. `mlua`, used the way the other example repos reach for
//! embeddable interpreters) would implement; this crate ships only the
//! no-op passthrough so the encode/decode pipeline in `network.rs` has
//! something to call.

use simbus_core::error::SimResult;

/// Result of a signal-level hook: `{phys, raw, err, errmsg}` (spec §4.8).
/// `phys`/`raw` are `None` when the hook left the value unchanged.
#[derive(Debug, Clone, Default)]
pub struct SignalHookResult {
    pub phys: Option<f64>,
    pub raw: Option<u64>,
    pub err: i32,
    pub errmsg: String,
}

/// Result of a PDU-level hook: `{payload, err, errmsg}`.
#[derive(Debug, Clone, Default)]
pub struct PduHookResult {
    pub payload: Option<Vec<u8>>,
    pub err: i32,
    pub errmsg: String,
}

/// Registered hooks are addressed by an opaque index rather than a name,
/// mirroring the way `matrix.rs`/`network.rs` hold `Option<usize>` hook
/// handles instead of boxed closures.
pub trait ScriptEngine: Send {
    fn call_signal(&self, hook: usize, phys: f64, raw: u64, payload: &[u8]) -> SimResult<SignalHookResult>;
    fn call_pdu(&self, hook: usize, payload: &[u8]) -> SimResult<PduHookResult>;
}

/// No hooks are ever registered against this engine, so both calls are
/// unreachable in practice; it exists so `PduNetwork` always has a concrete
/// `ScriptEngine` to hold without depending on an embedded interpreter.
#[derive(Debug, Default)]
pub struct NoopScriptEngine;

impl ScriptEngine for NoopScriptEngine {
    fn call_signal(&self, _hook: usize, _phys: f64, _raw: u64, _payload: &[u8]) -> SimResult<SignalHookResult> {
        Ok(SignalHookResult::default())
    }

    fn call_pdu(&self, _hook: usize, _payload: &[u8]) -> SimResult<PduHookResult> {
        Ok(PduHookResult::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_engine_leaves_values_unchanged() {
        let engine = NoopScriptEngine;
        let result = engine.call_signal(0, 1.0, 2, &[0u8; 4]).unwrap();
        assert!(result.phys.is_none());
        assert!(result.raw.is_none());
        assert_eq!(result.err, 0);
    }
}
