// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Trace hooks (C10, spec §4.7 tracing paragraph): pluggable read/write
//! tracers on codec instances, filtered by a frame/PDU id list taken from
//! environment variables (spec §6).

use crate::ncodec::Message;
use std::collections::HashSet;

/// A filter value: `*` (everything) or a comma-separated id list.
#[derive(Debug, Clone)]
pub enum IdFilter {
    All,
    Ids(HashSet<u32>),
}

impl IdFilter {
    pub fn parse(spec: &str) -> Self {
        if spec.trim() == "*" {
            IdFilter::All
        } else {
            IdFilter::Ids(
                spec.split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .collect(),
            )
        }
    }

    pub fn matches(&self, id: u32) -> bool {
        match self {
            IdFilter::All => true,
            IdFilter::Ids(set) => set.contains(&id),
        }
    }
}

/// Read/write tracer installed on an `NCodec`. Constructed from
/// `NCODEC_TRACE_LOG`, `NCODEC_TRACE_<bus>_<bus_id>` and
/// `NCODEC_TRACE_PDU_<swc_id>` environment variables.
#[derive(Debug, Default)]
pub struct TraceHooks {
    pub can_filter: Option<IdFilter>,
    pub pdu_filter: Option<IdFilter>,
    pub log_enabled: bool,
}

impl TraceHooks {
    pub fn from_env() -> Option<Self> {
        let log_enabled = std::env::var("NCODEC_TRACE_LOG").is_ok();
        let mut can_filter = None;
        let mut pdu_filter = None;
        for (key, value) in std::env::vars() {
            if key.starts_with("NCODEC_TRACE_PDU_") {
                pdu_filter = Some(IdFilter::parse(&value));
            } else if key.starts_with("NCODEC_TRACE_") && key != "NCODEC_TRACE_LOG" {
                can_filter = Some(IdFilter::parse(&value));
            }
        }
        if log_enabled || can_filter.is_some() || pdu_filter.is_some() {
            Some(TraceHooks {
                can_filter,
                pdu_filter,
                log_enabled,
            })
        } else {
            None
        }
    }

    pub fn on_write(&self, msg: &Message) {
        self.emit("write", msg);
    }

    pub fn on_read(&self, msg: &Message) {
        self.emit("read", msg);
    }

    fn emit(&self, direction: &str, msg: &Message) {
        let enabled = match msg {
            Message::Can(frame) => self
                .can_filter
                .as_ref()
                .map(|f| f.matches(frame.frame_id))
                .unwrap_or(self.log_enabled),
            Message::Pdu(pdu) => self
                .pdu_filter
                .as_ref()
                .map(|f| f.matches(pdu.id))
                .unwrap_or(self.log_enabled),
        };
        if enabled {
            tracing::debug!(direction, ?msg, "ncodec trace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_filter_matches_everything() {
        let f = IdFilter::parse("*");
        assert!(f.matches(0));
        assert!(f.matches(999));
    }

    #[test]
    fn comma_list_filter_matches_only_listed_ids() {
        let f = IdFilter::parse("1, 2,3");
        assert!(f.matches(2));
        assert!(!f.matches(4));
    }
}
