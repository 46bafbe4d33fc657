// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Errno-style error kinds shared across the adapter, coordinator, signal
//! store and endpoint. Values mirror the POSIX errno names used throughout
//! the original implementation (`EPROTO`, `ETIME`, `ENODATA`, `ECANCELED`,
//! `ENOMSG`, `EINVAL`, `ENOSYS`) rather than raw integers.

use thiserror::Error;

pub type SimResult<T> = Result<T, SimbusError>;

#[derive(Debug, Error)]
pub enum SimbusError {
    /// A binary signal was appended to without a preceding `reset` (echo
    /// protection). Logged at ERROR, step proceeds.
    #[error("EPROTO: append without reset on signal index {0}")]
    Eproto(usize),

    /// A request referenced a name, UID or index the store does not know
    /// about, or a malformed argument (e.g. `factor == 0`).
    #[error("EINVAL: {0}")]
    Einval(String),

    /// Operation not supported in the current mode (e.g. calling a
    /// bus-side handler in model mode).
    #[error("ENOSYS: {0}")]
    Enosys(String),

    /// Endpoint receive timed out. Fatal for models, recoverable for the
    /// bus.
    #[error("ETIME: receive timed out")]
    Etime,

    /// Endpoint receive produced an empty reply.
    #[error("ENODATA: empty reply")]
    Enodata,

    /// The operation was interrupted by `Endpoint::interrupt`.
    #[error("ECANCELED: operation interrupted")]
    Ecanceled,

    /// No pending message in a codec stream; expected sentinel for
    /// end-of-stream on read.
    #[error("ENOMSG: no pending message")]
    Enomsg,

    /// Malformed wire framing: missing identifier, zero-size prefix, or an
    /// unpack return outside the expected shape.
    #[error("protocol framing error: {0}")]
    Protocol(String),

    /// Fatal configuration error: missing YAML nodes, unresolved channel or
    /// signal, missing/mismatched step size.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimbusError {
    /// Exit-code mapping per spec §6: 0 success, ECANCELED on interrupted
    /// run, ETIME on bus timeout, 1 on fatal configuration error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimbusError::Ecanceled => 125,
            SimbusError::Etime => 110,
            SimbusError::Configuration(_) => 1,
            _ => 1,
        }
    }
}
