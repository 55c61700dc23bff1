//! Error kinds callers need to tell apart.
//!
//! Everything else travels as plain [`anyhow::Error`] with context attached.
//! Both types here are wrapped into `anyhow::Error` at the point they are
//! raised, so use `err.downcast_ref::<ConfigError>()` to recognise them.

use thiserror::Error;

/// The configuration cannot be used to start (or continue) a simulation.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Engine state that should be unreachable was observed at the end of a tick.
///
/// The run is poisoned once this is raised and only [`crate::Engine::reset`]
/// recovers it.
#[derive(Debug, Error)]
#[error("invariant violated at tick {tick}: {detail}")]
pub struct InvariantViolation {
    pub tick: u64,
    pub detail: String,
}
