//! Agent-based simulation of an epidemic spreading through people who move
//! around a 2D world split into communities.
//!
//! Agents follow an SIR(D) state machine. Each tick the [`Engine`] moves
//! everyone (wandering, social distancing, travelling between communities),
//! rebuilds its spatial index, lets infected agents transmit to susceptible
//! neighbours within the infection radius, resolves infections that ran their
//! course, and records statistics. A run is fully reproducible from its seed.
//!
//! ```no_run
//! use contagion::{Config, Engine};
//!
//! let mut cfg = Config::default();
//! cfg.seed = Some(7);
//! let mut engine = Engine::new(cfg)?;
//! for _ in 0..600 {
//!     let snapshot = engine.step()?;
//!     println!("{}: {} infected", snapshot.tick, snapshot.counts.infected);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod geometry;
mod infection;
pub mod model;
mod movement;
pub mod rng;
pub mod snapshot;
pub mod spatial;
pub mod stats;

pub use config::Config;
pub use control::{Command, Setting};
pub use engine::{Applied, Engine};
pub use error::{ConfigError, InvariantViolation};
pub use model::{AgentId, Health, HealthState};
pub use snapshot::Snapshot;
pub use spatial::Inclusion;
