//! Changes sent to a running engine from outside.
//!
//! Nothing outside the engine mutates agents directly. Settings and commands
//! are queued and applied together at the start of the next tick; a change to
//! the structure of the world goes through a full reset instead.
//!
//! | option                                 | applied as |
//! |----------------------------------------|------------|
//! | `seed`                                 | reset      |
//! | world size, community rectangles/names | reset      |
//! | `population.size`, `initial_infected`  | reset      |
//! | `output.history_len`                   | reset      |
//! | community `travel_enabled` flags       | hot patch  |
//! | `world.communities_enabled`            | hot patch  |
//! | `disease.*`                            | hot patch  |
//! | `movement.*`, `travel.*`               | hot patch  |
//! | `distancing.*`                         | hot patch  |
//!
//! New disease durations only apply to future infections. Re-enabling
//! communities pulls residents back inside their community, and a new
//! `distancing.percent` re-balances participants with the fewest flips.

use crate::config::{Config, check_num, check_prob};
use anyhow::{Context, Result, bail};

/// A single forward-looking parameter change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Setting {
    InfectionRadius(f64),
    TransmissionProbability(f64),
    ReinfectionProbability(f64),
    RecoveryDuration { mean: f64, spread: f64 },
    MortalityRate(f64),
    EarlyRecoveryProbability(f64),
    Speed(f64),
    DistancingEnabled(bool),
    DistancingStrength(f64),
    DistancingPercent(f64),
    TravelEnabled(bool),
    CommunitiesEnabled(bool),
    CommunityTravel { community: usize, enabled: bool },
}

impl Setting {
    /// Write the setting into `cfg`, rejecting values the engine cannot use.
    pub fn apply_to(&self, cfg: &mut Config) -> Result<()> {
        match *self {
            Setting::InfectionRadius(radius) => cfg.disease.infection_radius = radius,
            Setting::TransmissionProbability(prob) => {
                check_prob(prob).context("invalid transmission probability")?;
                cfg.disease.transmission_probability = prob;
            }
            Setting::ReinfectionProbability(prob) => {
                check_prob(prob).context("invalid reinfection probability")?;
                cfg.disease.reinfection_probability = prob;
            }
            Setting::RecoveryDuration { mean, spread } => {
                cfg.disease.recovery_duration_mean = mean;
                cfg.disease.recovery_duration_spread = spread;
            }
            Setting::MortalityRate(prob) => {
                check_prob(prob).context("invalid mortality rate")?;
                cfg.disease.mortality_rate = prob;
            }
            Setting::EarlyRecoveryProbability(prob) => {
                check_prob(prob).context("invalid early recovery probability")?;
                cfg.disease.early_recovery_probability = prob;
            }
            Setting::Speed(speed) => cfg.movement.speed = speed,
            Setting::DistancingEnabled(enabled) => cfg.distancing.enabled = enabled,
            Setting::DistancingStrength(strength) => cfg.distancing.strength = strength,
            Setting::DistancingPercent(percent) => {
                check_num(percent, 0.0..=100.0).context("invalid distancing percent")?;
                cfg.distancing.percent = percent;
            }
            Setting::TravelEnabled(enabled) => cfg.travel.enabled = enabled,
            Setting::CommunitiesEnabled(enabled) => cfg.world.communities_enabled = enabled,
            Setting::CommunityTravel { community, enabled } => {
                let n_com = cfg.world.communities.len();
                let Some(com) = cfg.world.communities.get_mut(community) else {
                    bail!("community index must be below {n_com}, but is {community}");
                };
                com.travel_enabled = enabled;
            }
        }
        Ok(())
    }
}

/// A one-off action on the population.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Add susceptible agents, spread over the communities in turn.
    AddPeople(usize),
    /// Remove randomly chosen agents, always keeping at least one.
    RemovePeople(usize),
    /// Infect one randomly chosen susceptible (or recovered) agent.
    InfectRandom,
    /// Redraw participants so that exactly the configured share distances.
    RandomizeDistancers,
}

/// Anything waiting in the engine's queue.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Change {
    Config(Box<Config>),
    Command(Command),
}

/// Whether moving from `old` to `new` needs a full reset.
pub fn is_structural(old: &Config, new: &Config) -> bool {
    let layout = |cfg: &Config| {
        cfg.world
            .communities
            .iter()
            .map(|com| (com.name.clone(), com.bounds()))
            .collect::<Vec<_>>()
    };
    old.seed != new.seed
        || old.world.width != new.world.width
        || old.world.height != new.world.height
        || layout(old) != layout(new)
        || old.population != new.population
        || old.output != new.output
}
