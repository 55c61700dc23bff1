//! Transmission between neighbours and resolution of infections.

use crate::config::Config;
use crate::geometry::Vec2;
use crate::model::{Agent, Health, HealthState, Motion};
use crate::spatial::{Inclusion, NeighborhoodIndex};
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Distribution, Normal};

/// Disease parameters resolved from the configuration for one tick.
pub(crate) struct DiseaseParams {
    infection_radius: f64,
    transmission: Bernoulli,
    reinfection: Option<Bernoulli>,
    duration: Normal<f64>,
    mortality: Bernoulli,
    early_recovery: Option<Bernoulli>,
    infected_distancing: Option<Bernoulli>,
    recovered_distancing: Option<Bernoulli>,
}

impl DiseaseParams {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let dis = &cfg.disease;
        let optional = |prob: Option<f64>| -> Result<Option<Bernoulli>> {
            prob.map(Bernoulli::new).transpose().map_err(Into::into)
        };
        let positive = |prob: f64| (prob > 0.0).then_some(prob);

        Ok(Self {
            infection_radius: dis.infection_radius,
            transmission: Bernoulli::new(dis.transmission_probability)
                .context("invalid transmission probability")?,
            reinfection: optional(positive(dis.reinfection_probability))
                .context("invalid reinfection probability")?,
            duration: Normal::new(dis.recovery_duration_mean, dis.recovery_duration_spread)
                .context("invalid recovery duration distribution")?,
            mortality: Bernoulli::new(dis.mortality_rate).context("invalid mortality rate")?,
            early_recovery: optional(positive(dis.early_recovery_probability))
                .context("invalid early recovery probability")?,
            infected_distancing: optional(dis.infected_distancing_probability)
                .context("invalid infected distancing probability")?,
            recovered_distancing: optional(dis.recovered_distancing_probability)
                .context("invalid recovered distancing probability")?,
        })
    }

    /// Draw an infection length in whole ticks, at least one.
    pub fn sample_duration(&self, rng: &mut ChaCha12Rng) -> u32 {
        let ticks = self.duration.sample(rng).round();
        ticks.clamp(1.0, u32::MAX as f64) as u32
    }
}

/// How an infection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Exit {
    pub slot: usize,
    pub outcome: HealthState,
    /// Ticks the agent spent infected.
    pub infected_for: u32,
}

/// Evaluate every infected/susceptible contact once and return who caught it.
///
/// Infected sources are visited in slot order and their neighbours in slot
/// order; each pair gets exactly one independent trial. An agent hit by more
/// than one trial is still infected only once. Travellers neither transmit
/// nor receive. The returned slots are ascending.
pub(crate) fn transmit(
    agents: &[Agent],
    index: &dyn NeighborhoodIndex,
    params: &DiseaseParams,
    rng: &mut ChaCha12Rng,
) -> Vec<usize> {
    let mut hit = vec![false; agents.len()];

    for (i_src, src) in agents.iter().enumerate() {
        if src.state() != HealthState::Infected || !src.is_present() {
            continue;
        }
        for i_dst in index.neighbors(src.position, params.infection_radius, Inclusion::Living) {
            if i_dst == i_src {
                continue;
            }
            let dst = &agents[i_dst];
            if !dst.is_present() {
                continue;
            }
            let trial = match (dst.health, &params.reinfection) {
                (Health::Susceptible, _) => &params.transmission,
                (Health::Recovered, Some(reinfection)) => reinfection,
                _ => continue,
            };
            if trial.sample(rng) {
                hit[i_dst] = true;
            }
        }
    }

    hit.iter()
        .enumerate()
        .filter_map(|(slot, &hit)| hit.then_some(slot))
        .collect()
}

/// Move `agent` into the infected state with a freshly sampled duration.
pub(crate) fn infect(
    agent: &mut Agent,
    params: &DiseaseParams,
    progression: &mut ChaCha12Rng,
    participation: &mut ChaCha12Rng,
) {
    agent.health = Health::Infected {
        timer: 0,
        duration: params.sample_duration(progression),
    };
    if let Some(dist) = &params.infected_distancing {
        agent.distancing = dist.sample(participation);
    }
}

/// Advance infection timers and resolve infections that have run their course.
///
/// Agents whose slot is flagged in `fresh` were infected this tick and are
/// left untouched. A resolving infection takes one mortality trial.
pub(crate) fn progress(
    agents: &mut [Agent],
    fresh: &[bool],
    params: &DiseaseParams,
    progression: &mut ChaCha12Rng,
    participation: &mut ChaCha12Rng,
) -> Vec<Exit> {
    let mut exits = Vec::new();

    for (slot, agent) in agents.iter_mut().enumerate() {
        let Health::Infected { timer, duration } = agent.health else {
            continue;
        };
        if fresh.get(slot).copied().unwrap_or(false) {
            continue;
        }
        let timer = timer + 1;
        let resolves = timer >= duration
            || params
                .early_recovery
                .as_ref()
                .is_some_and(|dist| dist.sample(progression));
        if !resolves {
            agent.health = Health::Infected { timer, duration };
            continue;
        }

        let outcome = if params.mortality.sample(progression) {
            agent.health = Health::Deceased;
            agent.velocity = Vec2::ZERO;
            // A traveller that dies stays where it fell, still listed in its origin.
            agent.motion = Motion::Resident;
            HealthState::Deceased
        } else {
            agent.health = Health::Recovered;
            if let Some(dist) = &params.recovered_distancing {
                agent.distancing = dist.sample(participation);
            }
            HealthState::Recovered
        };
        exits.push(Exit {
            slot,
            outcome,
            infected_for: timer,
        });
    }

    exits
}
