//! Per-tick population statistics, marker events and the run summary.

use crate::model::{Agent, HealthState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of agents per health state, plus travel and distancing tallies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub susceptible: usize,
    pub infected: usize,
    pub recovered: usize,
    pub deceased: usize,
    pub travelling: usize,
    pub distancing: usize,
}

impl Counts {
    pub fn tally(agents: &[Agent]) -> Self {
        let mut counts = Counts::default();
        for agt in agents {
            match agt.state() {
                HealthState::Susceptible => counts.susceptible += 1,
                HealthState::Infected => counts.infected += 1,
                HealthState::Recovered => counts.recovered += 1,
                HealthState::Deceased => counts.deceased += 1,
            }
            counts.travelling += usize::from(agt.is_travelling());
            counts.distancing += usize::from(agt.is_distancing());
        }
        counts
    }

    pub fn get(&self, state: HealthState) -> usize {
        match state {
            HealthState::Susceptible => self.susceptible,
            HealthState::Infected => self.infected,
            HealthState::Recovered => self.recovered,
            HealthState::Deceased => self.deceased,
        }
    }

    /// Sum over the four health states.
    pub fn total(&self) -> usize {
        self.susceptible + self.infected + self.recovered + self.deceased
    }
}

/// Counts recorded at the end of a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub tick: u64,
    pub counts: Counts,
}

/// Ring buffer of the most recent samples.
#[derive(Clone, Debug)]
pub struct History {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A setting whose change is marked on the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Toggle {
    Distancing,
    Travel,
    Communities,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// First transmission of the run.
    FirstInfection,
    FirstDeath,
    /// The infected count peaked at `infected` on the event's tick.
    PeakInfected { infected: usize },
    /// No infected agents are left.
    Extinction,
    SettingChanged { toggle: Toggle, enabled: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub tick: u64,
    pub kind: EventKind,
}

/// Running mean and standard deviation (Welford).
#[derive(Clone, Debug)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            count: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated outcome of a run, suitable for printing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub seed: u64,
    pub ticks: u64,
    pub population: usize,
    pub counts: Counts,
    pub peak_infected: usize,
    pub peak_tick: u64,
    pub first_death_tick: Option<u64>,
    /// Share of the population no longer susceptible.
    pub attack_rate: f64,
    pub recoveries: u64,
    pub deaths: u64,
    pub infection_length: AccumulatorReport,
}

/// What happened during one tick, as seen by the statistics.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TickOutcome {
    pub new_infections: usize,
    pub recoveries: usize,
    pub deaths: usize,
}

/// Derived statistics, updated by the engine once per tick.
#[derive(Clone, Debug)]
pub struct Statistics {
    history: History,
    events: Vec<Event>,
    counts: Counts,
    peak_infected: usize,
    peak_tick: u64,
    peak_reported: bool,
    first_infection_tick: Option<u64>,
    first_death_tick: Option<u64>,
    recoveries: u64,
    deaths: u64,
    infection_length: Accumulator,
}

impl Statistics {
    pub(crate) fn new(history_len: usize, tick: u64, counts: Counts) -> Self {
        let mut stats = Self {
            history: History::new(history_len),
            events: Vec::new(),
            counts,
            peak_infected: counts.infected,
            peak_tick: tick,
            peak_reported: false,
            first_infection_tick: None,
            first_death_tick: None,
            recoveries: 0,
            deaths: 0,
            infection_length: Accumulator::new(),
        };
        stats.history.push(Sample { tick, counts });
        stats
    }

    pub(crate) fn record(&mut self, tick: u64, counts: Counts, outcome: TickOutcome) {
        if outcome.new_infections > 0 && self.first_infection_tick.is_none() {
            self.first_infection_tick = Some(tick);
            self.mark(tick, EventKind::FirstInfection);
        }
        if outcome.deaths > 0 && self.first_death_tick.is_none() {
            self.first_death_tick = Some(tick);
            self.mark(tick, EventKind::FirstDeath);
        }
        self.recoveries += outcome.recoveries as u64;
        self.deaths += outcome.deaths as u64;

        if counts.infected > self.peak_infected {
            self.peak_infected = counts.infected;
            self.peak_tick = tick;
            self.peak_reported = false;
        } else if counts.infected < self.peak_infected && !self.peak_reported {
            self.peak_reported = true;
            let kind = EventKind::PeakInfected {
                infected: self.peak_infected,
            };
            self.mark(self.peak_tick, kind);
        }

        if counts.infected == 0 && self.counts.infected > 0 {
            self.mark(tick, EventKind::Extinction);
        }

        self.counts = counts;
        self.history.push(Sample { tick, counts });
    }

    pub(crate) fn record_infection_length(&mut self, ticks: u32) {
        self.infection_length.add(ticks as f64);
    }

    pub(crate) fn mark(&mut self, tick: u64, kind: EventKind) {
        log::debug!("tick {tick}: {kind:?}");
        self.events.push(Event { tick, kind });
    }

    /// Counts at the end of the last recorded tick.
    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Marker events in the order they were raised.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn peak_infected(&self) -> (usize, u64) {
        (self.peak_infected, self.peak_tick)
    }

    pub fn first_death_tick(&self) -> Option<u64> {
        self.first_death_tick
    }

    pub fn first_infection_tick(&self) -> Option<u64> {
        self.first_infection_tick
    }

    pub fn summary(&self, seed: u64, ticks: u64) -> Summary {
        let population = self.counts.total();
        let attack_rate = if population > 0 {
            1.0 - self.counts.susceptible as f64 / population as f64
        } else {
            0.0
        };
        Summary {
            seed,
            ticks,
            population,
            counts: self.counts,
            peak_infected: self.peak_infected,
            peak_tick: self.peak_tick,
            first_death_tick: self.first_death_tick,
            attack_rate,
            recoveries: self.recoveries,
            deaths: self.deaths,
            infection_length: self.infection_length.report(),
        }
    }
}
