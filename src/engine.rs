use crate::config::Config;
use crate::control::{Change, Command, Setting, is_structural};
use crate::error::InvariantViolation;
use crate::geometry::{Rect, Vec2};
use crate::infection::{self, DiseaseParams};
use crate::model::{Agent, AgentId, Community, HealthState, Motion};
use crate::movement::{self, Arena, MovementParams};
use crate::rng::RngStreams;
use crate::snapshot::Snapshot;
use crate::spatial::{Inclusion, IndexEntry, NeighborhoodIndex, UniformGrid};
use crate::stats::{Counts, EventKind, Statistics, Summary, TickOutcome, Toggle};
use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::seq::{IndexedRandom, index};
use rand_distr::{Bernoulli, Distribution};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Slack allowed when checking that positions lie inside their bounds.
const BOUNDS_TOLERANCE: f64 = 1e-9;

/// How [`Engine::apply_config`] took a new configuration into account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The population was rebuilt from scratch.
    Reset,
    /// The change takes effect at the start of the next tick.
    Queued,
}

/// Simulation engine.
///
/// Owns the population, the communities, the random streams and the derived
/// statistics. [`Engine::step`] is the only way the population changes;
/// everything else either reads or queues a change for the next tick.
pub struct Engine {
    cfg: Config,
    rng: RngStreams,
    tick: u64,
    next_id: u64,
    next_community: usize,
    agents: Vec<Agent>,
    communities: Vec<Community>,
    grid: UniformGrid,
    disease: DiseaseParams,
    stats: Statistics,
    snapshot: Arc<Snapshot>,
    queue: Vec<Change>,
    poisoned: bool,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    ///
    /// # Errors
    /// Returns a [`crate::ConfigError`] if the configuration is invalid.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;

        let rng = RngStreams::from_optional_seed(cfg.seed).context("failed to seed rng")?;
        let communities = cfg
            .world
            .communities
            .iter()
            .map(|com| Community::new(com.name.clone(), com.bounds(), com.travel_enabled))
            .collect();
        let grid = UniformGrid::new(cfg.world.bounds(), cfg.max_query_radius())
            .context("failed to construct spatial index")?;
        let disease = DiseaseParams::from_config(&cfg)?;

        let mut engine = Self {
            stats: Statistics::new(cfg.output.history_len, 0, Counts::default()),
            snapshot: Arc::new(Snapshot::capture(0, &[], Counts::default())),
            cfg,
            rng,
            tick: 0,
            next_id: 0,
            next_community: 0,
            agents: Vec::new(),
            communities,
            grid,
            disease,
            queue: Vec::new(),
            poisoned: false,
        };
        engine.populate().context("failed to populate")?;

        let counts = Counts::tally(&engine.agents);
        engine.stats = Statistics::new(engine.cfg.output.history_len, 0, counts);
        engine.snapshot = Arc::new(Snapshot::capture(0, &engine.agents, counts));

        log::info!(
            "created {} agents ({} infected) in {} communities with seed {}",
            engine.agents.len(),
            counts.infected,
            engine.communities.len(),
            engine.rng.seed()
        );

        Ok(engine)
    }

    /// Discard all state and start over from `cfg`.
    ///
    /// On error the engine is left exactly as it was.
    pub fn reset(&mut self, cfg: Config) -> Result<()> {
        *self = Self::new(cfg).context("failed to reset engine")?;
        Ok(())
    }

    /// Take a new configuration into account.
    ///
    /// Structural changes (see [`crate::control`]) reset the engine right away;
    /// anything else is queued and hot-patched at the start of the next tick
    /// without touching agent states.
    pub fn apply_config(&mut self, cfg: Config) -> Result<Applied> {
        cfg.validate()?;
        if is_structural(self.pending_config(), &cfg) {
            self.reset(cfg)?;
            return Ok(Applied::Reset);
        }
        self.queue.push(Change::Config(Box::new(cfg)));
        Ok(Applied::Queued)
    }

    /// Queue a single setting change for the next tick.
    pub fn queue_setting(&mut self, setting: Setting) -> Result<()> {
        let mut cfg = self.pending_config().clone();
        setting
            .apply_to(&mut cfg)
            .map_err(|err| anyhow::Error::new(crate::ConfigError(format!("{err:#}"))))?;
        cfg.validate()?;
        self.queue.push(Change::Config(Box::new(cfg)));
        Ok(())
    }

    /// Queue a command for the next tick.
    pub fn queue_command(&mut self, command: Command) {
        self.queue.push(Change::Command(command));
    }

    /// Advance the simulation by one tick and publish the resulting snapshot.
    ///
    /// A failure poisons the run: every later call fails until [`Engine::reset`].
    pub fn step(&mut self) -> Result<Arc<Snapshot>> {
        if self.poisoned {
            bail!("engine failed at tick {} and must be reset", self.tick);
        }
        if let Err(err) = self.perform_step() {
            self.poisoned = true;
            return Err(err.context(format!("failed to perform tick {}", self.tick)));
        }
        Ok(Arc::clone(&self.snapshot))
    }

    /// Perform `ticks` steps.
    pub fn run(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Number of completed ticks.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|agt| agt.id == id)
    }

    pub fn communities(&self) -> &[Community] {
        &self.communities
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Snapshot published by the last completed tick.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn summary(&self) -> Summary {
        self.stats.summary(self.rng.seed(), self.tick)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of settings and commands waiting for the next tick.
    pub fn pending_changes(&self) -> usize {
        self.queue.len()
    }

    /// Agents within `radius` of `position` as of the end of the last tick.
    pub fn query_neighbors(
        &self,
        position: Vec2,
        radius: f64,
        inclusion: Inclusion,
    ) -> Vec<AgentId> {
        self.grid
            .neighbors(position, radius, inclusion)
            .into_iter()
            .map(|slot| self.agents[slot].id)
            .collect()
    }

    fn pending_config(&self) -> &Config {
        self.queue
            .iter()
            .rev()
            .find_map(|change| match change {
                Change::Config(cfg) => Some(cfg.as_ref()),
                Change::Command(_) => None,
            })
            .unwrap_or(&self.cfg)
    }

    fn perform_step(&mut self) -> Result<()> {
        self.tick += 1;
        let tick = self.tick;

        // Apply settings and commands queued since the last tick.
        self.apply_pending().context("failed to apply queued changes")?;

        // Send someone travelling every few ticks.
        self.dispatch_traveller();

        // Move everyone using the index built on the current positions.
        let params = MovementParams::from_config(&self.cfg);
        let arena = Arena {
            world: self.cfg.world.bounds(),
            communities: &self.communities,
            communities_enabled: self.cfg.world.communities_enabled,
            agent_radius: self.cfg.movement.agent_radius,
        };
        movement::advance(
            &mut self.agents,
            &self.grid,
            &arena,
            &params,
            &mut self.rng.movement,
        );
        self.settle_arrivals();

        // Rebuild the index on the new positions.
        self.rebuild_index();

        // Resolve transmissions.
        let hit = infection::transmit(
            &self.agents,
            &self.grid,
            &self.disease,
            &mut self.rng.transmission,
        );
        let mut fresh = vec![false; self.agents.len()];
        for &slot in &hit {
            infection::infect(
                &mut self.agents[slot],
                &self.disease,
                &mut self.rng.progression,
                &mut self.rng.participation,
            );
            fresh[slot] = true;
            log::trace!("tick {tick}: {} infected", self.agents[slot].id);
        }

        // Advance infection timers and resolve exits.
        let exits = infection::progress(
            &mut self.agents,
            &fresh,
            &self.disease,
            &mut self.rng.progression,
            &mut self.rng.participation,
        );
        let mut outcome = TickOutcome {
            new_infections: hit.len(),
            ..TickOutcome::default()
        };
        for exit in &exits {
            match exit.outcome {
                HealthState::Deceased => outcome.deaths += 1,
                _ => outcome.recoveries += 1,
            }
            self.stats.record_infection_length(exit.infected_for);
            log::trace!(
                "tick {tick}: {} {} after {} ticks",
                self.agents[exit.slot].id,
                exit.outcome,
                exit.infected_for
            );
        }
        if outcome.deaths > 0 {
            self.rebuild_index();
        }

        // Aggregate statistics.
        let counts = Counts::tally(&self.agents);
        self.stats.record(tick, counts, outcome);

        self.check_invariants(&counts)?;

        self.snapshot = Arc::new(Snapshot::capture(tick, &self.agents, counts));

        Ok(())
    }

    fn apply_pending(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        for change in std::mem::take(&mut self.queue) {
            match change {
                Change::Config(cfg) => self.patch_config(*cfg)?,
                Change::Command(command) => self.execute(command)?,
            }
        }
        self.rebuild_index();
        Ok(())
    }

    fn patch_config(&mut self, cfg: Config) -> Result<()> {
        let disease = DiseaseParams::from_config(&cfg)?;
        if cfg.max_query_radius() != self.cfg.max_query_radius() {
            self.grid = UniformGrid::new(cfg.world.bounds(), cfg.max_query_radius())
                .context("failed to resize spatial index")?;
        }
        let old = std::mem::replace(&mut self.cfg, cfg);
        self.disease = disease;

        for (com, def) in self.communities.iter_mut().zip(&self.cfg.world.communities) {
            com.travel_enabled = def.travel_enabled;
        }

        let toggles = [
            (Toggle::Distancing, old.distancing.enabled, self.cfg.distancing.enabled),
            (Toggle::Travel, old.travel.enabled, self.cfg.travel.enabled),
            (
                Toggle::Communities,
                old.world.communities_enabled,
                self.cfg.world.communities_enabled,
            ),
        ];
        for (toggle, was, enabled) in toggles {
            if was != enabled {
                self.stats
                    .mark(self.tick, EventKind::SettingChanged { toggle, enabled });
            }
        }

        if self.cfg.distancing.percent != old.distancing.percent {
            self.rebalance_distancers();
        }
        if self.cfg.world.communities_enabled && !old.world.communities_enabled {
            self.confine_residents();
        }

        log::debug!("tick {}: applied configuration change", self.tick);
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        log::debug!("tick {}: {command:?}", self.tick);
        match command {
            Command::AddPeople(n_agt) => {
                for _ in 0..n_agt {
                    self.add_person()?;
                }
            }
            Command::RemovePeople(n_agt) => self.remove_people(n_agt),
            Command::InfectRandom => self.infect_random(),
            Command::RandomizeDistancers => self.randomize_distancers(),
        }
        Ok(())
    }

    fn populate(&mut self) -> Result<()> {
        let n_agt = self.cfg.population.size;
        self.agents.reserve(n_agt);
        for _ in 0..n_agt {
            self.add_person()?;
        }

        let n_inf = self.cfg.population.initial_infected;
        let mut slots = index::sample(&mut self.rng.placement, n_agt, n_inf).into_vec();
        slots.sort_unstable();
        for slot in slots {
            infection::infect(
                &mut self.agents[slot],
                &self.disease,
                &mut self.rng.progression,
                &mut self.rng.participation,
            );
        }

        self.rebuild_index();
        Ok(())
    }

    /// Add one susceptible agent to the next community in turn.
    fn add_person(&mut self) -> Result<()> {
        let community = self.next_community % self.communities.len();
        self.next_community += 1;

        let bounds = self.communities[community]
            .bounds
            .inset(self.cfg.movement.agent_radius);
        let position = bounds.sample(&mut self.rng.placement);
        let heading = Vec2::from_angle(self.rng.placement.random_range(0.0..TAU));
        let distancing = Bernoulli::new(self.cfg.distancing.percent / 100.0)
            .context("invalid distancing share")?
            .sample(&mut self.rng.participation);

        let id = AgentId(self.next_id);
        self.next_id += 1;
        self.agents
            .push(Agent::new(id, position, heading, community, distancing));
        self.communities[community].join(id);
        Ok(())
    }

    fn remove_people(&mut self, n_agt: usize) {
        let removable = self.agents.len().saturating_sub(1);
        if n_agt > removable {
            log::warn!("can only remove {removable} of {n_agt} requested agents");
        }
        for _ in 0..n_agt.min(removable) {
            let slot = self.rng.placement.random_range(0..self.agents.len());
            let agt = self.agents.remove(slot);
            self.communities[agt.community].leave(agt.id);
            if let Motion::Travelling { destination } = agt.motion {
                log::debug!("removed {} on its way to community {destination}", agt.id);
            }
        }
    }

    fn infect_random(&mut self) {
        let candidates: Vec<usize> = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, agt)| {
                matches!(
                    agt.state(),
                    HealthState::Susceptible | HealthState::Recovered
                )
            })
            .map(|(slot, _)| slot)
            .collect();
        let Some(&slot) = candidates.choose(&mut self.rng.placement) else {
            log::warn!("nobody left to infect");
            return;
        };
        infection::infect(
            &mut self.agents[slot],
            &self.disease,
            &mut self.rng.progression,
            &mut self.rng.participation,
        );
    }

    fn distancing_target(&self) -> usize {
        (self.cfg.distancing.percent / 100.0 * self.agents.len() as f64).floor() as usize
    }

    fn randomize_distancers(&mut self) {
        let target = self.distancing_target();
        for agt in &mut self.agents {
            agt.distancing = false;
        }
        for slot in index::sample(&mut self.rng.participation, self.agents.len(), target) {
            self.agents[slot].distancing = true;
        }
    }

    /// Flip the fewest participation flags needed to reach the configured share.
    fn rebalance_distancers(&mut self) {
        let target = self.distancing_target();
        let (on, off): (Vec<usize>, Vec<usize>) =
            (0..self.agents.len()).partition(|&slot| self.agents[slot].distancing);
        let (pool, flag, n_flip) = if target > on.len() {
            let n_flip = target - on.len();
            (off, true, n_flip)
        } else {
            let n_flip = on.len() - target;
            (on, false, n_flip)
        };
        if n_flip == 0 {
            return;
        }
        let chosen: Vec<usize> = pool
            .choose_multiple(&mut self.rng.participation, n_flip)
            .copied()
            .collect();
        for slot in chosen {
            self.agents[slot].distancing = flag;
        }
    }

    /// Pull residents back inside their community after communities are re-enabled.
    fn confine_residents(&mut self) {
        let radius = self.cfg.movement.agent_radius;
        for agt in &mut self.agents {
            if agt.is_present() {
                let bounds = self.communities[agt.community].bounds.inset(radius);
                agt.position = bounds.clamp(agt.position);
            }
        }
    }

    fn dispatch_traveller(&mut self) {
        let trv = &self.cfg.travel;
        if !(trv.enabled && self.cfg.world.communities_enabled) || self.tick % trv.interval != 0 {
            return;
        }
        let Some((slot, destination)) =
            movement::pick_traveller(&self.agents, &self.communities, &mut self.rng.travel)
        else {
            return;
        };
        let agt = &mut self.agents[slot];
        agt.motion = Motion::Travelling { destination };
        log::debug!(
            "tick {}: {} leaves {} for {}",
            self.tick,
            agt.id,
            self.communities[agt.community].name,
            self.communities[destination].name
        );
    }

    fn settle_arrivals(&mut self) {
        let arrived = movement::arrivals(
            &self.agents,
            &self.communities,
            self.cfg.travel.arrival_radius,
        );
        for (slot, destination) in arrived {
            let agt = &mut self.agents[slot];
            let origin = agt.community;
            agt.community = destination;
            agt.motion = Motion::Resident;
            let bounds = self.communities[destination]
                .bounds
                .inset(self.cfg.movement.agent_radius);
            agt.position = bounds.clamp(agt.position);
            let id = agt.id;
            self.communities[origin].leave(id);
            self.communities[destination].join(id);
            log::debug!(
                "tick {}: {id} arrived in {}",
                self.tick,
                self.communities[destination].name
            );
        }
    }

    fn rebuild_index(&mut self) {
        let entries: Vec<IndexEntry> = self
            .agents
            .iter()
            .enumerate()
            .map(|(slot, agt)| IndexEntry {
                slot,
                position: agt.position,
                deceased: agt.is_deceased(),
            })
            .collect();
        self.grid.rebuild(&entries);
    }

    /// Rectangle an agent must be inside at the end of a tick.
    fn containing_bounds(&self, agt: &Agent) -> Rect {
        if self.cfg.world.communities_enabled && agt.is_present() {
            self.communities[agt.community].bounds
        } else {
            self.cfg.world.bounds()
        }
    }

    fn check_invariants(&self, counts: &Counts) -> Result<()> {
        let violation = |detail: String| {
            anyhow::Error::new(InvariantViolation {
                tick: self.tick,
                detail,
            })
        };

        if counts.total() != self.agents.len() {
            return Err(violation(format!(
                "counts add up to {} for {} agents",
                counts.total(),
                self.agents.len()
            )));
        }

        let n_members: usize = self.communities.iter().map(|com| com.members.len()).sum();
        if n_members != self.agents.len() {
            return Err(violation(format!(
                "communities list {n_members} members for {} agents",
                self.agents.len()
            )));
        }

        for agt in &self.agents {
            if agt.is_deceased() && agt.velocity != Vec2::ZERO {
                return Err(violation(format!("deceased {} is moving", agt.id)));
            }
            let bounds = self.containing_bounds(agt);
            let slack = Rect::new(
                bounds.x - BOUNDS_TOLERANCE,
                bounds.y - BOUNDS_TOLERANCE,
                bounds.width + 2.0 * BOUNDS_TOLERANCE,
                bounds.height + 2.0 * BOUNDS_TOLERANCE,
            );
            if !slack.contains(agt.position) {
                return Err(violation(format!(
                    "{} at {:?} is outside {bounds:?}",
                    agt.id, agt.position
                )));
            }
        }

        Ok(())
    }
}
