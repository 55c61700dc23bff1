use crate::error::ConfigError;
use crate::geometry::Rect;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use. Every section falls back
/// to its defaults when omitted. See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Seed for every random stream. Drawn from the OS when absent.
    pub seed: Option<u64>,

    pub world: WorldConfig,
    pub population: PopulationConfig,
    pub disease: DiseaseConfig,
    pub movement: MovementConfig,
    pub distancing: DistancingConfig,
    pub travel: TravelConfig,
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Width of the world rectangle, whose top-left corner is the origin.
    pub width: f64,
    /// Height of the world rectangle.
    pub height: f64,
    /// When disabled every agent roams the whole world and travel is inert.
    pub communities_enabled: bool,
    /// Community rectangles; must be non-empty, disjoint and inside the world.
    pub communities: Vec<CommunityConfig>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let (width, height) = (1000.0, 1000.0);
        Self {
            width,
            height,
            communities_enabled: true,
            communities: grid_communities(Rect::new(0.0, 0.0, width, height), 2, 2, 10.0),
        }
    }
}

impl WorldConfig {
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "enabled")]
    pub travel_enabled: bool,
}

impl CommunityConfig {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

fn enabled() -> bool {
    true
}

/// Split `area` into a `rows x cols` grid of communities, each shrunk by `padding`.
pub fn grid_communities(
    area: Rect,
    rows: usize,
    cols: usize,
    padding: f64,
) -> Vec<CommunityConfig> {
    let cell_w = area.width / cols as f64;
    let cell_h = area.height / rows as f64;
    let mut communities = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let cell = Rect::new(
                area.x + col as f64 * cell_w,
                area.y + row as f64 * cell_h,
                cell_w,
                cell_h,
            )
            .inset(padding);
            communities.push(CommunityConfig {
                name: format!("r{row}c{col}"),
                x: cell.x,
                y: cell.y,
                width: cell.width,
                height: cell.height,
                travel_enabled: true,
            });
        }
    }
    communities
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Number of agents created at reset.
    pub size: usize,
    /// Number of those agents that start out infected.
    pub initial_infected: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: 200,
            initial_infected: 1,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiseaseConfig {
    /// Maximum distance over which an infected agent can transmit.
    pub infection_radius: f64,
    /// Per contact, per tick chance that a susceptible neighbour is infected.
    pub transmission_probability: f64,
    /// Same as `transmission_probability` for recovered neighbours. Zero means SIR.
    pub reinfection_probability: f64,
    /// Mean infection length in ticks.
    pub recovery_duration_mean: f64,
    /// Standard deviation of the infection length in ticks.
    pub recovery_duration_spread: f64,
    /// Chance that a resolving infection ends in death.
    pub mortality_rate: f64,
    /// Per tick chance that an infection resolves before its sampled length.
    pub early_recovery_probability: f64,
    /// Re-roll distancing participation on infection with this chance.
    pub infected_distancing_probability: Option<f64>,
    /// Re-roll distancing participation on recovery with this chance.
    pub recovered_distancing_probability: Option<f64>,
}

impl Default for DiseaseConfig {
    fn default() -> Self {
        Self {
            infection_radius: 50.0,
            transmission_probability: 0.05,
            reinfection_probability: 0.0,
            recovery_duration_mean: 600.0,
            recovery_duration_spread: 120.0,
            mortality_rate: 0.1,
            early_recovery_probability: 0.0,
            infected_distancing_probability: None,
            recovered_distancing_probability: None,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Maximum speed of a resident agent, in world units per second.
    pub speed: f64,
    /// Simulated seconds per tick.
    pub tick_duration: f64,
    /// Largest heading change per tick, in degrees.
    pub wander_angle: f64,
    /// Distance from a wall at which agents start turning away from it.
    pub wall_margin: f64,
    /// Agents keep this distance from the edges of their bounds.
    pub agent_radius: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 120.0,
            tick_duration: 1.0 / 60.0,
            wander_angle: 10.0,
            wall_margin: 10.0,
            agent_radius: 5.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistancingConfig {
    pub enabled: bool,
    /// Weight of the repulsion relative to the wander heading.
    pub strength: f64,
    /// Share of the population, in percent, that takes part.
    pub percent: f64,
    /// Personal space radius.
    pub radius: f64,
}

impl Default for DistancingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 1.0,
            percent: 100.0,
            radius: 125.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelConfig {
    pub enabled: bool,
    /// Ticks between two departures.
    pub interval: u64,
    /// Travellers move this many times faster than residents.
    pub speed_multiplier: f64,
    /// Distance from the destination centre at which a traveller arrives.
    pub arrival_radius: f64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 120,
            speed_multiplier: 3.0,
            arrival_radius: 15.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Number of ticks kept in the statistics history.
    pub history_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { history_len: 4096 }
    }
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or a
    /// [`ConfigError`] if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Check every parameter, reporting the first problem as a [`ConfigError`].
    pub fn validate(&self) -> Result<()> {
        self.check()
            .map_err(|err| anyhow::Error::new(ConfigError(format!("{err:#}"))))
    }

    /// Largest radius the spatial index is ever queried with.
    pub fn max_query_radius(&self) -> f64 {
        self.disease.infection_radius.max(self.distancing.radius)
    }

    fn check(&self) -> Result<()> {
        self.check_world().context("invalid world")?;

        let pop = &self.population;
        check_num(pop.size, 1..=1_000_000).context("invalid population size")?;
        check_num(pop.initial_infected, 0..=pop.size)
            .context("invalid initial number of infected agents")?;

        let dis = &self.disease;
        check_pos(dis.infection_radius).context("invalid infection radius")?;
        check_prob(dis.transmission_probability).context("invalid transmission probability")?;
        check_prob(dis.reinfection_probability).context("invalid reinfection probability")?;
        check_num(dis.recovery_duration_mean, 0.0..=1e9).context("invalid recovery duration")?;
        check_num(dis.recovery_duration_spread, 0.0..=1e9)
            .context("invalid recovery duration spread")?;
        check_prob(dis.mortality_rate).context("invalid mortality rate")?;
        check_prob(dis.early_recovery_probability)
            .context("invalid early recovery probability")?;
        if let Some(prob) = dis.infected_distancing_probability {
            check_prob(prob).context("invalid infected distancing probability")?;
        }
        if let Some(prob) = dis.recovered_distancing_probability {
            check_prob(prob).context("invalid recovered distancing probability")?;
        }

        let mov = &self.movement;
        check_num(mov.speed, 0.0..=1e6).context("invalid speed")?;
        check_pos(mov.tick_duration).context("invalid tick duration")?;
        check_num(mov.wander_angle, 0.0..=180.0).context("invalid wander angle")?;
        check_num(mov.wall_margin, 0.0..=1e6).context("invalid wall margin")?;
        check_num(mov.agent_radius, 0.0..=1e6).context("invalid agent radius")?;

        let dst = &self.distancing;
        check_num(dst.strength, 0.0..=100.0).context("invalid distancing strength")?;
        check_num(dst.percent, 0.0..=100.0).context("invalid distancing percent")?;
        check_pos(dst.radius).context("invalid distancing radius")?;

        let trv = &self.travel;
        check_num(trv.interval, 1..).context("invalid travel interval")?;
        check_pos(trv.speed_multiplier).context("invalid travel speed multiplier")?;
        check_pos(trv.arrival_radius).context("invalid arrival radius")?;

        check_num(self.output.history_len, 1..=10_000_000).context("invalid history length")?;

        Ok(())
    }

    fn check_world(&self) -> Result<()> {
        let world = &self.world;
        check_pos(world.width).context("invalid width")?;
        check_pos(world.height).context("invalid height")?;

        if world.communities.is_empty() {
            bail!("community set must not be empty");
        }

        let bounds = world.bounds();
        let min_extent = 2.0 * self.movement.agent_radius;
        let mut names = HashSet::new();
        for (i_com, com) in world.communities.iter().enumerate() {
            if !names.insert(com.name.as_str()) {
                bail!("community name {:?} is used twice", com.name);
            }
            let rect = com.bounds();
            if !(rect.width > min_extent && rect.height > min_extent) {
                bail!(
                    "community {:?} must be larger than {min_extent} in both directions",
                    com.name
                );
            }
            if !bounds.contains_rect(&rect) {
                bail!("community {:?} must lie inside the world", com.name);
            }
            for other in &world.communities[..i_com] {
                if rect.overlaps(&other.bounds()) {
                    bail!("communities {:?} and {:?} overlap", other.name, com.name);
                }
            }
        }

        Ok(())
    }
}

pub(crate) fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

pub(crate) fn check_prob(prob: f64) -> Result<()> {
    check_num(prob, 0.0..=1.0)
}

fn check_pos(num: f64) -> Result<()> {
    if !(num > 0.0 && num.is_finite()) {
        bail!("number must be positive and finite, but is {num:?}");
    }
    Ok(())
}
