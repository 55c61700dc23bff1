use crate::geometry::{Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of an agent. Never reused within an engine's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Compartment an agent is in, without the timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    Susceptible,
    Infected,
    Recovered,
    Deceased,
}

impl HealthState {
    pub const ALL: [HealthState; 4] = [
        HealthState::Susceptible,
        HealthState::Infected,
        HealthState::Recovered,
        HealthState::Deceased,
    ];
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Susceptible => "susceptible",
            HealthState::Infected => "infected",
            HealthState::Recovered => "recovered",
            HealthState::Deceased => "deceased",
        };
        f.write_str(name)
    }
}

/// Health of an agent, carrying the infection timers while infected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Susceptible,
    Infected {
        /// Ticks spent infected, not counting the tick of infection.
        timer: u32,
        /// Infection length sampled at the moment of infection.
        duration: u32,
    },
    Recovered,
    Deceased,
}

impl Health {
    pub fn state(&self) -> HealthState {
        match self {
            Health::Susceptible => HealthState::Susceptible,
            Health::Infected { .. } => HealthState::Infected,
            Health::Recovered => HealthState::Recovered,
            Health::Deceased => HealthState::Deceased,
        }
    }
}

/// Whether an agent lives in its community or is on its way to another one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    Resident,
    Travelling { destination: usize },
}

/// A simulated person.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub(crate) id: AgentId,
    pub(crate) position: Vec2,
    pub(crate) velocity: Vec2,
    pub(crate) heading: Vec2,
    pub(crate) health: Health,
    pub(crate) community: usize,
    pub(crate) motion: Motion,
    pub(crate) distancing: bool,
}

impl Agent {
    pub(crate) fn new(
        id: AgentId,
        position: Vec2,
        heading: Vec2,
        community: usize,
        distancing: bool,
    ) -> Self {
        Self {
            id,
            position,
            velocity: Vec2::ZERO,
            heading,
            health: Health::Susceptible,
            community,
            motion: Motion::Resident,
            distancing,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn state(&self) -> HealthState {
        self.health.state()
    }

    /// Index of the community the agent belongs to (its origin while travelling).
    pub fn community(&self) -> usize {
        self.community
    }

    pub fn motion(&self) -> Motion {
        self.motion
    }

    pub fn is_travelling(&self) -> bool {
        matches!(self.motion, Motion::Travelling { .. })
    }

    pub fn is_distancing(&self) -> bool {
        self.distancing
    }

    pub fn is_deceased(&self) -> bool {
        self.health == Health::Deceased
    }

    /// Agents that take part in contacts: alive and not in transit.
    pub(crate) fn is_present(&self) -> bool {
        !self.is_deceased() && !self.is_travelling()
    }
}

/// A bounded sub-region of the world with its own members.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Community {
    pub(crate) name: String,
    pub(crate) bounds: Rect,
    pub(crate) members: Vec<AgentId>,
    pub(crate) travel_enabled: bool,
}

impl Community {
    pub(crate) fn new(name: String, bounds: Rect, travel_enabled: bool) -> Self {
        Self {
            name,
            bounds,
            members: Vec::new(),
            travel_enabled,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Members in the order they joined.
    pub fn members(&self) -> &[AgentId] {
        &self.members
    }

    pub fn travel_enabled(&self) -> bool {
        self.travel_enabled
    }

    pub(crate) fn join(&mut self, id: AgentId) {
        self.members.push(id);
    }

    pub(crate) fn leave(&mut self, id: AgentId) {
        self.members.retain(|&member| member != id);
    }
}
