use crate::geometry::Vec2;
use crate::model::{Agent, AgentId, Health, HealthState};
use crate::stats::Counts;
use serde::{Deserialize, Serialize};

/// Read-only view of one agent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub id: AgentId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: Health,
    pub community: usize,
    pub travelling: bool,
    pub distancing: bool,
}

impl AgentView {
    pub fn state(&self) -> HealthState {
        self.health.state()
    }
}

/// Immutable picture of the population at the end of a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub agents: Vec<AgentView>,
    pub counts: Counts,
}

impl Snapshot {
    pub(crate) fn capture(tick: u64, agents: &[Agent], counts: Counts) -> Self {
        let agents = agents
            .iter()
            .map(|agt| AgentView {
                id: agt.id(),
                position: agt.position(),
                velocity: agt.velocity(),
                health: agt.health(),
                community: agt.community(),
                travelling: agt.is_travelling(),
                distancing: agt.is_distancing(),
            })
            .collect();
        Self {
            tick,
            agents,
            counts,
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentView> {
        self.agents.iter().find(|view| view.id == id)
    }
}
