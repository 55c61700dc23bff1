//! Per-tick velocity and position updates.
//!
//! Velocities of all agents are computed from the positions at the start of
//! the tick before any agent is moved, so the outcome does not depend on the
//! order agents are stored in.

use crate::config::Config;
use crate::geometry::{Rect, Vec2};
use crate::model::{Agent, Community, Motion};
use crate::spatial::{Inclusion, NeighborhoodIndex};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha12Rng;

/// Maximum repulsion multiplier, reached when two agents touch.
const PROXIMITY_COEFFICIENT: f64 = 10.0;

/// The rectangles agents are confined to.
pub(crate) struct Arena<'a> {
    pub world: Rect,
    pub communities: &'a [Community],
    pub communities_enabled: bool,
    pub agent_radius: f64,
}

impl Arena<'_> {
    /// Rectangle the agent's position is confined to this tick.
    pub fn active_bounds(&self, agent: &Agent) -> Rect {
        let bounds = if self.communities_enabled && !agent.is_travelling() {
            self.communities[agent.community].bounds
        } else {
            self.world
        };
        bounds.inset(self.agent_radius)
    }
}

/// Movement parameters resolved from the configuration for one tick.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MovementParams {
    pub speed: f64,
    pub tick_duration: f64,
    pub wander_angle: f64,
    pub wall_margin: f64,
    pub distancing_enabled: bool,
    pub distancing_strength: f64,
    pub distancing_radius: f64,
    pub travel_speed: f64,
}

impl MovementParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            speed: cfg.movement.speed,
            tick_duration: cfg.movement.tick_duration,
            wander_angle: cfg.movement.wander_angle.to_radians(),
            wall_margin: cfg.movement.wall_margin,
            distancing_enabled: cfg.distancing.enabled,
            distancing_strength: cfg.distancing.strength,
            distancing_radius: cfg.distancing.radius,
            travel_speed: cfg.movement.speed * cfg.travel.speed_multiplier,
        }
    }

    fn repulsion_applies(&self, agent: &Agent) -> bool {
        self.distancing_enabled && agent.distancing && self.distancing_strength > 0.0
    }
}

/// Move every living agent by one tick.
///
/// `index` must reflect the positions the agents have on entry.
pub(crate) fn advance(
    agents: &mut [Agent],
    index: &dyn NeighborhoodIndex,
    arena: &Arena,
    params: &MovementParams,
    rng: &mut ChaCha12Rng,
) {
    let view: &[Agent] = agents;
    let plans: Vec<Option<(Vec2, Vec2)>> = view
        .iter()
        .map(|agt| {
            if agt.is_deceased() {
                return None;
            }
            Some(match agt.motion {
                Motion::Resident => plan_resident(agt, view, index, arena, params, rng),
                Motion::Travelling { destination } => {
                    plan_traveller(agt, arena.communities[destination].bounds.center(), params)
                }
            })
        })
        .collect();

    for (agt, plan) in agents.iter_mut().zip(plans) {
        let Some((velocity, heading)) = plan else {
            agt.velocity = Vec2::ZERO;
            continue;
        };
        agt.velocity = velocity;
        agt.heading = heading;
        integrate(agt, arena.active_bounds(agt), params.tick_duration);
    }
}

fn plan_resident(
    agt: &Agent,
    agents: &[Agent],
    index: &dyn NeighborhoodIndex,
    arena: &Arena,
    params: &MovementParams,
    rng: &mut ChaCha12Rng,
) -> (Vec2, Vec2) {
    let mut heading = agt.heading;
    if rng.random_bool(0.5) && params.wander_angle > 0.0 {
        heading = heading.rotate(rng.random_range(-params.wander_angle..=params.wander_angle));
    }
    let mut desired = heading * params.speed;

    if params.repulsion_applies(agt) {
        let mut near = Vec::new();
        index.visit_within(
            agt.position,
            params.distancing_radius,
            Inclusion::Living,
            &mut |slot, _| {
                let other = &agents[slot];
                if other.id != agt.id && other.is_present() {
                    near.push(other.position);
                }
            },
        );
        let push = repulsion(agt.position, &near, params.distancing_radius);
        desired += push * (params.distancing_strength * params.speed);
    }

    let bounds = arena.active_bounds(agt);
    desired += wall_push(agt.position, bounds, params.wall_margin) * params.speed;

    let velocity = desired.clamp_length(params.speed);
    let dir = velocity.normalize_or_zero();
    (velocity, if dir == Vec2::ZERO { heading } else { dir })
}

fn plan_traveller(agt: &Agent, target: Vec2, params: &MovementParams) -> (Vec2, Vec2) {
    let to_target = target - agt.position;
    let dir = to_target.normalize_or_zero();
    if dir == Vec2::ZERO {
        return (Vec2::ZERO, agt.heading);
    }
    // Do not overshoot the destination centre.
    let reach = to_target.length() / params.tick_duration;
    (dir * params.travel_speed.min(reach), dir)
}

/// Averaged, normalised push away from `near`, weighted towards closer agents.
pub(crate) fn repulsion(position: Vec2, near: &[Vec2], radius: f64) -> Vec2 {
    let mut sum = Vec2::ZERO;
    let mut n_near = 0;
    for &other in near {
        let diff = position - other;
        let dist = diff.length();
        if dist == 0.0 {
            continue;
        }
        let falloff = (1.0 - dist / radius).max(0.0);
        sum += diff * (PROXIMITY_COEFFICIENT * falloff * falloff);
        n_near += 1;
    }
    if n_near == 0 {
        return Vec2::ZERO;
    }
    (sum / n_near as f64).normalize_or_zero()
}

/// Inward push growing linearly from 0 at `margin` to 1 at the wall, per axis.
pub(crate) fn wall_push(position: Vec2, bounds: Rect, margin: f64) -> Vec2 {
    if margin <= 0.0 {
        return Vec2::ZERO;
    }
    let strength = |dist: f64| (1.0 - dist / margin).clamp(0.0, 1.0);
    Vec2::new(
        strength(position.x - bounds.left()) - strength(bounds.right() - position.x),
        strength(position.y - bounds.top()) - strength(bounds.bottom() - position.y),
    )
}

/// Advance the position and keep it inside `bounds`, bouncing off walls.
fn integrate(agt: &mut Agent, bounds: Rect, dt: f64) {
    let moved = agt.position + agt.velocity * dt;
    let clamped = bounds.clamp(moved);
    if clamped.x != moved.x {
        agt.velocity.x = -agt.velocity.x;
        agt.heading.x = -agt.heading.x;
    }
    if clamped.y != moved.y {
        agt.velocity.y = -agt.velocity.y;
        agt.heading.y = -agt.heading.y;
    }
    agt.position = clamped;
}

/// Pick one agent to send to another community, with its destination.
///
/// Eligible agents are alive, resident, and belong to a community that allows
/// travel. Returns `None` when nobody is eligible or there is nowhere to go.
pub(crate) fn pick_traveller(
    agents: &[Agent],
    communities: &[Community],
    rng: &mut ChaCha12Rng,
) -> Option<(usize, usize)> {
    if communities.len() < 2 {
        return None;
    }
    let eligible: Vec<usize> = agents
        .iter()
        .enumerate()
        .filter(|(_, agt)| {
            !agt.is_deceased()
                && !agt.is_travelling()
                && communities[agt.community].travel_enabled
        })
        .map(|(i_agt, _)| i_agt)
        .collect();
    let &i_agt = eligible.choose(rng)?;

    let origin = agents[i_agt].community;
    let others: Vec<usize> = (0..communities.len()).filter(|&c| c != origin).collect();
    let &destination = others.choose(rng)?;
    Some((i_agt, destination))
}

/// Travellers that reached their destination this tick, as `(slot, destination)`.
pub(crate) fn arrivals(
    agents: &[Agent],
    communities: &[Community],
    arrival_radius: f64,
) -> Vec<(usize, usize)> {
    agents
        .iter()
        .enumerate()
        .filter_map(|(i_agt, agt)| match agt.motion {
            Motion::Travelling { destination }
                if !agt.is_deceased()
                    && agt
                        .position
                        .distance(communities[destination].bounds.center())
                        <= arrival_radius =>
            {
                Some((i_agt, destination))
            }
            _ => None,
        })
        .collect()
}
