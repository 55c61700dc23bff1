use contagion::config::CommunityConfig;
use contagion::control::is_structural;
use contagion::geometry::Vec2;
use contagion::stats::{EventKind, Toggle};
use contagion::{
    AgentId, Applied, Command, Config, ConfigError, Engine, Health, HealthState, Inclusion,
    Setting, Snapshot,
};
use std::collections::HashMap;

fn community(name: &str, x: f64, y: f64, width: f64, height: f64) -> CommunityConfig {
    CommunityConfig {
        name: name.to_string(),
        x,
        y,
        width,
        height,
        travel_enabled: true,
    }
}

/// One 200 x 200 community filling the world, no travel.
fn single_community(size: usize, infected: usize) -> Config {
    let mut cfg = Config::default();
    cfg.seed = Some(42);
    cfg.world.width = 200.0;
    cfg.world.height = 200.0;
    cfg.world.communities = vec![community("only", 0.0, 0.0, 200.0, 200.0)];
    cfg.population.size = size;
    cfg.population.initial_infected = infected;
    cfg.travel.enabled = false;
    cfg
}

/// Default four-community world with an outbreak that runs its course quickly.
fn outbreak() -> Config {
    let mut cfg = Config::default();
    cfg.seed = Some(1);
    cfg.population.size = 300;
    cfg.population.initial_infected = 5;
    cfg.disease.transmission_probability = 0.2;
    cfg.disease.recovery_duration_mean = 60.0;
    cfg.disease.recovery_duration_spread = 10.0;
    cfg.disease.mortality_rate = 0.3;
    cfg.distancing.enabled = true;
    cfg.distancing.percent = 50.0;
    cfg.travel.interval = 5;
    cfg
}

fn steps(engine: &mut Engine, ticks: u64) -> Vec<Snapshot> {
    (0..ticks)
        .map(|_| engine.step().unwrap().as_ref().clone())
        .collect()
}

#[test]
fn counts_are_conserved_every_tick() {
    let mut engine = Engine::new(outbreak()).unwrap();
    for snapshot in steps(&mut engine, 400) {
        assert_eq!(snapshot.counts.total(), 300);
        assert_eq!(snapshot.agents.len(), 300);
        for state in HealthState::ALL {
            let n = snapshot.agents.iter().filter(|a| a.state() == state).count();
            assert_eq!(n, snapshot.counts.get(state));
        }
    }
    let counts = engine.statistics().counts();
    assert!(counts.recovered + counts.deceased > 5, "{counts:?}");
}

#[test]
fn terminal_states_never_change() {
    let mut engine = Engine::new(outbreak()).unwrap();
    let mut settled: HashMap<AgentId, (HealthState, Vec2)> = HashMap::new();
    for snapshot in steps(&mut engine, 400) {
        for agt in &snapshot.agents {
            if let Some(&(state, position)) = settled.get(&agt.id) {
                assert_eq!(agt.state(), state, "{} left a terminal state", agt.id);
                if state == HealthState::Deceased {
                    assert_eq!(agt.position, position);
                    assert_eq!(agt.velocity, Vec2::ZERO);
                }
            } else if matches!(agt.state(), HealthState::Recovered | HealthState::Deceased) {
                settled.insert(agt.id, (agt.state(), agt.position));
            }
        }
    }
    assert!(!settled.is_empty());
}

#[test]
fn the_dead_are_not_travelling() {
    let mut cfg = Config::default();
    cfg.seed = Some(4);
    cfg.population.size = 40;
    cfg.population.initial_infected = 40;
    cfg.disease.mortality_rate = 1.0;
    cfg.disease.recovery_duration_mean = 20.0;
    cfg.disease.recovery_duration_spread = 0.0;
    cfg.travel.interval = 1;

    let mut engine = Engine::new(cfg).unwrap();
    let mut saw_traveller = false;
    for snapshot in steps(&mut engine, 200) {
        let travelling = snapshot.agents.iter().filter(|a| a.travelling).count();
        saw_traveller |= travelling > 0;
        assert_eq!(snapshot.counts.travelling, travelling);
        for agt in &snapshot.agents {
            if agt.state() == HealthState::Deceased {
                assert!(!agt.travelling, "{} is travelling after death", agt.id);
            }
        }
    }
    assert!(saw_traveller);
    let counts = engine.statistics().counts();
    assert_eq!(counts.deceased, 40);
    assert_eq!(counts.travelling, 0);
}

#[test]
fn infected_agents_never_reset_themselves() {
    let mut engine = Engine::new(outbreak()).unwrap();
    let mut timers: HashMap<AgentId, u32> = HashMap::new();
    for snapshot in steps(&mut engine, 300) {
        let mut next = HashMap::new();
        for agt in &snapshot.agents {
            if let Health::Infected { timer, .. } = agt.health {
                if let Some(&prev) = timers.get(&agt.id) {
                    assert_eq!(timer, prev + 1, "{} restarted its infection", agt.id);
                }
                next.insert(agt.id, timer);
            }
        }
        timers = next;
    }
}

#[test]
fn same_seed_same_run() {
    let mut a = Engine::new(outbreak()).unwrap();
    let mut b = Engine::new(outbreak()).unwrap();
    assert_eq!(*a.snapshot(), *b.snapshot());
    for tick in 0..300 {
        assert_eq!(*a.step().unwrap(), *b.step().unwrap(), "diverged at tick {tick}");
    }
    assert_eq!(a.statistics().events(), b.statistics().events());
}

#[test]
fn different_seeds_differ() {
    let mut cfg = outbreak();
    let a = Engine::new(cfg.clone()).unwrap();
    cfg.seed = Some(2);
    let b = Engine::new(cfg).unwrap();
    assert_ne!(*a.snapshot(), *b.snapshot());
}

#[test]
fn no_transmission_beyond_radius() {
    let mut cfg = Config::default();
    cfg.seed = Some(3);
    cfg.world.width = 600.0;
    cfg.world.height = 100.0;
    cfg.world.communities = vec![
        community("west", 0.0, 0.0, 100.0, 100.0),
        community("east", 500.0, 0.0, 100.0, 100.0),
    ];
    cfg.population.size = 2;
    cfg.population.initial_infected = 1;
    cfg.disease.infection_radius = 10.0;
    cfg.disease.transmission_probability = 1.0;
    cfg.disease.recovery_duration_mean = 10_000.0;
    cfg.disease.recovery_duration_spread = 0.0;
    cfg.travel.enabled = false;

    let mut engine = Engine::new(cfg).unwrap();
    for snapshot in steps(&mut engine, 300) {
        assert_eq!(snapshot.counts.infected, 1);
        assert_eq!(snapshot.counts.susceptible, 1);
        let [a, b] = [snapshot.agents[0], snapshot.agents[1]];
        assert!(a.position.distance(b.position) > 10.0);
    }
}

#[test]
fn positions_stay_in_bounds() {
    let mut cfg = outbreak();
    cfg.travel.interval = 2;
    cfg.movement.speed = 400.0;
    let mut engine = Engine::new(cfg).unwrap();
    let world = engine.config().world.bounds();
    let mut saw_traveller = false;
    for _ in 0..800 {
        let snapshot = engine.step().unwrap();
        for agt in &snapshot.agents {
            if agt.travelling {
                saw_traveller = true;
                assert!(world.contains(agt.position));
            } else if agt.state() != HealthState::Deceased {
                let bounds = engine.communities()[agt.community].bounds();
                assert!(bounds.contains(agt.position), "{} at {:?}", agt.id, agt.position);
            }
        }
    }
    assert!(saw_traveller);
}

#[test]
fn everyone_in_reach_is_infected_after_one_tick() {
    let mut cfg = single_community(100, 1);
    cfg.disease.transmission_probability = 1.0;
    cfg.disease.infection_radius = 1000.0;
    cfg.disease.mortality_rate = 0.0;
    cfg.disease.recovery_duration_mean = 100.0;
    cfg.disease.recovery_duration_spread = 0.0;

    let mut engine = Engine::new(cfg).unwrap();
    assert_eq!(engine.snapshot().counts.infected, 1);
    let snapshot = engine.step().unwrap();
    assert_eq!(snapshot.tick, 1);
    assert_eq!(snapshot.counts.infected, 100);
    assert_eq!(snapshot.counts.susceptible, 0);
    assert_eq!(engine.statistics().first_infection_tick(), Some(1));
}

#[test]
fn certain_death_after_fixed_duration() {
    let mut cfg = single_community(50, 1);
    cfg.disease.transmission_probability = 0.0;
    cfg.disease.mortality_rate = 1.0;
    cfg.disease.recovery_duration_mean = 5.0;
    cfg.disease.recovery_duration_spread = 0.0;

    let mut engine = Engine::new(cfg).unwrap();
    for snapshot in steps(&mut engine, 10) {
        assert_eq!(snapshot.counts.recovered, 0);
        if snapshot.tick < 5 {
            assert_eq!(snapshot.counts.infected, 1);
            assert_eq!(snapshot.counts.deceased, 0);
        } else {
            assert_eq!(snapshot.counts.infected, 0);
            assert_eq!(snapshot.counts.deceased, 1);
        }
    }
    assert_eq!(engine.statistics().first_death_tick(), Some(5));
    let summary = engine.summary();
    assert_eq!(summary.deaths, 1);
    assert_eq!(summary.infection_length.count, 1);
    assert_eq!(summary.infection_length.mean, 5.0);
}

#[test]
fn zero_strength_distancing_has_no_effect() {
    let mut with = outbreak();
    with.distancing.enabled = true;
    with.distancing.strength = 0.0;
    with.distancing.percent = 100.0;
    let mut without = with.clone();
    without.distancing.enabled = false;

    let mut a = Engine::new(with).unwrap();
    let mut b = Engine::new(without).unwrap();
    for _ in 0..200 {
        let (sa, sb) = (a.step().unwrap(), b.step().unwrap());
        for (va, vb) in sa.agents.iter().zip(&sb.agents) {
            assert_eq!(va.position, vb.position);
            assert_eq!(va.velocity, vb.velocity);
        }
    }
}

#[test]
fn distancing_changes_trajectories() {
    let mut with = outbreak();
    with.distancing.enabled = true;
    with.distancing.strength = 1.0;
    with.distancing.percent = 100.0;
    let mut without = with.clone();
    without.distancing.enabled = false;

    let mut a = Engine::new(with).unwrap();
    let mut b = Engine::new(without).unwrap();
    a.run(20).unwrap();
    b.run(20).unwrap();
    assert_ne!(a.snapshot().agents, b.snapshot().agents);
}

#[test]
fn no_travel_when_disabled() {
    let mut cfg = Config::default();
    cfg.seed = Some(5);
    cfg.world.communities = vec![
        community("left", 10.0, 10.0, 480.0, 980.0),
        community("right", 510.0, 10.0, 480.0, 980.0),
    ];
    cfg.population.size = 100;
    cfg.travel.enabled = false;
    cfg.travel.interval = 1;

    let mut engine = Engine::new(cfg).unwrap();
    let homes: Vec<_> = engine.agents().iter().map(|a| a.community()).collect();
    for snapshot in steps(&mut engine, 500) {
        assert_eq!(snapshot.counts.travelling, 0);
        let now: Vec<_> = snapshot.agents.iter().map(|a| a.community).collect();
        assert_eq!(now, homes);
    }
}

#[test]
fn no_travel_from_closed_communities() {
    let mut cfg = Config::default();
    cfg.seed = Some(5);
    cfg.travel.interval = 1;
    for com in &mut cfg.world.communities {
        com.travel_enabled = false;
    }
    let mut engine = Engine::new(cfg).unwrap();
    engine.run(300).unwrap();
    assert_eq!(engine.statistics().counts().travelling, 0);
    assert!(engine.agents().iter().all(|a| !a.is_travelling()));
}

#[test]
fn travellers_arrive_and_switch_community() {
    let mut cfg = Config::default();
    cfg.seed = Some(8);
    cfg.population.size = 40;
    cfg.population.initial_infected = 0;
    cfg.travel.interval = 1;

    let mut engine = Engine::new(cfg).unwrap();
    let homes: HashMap<_, _> = engine
        .agents()
        .iter()
        .map(|a| (a.id(), a.community()))
        .collect();
    engine.run(400).unwrap();

    let moved = engine
        .agents()
        .iter()
        .filter(|a| !a.is_travelling() && homes[&a.id()] != a.community())
        .count();
    assert!(moved > 0);
    for (i_com, com) in engine.communities().iter().enumerate() {
        for id in com.members() {
            assert_eq!(engine.agent(*id).map(|a| a.community()), Some(i_com));
        }
    }
}

#[test]
fn neighbour_queries_skip_the_dead_unless_asked() {
    let mut cfg = single_community(30, 30);
    cfg.disease.transmission_probability = 0.0;
    cfg.disease.mortality_rate = 1.0;
    cfg.disease.recovery_duration_mean = 1.0;
    cfg.disease.recovery_duration_spread = 0.0;

    let mut engine = Engine::new(cfg).unwrap();
    let center = Vec2::new(100.0, 100.0);
    assert_eq!(engine.query_neighbors(center, 500.0, Inclusion::Living).len(), 30);
    engine.step().unwrap();
    assert_eq!(engine.statistics().counts().deceased, 30);
    assert!(engine.query_neighbors(center, 500.0, Inclusion::Living).is_empty());
    assert_eq!(engine.query_neighbors(center, 500.0, Inclusion::All).len(), 30);
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut cfg = Config::default();
    cfg.population.size = 0;
    cfg.population.initial_infected = 0;
    let err = Engine::new(cfg).err().unwrap();
    assert!(err.downcast_ref::<ConfigError>().is_some());

    let mut cfg = Config::default();
    cfg.world.communities.clear();
    let err = Engine::new(cfg).err().unwrap();
    assert!(err.downcast_ref::<ConfigError>().is_some());
}

#[test]
fn failed_reset_keeps_the_run() {
    let mut engine = Engine::new(outbreak()).unwrap();
    engine.run(10).unwrap();
    let mut bad = outbreak();
    bad.disease.transmission_probability = 2.0;
    let err = engine.reset(bad).unwrap_err();
    assert!(err.downcast_ref::<ConfigError>().is_some());
    assert_eq!(engine.tick(), 10);
    engine.step().unwrap();
}

#[test]
fn reset_starts_over() {
    let mut engine = Engine::new(outbreak()).unwrap();
    let initial = engine.snapshot();
    engine.run(50).unwrap();
    engine.reset(outbreak()).unwrap();
    assert_eq!(engine.tick(), 0);
    assert_eq!(*engine.snapshot(), *initial);
}

#[test]
fn structural_changes_reset_and_others_are_queued() {
    let mut engine = Engine::new(outbreak()).unwrap();
    engine.run(20).unwrap();

    let mut hot = engine.config().clone();
    hot.movement.speed = 0.0;
    assert!(!is_structural(engine.config(), &hot));
    assert_eq!(engine.apply_config(hot).unwrap(), Applied::Queued);
    assert_eq!(engine.pending_changes(), 1);
    assert_eq!(engine.config().movement.speed, 120.0);

    let before = engine.snapshot();
    let after = engine.step().unwrap();
    assert_eq!(engine.tick(), 21);
    assert_eq!(engine.config().movement.speed, 0.0);
    for (a, b) in before.agents.iter().zip(&after.agents) {
        if !a.travelling && !b.travelling {
            assert_eq!(b.velocity, Vec2::ZERO);
            assert_eq!(a.position, b.position);
        }
    }

    let mut structural = engine.config().clone();
    structural.population.size = 120;
    assert_eq!(engine.apply_config(structural).unwrap(), Applied::Reset);
    assert_eq!(engine.tick(), 0);
    assert_eq!(engine.agents().len(), 120);
    assert_eq!(engine.pending_changes(), 0);
}

#[test]
fn invalid_settings_are_not_queued() {
    let mut engine = Engine::new(outbreak()).unwrap();
    let err = engine
        .queue_setting(Setting::TransmissionProbability(-0.5))
        .unwrap_err();
    assert!(err.downcast_ref::<ConfigError>().is_some());
    let err = engine.queue_setting(Setting::Speed(-1.0)).unwrap_err();
    assert!(err.downcast_ref::<ConfigError>().is_some());
    assert_eq!(engine.pending_changes(), 0);
}

#[test]
fn distancing_percent_rebalances_participants() {
    let mut cfg = single_community(100, 0);
    cfg.distancing.percent = 100.0;
    let mut engine = Engine::new(cfg).unwrap();
    assert_eq!(engine.snapshot().counts.distancing, 100);

    engine.queue_setting(Setting::DistancingPercent(30.0)).unwrap();
    assert_eq!(engine.step().unwrap().counts.distancing, 30);

    engine.queue_setting(Setting::DistancingPercent(45.5)).unwrap();
    assert_eq!(engine.step().unwrap().counts.distancing, 45);
}

#[test]
fn participation_is_stable_between_ticks() {
    let mut engine = Engine::new(outbreak()).unwrap();
    let flags: Vec<_> = engine.agents().iter().map(|a| a.is_distancing()).collect();
    engine.run(100).unwrap();
    let now: Vec<_> = engine.agents().iter().map(|a| a.is_distancing()).collect();
    assert_eq!(flags, now);
}

#[test]
fn commands_change_the_population() {
    let mut cfg = single_community(100, 0);
    cfg.disease.transmission_probability = 0.0;
    cfg.distancing.percent = 50.0;
    let mut engine = Engine::new(cfg).unwrap();

    engine.queue_command(Command::AddPeople(10));
    let snapshot = engine.step().unwrap();
    assert_eq!(snapshot.counts.total(), 110);
    let max_id = snapshot.agents.iter().map(|a| a.id).max().unwrap();
    assert_eq!(max_id, AgentId(109));

    engine.queue_command(Command::RemovePeople(5));
    engine.queue_command(Command::InfectRandom);
    engine.queue_command(Command::RandomizeDistancers);
    let snapshot = engine.step().unwrap();
    assert_eq!(snapshot.counts.total(), 105);
    assert_eq!(snapshot.counts.infected, 1);
    assert_eq!(snapshot.counts.distancing, 52);
    assert_eq!(engine.communities()[0].members().len(), 105);

    engine.queue_command(Command::AddPeople(1));
    let snapshot = engine.step().unwrap();
    assert!(snapshot.agent(AgentId(110)).is_some());

    engine.queue_command(Command::RemovePeople(1000));
    let snapshot = engine.step().unwrap();
    assert_eq!(snapshot.counts.total(), 1);
}

#[test]
fn toggles_are_marked_and_communities_reconfine() {
    let mut engine = Engine::new(outbreak()).unwrap();
    engine.queue_setting(Setting::CommunitiesEnabled(false)).unwrap();
    engine.queue_setting(Setting::DistancingEnabled(false)).unwrap();
    engine.run(200).unwrap();

    let world = engine.config().world.bounds();
    let roaming = engine.agents().iter().any(|a| {
        !a.is_deceased() && !engine.communities()[a.community()].bounds().contains(a.position())
    });
    assert!(roaming);
    assert!(engine.agents().iter().all(|a| world.contains(a.position())));

    engine.queue_setting(Setting::CommunitiesEnabled(true)).unwrap();
    engine.step().unwrap();
    for agt in engine.agents() {
        if !agt.is_deceased() && !agt.is_travelling() {
            assert!(engine.communities()[agt.community()].bounds().contains(agt.position()));
        }
    }

    let toggles: Vec<_> = engine
        .statistics()
        .events()
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::SettingChanged { toggle, enabled } => Some((e.tick, toggle, enabled)),
            _ => None,
        })
        .collect();
    assert_eq!(
        toggles,
        vec![
            (1, Toggle::Communities, false),
            (1, Toggle::Distancing, false),
            (201, Toggle::Communities, true),
        ]
    );
}

#[test]
fn recovered_agents_can_be_reinfected_when_configured() {
    let mut cfg = single_community(60, 20);
    cfg.disease.transmission_probability = 0.5;
    cfg.disease.reinfection_probability = 0.5;
    cfg.disease.infection_radius = 1000.0;
    cfg.disease.mortality_rate = 0.0;
    cfg.disease.recovery_duration_mean = 3.0;
    cfg.disease.recovery_duration_spread = 0.0;

    let mut engine = Engine::new(cfg).unwrap();
    let mut recovered: HashMap<AgentId, bool> = HashMap::new();
    let mut reinfected = false;
    for snapshot in steps(&mut engine, 50) {
        for agt in &snapshot.agents {
            match agt.state() {
                HealthState::Recovered => {
                    recovered.insert(agt.id, true);
                }
                HealthState::Infected if recovered.contains_key(&agt.id) => reinfected = true,
                _ => {}
            }
        }
    }
    assert!(reinfected);
}

#[test]
fn history_is_bounded_and_events_are_recorded() {
    let mut cfg = outbreak();
    cfg.output.history_len = 10;
    let mut engine = Engine::new(cfg).unwrap();
    engine.run(600).unwrap();

    let history = engine.statistics().history();
    assert_eq!(history.capacity(), 10);
    assert!(!history.is_empty());
    assert_eq!(history.len(), 10);
    assert_eq!(history.latest().map(|s| s.tick), Some(600));
    let ticks: Vec<_> = history.iter().map(|s| s.tick).collect();
    assert_eq!(ticks, (591..=600).collect::<Vec<_>>());

    let events = engine.statistics().events();
    assert!(events.iter().any(|e| e.kind == EventKind::FirstInfection));
    assert!(events.iter().any(|e| e.kind == EventKind::FirstDeath));
    let (peak, peak_tick) = engine.statistics().peak_infected();
    assert!(peak >= 5);
    if engine.statistics().counts().infected < peak {
        assert!(events.iter().any(|e| e.tick == peak_tick
            && e.kind == EventKind::PeakInfected { infected: peak }));
    }
}
