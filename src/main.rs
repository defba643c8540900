use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;

use hexsim::plugin::{SimulationPlugin, SimulationStatus};
use hexsim::scenario::{Scenario, ScenarioError, DEFAULT_TICKS_PER_SECOND};
use hexsim::simulation::Simulation;

const DEFAULT_SEED: u64 = 42;
const DEMO_ENTITY_COUNT: usize = 24;

#[derive(Resource)]
struct TickLimit(u64);

fn load_scenario() -> Result<Scenario, ScenarioError> {
    let path = std::env::var("HEXSIM_SCENARIO")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::args().nth(1));
    match path {
        Some(path) => {
            println!("[Hexsim] Loading scenario from {path}");
            Scenario::load(&path)
        }
        None => {
            let seed = std::env::var("HEXSIM_SEED")
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_SEED);
            println!("[Hexsim] No scenario given, generating demo with seed {seed}");
            Ok(Scenario::demo(seed, DEMO_ENTITY_COUNT))
        }
    }
}

fn main() {
    let scenario = match load_scenario() {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("[Hexsim] {e}");
            std::process::exit(2);
        }
    };
    let simulation = match scenario.build_simulation() {
        Ok(simulation) => simulation,
        Err(e) => {
            eprintln!("[Hexsim] Failed to build simulation: {e}");
            std::process::exit(2);
        }
    };

    let tick_hz = if scenario.ticks_per_second.is_finite() && scenario.ticks_per_second > 0.0 {
        scenario.ticks_per_second
    } else {
        DEFAULT_TICKS_PER_SECOND
    };

    let mut app = App::new();
    app.add_plugins(
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
            1.0 / (tick_hz * 4.0),
        ))),
    )
    .add_plugins(LogPlugin::default())
    .insert_resource(Time::<Fixed>::from_hz(tick_hz))
    .insert_resource(TickLimit(scenario.ticks))
    .insert_non_send_resource(simulation)
    .add_plugins(SimulationPlugin {
        config: scenario.config.clone(),
    })
    .add_systems(FixedPostUpdate, stop_after_tick_limit);

    if app.run().is_error() {
        std::process::exit(1);
    }
}

fn stop_after_tick_limit(
    limit: Res<TickLimit>,
    status: Res<SimulationStatus>,
    simulation: NonSend<Simulation>,
    mut exit: EventWriter<AppExit>,
    mut done: Local<bool>,
) {
    if *done {
        return;
    }
    if let Some(reason) = &status.halted {
        error!("[Hexsim] Simulation halted: {reason}");
        *done = true;
        exit.send(AppExit::error());
        return;
    }
    if status.ticks < limit.0 {
        return;
    }

    *done = true;
    match serde_json::to_string_pretty(&simulation.snapshot()) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("[Hexsim] Failed to serialize snapshot: {e}"),
    }
    info!(
        "[Hexsim] Finished {} ticks, {} script errors logged",
        status.ticks,
        simulation.errors().len()
    );
    exit.send(AppExit::Success);
}
