use bevy::prelude::*;

use crate::config::SimulationConfig;
use crate::simulation::{Simulation, TickReport};

/// Runs [`Simulation::process_tick`] once per fixed step.
///
/// The simulation owns a Lua state, which is `!Send`, so it is stored as a
/// non-send resource and the tick system always runs on the main thread.
#[derive(Default)]
pub struct SimulationPlugin {
    pub config: SimulationConfig,
}

#[derive(Resource, Debug, Default)]
pub struct SimulationStatus {
    pub last_report: Option<TickReport>,
    /// Set when a tick fails on the host side; no further ticks run.
    pub halted: Option<String>,
    pub ticks: u64,
}

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        let mut status = SimulationStatus::default();
        if !app.world().contains_non_send::<Simulation>() {
            match Simulation::new(self.config.clone()) {
                Ok(simulation) => {
                    app.insert_non_send_resource(simulation);
                }
                Err(err) => {
                    error!("[Hexsim scripts] Failed to start simulation: {err}");
                    status.halted = Some(err.to_string());
                }
            }
        }
        app.insert_resource(status)
            .add_systems(FixedUpdate, run_simulation_tick);
    }
}

pub fn run_simulation_tick(
    simulation: Option<NonSendMut<Simulation>>,
    mut status: ResMut<SimulationStatus>,
) {
    if status.halted.is_some() {
        return;
    }
    let Some(mut simulation) = simulation else {
        return;
    };
    match simulation.process_tick() {
        Ok(report) => {
            status.ticks = status.ticks.saturating_add(1);
            status.last_report = Some(report);
        }
        Err(err) => {
            // Already logged by `process_tick`.
            status.halted = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptLimits;
    use crate::entities::Role;
    use crate::hex::HexCoord;
    use crate::world::WorldStore;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            limits: ScriptLimits {
                budget_ms: 1_000,
                instruction_interval: 1_000,
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn fixed_update_advances_preinserted_simulation() {
        let mut sim =
            Simulation::with_world(test_config(), WorldStore::hexagon(3)).expect("simulation");
        let id = sim.spawn(
            Role::Scout,
            HexCoord::ORIGIN,
            Some("entity.moveTo(world.neighbors(entity.getPosition())[1])".to_string()),
        );

        let mut app = App::new();
        app.insert_non_send_resource(sim);
        app.add_plugins(SimulationPlugin {
            config: test_config(),
        });
        app.world_mut().run_schedule(FixedUpdate);
        app.world_mut().run_schedule(FixedUpdate);

        let status = app.world().resource::<SimulationStatus>();
        assert_eq!(status.ticks, 2);
        assert!(status.halted.is_none());
        assert_eq!(status.last_report.map(|r| r.tick), Some(2));

        let sim = app.world().non_send_resource::<Simulation>();
        let scout = sim.entities().get(id).cloned().expect("scout");
        assert_eq!(scout.position, HexCoord::new(2, 0));
        assert_eq!(scout.energy(), 78.0);
    }

    #[test]
    fn halted_status_stops_ticking() {
        let mut app = App::new();
        app.add_plugins(SimulationPlugin {
            config: test_config(),
        });
        app.world_mut().resource_mut::<SimulationStatus>().halted =
            Some("memory transfer failed".to_string());
        app.world_mut().run_schedule(FixedUpdate);

        assert_eq!(app.world().resource::<SimulationStatus>().ticks, 0);
        assert_eq!(app.world().non_send_resource::<Simulation>().tick(), 0);
    }
}
