use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng as _, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SimulationConfig;
use crate::entities::Role;
use crate::hex::HexCoord;
use crate::scripting::ScriptRuntimeError;
use crate::simulation::Simulation;
use crate::world::{Terrain, Tile, WorldStore};

pub const DEFAULT_TICKS: u64 = 20;
pub const DEFAULT_TICKS_PER_SECOND: f64 = 10.0;
pub const DEFAULT_WORLD_RADIUS: u32 = 6;
pub const MAX_WORLD_RADIUS: u32 = 512;

const WANDER_SCRIPT: &str = r#"
memory.step = (memory.step or 0) + 1
local ring = world.neighbors(entity.getPosition())
local pick = ring[((self.id + memory.step) % 6) + 1]
local tile = world.getTileAt(pick)
if tile and tile.passable then
  entity.moveTo(pick)
end
"#;

const FORAGE_SCRIPT: &str = r#"
local here = entity.getPosition()
local tile = world.getTileAt(here)
if tile and tile.terrain == "forest" then
  if entity.harvest(here) then
    memory.harvests = (memory.harvests or 0) + 1
  end
  return
end
for _, spot in ipairs(world.neighbors(here)) do
  local t = world.getTileAt(spot)
  if t and t.terrain == "forest" then
    entity.moveTo(spot)
    return
  end
end
memory.idle = (memory.idle or 0) + 1
"#;

const PATROL_SCRIPT: &str = r#"
if memory.home == nil then
  memory.home = { q = self.position.q, r = self.position.r }
end
local here = entity.getPosition()
if world.distance(here, memory.home) >= 2 then
  entity.moveTo(memory.home)
  return
end
local crowd = world.findNearbyEntities(here, 1)
memory.crowd = #crowd
for _, spot in ipairs(world.neighbors(here)) do
  local t = world.getTileAt(spot)
  if t and t.passable and #world.findEntitiesAt(spot) == 0 then
    entity.moveTo(spot)
    return
  end
end
"#;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error(transparent)]
    Runtime(#[from] ScriptRuntimeError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileDef {
    pub q: i32,
    pub r: i32,
    pub terrain: Terrain,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawnRequest {
    pub q: i32,
    pub r: i32,
    pub role: Role,
    #[serde(default)]
    pub script: Option<String>,
}

/// A runnable setup: config, a hexagonal world with terrain overrides, and
/// the entities to spawn in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub config: SimulationConfig,
    pub ticks: u64,
    pub ticks_per_second: f64,
    pub world_radius: u32,
    pub tiles: Vec<TileDef>,
    pub entities: Vec<EntitySpawnRequest>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            config: SimulationConfig::default(),
            ticks: DEFAULT_TICKS,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            world_radius: DEFAULT_WORLD_RADIUS,
            tiles: Vec::new(),
            entities: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn from_json(contents: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = serde_json::from_str(contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.world_radius > MAX_WORLD_RADIUS {
            return Err(ScenarioError::Invalid(format!(
                "world_radius {} exceeds the maximum of {MAX_WORLD_RADIUS}",
                self.world_radius
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Seeded random terrain plus `count` scripted entities on passable tiles.
    /// The same seed always yields the same scenario.
    pub fn demo(seed: u64, count: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let radius = DEFAULT_WORLD_RADIUS;
        let mut tiles = Vec::new();
        let mut open = Vec::new();
        for coord in HexCoord::ORIGIN.within(radius) {
            let terrain = match rng.gen_range(0..100u32) {
                0..=17 => Terrain::Forest,
                18..=23 => Terrain::Mountain,
                24..=29 => Terrain::Water,
                _ => Terrain::Plains,
            };
            if terrain.is_passable() {
                open.push(coord);
            }
            if terrain != Terrain::Plains {
                tiles.push(TileDef {
                    q: coord.q,
                    r: coord.r,
                    terrain,
                });
            }
        }

        let entities = (0..count)
            .filter_map(|_| {
                let at = *open.choose(&mut rng)?;
                let role = Role::ALL[rng.gen_range(0..Role::ALL.len())];
                Some(EntitySpawnRequest {
                    q: at.q,
                    r: at.r,
                    role,
                    script: Some(demo_script(role).to_string()),
                })
            })
            .collect();

        Self {
            world_radius: radius,
            tiles,
            entities,
            ..Self::default()
        }
    }

    pub fn build_world(&self) -> WorldStore {
        let mut world = WorldStore::hexagon(self.world_radius.min(MAX_WORLD_RADIUS));
        for def in &self.tiles {
            world.set_tile(HexCoord::new(def.q, def.r), Tile::new(def.terrain));
        }
        world
    }

    pub fn build_simulation(&self) -> Result<Simulation, ScenarioError> {
        self.validate()?;
        let mut simulation = Simulation::with_world(self.config.clone(), self.build_world())?;
        for request in &self.entities {
            simulation.spawn(
                request.role,
                HexCoord::new(request.q, request.r),
                request.script.clone(),
            );
        }
        Ok(simulation)
    }
}

fn demo_script(role: Role) -> &'static str {
    match role {
        Role::Worker => FORAGE_SCRIPT,
        Role::Scout => WANDER_SCRIPT,
        Role::Combat | Role::Engineer => PATROL_SCRIPT,
    }
}
