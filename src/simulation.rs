use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use bevy::log::{debug, error, warn};
use serde::Serialize;

use crate::config::SimulationConfig;
use crate::entities::{Entity, EntityId, EntityStore, Role};
use crate::hex::HexCoord;
use crate::scripting::{
    Action, ActionQueue, HostApi, MemoryStore, MemoryValue, ScriptContext, ScriptError,
    ScriptErrors, ScriptFaultKind, ScriptRuntime, ScriptRuntimeError, TickError,
};
use crate::world::WorldStore;


/// Counters for one call to [`Simulation::process_tick`]. `executed` counts
/// every script that was started, including the ones that failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub executed: usize,
    pub failed: usize,
    pub actions_applied: usize,
    pub actions_rejected: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SimulationSnapshot {
    pub tick: u64,
    pub entities: Vec<Entity>,
    pub memory: BTreeMap<EntityId, MemoryValue>,
    pub errors: Vec<ScriptError>,
    pub dropped_errors: u64,
}

enum Outcome {
    Completed,
    Failed(ScriptFaultKind, String),
}

/// Drives every scripted entity through one shared script runtime, one tick at
/// a time. The world and entity stores are shared with the host bindings
/// through `Rc<RefCell<..>>`; no borrow is held while a script runs.
pub struct Simulation {
    runtime: ScriptRuntime,
    api: HostApi,
    memory: MemoryStore,
    queue: Rc<RefCell<ActionQueue>>,
    world: Rc<RefCell<WorldStore>>,
    entities: Rc<RefCell<EntityStore>>,
    config: SimulationConfig,
    errors: ScriptErrors,
    tick: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ScriptRuntimeError> {
        Self::with_world(config, WorldStore::new())
    }

    pub fn with_world(
        config: SimulationConfig,
        world: WorldStore,
    ) -> Result<Self, ScriptRuntimeError> {
        let runtime = ScriptRuntime::new(config.limits)?;
        let api = HostApi::new(runtime.lua())
            .map_err(|e| ScriptRuntimeError::Initialization(e.to_string()))?;
        Ok(Self {
            runtime,
            api,
            memory: MemoryStore::new(),
            queue: Rc::new(RefCell::new(ActionQueue::new())),
            world: Rc::new(RefCell::new(world)),
            entities: Rc::new(RefCell::new(EntityStore::new())),
            errors: ScriptErrors::with_capacity(config.max_logged_errors),
            config,
            tick: 0,
        })
    }

    pub fn spawn(&mut self, role: Role, position: HexCoord, script: Option<String>) -> EntityId {
        self.entities.borrow_mut().spawn(role, position, script)
    }

    pub fn set_script(&mut self, id: EntityId, script: Option<String>) -> bool {
        self.entities.borrow_mut().set_script(id, script)
    }

    pub fn kill(&mut self, id: EntityId) -> bool {
        self.entities.borrow_mut().kill(id)
    }

    /// Removes dead entities together with their memory slots.
    pub fn compact(&mut self) -> Vec<EntityId> {
        let removed = self.entities.borrow_mut().compact();
        for id in &removed {
            self.memory.forget(*id);
        }
        removed
    }

    pub fn entities(&self) -> Ref<'_, EntityStore> {
        self.entities.borrow()
    }

    pub fn entities_mut(&mut self) -> RefMut<'_, EntityStore> {
        self.entities.borrow_mut()
    }

    pub fn world(&self) -> Ref<'_, WorldStore> {
        self.world.borrow()
    }

    pub fn world_mut(&mut self) -> RefMut<'_, WorldStore> {
        self.world.borrow_mut()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn errors(&self) -> &ScriptErrors {
        &self.errors
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Runs every live scripted entity once, in ascending id order. Each
    /// entity's actions are applied before the next script starts.
    ///
    /// Script faults are isolated to their entity. Only host-side failures
    /// (memory transfer, context binding) abort the tick.
    pub fn process_tick(&mut self) -> Result<TickReport, TickError> {
        self.tick = self.tick.saturating_add(1);
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };
        let order = self.entities.borrow().scripted_ids();
        for id in order {
            if let Err(err) = self.run_entity(id, &mut report) {
                error!("[Hexsim scripts] Tick {} aborted: {err}", self.tick);
                self.reset_bindings(id);
                return Err(err);
            }
        }
        self.runtime.end_pass();
        Ok(report)
    }

    fn run_entity(&mut self, id: EntityId, report: &mut TickReport) -> Result<(), TickError> {
        let source = match self.entities.borrow().get_live(id) {
            Some(entity) => entity.script.clone(),
            None => None,
        };
        let Some(source) = source else {
            return Ok(());
        };

        self.queue.borrow_mut().clear();
        let context = ScriptContext {
            entity: id,
            queue: self.queue.clone(),
            world: self.world.clone(),
            entities: self.entities.clone(),
        };
        self.api
            .bind(self.runtime.lua(), context)
            .map_err(|e| TickError::Binding {
                entity: id,
                message: e.to_string(),
            })?;

        let outcome = self.execute(id, &source)?;
        self.api
            .unbind(self.runtime.lua())
            .map_err(|e| TickError::Binding {
                entity: id,
                message: e.to_string(),
            })?;
        report.executed += 1;

        match outcome {
            Outcome::Completed => {
                let actions = self.queue.borrow().actions().to_vec();
                self.queue.borrow_mut().clear();
                for action in &actions {
                    if self.apply_action(id, action) {
                        report.actions_applied += 1;
                    } else {
                        report.actions_rejected += 1;
                    }
                }
            }
            Outcome::Failed(kind, message) => {
                self.queue.borrow_mut().clear();
                report.failed += 1;
                warn!(
                    "[Hexsim scripts] Entity {id} script failed on tick {}: {message}",
                    self.tick
                );
                self.errors.push(ScriptError {
                    entity_id: id,
                    tick: self.tick,
                    kind,
                    error_message: message,
                });
            }
        }
        Ok(())
    }

    fn execute(&mut self, id: EntityId, source: &str) -> Result<Outcome, TickError> {
        self.memory.restore(self.runtime.lua(), id)?;
        if let Err(err) = self.runtime.run(&format!("entity_{id}"), source) {
            self.memory.discard(self.runtime.lua(), id)?;
            return Ok(Outcome::Failed(err.kind(), err.to_string()));
        }
        match self.memory.save(self.runtime.lua(), id) {
            Ok(()) => Ok(Outcome::Completed),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => Ok(Outcome::Failed(ScriptFaultKind::Memory, err.to_string())),
        }
    }

    fn apply_action(&self, id: EntityId, action: &Action) -> bool {
        let mut entities = self.entities.borrow_mut();
        let Some(entity) = entities.get_mut(id).filter(|e| e.is_alive()) else {
            return false;
        };
        let applied = match action {
            Action::Move { target } => {
                let paid = entity.spend_energy(self.config.move_cost);
                if paid {
                    entity.position = *target;
                }
                paid
            }
            Action::Harvest { .. } => entity.spend_energy(self.config.harvest_cost),
            Action::Consume { .. } => true,
        };
        if !applied {
            debug!(
                "[Hexsim scripts] Rejected {} for entity {id}: {:.1} energy left",
                action.label(),
                entity.energy()
            );
        }
        applied
    }

    fn reset_bindings(&mut self, id: EntityId) {
        self.queue.borrow_mut().clear();
        let lua = self.runtime.lua();
        if let Err(err) = self.api.unbind(lua) {
            warn!("[Hexsim scripts] Failed to unbind context after aborted tick: {err}");
        }
        if let Err(err) = self.memory.discard(lua, id) {
            warn!("[Hexsim scripts] Failed to clear memory after aborted tick: {err}");
        }
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            tick: self.tick,
            entities: self.entities.borrow().iter().cloned().collect(),
            memory: self
                .memory
                .iter()
                .map(|(id, value)| (id, value.clone()))
                .collect(),
            errors: self.errors.entries().cloned().collect(),
            dropped_errors: self.errors.dropped(),
        }
    }
}
