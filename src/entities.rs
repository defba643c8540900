use serde::{Deserialize, Serialize};

use crate::hex::HexCoord;

pub type EntityId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    Combat,
    Scout,
    Engineer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Worker, Role::Combat, Role::Scout, Role::Engineer];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Combat => "combat",
            Role::Scout => "scout",
            Role::Engineer => "engineer",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "worker" => Some(Role::Worker),
            "combat" => Some(Role::Combat),
            "scout" => Some(Role::Scout),
            "engineer" => Some(Role::Engineer),
            _ => None,
        }
    }

    pub fn max_energy(self) -> f64 {
        match self {
            Role::Worker => 100.0,
            Role::Combat => 150.0,
            Role::Scout => 80.0,
            Role::Engineer => 120.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entity {
    pub id: EntityId,
    pub position: HexCoord,
    pub role: Role,
    energy: f64,
    alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl Entity {
    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn max_energy(&self) -> f64 {
        self.role.max_energy()
    }

    pub fn set_energy(&mut self, energy: f64) {
        if !self.alive {
            return;
        }
        self.energy = if energy.is_finite() {
            energy.clamp(0.0, self.max_energy())
        } else {
            0.0
        };
    }

    /// Deducts `cost` if the entity can afford it.
    pub fn spend_energy(&mut self, cost: f64) -> bool {
        let cost = cost.max(0.0);
        if !self.alive || self.energy < cost {
            return false;
        }
        self.energy = (self.energy - cost).max(0.0);
        true
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_active(&self) -> bool {
        self.alive && self.energy > 0.0
    }
}

/// Owns every entity record. Records are kept in ascending id order, which is
/// also the script execution order.
#[derive(Debug)]
pub struct EntityStore {
    entities: Vec<Entity>,
    next_id: EntityId,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            next_id: 1,
        }
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, role: Role, position: HexCoord, script: Option<String>) -> EntityId {
        let id = self.next_id.max(1);
        self.next_id = id.saturating_add(1);
        self.entities.push(Entity {
            id,
            position,
            role,
            energy: role.max_energy(),
            alive: true,
            script,
        });
        id
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        self.entities.binary_search_by_key(&id, |e| e.id).ok()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.index_of(id).map(|i| &self.entities[i])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.index_of(id).map(|i| &mut self.entities[i])
    }

    pub fn get_live(&self, id: EntityId) -> Option<&Entity> {
        self.get(id).filter(|e| e.alive)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn live(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.alive)
    }

    pub fn ids_at(&self, coord: HexCoord) -> Vec<EntityId> {
        self.live()
            .filter(|e| e.position == coord)
            .map(|e| e.id)
            .collect()
    }

    /// Live entities that carry a script, in execution order.
    pub fn scripted_ids(&self) -> Vec<EntityId> {
        self.live()
            .filter(|e| e.script.is_some())
            .map(|e| e.id)
            .collect()
    }

    pub fn set_script(&mut self, id: EntityId, script: Option<String>) -> bool {
        match self.get_mut(id) {
            Some(entity) => {
                entity.script = script;
                true
            }
            None => false,
        }
    }

    /// Soft delete. The record stays inspectable until `compact`.
    pub fn kill(&mut self, id: EntityId) -> bool {
        match self.get_mut(id) {
            Some(entity) if entity.alive => {
                entity.alive = false;
                entity.energy = 0.0;
                true
            }
            _ => false,
        }
    }

    /// Physically removes dead records and returns their ids.
    pub fn compact(&mut self) -> Vec<EntityId> {
        let removed = self
            .entities
            .iter()
            .filter(|e| !e.alive)
            .map(|e| e.id)
            .collect();
        self.entities.retain(|e| e.alive);
        removed
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }
}
