pub mod actions;
pub mod api;
pub mod error;
pub mod memory;
pub mod runtime;

use std::collections::VecDeque;

use serde::Serialize;

use crate::entities::EntityId;

pub use actions::{Action, ActionQueue};
pub use api::{HostApi, ScriptContext};
pub use error::{MemoryError, ScriptFaultKind, ScriptRuntimeError, TickError};
pub use memory::{MemoryKey, MemoryStore, MemoryValue};
pub use runtime::ScriptRuntime;

pub const DEFAULT_SCRIPT_BUDGET_MS: u64 = 8;
pub const DEFAULT_SCRIPT_HOOK_INSTRUCTION_INTERVAL: u32 = 10_000;
pub const MAX_SCRIPT_ERRORS: usize = 100;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ScriptError {
    pub entity_id: EntityId,
    pub tick: u64,
    pub kind: ScriptFaultKind,
    pub error_message: String,
}

/// Bounded log of recent script failures, oldest dropped first.
#[derive(Debug)]
pub struct ScriptErrors {
    entries: VecDeque<ScriptError>,
    capacity: usize,
    dropped: u64,
}

impl Default for ScriptErrors {
    fn default() -> Self {
        Self::with_capacity(MAX_SCRIPT_ERRORS)
    }
}

impl ScriptErrors {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, entry: ScriptError) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScriptError> {
        self.entries.iter()
    }

    pub fn for_entity(&self, entity: EntityId) -> impl Iterator<Item = &ScriptError> {
        self.entries.iter().filter(move |e| e.entity_id == entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_drops_oldest_entries() {
        let mut errors = ScriptErrors::with_capacity(3);
        for tick in 0..5u64 {
            errors.push(ScriptError {
                entity_id: tick % 2,
                tick,
                kind: ScriptFaultKind::Runtime,
                error_message: format!("tick {tick}"),
            });
        }
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.dropped(), 2);
        let ticks: Vec<u64> = errors.entries().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
        assert_eq!(errors.for_entity(0).count(), 2);
    }
}
