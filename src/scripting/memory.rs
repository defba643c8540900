use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use mlua::{Lua, Table, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::entities::EntityId;
use crate::scripting::error::MemoryError;

pub const MEMORY_GLOBAL: &str = "memory";
pub const MAX_MEMORY_DEPTH: usize = 64;

/// A table key that can survive between executions.
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryKey {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Vec<u8>),
}

/// Host-owned copy of a script's `memory` table. Tables keep every key they
/// had, including holes in lists and mixed list/record shapes. Entries are
/// kept sorted by key so saves are deterministic.
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Vec<u8>),
    Table(Vec<(MemoryKey, MemoryValue)>),
}

impl MemoryKey {
    fn rank(&self) -> u8 {
        match self {
            MemoryKey::Boolean(_) => 0,
            MemoryKey::Integer(_) | MemoryKey::Number(_) => 1,
            MemoryKey::String(_) => 2,
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            MemoryKey::Integer(i) => *i as f64,
            MemoryKey::Number(n) => *n,
            _ => 0.0,
        }
    }

    fn order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MemoryKey::Boolean(a), MemoryKey::Boolean(b)) => a.cmp(b),
            (MemoryKey::Integer(a), MemoryKey::Integer(b)) => a.cmp(b),
            (MemoryKey::String(a), MemoryKey::String(b)) => a.cmp(b),
            _ if self.rank() == 1 && other.rank() == 1 => {
                self.as_number().total_cmp(&other.as_number())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn label(&self) -> String {
        match self {
            MemoryKey::Boolean(b) => b.to_string(),
            MemoryKey::Integer(i) => i.to_string(),
            MemoryKey::Number(n) => n.to_string(),
            MemoryKey::String(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    fn to_lua(&self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            MemoryKey::Boolean(b) => Value::Boolean(*b),
            MemoryKey::Integer(i) => Value::Integer(*i as mlua::Integer),
            MemoryKey::Number(n) => Value::Number(*n),
            MemoryKey::String(bytes) => Value::String(lua.create_string(bytes)?),
        })
    }
}

impl MemoryValue {
    pub fn empty() -> Self {
        MemoryValue::Table(Vec::new())
    }

    /// Looks up a string key in a table.
    pub fn field(&self, key: &str) -> Option<&MemoryValue> {
        self.lookup(|k| matches!(k, MemoryKey::String(bytes) if bytes == key.as_bytes()))
    }

    /// Looks up an integer key in a table.
    pub fn at(&self, index: i64) -> Option<&MemoryValue> {
        self.lookup(|k| matches!(k, MemoryKey::Integer(i) if *i == index))
    }

    fn lookup(&self, matches: impl Fn(&MemoryKey) -> bool) -> Option<&MemoryValue> {
        match self {
            MemoryValue::Table(entries) => entries.iter().find(|(k, _)| matches(k)).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MemoryValue::Integer(i) => Some(*i as f64),
            MemoryValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MemoryValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MemoryValue::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Number of entries for a table, zero for anything else.
    pub fn len(&self) -> usize {
        match self {
            MemoryValue::Table(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_lua(&self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            MemoryValue::Boolean(b) => Value::Boolean(*b),
            MemoryValue::Integer(i) => Value::Integer(*i as mlua::Integer),
            MemoryValue::Number(n) => Value::Number(*n),
            MemoryValue::String(bytes) => Value::String(lua.create_string(bytes)?),
            MemoryValue::Table(entries) => {
                let table = lua.create_table_with_capacity(0, entries.len())?;
                for (key, value) in entries {
                    table.raw_set(key.to_lua(lua)?, value.to_lua(lua)?)?;
                }
                Value::Table(table)
            }
        })
    }

    fn is_sequence(entries: &[(MemoryKey, MemoryValue)]) -> bool {
        !entries.is_empty()
            && entries
                .iter()
                .enumerate()
                .all(|(i, (key, _))| matches!(key, MemoryKey::Integer(n) if *n == i as i64 + 1))
    }
}

/// Reports serialize gap-free lists as arrays and every other table as an
/// object with stringified keys.
impl Serialize for MemoryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MemoryValue::Boolean(b) => serializer.serialize_bool(*b),
            MemoryValue::Integer(i) => serializer.serialize_i64(*i),
            MemoryValue::Number(n) => serializer.serialize_f64(*n),
            MemoryValue::String(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
            MemoryValue::Table(entries) if MemoryValue::is_sequence(entries) => {
                let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                for (_, value) in entries {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            MemoryValue::Table(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&key.label(), value)?;
                }
                map.end()
            }
        }
    }
}

fn capture_key(key: Value) -> Result<MemoryKey, String> {
    match key {
        Value::Boolean(b) => Ok(MemoryKey::Boolean(b)),
        Value::Integer(i) => Ok(MemoryKey::Integer(i as i64)),
        Value::Number(n) => Ok(MemoryKey::Number(n)),
        Value::String(s) => Ok(MemoryKey::String(s.as_bytes().to_vec())),
        other => Err(format!("a {} cannot be used as a memory key", other.type_name())),
    }
}

fn capture_value(
    value: Value,
    path: &mut HashSet<usize>,
    depth: usize,
) -> Result<MemoryValue, String> {
    match value {
        Value::Boolean(b) => Ok(MemoryValue::Boolean(b)),
        Value::Integer(i) => Ok(MemoryValue::Integer(i as i64)),
        Value::Number(n) => Ok(MemoryValue::Number(n)),
        Value::String(s) => Ok(MemoryValue::String(s.as_bytes().to_vec())),
        Value::Table(table) => capture_table(&table, path, depth).map(MemoryValue::Table),
        other => Err(format!("a {} cannot be stored in memory", other.type_name())),
    }
}

/// `path` holds the tables currently being copied; meeting one again means a
/// cycle. Tables shared by several branches are copied once per branch.
fn capture_table(
    table: &Table,
    path: &mut HashSet<usize>,
    depth: usize,
) -> Result<Vec<(MemoryKey, MemoryValue)>, String> {
    if depth >= MAX_MEMORY_DEPTH {
        return Err(format!("tables nested deeper than {MAX_MEMORY_DEPTH} levels"));
    }
    let id = table.to_pointer() as usize;
    if !path.insert(id) {
        return Err("a table refers back to itself".to_string());
    }
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair.map_err(|e| e.to_string())?;
        let key = capture_key(key)?;
        entries.push((key, capture_value(value, path, depth + 1)?));
    }
    path.remove(&id);
    entries.sort_by(|(a, _), (b, _)| a.order(b));
    Ok(entries)
}

/// Per-entity persistent `memory` tables, held host-side between executions.
///
/// Every restore builds a fresh table from the saved copy, so nothing one
/// entity writes can alias another entity's state or an ordinary global.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: HashMap<EntityId, MemoryValue>,
}

fn persistence(entity: EntityId, err: mlua::Error) -> MemoryError {
    MemoryError::Persistence {
        entity,
        message: err.to_string(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the entity's saved table (or an empty one) as the `memory` global.
    pub fn restore(&self, lua: &Lua, entity: EntityId) -> Result<(), MemoryError> {
        let table = match self.slots.get(&entity) {
            Some(saved) => saved.to_lua(lua),
            None => lua.create_table().map(Value::Table),
        }
        .map_err(|e| persistence(entity, e))?;
        lua.globals()
            .raw_set(MEMORY_GLOBAL, table)
            .map_err(|e| persistence(entity, e))
    }

    /// Reads `memory` back after a successful execution and clears the global.
    ///
    /// `nil` resets the entity to an empty table. Non-table values, and tables
    /// holding functions, userdata, threads, cycles or nesting beyond
    /// [`MAX_MEMORY_DEPTH`], are rejected with [`MemoryError::Unsupported`] and
    /// the previous save is kept. Metatables are not saved.
    pub fn save(&mut self, lua: &Lua, entity: EntityId) -> Result<(), MemoryError> {
        let value = lua
            .globals()
            .raw_get::<Value>(MEMORY_GLOBAL)
            .map_err(|e| persistence(entity, e))?;
        let captured = match value {
            Value::Nil => Ok(MemoryValue::empty()),
            Value::Table(table) => capture_table(&table, &mut HashSet::new(), 0)
                .map(MemoryValue::Table)
                .map_err(|message| MemoryError::Unsupported { entity, message }),
            other => Err(MemoryError::Unsupported {
                entity,
                message: format!("expected a table, found a {}", other.type_name()),
            }),
        };
        self.discard(lua, entity)?;
        self.slots.insert(entity, captured?);
        Ok(())
    }

    /// Clears the `memory` global without saving it.
    pub fn discard(&self, lua: &Lua, entity: EntityId) -> Result<(), MemoryError> {
        lua.globals()
            .raw_set(MEMORY_GLOBAL, Value::Nil)
            .map_err(|e| persistence(entity, e))
    }

    pub fn get(&self, entity: EntityId) -> Option<&MemoryValue> {
        self.slots.get(&entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &MemoryValue)> {
        self.slots.iter().map(|(id, value)| (*id, value))
    }

    pub fn forget(&mut self, entity: EntityId) -> Option<MemoryValue> {
        self.slots.remove(&entity)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lua: &Lua, src: &str) {
        lua.load(src).exec().expect("run script");
    }

    fn save_run_restore(store: &mut MemoryStore, lua: &Lua, entity: EntityId, src: &str) {
        store.restore(lua, entity).expect("restore");
        run(lua, src);
        store.save(lua, entity).expect("save");
        store.restore(lua, entity).expect("restore saved memory");
    }

    #[test]
    fn first_restore_installs_empty_table() {
        let lua = Lua::new();
        let store = MemoryStore::new();
        store.restore(&lua, 1).expect("restore");
        let empty: bool = lua
            .load("return type(memory) == 'table' and next(memory) == nil")
            .eval()
            .expect("eval");
        assert!(empty);
    }

    #[test]
    fn saved_values_survive_between_executions() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        for _ in 0..3 {
            store.restore(&lua, 1).expect("restore");
            run(&lua, "memory.count = (memory.count or 0) + 1\nmemory.name = 'w'");
            store.save(&lua, 1).expect("save");
        }
        let saved = store.get(1).expect("saved memory");
        assert_eq!(saved.field("count").and_then(MemoryValue::as_f64), Some(3.0));
        assert_eq!(saved.field("name").and_then(MemoryValue::as_str), Some("w"));
        let cleared: bool = lua.load("return memory == nil").eval().expect("eval");
        assert!(cleared);
    }

    #[test]
    fn mixed_list_and_record_tables_keep_every_field() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        save_run_restore(&mut store, &lua, 1, "memory.list = {10, 20, tag = 'x'}");
        let (first, second, tag): (i64, i64, String) = lua
            .load("return memory.list[1], memory.list[2], memory.list.tag")
            .eval()
            .expect("eval");
        assert_eq!((first, second, tag.as_str()), (10, 20, "x"));

        let list = store.get(1).and_then(|m| m.field("list")).expect("list");
        assert_eq!(list.len(), 3);
        assert_eq!(list.at(2).and_then(MemoryValue::as_f64), Some(20.0));
    }

    #[test]
    fn lists_with_holes_keep_entries_past_the_hole() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        save_run_restore(
            &mut store,
            &lua,
            2,
            "memory.path = {1, 2, 3}\nmemory.path[2] = nil",
        );
        let (first, hole, third): (i64, bool, i64) = lua
            .load("return memory.path[1], memory.path[2] == nil, memory.path[3]")
            .eval()
            .expect("eval");
        assert_eq!((first, hole, third), (1, true, 3));
    }

    #[test]
    fn number_and_boolean_keys_are_preserved() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        let script = r#"
memory.seen = memory.seen or {}
memory.seen[7] = true
memory.seen[2.5] = "half"
memory.flags = { [true] = "yes", [false] = "no" }
"#;
        save_run_restore(&mut store, &lua, 3, script);
        run(&lua, script);
        store.save(&lua, 3).expect("save number-keyed table again");
        store.restore(&lua, 3).expect("restore");

        let (seven, half, yes, no): (bool, String, String, String) = lua
            .load("return memory.seen[7], memory.seen[2.5], memory.flags[true], memory.flags[false]")
            .eval()
            .expect("eval");
        assert!(seven);
        assert_eq!((half.as_str(), yes.as_str(), no.as_str()), ("half", "yes", "no"));
        let seen = store.get(3).and_then(|m| m.field("seen")).expect("seen");
        assert_eq!(seen.at(7).and_then(MemoryValue::as_bool), Some(true));
    }

    #[test]
    fn shared_subtables_are_copied_not_rejected() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        save_run_restore(
            &mut store,
            &lua,
            4,
            "local home = {q = 1, r = 2}\nmemory.a = home\nmemory.b = home",
        );
        let (same_values, distinct): (bool, bool) = lua
            .load("return memory.a.q == memory.b.q and memory.a.r == memory.b.r, rawequal(memory.a, memory.b) == false")
            .eval()
            .expect("eval");
        assert!(same_values && distinct);
    }

    #[test]
    fn entities_never_share_tables() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        store.restore(&lua, 1).expect("restore 1");
        run(&lua, "memory.secret = 'a'\nmemory.list = {1, 2}");
        store.save(&lua, 1).expect("save 1");

        store.restore(&lua, 2).expect("restore 2");
        let leaked: bool = lua
            .load("return memory.secret ~= nil or memory.list ~= nil")
            .eval()
            .expect("eval");
        assert!(!leaked);
        store.save(&lua, 2).expect("save 2");

        store.restore(&lua, 1).expect("restore 1 again");
        run(&lua, "memory.list[1] = 99");
        store.discard(&lua, 1).expect("discard");
        store.restore(&lua, 1).expect("restore 1 after discard");
        let first: f64 = lua.load("return memory.list[1]").eval().expect("eval");
        assert_eq!(first, 1.0);
    }

    #[test]
    fn nil_memory_resets_to_empty() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        store.restore(&lua, 4).expect("restore");
        run(&lua, "memory.x = 1");
        store.save(&lua, 4).expect("save");
        store.restore(&lua, 4).expect("restore");
        run(&lua, "memory = nil");
        store.save(&lua, 4).expect("save nil");
        assert_eq!(store.get(4), Some(&MemoryValue::empty()));
    }

    #[test]
    fn unsupported_values_keep_previous_save() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        store.restore(&lua, 7).expect("restore");
        run(&lua, "memory.keep = true");
        store.save(&lua, 7).expect("save");
        let kept = store.get(7).cloned();

        for src in [
            "memory = 5",
            "memory.f = function() end",
            "local t = {}\nt.me = t\nmemory = t",
            "memory[{}] = 1",
            "local t = memory\nfor i = 1, 100 do t.next = {} t = t.next end",
        ] {
            store.restore(&lua, 7).expect("restore");
            run(&lua, src);
            let err = store.save(&lua, 7).expect_err("unsupported memory");
            assert!(matches!(err, MemoryError::Unsupported { entity: 7, .. }), "{src}");
            assert!(!err.is_fatal());
            let cleared: bool = lua.load("return memory == nil").eval().expect("eval");
            assert!(cleared);
        }
        assert_eq!(store.get(7).cloned(), kept);
    }

    #[test]
    fn reports_use_arrays_only_for_gap_free_lists() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        save_run_restore(
            &mut store,
            &lua,
            9,
            "memory.list = {'a', 'b'}\nmemory.sparse = {[1] = 'a', [3] = 'c'}\nmemory.empty = {}",
        );
        let json = serde_json::to_value(store.get(9).expect("memory")).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "empty": {},
                "list": ["a", "b"],
                "sparse": { "1": "a", "3": "c" },
            })
        );
    }

    #[test]
    fn forget_drops_slot() {
        let lua = Lua::new();
        let mut store = MemoryStore::new();
        store.restore(&lua, 2).expect("restore");
        store.save(&lua, 2).expect("save");
        assert_eq!(store.len(), 1);
        assert!(store.forget(2).is_some());
        assert!(store.is_empty());
    }
}
