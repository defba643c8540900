//! Native functions exposed to entity scripts.
//!
//! Queries read the bound entity/world and never mutate anything. Commands
//! only append to the bound [`ActionQueue`]. Every function validates its
//! arguments and answers `nil`/`false` on malformed input instead of raising,
//! so scripts can probe defensively without aborting their turn.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Table, Value};

use crate::entities::{Entity, EntityId, EntityStore, Role};
use crate::hex::HexCoord;
use crate::scripting::actions::{Action, ActionQueue};
use crate::world::{Tile, WorldStore};

pub const SELF_GLOBAL: &str = "self";
pub const ENTITY_NAMESPACE: &str = "entity";
pub const WORLD_NAMESPACE: &str = "world";

/// Host objects reachable from native functions during one script execution.
/// Stored in the Lua state's app data, never in script-visible globals.
#[derive(Clone)]
pub struct ScriptContext {
    pub entity: EntityId,
    pub queue: Rc<RefCell<ActionQueue>>,
    pub world: Rc<RefCell<WorldStore>>,
    pub entities: Rc<RefCell<EntityStore>>,
}

type Binding = (&'static str, Function);

/// The registered native functions. They are created once per runtime; the
/// namespace tables holding them are rebuilt on every bind so a script that
/// overwrites `entity` or `world` cannot affect the next one.
pub struct HostApi {
    entity_fns: Vec<Binding>,
    world_fns: Vec<Binding>,
}

impl HostApi {
    pub fn new(lua: &Lua) -> mlua::Result<Self> {
        Ok(Self {
            entity_fns: entity_bindings(lua)?,
            world_fns: world_bindings(lua)?,
        })
    }

    /// Installs `context` as the current context, replacing any previous one,
    /// and rebuilds the `self`, `entity` and `world` globals.
    pub fn bind(&self, lua: &Lua, context: ScriptContext) -> mlua::Result<()> {
        let snapshot = {
            let store = context
                .entities
                .try_borrow()
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            store.get(context.entity).cloned().ok_or_else(|| {
                mlua::Error::RuntimeError(format!(
                    "entity {} is not in the entity store",
                    context.entity
                ))
            })?
        };
        let globals = lua.globals();
        globals.raw_set(ENTITY_NAMESPACE, namespace_table(lua, &self.entity_fns)?)?;
        globals.raw_set(WORLD_NAMESPACE, namespace_table(lua, &self.world_fns)?)?;
        globals.raw_set(SELF_GLOBAL, self_table(lua, &snapshot)?)?;
        lua.set_app_data(context);
        Ok(())
    }

    pub fn unbind(&self, lua: &Lua) -> mlua::Result<()> {
        lua.remove_app_data::<ScriptContext>();
        lua.globals().raw_set(SELF_GLOBAL, Value::Nil)
    }
}

pub fn bound_context(lua: &Lua) -> Option<ScriptContext> {
    lua.app_data_ref::<ScriptContext>()
        .map(|ctx| ScriptContext::clone(&ctx))
}

fn with_current_entity<T>(lua: &Lua, f: impl FnOnce(&Entity) -> T) -> Option<T> {
    let ctx = bound_context(lua)?;
    let store = ctx.entities.try_borrow().ok()?;
    store.get(ctx.entity).map(f)
}

fn queue_action(lua: &Lua, action: Option<Action>) -> bool {
    let Some(action) = action else {
        return false;
    };
    let Some(ctx) = bound_context(lua) else {
        return false;
    };
    let issuer_alive = ctx
        .entities
        .try_borrow()
        .ok()
        .and_then(|store| store.get(ctx.entity).map(Entity::is_alive))
        .unwrap_or(false);
    if !issuer_alive {
        return false;
    }
    let queued = match ctx.queue.try_borrow_mut() {
        Ok(mut queue) => {
            queue.add(action);
            true
        }
        Err(_) => false,
    };
    queued
}

/// Whole numbers that fit a grid axis. Fractional or non-finite values are
/// rejected rather than truncated.
pub fn decode_integral(value: &Value) -> Option<i32> {
    match value {
        Value::Integer(i) => i32::try_from(*i).ok(),
        Value::Number(n)
            if n.is_finite()
                && n.fract() == 0.0
                && *n >= i32::MIN as f64
                && *n <= i32::MAX as f64 =>
        {
            Some(*n as i32)
        }
        _ => None,
    }
}

pub fn decode_coord(value: &Value) -> Option<HexCoord> {
    let Value::Table(table) = value else {
        return None;
    };
    let q = table.raw_get::<Value>("q").ok()?;
    let r = table.raw_get::<Value>("r").ok()?;
    Some(HexCoord::new(decode_integral(&q)?, decode_integral(&r)?))
}

fn decode_tile_query(first: &Value, second: &Value) -> Option<HexCoord> {
    match first {
        Value::Table(_) => decode_coord(first),
        _ => Some(HexCoord::new(
            decode_integral(first)?,
            decode_integral(second)?,
        )),
    }
}

fn decode_range(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) if !n.is_nan() => Some(*n),
        _ => None,
    }
}

/// `Some(None)` means no filter was given; `None` means the filter is malformed.
fn decode_role_filter(value: &Value) -> Option<Option<Role>> {
    match value {
        Value::Nil => Some(None),
        Value::String(s) => {
            let label = s.to_str().ok()?;
            Role::from_label(&label).map(Some)
        }
        _ => None,
    }
}

fn coord_table(lua: &Lua, coord: HexCoord) -> mlua::Result<Table> {
    let tbl = lua.create_table()?;
    tbl.set("q", coord.q)?;
    tbl.set("r", coord.r)?;
    Ok(tbl)
}

fn tile_table(lua: &Lua, coord: HexCoord, tile: &Tile) -> mlua::Result<Table> {
    let tbl = lua.create_table()?;
    tbl.set("q", coord.q)?;
    tbl.set("r", coord.r)?;
    tbl.set("terrain", tile.terrain.as_str())?;
    tbl.set("passable", tile.is_passable())?;
    Ok(tbl)
}

pub fn self_table(lua: &Lua, entity: &Entity) -> mlua::Result<Table> {
    let tbl = lua.create_table()?;
    tbl.set("id", entity.id)?;
    tbl.set("position", coord_table(lua, entity.position)?)?;
    tbl.set("role", entity.role.as_str())?;
    tbl.set("energy", entity.energy())?;
    tbl.set("max_energy", entity.max_energy())?;
    Ok(tbl)
}

fn namespace_table(lua: &Lua, bindings: &[Binding]) -> mlua::Result<Table> {
    let tbl = lua.create_table_with_capacity(0, bindings.len())?;
    for (name, func) in bindings {
        tbl.set(*name, func.clone())?;
    }
    Ok(tbl)
}

fn entity_bindings(lua: &Lua) -> mlua::Result<Vec<Binding>> {
    Ok(vec![
        (
            "getId",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, |e| e.id)))?,
        ),
        (
            "getPosition",
            lua.create_function(|lua, ()| match with_current_entity(lua, |e| e.position) {
                Some(position) => coord_table(lua, position).map(Value::Table),
                None => Ok(Value::Nil),
            })?,
        ),
        (
            "getEnergy",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, Entity::energy)))?,
        ),
        (
            "getMaxEnergy",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, Entity::max_energy)))?,
        ),
        (
            "getRole",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, |e| e.role.as_str())))?,
        ),
        (
            "isAlive",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, Entity::is_alive)))?,
        ),
        (
            "isActive",
            lua.create_function(|lua, ()| Ok(with_current_entity(lua, Entity::is_active)))?,
        ),
        (
            "moveTo",
            lua.create_function(|lua, target: Value| {
                let action = decode_coord(&target).map(|target| Action::Move { target });
                Ok(queue_action(lua, action))
            })?,
        ),
        (
            "harvest",
            lua.create_function(|lua, target: Value| {
                let action = decode_coord(&target).map(|target| Action::Harvest { target });
                Ok(queue_action(lua, action))
            })?,
        ),
        (
            // No resource system yet: always refused, nothing is queued.
            "consume",
            lua.create_function(|_lua, _args: MultiValue| Ok(false))?,
        ),
    ])
}

fn world_bindings(lua: &Lua) -> mlua::Result<Vec<Binding>> {
    Ok(vec![
        (
            "getTileAt",
            lua.create_function(|lua, (first, second): (Value, Value)| {
                let Some(coord) = decode_tile_query(&first, &second) else {
                    return Ok(Value::Nil);
                };
                let Some(ctx) = bound_context(lua) else {
                    return Ok(Value::Nil);
                };
                let Ok(world) = ctx.world.try_borrow() else {
                    return Ok(Value::Nil);
                };
                match world.get_tile(coord) {
                    Some(tile) => tile_table(lua, coord, tile).map(Value::Table),
                    None => Ok(Value::Nil),
                }
            })?,
        ),
        (
            "distance",
            lua.create_function(|_lua, (a, b): (Value, Value)| {
                Ok(decode_coord(&a)
                    .zip(decode_coord(&b))
                    .map(|(a, b)| a.distance(b)))
            })?,
        ),
        (
            "neighbors",
            lua.create_function(|lua, center: Value| {
                let Some(center) = decode_coord(&center) else {
                    return Ok(Value::Nil);
                };
                let ring = center
                    .neighbors()
                    .into_iter()
                    .map(|coord| coord_table(lua, coord))
                    .collect::<mlua::Result<Vec<_>>>()?;
                lua.create_sequence_from(ring).map(Value::Table)
            })?,
        ),
        (
            "findEntitiesAt",
            lua.create_function(|lua, at: Value| {
                let Some(at) = decode_coord(&at) else {
                    return Ok(Value::Nil);
                };
                let Some(ctx) = bound_context(lua) else {
                    return Ok(Value::Nil);
                };
                let Ok(store) = ctx.entities.try_borrow() else {
                    return Ok(Value::Nil);
                };
                lua.create_sequence_from(store.ids_at(at))
                    .map(Value::Table)
            })?,
        ),
        (
            // Linear scan over live entities; a spatial index can replace it
            // once entity counts grow.
            "findNearbyEntities",
            lua.create_function(|lua, (center, range, role): (Value, Value, Value)| {
                let (Some(center), Some(range), Some(role)) = (
                    decode_coord(&center),
                    decode_range(&range),
                    decode_role_filter(&role),
                ) else {
                    return Ok(Value::Nil);
                };
                let Some(ctx) = bound_context(lua) else {
                    return Ok(Value::Nil);
                };
                let Ok(store) = ctx.entities.try_borrow() else {
                    return Ok(Value::Nil);
                };
                let ids = store
                    .live()
                    .filter(|e| role.is_none_or(|role| e.role == role))
                    .filter(|e| e.position.distance(center) as f64 <= range)
                    .map(|e| e.id)
                    .collect::<Vec<_>>();
                lua.create_sequence_from(ids).map(Value::Table)
            })?,
        ),
    ])
}
