use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, LuaOptions, RegistryKey, StdLib, Value, VmState};

use crate::config::ScriptLimits;
use crate::scripting::error::ScriptRuntimeError;

/// Base functions that reach the filesystem or accept precompiled bytecode.
const REMOVED_BASE_FUNCTIONS: [&str; 4] = ["dofile", "loadfile", "load", "loadstring"];

/// Owns the single Lua state shared by every entity script. All marshalling of
/// primitive globals goes through here; the rest of the crate never creates
/// its own Lua state.
pub struct ScriptRuntime {
    lua: Lua,
    compiled: HashMap<String, (u64, RegistryKey)>,
    used: HashSet<String>,
    limits: ScriptLimits,
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

impl ScriptRuntime {
    pub fn new(limits: ScriptLimits) -> Result<Self, ScriptRuntimeError> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::new(),
        )
        .map_err(|e| ScriptRuntimeError::Initialization(e.to_string()))?;
        let globals = lua.globals();
        for name in REMOVED_BASE_FUNCTIONS {
            globals
                .raw_set(name, Value::Nil)
                .map_err(|e| ScriptRuntimeError::Initialization(e.to_string()))?;
        }
        Ok(Self {
            lua,
            compiled: HashMap::new(),
            used: HashSet::new(),
            limits,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn limits(&self) -> ScriptLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: ScriptLimits) {
        self.limits = limits;
    }

    /// Compiles `source` (or reuses the chunk compiled for `name` if the source
    /// is unchanged) and executes it against the current globals.
    pub fn run(&mut self, name: &str, source: &str) -> Result<(), ScriptRuntimeError> {
        let chunk = self.compile(name, source)?;
        self.call_with_budget(|| chunk.call::<()>(()))
    }

    fn compile(&mut self, name: &str, source: &str) -> Result<Function, ScriptRuntimeError> {
        let hash = source_hash(source);
        self.used.insert(name.to_string());
        if let Some((cached_hash, key)) = self.compiled.get(name) {
            if *cached_hash == hash {
                if let Ok(chunk) = self.lua.registry_value::<Function>(key) {
                    return Ok(chunk);
                }
            }
        }

        let chunk = self.lua.load(source).set_name(name).into_function()?;
        let key = self.lua.create_registry_value(chunk.clone())?;
        self.compiled.insert(name.to_string(), (hash, key));
        Ok(chunk)
    }

    /// Releases chunks that were not run since the previous call.
    pub fn end_pass(&mut self) {
        let used = std::mem::take(&mut self.used);
        self.compiled.retain(|name, _| used.contains(name));
        self.lua.expire_registry_values();
    }

    pub fn cached_chunks(&self) -> usize {
        self.compiled.len()
    }

    fn call_with_budget<T, F>(&self, f: F) -> Result<T, ScriptRuntimeError>
    where
        F: FnOnce() -> mlua::Result<T>,
    {
        let budget_ms = self.limits.budget_ms;
        let max_duration = Duration::from_millis(budget_ms);
        let started = Instant::now();
        let exhausted = Rc::new(Cell::new(false));
        let tripped = exhausted.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.limits.instruction_interval.max(1)),
            move |_lua, _debug| {
                if started.elapsed() >= max_duration {
                    tripped.set(true);
                    return Err(mlua::Error::RuntimeError(format!(
                        "script execution budget exceeded ({budget_ms}ms)"
                    )));
                }
                Ok(VmState::Continue)
            },
        );
        let out = f();
        self.lua.remove_hook();
        match out {
            Ok(value) => Ok(value),
            Err(_) if exhausted.get() => Err(ScriptRuntimeError::ResourceExhausted { budget_ms }),
            Err(err) => Err(err.into()),
        }
    }

    fn global(&self, name: &str) -> Result<Value, ScriptRuntimeError> {
        Ok(self.lua.globals().raw_get::<Value>(name)?)
    }

    pub fn get_global_number(&self, name: &str) -> Result<f64, ScriptRuntimeError> {
        match self.global(name)? {
            Value::Nil => Err(ScriptRuntimeError::NotFound(name.to_string())),
            Value::Integer(i) => Ok(i as f64),
            Value::Number(n) => Ok(n),
            other => Err(ScriptRuntimeError::TypeMismatch {
                name: name.to_string(),
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    pub fn set_global_number(&self, name: &str, value: f64) -> Result<(), ScriptRuntimeError> {
        Ok(self.lua.globals().raw_set(name, value)?)
    }

    pub fn get_global_string(&self, name: &str) -> Result<String, ScriptRuntimeError> {
        match self.global(name)? {
            Value::Nil => Err(ScriptRuntimeError::NotFound(name.to_string())),
            Value::String(s) => Ok(s.to_str()?.to_string()),
            other => Err(ScriptRuntimeError::TypeMismatch {
                name: name.to_string(),
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    pub fn set_global_string(&self, name: &str, value: &str) -> Result<(), ScriptRuntimeError> {
        Ok(self.lua.globals().raw_set(name, value)?)
    }

    pub fn clear_global(&self, name: &str) -> Result<(), ScriptRuntimeError> {
        Ok(self.lua.globals().raw_set(name, Value::Nil)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> ScriptRuntime {
        ScriptRuntime::new(ScriptLimits {
            budget_ms: 1_000,
            instruction_interval: 1_000,
        })
        .expect("create runtime")
    }

    #[test]
    fn run_keeps_globals_readable() {
        let mut rt = runtime();
        rt.run("setup", "answer = 40 + 2\ngreeting = 'hi'")
            .expect("run script");
        assert_eq!(rt.get_global_number("answer").expect("answer"), 42.0);
        assert_eq!(rt.get_global_string("greeting").expect("greeting"), "hi");

        rt.set_global_number("answer", 7.5).expect("set number");
        rt.set_global_string("greeting", "bye").expect("set string");
        rt.run("check", "echo = answer * 2 .. greeting").expect("run");
        assert_eq!(rt.get_global_string("echo").expect("echo"), "15bye");
    }

    #[test]
    fn typed_accessors_distinguish_missing_and_mismatched() {
        let mut rt = runtime();
        rt.run("setup", "name = 'scout'\ncount = 3").expect("run");

        assert!(matches!(
            rt.get_global_number("missing"),
            Err(ScriptRuntimeError::NotFound(ref n)) if n == "missing"
        ));
        assert!(matches!(
            rt.get_global_number("name"),
            Err(ScriptRuntimeError::TypeMismatch { expected: "number", found: "string", .. })
        ));
        assert!(matches!(
            rt.get_global_string("count"),
            Err(ScriptRuntimeError::TypeMismatch { expected: "string", .. })
        ));
    }

    #[test]
    fn syntax_errors_do_not_execute_anything() {
        let mut rt = runtime();
        let err = rt
            .run("broken", "touched = true\nif then")
            .expect_err("syntax error");
        assert!(matches!(err, ScriptRuntimeError::Syntax(_)));
        assert!(matches!(
            rt.get_global_number("touched"),
            Err(ScriptRuntimeError::NotFound(_)) | Err(ScriptRuntimeError::TypeMismatch { .. })
        ));
        assert_eq!(rt.cached_chunks(), 0);
    }

    #[test]
    fn runtime_errors_keep_earlier_side_effects() {
        let mut rt = runtime();
        let err = rt
            .run("partial", "before = 1\nerror('stop here')\nafter = 2")
            .expect_err("runtime error");
        assert!(matches!(err, ScriptRuntimeError::Runtime(ref m) if m.contains("stop here")));
        assert_eq!(rt.get_global_number("before").expect("before"), 1.0);
        assert!(rt.get_global_number("after").is_err());
    }

    #[test]
    fn budget_hook_interrupts_and_recovers() {
        let mut rt = runtime();
        rt.set_limits(ScriptLimits {
            budget_ms: 0,
            instruction_interval: 1,
        });
        let err = rt
            .run("spin", "while true do end")
            .expect_err("budget exceeded");
        assert!(matches!(
            err,
            ScriptRuntimeError::ResourceExhausted { budget_ms: 0 }
        ));

        rt.set_limits(ScriptLimits {
            budget_ms: 1_000,
            instruction_interval: 1_000,
        });
        rt.run("ok", "recovered = 42").expect("run after budget error");
        assert_eq!(rt.get_global_number("recovered").expect("recovered"), 42.0);
    }

    #[test]
    fn sandbox_strips_file_and_bytecode_loaders() {
        let mut rt = runtime();
        rt.run(
            "probe",
            "has_io = io ~= nil\nhas_os = os ~= nil\nhas_dofile = dofile ~= nil\nhas_load = load ~= nil\nhas_math = math ~= nil",
        )
        .expect("probe");
        let flag = |name: &str| {
            rt.lua()
                .globals()
                .get::<bool>(name)
                .expect("boolean global")
        };
        assert!(!flag("has_io"));
        assert!(!flag("has_os"));
        assert!(!flag("has_dofile"));
        assert!(!flag("has_load"));
        assert!(flag("has_math"));
    }

    #[test]
    fn compiled_chunks_are_cached_per_name_and_expired() {
        let mut rt = runtime();
        rt.run("a", "counter = (counter or 0) + 1").expect("run a");
        rt.run("a", "counter = (counter or 0) + 1").expect("run a again");
        rt.run("b", "other = true").expect("run b");
        assert_eq!(rt.cached_chunks(), 2);
        assert_eq!(rt.get_global_number("counter").expect("counter"), 2.0);

        rt.end_pass();
        assert_eq!(rt.cached_chunks(), 2);
        rt.run("a", "counter = counter + 10").expect("changed source");
        rt.end_pass();
        assert_eq!(rt.cached_chunks(), 1);
        assert_eq!(rt.get_global_number("counter").expect("counter"), 12.0);
    }
}
