use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::scripting::{
    DEFAULT_SCRIPT_BUDGET_MS, DEFAULT_SCRIPT_HOOK_INSTRUCTION_INTERVAL, MAX_SCRIPT_ERRORS,
};

pub const DEFAULT_MOVE_COST: f64 = 1.0;
pub const DEFAULT_HARVEST_COST: f64 = 2.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub move_cost: f64,
    pub harvest_cost: f64,
    pub max_logged_errors: usize,
    pub limits: ScriptLimits,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            move_cost: DEFAULT_MOVE_COST,
            harvest_cost: DEFAULT_HARVEST_COST,
            max_logged_errors: MAX_SCRIPT_ERRORS,
            limits: ScriptLimits::default(),
        }
    }
}

/// Per-run execution budget enforced by the runtime's instruction hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub budget_ms: u64,
    pub instruction_interval: u32,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        *env_script_limits()
    }
}

impl ScriptLimits {
    fn from_env() -> Self {
        Self {
            budget_ms: env_u64("HEXSIM_SCRIPT_BUDGET_MS", DEFAULT_SCRIPT_BUDGET_MS).max(1),
            instruction_interval: env_u64(
                "HEXSIM_SCRIPT_HOOK_INSTRUCTION_INTERVAL",
                DEFAULT_SCRIPT_HOOK_INSTRUCTION_INTERVAL as u64,
            )
            .clamp(100, 1_000_000) as u32,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_script_limits() -> &'static ScriptLimits {
    static LIMITS: OnceLock<ScriptLimits> = OnceLock::new();
    LIMITS.get_or_init(ScriptLimits::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{ "move_cost": 3.5, "limits": { "budget_ms": 40 } }"#)
                .expect("parse config");
        assert_eq!(config.move_cost, 3.5);
        assert_eq!(config.harvest_cost, DEFAULT_HARVEST_COST);
        assert_eq!(config.max_logged_errors, MAX_SCRIPT_ERRORS);
        assert_eq!(config.limits.budget_ms, 40);
        assert_eq!(
            config.limits.instruction_interval,
            ScriptLimits::default().instruction_interval
        );
    }

    #[test]
    fn malformed_env_values_fall_back() {
        assert_eq!(env_u64("HEXSIM_TEST_UNSET_VARIABLE", 17), 17);
    }
}
