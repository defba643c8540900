use thiserror::Error;

use crate::entities::EntityId;

/// Failures surfaced by the script runtime wrapper.
#[derive(Debug, Error)]
pub enum ScriptRuntimeError {
    #[error("failed to initialize script runtime: {0}")]
    Initialization(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script exceeded its execution budget of {budget_ms}ms")]
    ResourceExhausted { budget_ms: u64 },

    #[error("global `{0}` is not defined")]
    NotFound(String),

    #[error("global `{name}` is a {found}, expected a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl ScriptRuntimeError {
    pub fn kind(&self) -> ScriptFaultKind {
        match self {
            ScriptRuntimeError::Syntax(_) => ScriptFaultKind::Syntax,
            ScriptRuntimeError::ResourceExhausted { .. } => ScriptFaultKind::ResourceExhausted,
            _ => ScriptFaultKind::Runtime,
        }
    }
}

impl From<mlua::Error> for ScriptRuntimeError {
    fn from(err: mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => ScriptRuntimeError::Syntax(message),
            other => ScriptRuntimeError::Runtime(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFaultKind {
    Syntax,
    Runtime,
    ResourceExhausted,
    Memory,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The script left something in `memory` that cannot be persisted.
    #[error("memory of entity {entity} holds an unsupported value: {message}")]
    Unsupported { entity: EntityId, message: String },

    /// Moving the table across the host boundary failed.
    #[error("memory of entity {entity} could not be transferred: {message}")]
    Persistence { entity: EntityId, message: String },
}

impl MemoryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::Persistence { .. })
    }
}

/// Host-side failures that abort a whole tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("failed to bind script context for entity {entity}: {message}")]
    Binding { entity: EntityId, message: String },
}
