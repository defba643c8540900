pub mod config;
pub mod entities;
pub mod hex;
pub mod plugin;
pub mod scenario;
pub mod scripting;
pub mod simulation;
pub mod world;
