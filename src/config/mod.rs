// src/config/mod.rs

//! Runtime configuration for dtexec.
//!
//! Responsibilities:
//! - Define the timing/sizing knobs and their TOML form (`model.rs`).
//! - Load an optional override file (`loader.rs`).
//! - Validate the knobs before the reactor derives tick bounds (`validate.rs`).
//! - Snapshot the environment variables the supervisor reacts to (`env.rs`).

pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use env::Environment;
pub use loader::{load_and_validate, load_from_path, resolve_tunables};
pub use model::{RawTunables, Tunables};
