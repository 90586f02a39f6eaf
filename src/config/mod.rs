// src/config/mod.rs

//! Configuration loading and validation for taskworker.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate limits and timers (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{ProcessSection, RawWorkerConfig, RetentionSection, WorkerConfig, WorkerSection};
pub use validate::validate_config;
