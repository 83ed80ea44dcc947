//! Standalone host for the ember scripting engine
//!
//! Loads configuration, sets up logging, and drives a small simulated world
//! whose ticks, spawns and despawns reach scripts as events.

pub mod config;
pub mod logging;
pub mod world;

pub use config::{CatalogueConfig, ConfigLoadError, EmberConfig, LoggingConfig, WorldConfig};
pub use logging::{default_filter, init_logging};
pub use world::{run, World};
