//! Typed configuration loading.
//!
//! Configuration is a TOML document loaded once at startup (see [`loader::ConfigStore`]);
//! live components read through an `ArcSwap` snapshot rather than owning a copy.

mod loader;
mod schema;

pub use loader::{ConfigChange, ConfigStore};
pub use schema::*;
