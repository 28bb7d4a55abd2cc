//! Configuration module
//!
//! Layered settings for the cache: TOML file, `IDCACHE_*` environment and the
//! `DATABASE_URL` override, validated once at startup.

pub mod loader;
pub mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
