//! Application configuration module.
//!
//! Reads the TOML config file naming the guide provider, the channels to
//! watch and the times to look up on each of them.

#[allow(clippy::module_inception)]
mod config;
mod paths;

#[allow(clippy::module_name_repetitions)]
pub use config::AppConfig;
pub use paths::resolve_config_path;
