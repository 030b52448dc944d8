//! Configuration for the `atl` CLI.
//!
//! The configuration root is resolved once at startup into an [`AppDirs`]
//! value and handed to everything that touches the filesystem.

pub mod dirs;
pub mod error;
pub mod fs;
pub mod loader;
pub mod schema;

pub use {
    dirs::AppDirs,
    error::ConfigError,
    loader::{load_config, save_config},
    schema::{CONFIG_VERSION, Config, HostConfig, OAuthAppConfig, OutputFormat, Preferences},
};
