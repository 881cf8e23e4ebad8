//! CLI command implementations.

pub mod check;
pub mod run;

pub use check::check;
pub use run::{run, Entry};

use anyhow::{Context, Result};
use botrt_runtime::{BotRuntime, RuntimeConfig};
use std::path::Path;

/// Build a runtime from the config file, falling back to defaults when the
/// file does not exist
fn load_runtime(config_path: &Path) -> Result<BotRuntime> {
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(BotRuntime::new(RuntimeConfig::default()));
    }
    BotRuntime::from_config_file(config_path).context("Failed to load configuration")
}
