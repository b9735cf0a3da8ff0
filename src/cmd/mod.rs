//! CLI command implementations.
//!
//! | Module  | Commands handled |
//! |---------|------------------|
//! | `serve` | `Serve`          |
//! | `tail`  | `Tail`           |
//! | `board` | `Board`          |

pub mod board;
pub mod serve;
pub mod tail;

pub use board::cmd_board;
pub use serve::cmd_serve;
pub use tail::cmd_tail;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use taskboard::config::TaskboardConfig;

/// Flags shared by every subcommand that affect logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFlags {
    pub verbose: bool,
    pub json: bool,
}

/// Resolve the watched directory (default: current directory) and load its
/// config with environment overrides applied.
pub fn load_config(watch: Option<&Path>) -> Result<(PathBuf, TaskboardConfig)> {
    let watch_dir = match watch {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let mut config = TaskboardConfig::load_or_default(&watch_dir)?;
    config.apply_env()?;
    Ok((watch_dir, config))
}

/// Apply CLI logging flags, validate, and install the subscriber.
pub fn finish_config(config: &mut TaskboardConfig, flags: LogFlags) -> Result<()> {
    if flags.verbose {
        config.logging.level = "taskboard=debug,info".to_string();
    }
    if flags.json {
        config.logging.json = true;
    }
    config.validate()?;
    taskboard::logging::init(&config.logging);
    Ok(())
}
