//! Data directory for persistent storage.
//!
//! Defaults to `~/.swaz/`; overridable from the config file or `--data-dir`.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

/// Directory name used under the home directory.
const DEFAULT_DIR_NAME: &str = ".swaz";

/// Resolve the data directory: explicit override first, then `~/.swaz/`.
pub fn resolve(custom: Option<&Path>) -> Result<PathBuf> {
    match custom {
        Some(p) => Ok(p.to_path_buf()),
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_DIR_NAME))
            .ok_or_else(|| anyhow!("No home directory found; pass --data-dir")),
    }
}
