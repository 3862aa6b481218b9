use std::{
    env,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
#[error("node binary '{command}' not found (not a file and not on PATH)")]
pub struct BinaryNotFound {
    pub command: String,
}

/// Resolve a node command to an executable path.
///
/// Commands containing a path separator are taken as-is; bare names are
/// looked up on `PATH`.
pub fn resolve_command(command: &str) -> Result<PathBuf, BinaryNotFound> {
    let not_found = || BinaryNotFound {
        command: command.to_owned(),
    };

    if command.contains('/') {
        let path = Path::new(command);
        if path.is_file() {
            debug!(binary = command, "resolved binary from explicit path");
            return Ok(path.to_path_buf());
        }
        return Err(not_found());
    }

    let path = which_on_path(command).ok_or_else(not_found)?;
    info!(
        binary = command,
        path = %path.display(),
        "resolved binary from PATH"
    );
    Ok(path)
}

fn which_on_path(bin: &str) -> Option<PathBuf> {
    let path_env = env::var_os("PATH")?;
    env::split_paths(&path_env)
        .map(|p| p.join(bin))
        .find(|candidate| candidate.is_file())
}
