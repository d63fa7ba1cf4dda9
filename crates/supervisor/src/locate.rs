// cftunnel - Binary Location
// Finds the cloudflared executable the quick tunnel runs

use std::path::{Path, PathBuf};

use cftunnel_common::{Error, QuickConfig, Result};
use tracing::debug;

/// Resolve the tunnel executable.
///
/// An explicit `binary_path` is used as-is when it exists. Otherwise the
/// first hit wins from: the directory of the running executable, the
/// per-user state directory, then `PATH`.
pub fn locate_binary(config: &QuickConfig) -> Result<PathBuf> {
    if let Some(path) = &config.binary_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(Error::BinaryNotFound {
            searched: path.display().to_string(),
        });
    }

    let name = config.executable_name();
    let candidates = candidate_paths(config, &name);

    for candidate in &candidates {
        if candidate.is_file() {
            debug!("Using tunnel binary {}", candidate.display());
            return Ok(candidate.clone());
        }
    }

    match which::which(&name) {
        Ok(path) => {
            debug!("Using tunnel binary from PATH: {}", path.display());
            Ok(path)
        }
        Err(e) => {
            debug!("{} not found on PATH: {}", name, e);
            let mut searched: Vec<String> = candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            searched.push("PATH".to_string());
            Err(Error::BinaryNotFound {
                searched: searched.join(", "),
            })
        }
    }
}

fn candidate_paths(config: &QuickConfig, name: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = current_exe_dir() {
        candidates.push(dir.join(name));
    }
    candidates.push(config.state_dir.join(name));

    candidates
}

fn current_exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    // resolve symlinks so a linked launcher still finds its siblings
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent().map(Path::to_path_buf)
}
