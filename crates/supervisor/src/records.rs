// cftunnel - Persistent State Records
// quick.pid and quick.url let a later invocation find a running quick tunnel

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cftunnel_common::{QuickConfig, Result};
use tracing::{debug, warn};

use crate::permissions;

/// On-disk crash-recovery cache for the supervisor.
///
/// The records are plain text: a decimal process id and a URL. Reads are
/// forgiving (missing, empty or garbled files read as `None`) and removals of
/// files that do not exist succeed silently.
#[derive(Debug, Clone)]
pub struct StateRecords {
    dir: PathBuf,
    pid_path: PathBuf,
    url_path: PathBuf,
}

impl StateRecords {
    pub fn new(config: &QuickConfig) -> Self {
        Self {
            dir: config.state_dir.clone(),
            pid_path: config.pid_path(),
            url_path: config.url_path(),
        }
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    pub fn url_path(&self) -> &Path {
        &self.url_path
    }

    pub fn write_pid(&self, pid: u32) -> Result<()> {
        permissions::ensure_private_directory(&self.dir)?;
        permissions::write_private_file(&self.pid_path, &pid.to_string())?;
        debug!("Wrote pid record {} ({})", self.pid_path.display(), pid);
        Ok(())
    }

    /// Process id from the record, if one is present and well-formed
    pub fn read_pid(&self) -> Option<u32> {
        let contents = read_record(&self.pid_path)?;
        match contents.parse::<u32>() {
            Ok(0) => None,
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(
                    "Ignoring unreadable pid record {}: {}",
                    self.pid_path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn write_endpoint(&self, url: &str) -> Result<()> {
        permissions::ensure_private_directory(&self.dir)?;
        permissions::write_private_file(&self.url_path, url)?;
        debug!("Wrote endpoint record {}", self.url_path.display());
        Ok(())
    }

    pub fn read_endpoint(&self) -> Option<String> {
        read_record(&self.url_path)
    }

    pub fn remove_pid(&self) {
        remove_record(&self.pid_path);
    }

    pub fn remove_endpoint(&self) {
        remove_record(&self.url_path);
    }

    /// Remove both records
    pub fn clear(&self) {
        self.remove_pid();
        self.remove_endpoint();
    }
}

fn read_record(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_record(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed record: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
