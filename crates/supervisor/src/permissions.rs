// Permissions for the supervisor state directory and record files

use std::fs;
use std::io::Write;
use std::path::Path;

use cftunnel_common::Result;
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Set file permissions to 0600 (owner read/write only)
pub fn set_file_permissions_private(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        debug!("Set file permissions to 0600: {}", path.display());
    }
    Ok(())
}

/// Create a directory (and parents) owned by the current user only.
/// An existing directory keeps whatever mode it already has.
pub fn ensure_private_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    fs::create_dir_all(path)?;
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    debug!("Created state directory: {}", path.display());
    Ok(())
}

/// Replace the contents of a file, creating it with mode 0600
pub fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;

    // a pre-existing file keeps its old mode through open()
    set_file_permissions_private(path)?;
    Ok(())
}
