// cftunnel - Launcher
// Spawns cloudflared with its diagnostic stream captured

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use cftunnel_common::{Error, QuickConfig, Result};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info};

use crate::locate::locate_binary;
use crate::process::Pid;

/// A freshly spawned tunnel process
#[derive(Debug)]
pub struct SpawnedTunnel {
    pub child: Child,
    pub stderr: ChildStderr,
    pub pid: Pid,
    pub binary: PathBuf,
}

/// Locate the binary and start it bound to `port`.
///
/// stdin and stdout are detached, stderr is piped for the output scanner.
/// The child is not killed when its handle drops: it must outlive the
/// handle so later invocations can adopt it through the pid record.
pub fn spawn_tunnel(config: &QuickConfig, port: u16) -> Result<SpawnedTunnel> {
    let binary = locate_binary(config)?;
    let args = config.args_for_port(port);

    let mut command = Command::new(&binary);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    // own process group, so termination reaches anything it forks and a
    // terminal Ctrl+C is left to the supervisor
    #[cfg(unix)]
    command.process_group(0);

    #[cfg(windows)]
    command.creation_flags(crate::process::CREATE_NO_WINDOW);

    debug!("Spawning {} {}", binary.display(), args.join(" "));
    let mut child = command.spawn().map_err(Error::Spawn)?;

    let Some(pid) = child.id() else {
        return Err(Error::Spawn(io::Error::new(
            io::ErrorKind::Other,
            "process exited before its id could be read",
        )));
    };

    let stderr = capture_stderr(&mut child, pid)?;

    info!("Started {} (pid {}) for local port {}", binary.display(), pid, port);

    Ok(SpawnedTunnel {
        child,
        stderr,
        pid,
        binary,
    })
}

/// Take the piped stderr. Without it the URL can never be read, so the
/// process is killed instead of being left running unsupervised.
fn capture_stderr(child: &mut Child, pid: Pid) -> Result<ChildStderr> {
    match child.stderr.take() {
        Some(stderr) => Ok(stderr),
        None => {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill pid {} after losing its stderr: {}", pid, e);
            }
            Err(Error::Pipe(
                "stderr of the tunnel process was not captured".to_string(),
            ))
        }
    }
}
