// cftunnel - Process Control
// Platform seam for terminating and probing processes by id

use std::fmt;
use std::io;

#[cfg(windows)]
use tracing::debug;

/// Operating-system process id
pub type Pid = u32;

/// Hide the console window of helper processes (CREATE_NO_WINDOW)
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How hard to ask a process to go away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM on Unix, `taskkill /T` on Windows
    Graceful,
    /// SIGKILL on Unix, `taskkill /F /T` on Windows
    Forced,
}

/// Termination and liveness by process id.
///
/// Both operations are best-effort. `is_alive` answers whether *a* process
/// with that id exists, not whether it is the one that was started: a recycled
/// id reports a false positive.
pub trait ProcessControl: Send + Sync + fmt::Debug {
    /// Ask the process (and, where the platform supports it, its children) to exit
    fn terminate(&self, pid: Pid, signal: StopSignal) -> io::Result<()>;

    /// Whether a process with this id currently exists
    fn is_alive(&self, pid: Pid) -> bool;
}

/// `ProcessControl` backed by the host operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

#[cfg(unix)]
fn raw_pid(pid: Pid) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid process id {}", pid),
        )),
    }
}

#[cfg(unix)]
impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: Pid, signal: StopSignal) -> io::Result<()> {
        let pid = raw_pid(pid)?;
        let signal = match signal {
            StopSignal::Graceful => libc::SIGTERM,
            StopSignal::Forced => libc::SIGKILL,
        };

        // Tunnels are spawned as process-group leaders, so signal the whole
        // group first. Adopted processes may not lead a group of their own.
        unsafe {
            if libc::kill(-pid, signal) == 0 {
                return Ok(());
            }
            if libc::kill(pid, signal) == 0 {
                return Ok(());
            }
        }
        Err(io::Error::last_os_error())
    }

    fn is_alive(&self, pid: Pid) -> bool {
        let Ok(pid) = raw_pid(pid) else {
            return false;
        };

        // kill(pid, 0) performs the permission and existence checks only
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }

        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EPERM) => true, // exists, owned by someone else
            _ => false,
        }
    }
}

#[cfg(windows)]
fn hidden_command(program: &str) -> std::process::Command {
    use std::os::windows::process::CommandExt;

    let mut command = std::process::Command::new(program);
    command.creation_flags(CREATE_NO_WINDOW);
    command
}

#[cfg(windows)]
impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: Pid, signal: StopSignal) -> io::Result<()> {
        let mut command = hidden_command("taskkill");
        if signal == StopSignal::Forced {
            command.arg("/F");
        }
        let output = command.args(["/T", "/PID", &pid.to_string()]).output()?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("taskkill for pid {} failed: {}", pid, stderr.trim());
            Err(io::Error::new(io::ErrorKind::Other, stderr.trim().to_string()))
        }
    }

    fn is_alive(&self, pid: Pid) -> bool {
        // tasklist exits 0 even when the filter matches nothing
        let output = hidden_command("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .output();

        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&format!("\"{}\"", pid)),
            Err(e) => {
                debug!("tasklist failed for pid {}: {}", pid, e);
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(SystemProcessControl.is_alive(std::process::id()));
    }

    #[test]
    fn test_nonexistent_process_not_alive() {
        // far above the default pid_max on Linux and macOS
        assert!(!SystemProcessControl.is_alive(999_999_999));
    }

    #[test]
    fn test_invalid_pids_rejected() {
        assert!(!SystemProcessControl.is_alive(0));
        assert!(!SystemProcessControl.is_alive(u32::MAX));
        assert_eq!(
            SystemProcessControl
                .terminate(0, StopSignal::Forced)
                .unwrap_err()
                .kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_terminate_missing_process_errors() {
        assert!(SystemProcessControl
            .terminate(999_999_999, StopSignal::Graceful)
            .is_err());
    }

    #[test]
    fn test_terminate_child_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(SystemProcessControl.is_alive(pid));

        SystemProcessControl
            .terminate(pid, StopSignal::Forced)
            .unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!SystemProcessControl.is_alive(pid));
    }
}
