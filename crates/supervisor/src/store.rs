// cftunnel - Process Handle Store
// In-memory state of the quick tunnel owned by this supervisor instance

use std::time::Duration;

use tokio::sync::watch;

use crate::process::Pid;

/// Identifies one start attempt. Background tasks carry it so that they only
/// ever touch state belonging to their own process.
pub type RunId = u64;

/// Where the supervisor is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// A start has claimed the slot and is spawning the process
    Starting { run: RunId },
    /// The process is running (URL may or may not be resolved yet)
    Running { run: RunId, pid: Pid },
}

impl Phase {
    pub fn run(&self) -> Option<RunId> {
        match self {
            Phase::Idle => None,
            Phase::Starting { run } | Phase::Running { run, .. } => Some(*run),
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        match self {
            Phase::Running { pid, .. } => Some(*pid),
            _ => None,
        }
    }
}

/// How a run ended, kept so that a waiting `start` can report it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub run: RunId,
    pub status: String,
    pub last_line: Option<String>,
}

/// Everything guarded by the store's lock
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub phase: Phase,
    pub endpoint: Option<String>,
    /// Most recent diagnostic line of the current run
    pub last_line: Option<String>,
    pub last_exit: Option<ExitReport>,
    runs: RunId,
}

impl Slot {
    fn is_current(&self, run: RunId) -> bool {
        self.phase.run() == Some(run)
    }
}

/// What a bounded wait on a run observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Resolved(String),
    /// The run is no longer current; carries its exit report when it died
    /// on its own rather than being stopped
    Gone(Option<ExitReport>),
    TimedOut,
}

/// Lock-guarded slot for the supervised process.
///
/// Backed by a `watch` channel: every mutation goes through the channel's
/// write lock and wakes waiters, and reads take a short read lock. No lock is
/// ever held across an await point.
///
/// Record writes and removals are passed into the mutations and run under the
/// write lock, so the files on disk change in the same order as the slot: a
/// URL can never be written after the exit or stop that retired its run.
#[derive(Debug)]
pub struct HandleStore {
    slot: watch::Sender<Slot>,
}

impl Default for HandleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleStore {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Slot::default());
        Self { slot }
    }

    pub fn snapshot(&self) -> Slot {
        self.slot.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.slot.borrow().phase
    }

    pub fn pid(&self) -> Option<Pid> {
        self.slot.borrow().phase.pid()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.slot.borrow().endpoint.clone()
    }

    /// Claim the slot for a new run. Returns `None` while another run holds it.
    pub fn reserve(&self) -> Option<RunId> {
        let mut reserved = None;
        self.slot.send_if_modified(|slot| {
            if slot.phase != Phase::Idle {
                return false;
            }
            slot.runs += 1;
            slot.phase = Phase::Starting { run: slot.runs };
            slot.endpoint = None;
            slot.last_line = None;
            reserved = Some(slot.runs);
            true
        });
        reserved
    }

    /// Give back a reservation whose spawn failed
    pub fn release(&self, run: RunId) {
        self.slot.send_if_modified(|slot| {
            if slot.phase != (Phase::Starting { run }) {
                return false;
            }
            slot.phase = Phase::Idle;
            true
        });
    }

    /// Record the spawned process for a reservation, running `persist` under
    /// the lock. Fails without persisting when a stop cleared the
    /// reservation in the meantime.
    pub fn attach(&self, run: RunId, pid: Pid, persist: impl FnOnce(Pid)) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.phase != (Phase::Starting { run }) {
                return false;
            }
            persist(pid);
            slot.phase = Phase::Running { run, pid };
            slot.endpoint = None;
            true
        })
    }

    /// Set the endpoint of a run and `persist` it under the lock. The first
    /// resolution wins; later values and stale runs are ignored.
    pub fn resolve(&self, run: RunId, url: &str, persist: impl FnOnce(&str)) -> bool {
        self.slot.send_if_modified(|slot| {
            if !slot.is_current(run) || slot.endpoint.is_some() {
                return false;
            }
            persist(url);
            slot.endpoint = Some(url.to_string());
            true
        })
    }

    /// Remember the latest diagnostic line of a run
    pub fn note_line(&self, run: RunId, line: &str) {
        // diagnostics only, nobody waits on this
        self.slot.send_if_modified(|slot| {
            if slot.is_current(run) {
                slot.last_line = Some(line.to_string());
            }
            false
        });
    }

    /// Clear the slot after a run's process exited, running `cleanup` under
    /// the lock. Returns false, without cleaning up, when the run was already
    /// retired (stopped, or superseded by a newer run).
    pub fn finish(&self, run: RunId, status: String, cleanup: impl FnOnce()) -> bool {
        self.slot.send_if_modified(|slot| {
            if !slot.is_current(run) {
                return false;
            }
            cleanup();
            slot.last_exit = Some(ExitReport {
                run,
                status,
                last_line: slot.last_line.take(),
            });
            slot.phase = Phase::Idle;
            slot.endpoint = None;
            true
        })
    }

    /// Return the slot to idle if it is still in `expected`, running `cleanup`
    /// under the lock. Returns false when the phase moved on in the meantime.
    pub fn retire(&self, expected: Phase, cleanup: impl FnOnce()) -> bool {
        let mut retired = false;
        self.slot.send_if_modified(|slot| {
            if slot.phase != expected {
                return false;
            }
            cleanup();
            retired = true;
            let modified = slot.phase != Phase::Idle || slot.endpoint.is_some();
            slot.phase = Phase::Idle;
            slot.endpoint = None;
            slot.last_line = None;
            modified
        });
        retired
    }

    /// Wait until the run resolves its endpoint, stops being current, or the
    /// timeout elapses
    pub async fn wait_for_endpoint(&self, run: RunId, timeout: Duration) -> WaitOutcome {
        let mut rx = self.slot.subscribe();
        let observed = tokio::time::timeout(timeout, async {
            rx.wait_for(|slot| !slot.is_current(run) || slot.endpoint.is_some())
                .await
                .map(|slot| slot.clone())
        })
        .await;

        match observed {
            Err(_) => WaitOutcome::TimedOut,
            // the sender lives in `self`, so the channel cannot close here
            Ok(Err(_)) => WaitOutcome::Gone(None),
            Ok(Ok(slot)) => match (&slot.endpoint, slot.is_current(run)) {
                (Some(url), true) => WaitOutcome::Resolved(url.clone()),
                _ => WaitOutcome::Gone(slot.last_exit.filter(|exit| exit.run == run)),
            },
        }
    }
}
