// cftunnel - Quick Tunnel Supervisor
// Lifecycle API: start, stop, is_running, query_endpoint

use std::sync::Arc;
use std::time::Duration;

use cftunnel_common::{Error, QuickConfig, QuickStatus, Result, StopOutcome};
use tracing::{debug, info, warn};

use crate::launcher::{spawn_tunnel, SpawnedTunnel};
use crate::process::{Pid, ProcessControl, StopSignal, SystemProcessControl};
use crate::records::StateRecords;
use crate::scanner::{EndpointMatcher, OutputScanner};
use crate::store::{HandleStore, Phase, WaitOutcome};
use crate::watcher::ExitWatcher;

/// Supervises at most one quick tunnel.
///
/// In-memory state is authoritative; the pid and URL records on disk are a
/// recovery cache consulted only when this instance holds no process, e.g.
/// after a restart or from a second invocation of the program. A process
/// found that way is *adopted*: it can be probed and stopped, but its URL is
/// never rescanned because its output belongs to whoever spawned it.
///
/// Create one per application and share it behind an `Arc`.
#[derive(Debug)]
pub struct Supervisor {
    config: QuickConfig,
    store: Arc<HandleStore>,
    records: Arc<StateRecords>,
    process: Arc<dyn ProcessControl>,
}

impl Supervisor {
    pub fn new(config: QuickConfig) -> Self {
        Self::with_process_control(config, Arc::new(SystemProcessControl))
    }

    pub fn with_process_control(config: QuickConfig, process: Arc<dyn ProcessControl>) -> Self {
        let records = Arc::new(StateRecords::new(&config));
        Self {
            config,
            store: Arc::new(HandleStore::new()),
            records,
            process,
        }
    }

    pub fn config(&self) -> &QuickConfig {
        &self.config
    }

    /// Start a quick tunnel for `http://localhost:<port>`.
    ///
    /// Waits up to `resolve_timeout` for the public URL. `Ok(None)` means the
    /// tunnel is up but has not announced its URL yet; poll
    /// [`query_endpoint`](Self::query_endpoint) afterwards.
    pub async fn start(&self, port: u16) -> Result<Option<String>> {
        let run = self.store.reserve().ok_or(Error::AlreadyRunning)?;

        let SpawnedTunnel {
            child,
            stderr,
            pid,
            ..
        } = match spawn_tunnel(&self.config, port) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.store.release(run);
                return Err(e);
            }
        };

        let attached = self.store.attach(run, pid, |pid| {
            if let Err(e) = self.records.write_pid(pid) {
                warn!("Failed to persist tunnel pid: {}", e);
            }
        });
        if !attached {
            warn!("Quick tunnel was stopped while starting, terminating pid {}", pid);
            if let Err(e) = self.process.terminate(pid, StopSignal::Forced) {
                debug!("Failed to terminate pid {}: {}", pid, e);
            }
            let mut child = child;
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Err(Error::Interrupted);
        }

        let scanner = OutputScanner::new(
            run,
            EndpointMatcher::from_config(&self.config),
            self.store.clone(),
            self.records.clone(),
        );
        tokio::spawn(scanner.run(stderr));

        let watcher = ExitWatcher::new(run, self.store.clone(), self.records.clone());
        let mut child = child;
        tokio::spawn(watcher.watch(async move { child.wait().await }));

        match self
            .store
            .wait_for_endpoint(run, self.config.resolve_timeout())
            .await
        {
            WaitOutcome::Resolved(url) => Ok(Some(url)),
            WaitOutcome::TimedOut => {
                info!(
                    "No URL from the tunnel after {:?}, it may still come up",
                    self.config.resolve_timeout()
                );
                Ok(None)
            }
            WaitOutcome::Gone(Some(exit)) => Err(Error::EarlyExit {
                status: exit.status,
                last_line: exit.last_line,
            }),
            WaitOutcome::Gone(None) => Err(Error::Interrupted),
        }
    }

    /// Stop the tunnel, whether this instance spawned it or adopted it.
    ///
    /// Always clears both records and the in-memory state. Termination is
    /// best-effort: a process still visible after `stop_timeout` is reported
    /// with `confirmed: false`. A start that has not spawned its process yet
    /// is cancelled and reported as such.
    pub async fn stop(&self) -> StopOutcome {
        let clear_records = || self.records.clear();

        let outcome = loop {
            match self.store.phase() {
                phase @ Phase::Starting { .. } => {
                    if self.store.retire(phase, clear_records) {
                        break StopOutcome::StartCancelled;
                    }
                    // the start attached its process or gave up, look again
                }
                phase @ Phase::Running { pid, .. } => {
                    let confirmed = self.terminate_and_wait(pid).await;
                    // no-op when the exit watcher retired the run first
                    self.store.retire(phase, clear_records);
                    break StopOutcome::Stopped { pid, confirmed };
                }
                Phase::Idle => {
                    let outcome = match self.adopted_pid() {
                        Some(pid) => {
                            let confirmed = self.terminate_and_wait(pid).await;
                            StopOutcome::Stopped { pid, confirmed }
                        }
                        None => StopOutcome::NothingToStop,
                    };
                    // a start that began meanwhile owns the records now
                    self.store.retire(Phase::Idle, clear_records);
                    break outcome;
                }
            }
        };

        info!("{}", outcome);
        outcome
    }

    /// Whether a tunnel is running: the in-memory process, else a live pid
    /// from the record
    pub fn is_running(&self) -> bool {
        self.store.pid().is_some() || self.adopted_pid().is_some()
    }

    /// The public URL: in-memory first, then the URL record. No liveness check.
    pub fn query_endpoint(&self) -> Option<String> {
        self.store
            .endpoint()
            .or_else(|| self.records.read_endpoint())
    }

    pub fn status(&self) -> QuickStatus {
        match self.store.pid() {
            Some(pid) => QuickStatus {
                running: true,
                pid: Some(pid),
                url: self.query_endpoint(),
                adopted: false,
            },
            None => {
                let pid = self.adopted_pid();
                QuickStatus {
                    running: pid.is_some(),
                    pid,
                    url: self.query_endpoint(),
                    adopted: pid.is_some(),
                }
            }
        }
    }

    /// Host shutdown hook: stop the tunnel only if this instance spawned it.
    /// Adopted processes are left for whoever owns them.
    pub async fn shutdown(&self) -> Option<StopOutcome> {
        if self.store.pid().is_none() {
            debug!("No quick tunnel owned by this instance at shutdown");
            return None;
        }
        Some(self.stop().await)
    }

    /// Live pid from the record, when this instance holds no process
    fn adopted_pid(&self) -> Option<Pid> {
        let pid = self.records.read_pid()?;
        if self.process.is_alive(pid) {
            Some(pid)
        } else {
            debug!("Pid record {} is stale", pid);
            None
        }
    }

    /// Graceful, then forced termination; true once the process is gone
    async fn terminate_and_wait(&self, pid: Pid) -> bool {
        let grace = self.config.stop_grace();
        let remaining = self.config.stop_timeout().saturating_sub(grace);

        if let Err(e) = self.process.terminate(pid, StopSignal::Graceful) {
            debug!("Graceful termination of pid {} failed: {}", pid, e);
        }
        if self.wait_until_dead(pid, grace).await {
            return true;
        }

        debug!("Pid {} survived {:?}, forcing", pid, grace);
        if let Err(e) = self.process.terminate(pid, StopSignal::Forced) {
            debug!("Forced termination of pid {} failed: {}", pid, e);
        }
        let dead = self.wait_until_dead(pid, remaining).await;
        if !dead {
            warn!("Pid {} still present after stop timeout", pid);
        }
        dead
    }

    async fn wait_until_dead(&self, pid: Pid, budget: Duration) -> bool {
        let probe = async {
            let mut ticker = tokio::time::interval(self.config.poll_interval());
            loop {
                ticker.tick().await;
                if !self.process.is_alive(pid) {
                    break;
                }
            }
        };
        tokio::time::timeout(budget, probe).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;

    /// In-memory process table
    #[derive(Debug, Default)]
    struct FakeProcesses {
        alive: Mutex<HashSet<Pid>>,
        /// pids that ignore graceful termination
        stubborn: Mutex<HashSet<Pid>>,
        /// pids that ignore every signal
        immortal: Mutex<HashSet<Pid>>,
        signals: Mutex<Vec<(Pid, StopSignal)>>,
    }

    impl FakeProcesses {
        fn with_alive(pids: &[Pid]) -> Arc<Self> {
            let fake = Self::default();
            fake.alive.lock().unwrap().extend(pids);
            Arc::new(fake)
        }

        fn signals(&self) -> Vec<(Pid, StopSignal)> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl ProcessControl for FakeProcesses {
        fn terminate(&self, pid: Pid, signal: StopSignal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            let mut alive = self.alive.lock().unwrap();
            if !alive.contains(&pid) {
                return Err(io::Error::from_raw_os_error(3));
            }
            let ignores = self.immortal.lock().unwrap().contains(&pid)
                || (signal == StopSignal::Graceful && self.stubborn.lock().unwrap().contains(&pid));
            if !ignores {
                alive.remove(&pid);
            }
            Ok(())
        }

        fn is_alive(&self, pid: Pid) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    fn supervisor(dir: &std::path::Path, fake: Arc<FakeProcesses>) -> Supervisor {
        let config = QuickConfig {
            state_dir: dir.to_path_buf(),
            binary_path: Some(dir.join("no-cloudflared-here")),
            ..Default::default()
        };
        Supervisor::with_process_control(config, fake)
    }

    #[tokio::test]
    async fn test_fresh_instance_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), FakeProcesses::with_alive(&[]));

        assert!(!sup.is_running());
        assert_eq!(sup.query_endpoint(), None);
        assert_eq!(sup.status(), QuickStatus::default());
    }

    #[tokio::test]
    async fn test_stop_with_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[]);
        let sup = supervisor(dir.path(), fake.clone());

        let outcome = sup.stop().await;
        assert_eq!(outcome, StopOutcome::NothingToStop);
        assert_eq!(outcome.to_string(), "Nothing to stop");
        assert!(fake.signals().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_record_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let records = StateRecords::new(&QuickConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        records
            .write_endpoint("https://foo-bar-baz.trycloudflare.com")
            .unwrap();

        let sup = supervisor(dir.path(), FakeProcesses::with_alive(&[]));
        assert_eq!(
            sup.query_endpoint().as_deref(),
            Some("https://foo-bar-baz.trycloudflare.com")
        );
        // no process behind it
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_live_pid_record_is_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), FakeProcesses::with_alive(&[777]));
        sup.records.write_pid(777).unwrap();

        assert!(sup.is_running());
        let status = sup.status();
        assert!(status.running);
        assert!(status.adopted);
        assert_eq!(status.pid, Some(777));
    }

    #[tokio::test]
    async fn test_stale_pid_record_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[]);
        let sup = supervisor(dir.path(), fake.clone());
        sup.records.write_pid(777).unwrap();

        assert!(!sup.is_running());
        assert_eq!(sup.stop().await, StopOutcome::NothingToStop);
        assert!(fake.signals().is_empty());
        assert!(!sup.records.pid_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_adopted_process() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[777]);
        let sup = supervisor(dir.path(), fake.clone());
        sup.records.write_pid(777).unwrap();
        sup.records
            .write_endpoint("https://adopted.trycloudflare.com")
            .unwrap();

        let outcome = sup.stop().await;
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: 777,
                confirmed: true
            }
        );
        assert_eq!(fake.signals(), vec![(777, StopSignal::Graceful)]);
        assert!(!sup.is_running());
        assert_eq!(sup.query_endpoint(), None);
        assert!(!sup.records.pid_path().exists());
        assert!(!sup.records.url_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_forced() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[888]);
        fake.stubborn.lock().unwrap().insert(888);
        let sup = supervisor(dir.path(), fake.clone());
        sup.records.write_pid(888).unwrap();

        let outcome = sup.stop().await;
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: 888,
                confirmed: true
            }
        );
        assert_eq!(
            fake.signals(),
            vec![(888, StopSignal::Graceful), (888, StopSignal::Forced)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_when_process_will_not_die() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[999]);
        fake.immortal.lock().unwrap().insert(999);
        let sup = supervisor(dir.path(), fake.clone());
        sup.records.write_pid(999).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = sup.stop().await;

        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: 999,
                confirmed: false
            }
        );
        assert!(started.elapsed() <= Duration::from_millis(1100));
        // state is cleared regardless
        assert!(!sup.records.pid_path().exists());
    }

    #[tokio::test]
    async fn test_start_fails_without_binary() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), FakeProcesses::with_alive(&[]));

        assert!(matches!(
            sup.start(8080).await,
            Err(Error::BinaryNotFound { .. })
        ));
        // the reservation is released and nothing was written
        assert!(matches!(
            sup.start(8080).await,
            Err(Error::BinaryNotFound { .. })
        ));
        assert!(!sup.records.pid_path().exists());
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_start_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), FakeProcesses::with_alive(&[]));
        let run = sup.store.reserve().unwrap();
        sup.store.attach(run, 4242, |_| {});

        assert!(matches!(sup.start(8080).await, Err(Error::AlreadyRunning)));
        assert_eq!(sup.store.pid(), Some(4242));
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_start() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[4242]);
        let sup = supervisor(dir.path(), fake.clone());
        let run = sup.store.reserve().unwrap();

        let outcome = sup.stop().await;
        assert_eq!(outcome, StopOutcome::StartCancelled);
        assert!(!outcome.was_running());
        assert!(fake.signals().is_empty());

        // the start finishing its spawn afterwards leaves no pid record
        let records = sup.records.clone();
        assert!(!sup
            .store
            .attach(run, 4242, |pid| records.write_pid(pid).unwrap()));
        assert!(!records.pid_path().exists());
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_of_stopped_run_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[4242]);
        let sup = supervisor(dir.path(), fake.clone());
        let records = sup.records.clone();
        let run = sup.store.reserve().unwrap();
        assert!(sup
            .store
            .attach(run, 4242, |pid| records.write_pid(pid).unwrap()));
        assert_eq!(records.read_pid(), Some(4242));

        assert!(sup.stop().await.was_running());
        assert!(!records.pid_path().exists());

        // output and exit of the stopped run arriving late
        assert!(!sup.store.resolve(run, "https://late.trycloudflare.com", |url| {
            records.write_endpoint(url).unwrap()
        }));
        assert!(!sup
            .store
            .finish(run, "signal: 15".to_string(), || records.clear()));
        assert!(!records.url_path().exists());
        assert_eq!(sup.query_endpoint(), None);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_adopted_process() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[777]);
        let sup = supervisor(dir.path(), fake.clone());
        sup.records.write_pid(777).unwrap();

        assert_eq!(sup.shutdown().await, None);
        assert!(fake.signals().is_empty());
        assert!(sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_owned_process() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeProcesses::with_alive(&[4242]);
        let sup = supervisor(dir.path(), fake.clone());
        let run = sup.store.reserve().unwrap();
        sup.store.attach(run, 4242, |_| {});
        sup.records.write_pid(4242).unwrap();

        assert_eq!(
            sup.shutdown().await,
            Some(StopOutcome::Stopped {
                pid: 4242,
                confirmed: true
            })
        );
        assert!(!sup.is_running());
    }
}
