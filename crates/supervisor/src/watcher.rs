// cftunnel - Exit Watcher
// Clears supervisor state once the tunnel process is gone, whatever the cause

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::records::StateRecords;
use crate::store::{HandleStore, RunId};

pub struct ExitWatcher {
    run: RunId,
    store: Arc<HandleStore>,
    records: Arc<StateRecords>,
}

impl ExitWatcher {
    pub fn new(run: RunId, store: Arc<HandleStore>, records: Arc<StateRecords>) -> Self {
        Self {
            run,
            store,
            records,
        }
    }

    /// Await the exit future (normally `Child::wait`) and tear down the run.
    ///
    /// State is only cleared when it still belongs to this run, so a watcher
    /// finishing after a stop cannot wipe the records of a newer start.
    pub async fn watch<F>(self, exited: F) -> Option<ExitStatus>
    where
        F: Future<Output = io::Result<ExitStatus>>,
    {
        let (status, description) = match exited.await {
            Ok(status) => (Some(status), status.to_string()),
            Err(e) => {
                warn!("Failed to wait for tunnel process: {}", e);
                (None, format!("wait failed: {}", e))
            }
        };

        if self
            .store
            .finish(self.run, description.clone(), || self.records.clear())
        {
            info!("Quick tunnel exited ({})", description);
        } else {
            debug!(
                "Tunnel process of run {} exited after it was stopped ({})",
                self.run, description
            );
        }

        status
    }
}
