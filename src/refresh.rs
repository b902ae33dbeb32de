//! Periodic fetch -> build -> install loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DnsError;
use crate::inventory::InventorySource;
use crate::metrics::{self, RefreshOutcome, Timer};
use crate::naming::NamingRule;
use crate::snapshot::Snapshot;
use crate::state::SnapshotStore;

/// Keeps the snapshot store in sync with the inventory source.
///
/// Cycles never overlap: the next wait starts only after the previous
/// cycle has installed or failed.
pub struct RefreshScheduler {
    source: Arc<dyn InventorySource>,
    rule: Arc<NamingRule>,
    project: String,
    ttl: u32,
    interval: Duration,
    store: SnapshotStore,
}

impl RefreshScheduler {
    /// Create a scheduler writing into `store`.
    pub fn new(
        source: Arc<dyn InventorySource>,
        rule: Arc<NamingRule>,
        project: impl Into<String>,
        ttl: u32,
        interval: Duration,
        store: SnapshotStore,
    ) -> Self {
        Self {
            source,
            rule,
            project: project.into(),
            ttl,
            interval,
            store,
        }
    }

    /// Run the first cycle, then spawn the periodic loop.
    ///
    /// A failed first cycle is returned and nothing is spawned. The returned
    /// handle completes once `cancel` fires and the loop has stopped.
    pub async fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>, DnsError> {
        info!(project = %self.project, interval = ?self.interval, "running initial refresh");
        let generation = self.refresh(&cancel).await?;
        info!(generation, "initial refresh complete");

        Ok(tokio::spawn(self.run(cancel)))
    }

    /// One fetch -> build -> install cycle. Returns the installed generation.
    ///
    /// Observing cancellation at any point prevents the install.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<u64, DnsError> {
        let timer = Timer::start();

        let listed = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(DnsError::Cancelled),
            listed = self.source.list_all_instances(&self.project) => listed,
        };
        let instances = match listed {
            Ok(instances) => instances,
            Err(e) => {
                metrics::record_refresh(RefreshOutcome::FetchFailed, timer.elapsed());
                return Err(e.into());
            }
        };

        let snapshot = match Snapshot::build(&instances, &self.rule, self.ttl) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::record_refresh(RefreshOutcome::BuildFailed, timer.elapsed());
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            return Err(DnsError::Cancelled);
        }

        let generation = self.store.replace(snapshot);
        metrics::record_refresh(RefreshOutcome::Installed, timer.elapsed());
        Ok(generation)
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("refresh loop shutting down");
                    return;
                }

                _ = sleep(self.interval) => {}
            }

            debug!("refreshing instance records");
            match self.refresh(&cancel).await {
                Ok(generation) => debug!(generation, "refresh complete"),
                Err(DnsError::Cancelled) => {
                    debug!("refresh cancelled, loop shutting down");
                    return;
                }
                Err(e @ DnsError::Inventory(_)) => {
                    warn!("Failed to list instances, keeping previous snapshot: {}", e);
                }
                Err(e) => {
                    error!("Failed to build snapshot, keeping previous snapshot: {}", e);
                }
            }
        }
    }
}
