//! DNS server setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::authority::InstanceAuthority;
use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::inventory::{GceInventory, InventorySource};
use crate::query::QueryServer;
use crate::refresh::RefreshScheduler;
use crate::state::SnapshotStore;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// TCP connection idle timeout.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit state metrics.
async fn metrics_loop(store: SnapshotStore, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(generation = store.generation(), "emitted state metrics");
            }
            _ = cancel.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build a catalog with one [`InstanceAuthority`] per configured zone.
pub fn build_catalog(config: &DnsConfig, server: &QueryServer) -> Result<Catalog, DnsError> {
    let mut catalog = Catalog::new();

    for zone in config.zone_origins()? {
        let authority =
            InstanceAuthority::new(&zone.to_ascii(), server.clone(), config.soa.clone(), config.ttl)?;
        let origin = authority.origin().clone();
        let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
        catalog.upsert(origin, vec![authority]);
        info!(zone = %zone, "registered DNS zone");
    }

    Ok(catalog)
}

/// DNS server answering for GCE instances.
pub struct DnsServer {
    config: DnsConfig,
    store: SnapshotStore,
    inventory: Arc<dyn InventorySource>,
}

impl DnsServer {
    /// Create a server listing instances from the Compute API.
    pub fn new(config: DnsConfig) -> Result<Self, DnsError> {
        let inventory = GceInventory::new(&config.api_endpoint, config.credentials.as_deref())?;
        Ok(Self::with_inventory(config, Arc::new(inventory)))
    }

    /// Create a server over an arbitrary inventory source.
    pub fn with_inventory(config: DnsConfig, inventory: Arc<dyn InventorySource>) -> Self {
        Self {
            config,
            store: SnapshotStore::new(),
            inventory,
        }
    }

    /// Get a reference to the snapshot store.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Serve until `cancel` fires.
    ///
    /// Configuration errors and a failed initial refresh are returned before
    /// any socket is bound.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            project = %self.config.project,
            template = %self.config.template,
            "Starting gce-dns server"
        );

        // Background tasks stop with the server even if it exits on its own.
        let tasks = cancel.child_token();

        let scheduler = RefreshScheduler::new(
            self.inventory.clone(),
            Arc::new(self.config.naming_rule()?),
            self.config.project.clone(),
            self.config.ttl,
            self.config.refresh_interval(),
            self.store.clone(),
        );
        let refresh_handle = match scheduler.start(tasks.clone()).await {
            Ok(handle) => handle,
            Err(DnsError::Cancelled) => {
                info!("Shutdown requested before initial refresh completed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let query_server = QueryServer::new(self.store.clone(), self.config.fallthrough()?);
        let catalog = build_catalog(&self.config, &query_server)?;
        let mut server = ServerFuture::new(catalog);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        self.store.emit_metrics();
        let metrics_handle = tokio::spawn(metrics_loop(self.store.clone(), tasks.clone()));

        info!(
            generation = self.store.generation(),
            "DNS server ready to serve queries"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        tasks.cancel();
        let _ = metrics_handle.await;

        info!("Waiting for refresh loop to stop...");
        let _ = refresh_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
