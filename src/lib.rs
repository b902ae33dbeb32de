//! GCE DNS - An authoritative DNS server for Compute Engine instances.
//!
//! This crate answers A queries for names derived from the live instance
//! inventory of a GCP project. A background task polls the inventory on a
//! fixed interval, renders every instance's name through a user-supplied
//! template, and swaps the resulting snapshot in for the query path.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           gce-dns                               │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Inventory Source │───▶│ Snapshot builder │                  │
//! │  │ (Compute API)    │    │ (naming rule)    │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │         ▲                         │ replace                     │
//! │         │ every interval          ▼                             │
//! │  ┌──────┴───────────┐    ┌──────────────────┐                  │
//! │  │ Refresh loop     │    │  Snapshot store  │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │                                   │ lookup                      │
//! │                                   ▼                             │
//! │                          ┌──────────────────┐                  │
//! │                          │  Hickory DNS     │◀── UDP/TCP       │
//! │                          │  authority       │                  │
//! │                          └──────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web-1.example.org. A
//!   → lookup in current snapshot
//!   → found: authoritative answer with one A record per instance
//!   → missing, zone in fallthrough: next authority in the chain
//!   → missing otherwise: NXDOMAIN
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use gce_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     let cancel = CancellationToken::new();
//!
//!     let server = DnsServer::new(config.dns).unwrap();
//!     server.run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod naming;
pub mod query;
pub mod refresh;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, SoaConfig, TelemetryConfig, ZoneBinding};
pub use error::DnsError;
pub use inventory::{AccessTokens, GceInventory, GcpTokens, Instance, InventoryError, InventorySource};
pub use naming::NamingRule;
pub use query::{DnsResponse, Fallthrough, NextHandler, QueryServer, Resolution};
pub use refresh::RefreshScheduler;
pub use server::DnsServer;
pub use snapshot::Snapshot;
pub use state::SnapshotStore;
