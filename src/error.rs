//! Error types for gce-dns.

use thiserror::Error;

use crate::inventory::InventoryError;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Listing instances from the inventory source failed
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// The naming template failed to render for an instance
    #[error("Naming template failed for instance {instance}: {source}")]
    Naming {
        /// Instance whose attributes were being rendered.
        instance: String,
        /// Underlying template error.
        #[source]
        source: minijinja::Error,
    },

    /// The naming template rendered something that is not a DNS name
    #[error("Instance {instance} rendered invalid DNS name {name:?}: {reason}")]
    InvalidName {
        /// Instance whose name was rendered.
        instance: String,
        /// The rendered text.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// Instance address is not an IPv4 literal
    #[error("Instance {instance} has invalid address {address:?}")]
    InvalidAddress {
        /// Instance carrying the address.
        instance: String,
        /// The unparsable address text.
        address: String,
    },

    /// Shutdown was requested before the operation completed
    #[error("Cancelled before completion")]
    Cancelled,
}
