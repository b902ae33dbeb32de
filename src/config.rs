//! Configuration types for gce-dns.

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DnsError;
use crate::inventory::DEFAULT_API_ENDPOINT;
use crate::naming::NamingRule;
use crate::query::Fallthrough;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Served zones as `zone:project:scope` triples,
    /// e.g. `"example.org.:my-project:internal"`.
    pub zones: Vec<String>,

    /// Project whose instances are listed.
    pub project: String,

    /// Naming template (see [`crate::naming`]).
    pub template: String,

    /// Seconds between the end of one refresh and the start of the next.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// TTL for DNS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Service account key file (JSON) used to authenticate to the Compute API.
    /// When unset, Application Default Credentials are used.
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// Zones whose misses go to the next handler. An empty list means all.
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,

    /// Compute API endpoint.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

/// One `zone:project:scope` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneBinding {
    /// Zone name, fully qualified.
    pub zone: Name,
    /// Project the zone belongs to.
    pub project: String,
    /// Logical grouping label.
    pub scope: String,
}

impl ZoneBinding {
    /// Parse a `zone:project:scope` triple.
    pub fn parse(triple: &str) -> Result<Self, DnsError> {
        let invalid = || DnsError::Config(format!("invalid zone {triple:?}"));

        let mut parts = triple.splitn(3, ':');
        let (Some(zone), Some(project), Some(scope)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if zone.is_empty() || project.is_empty() || scope.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            zone: parse_zone(zone)?,
            project: project.to_string(),
            scope: scope.to_string(),
        })
    }
}

impl DnsConfig {
    /// Parsed zone triples, rejecting malformed and duplicate entries.
    pub fn zone_bindings(&self) -> Result<Vec<ZoneBinding>, DnsError> {
        if self.zones.is_empty() {
            return Err(DnsError::Config("at least one zone is required".into()));
        }

        let mut seen = HashSet::new();
        let mut bindings = Vec::with_capacity(self.zones.len());
        for triple in &self.zones {
            let binding = ZoneBinding::parse(triple)?;
            if !seen.insert(binding.clone()) {
                return Err(DnsError::Config(format!("conflict zone {triple:?}")));
            }
            bindings.push(binding);
        }
        Ok(bindings)
    }

    /// Distinct zone names to serve, in configuration order.
    pub fn zone_origins(&self) -> Result<Vec<Name>, DnsError> {
        let mut origins: Vec<Name> = Vec::new();
        for binding in self.zone_bindings()? {
            if !origins.contains(&binding.zone) {
                origins.push(binding.zone);
            }
        }
        Ok(origins)
    }

    /// Compile the naming template.
    pub fn naming_rule(&self) -> Result<NamingRule, DnsError> {
        if self.template.trim().is_empty() {
            return Err(DnsError::Config("template must not be empty".into()));
        }
        NamingRule::parse(&self.template)
            .map_err(|e| DnsError::Config(format!("invalid template {:?}: {}", self.template, e)))
    }

    /// Fallthrough policy.
    pub fn fallthrough(&self) -> Result<Fallthrough, DnsError> {
        match &self.fallthrough {
            None => Ok(Fallthrough::disabled()),
            Some(zones) if zones.is_empty() => Ok(Fallthrough::all()),
            Some(zones) => {
                let zones = zones
                    .iter()
                    .map(|z| parse_zone(z))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Fallthrough::zones(zones))
            }
        }
    }

    /// Refresh interval as a duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Check everything that can be checked before the refresh loop starts.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.zone_bindings()?;
        if self.project.trim().is_empty() {
            return Err(DnsError::Config("project must not be empty".into()));
        }
        self.naming_rule()?;
        if self.refresh_interval_secs == 0 {
            return Err(DnsError::Config(
                "refresh_interval_secs must be greater than zero".into(),
            ));
        }
        self.fallthrough()?;
        self.soa.validate()?;
        Ok(())
    }
}

/// Environment overlay for the configuration file.
///
/// `GCE_DNS__DNS__PROJECT=p` sets `dns.project`. The list settings
/// `dns.zones` and `dns.fallthrough` take comma-separated values.
pub fn environment() -> config::Environment {
    config::Environment::with_prefix("GCE_DNS")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("dns.zones")
        .with_list_parse_key("dns.fallthrough")
        .try_parsing(true)
}

fn parse_zone(zone: &str) -> Result<Name, DnsError> {
    let mut name = Name::from_ascii(zone)
        .map_err(|e| DnsError::Config(format!("invalid zone name {zone:?}: {e}")))?;
    name.set_fqdn(true);
    Ok(name.to_lowercase())
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "gce_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "gce-dns".to_string()
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.example.com").
    pub mname: String,

    /// Admin email in DNS format (e.g., "admin.example.com" for admin@example.com).
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

fn default_refresh_interval() -> u64 {
    20
}

fn default_ttl() -> u32 {
    3600
}

fn default_api_endpoint() -> String {
    DEFAULT_API_ENDPOINT.to_string()
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    60
}

impl SoaConfig {
    /// Reject nameserver or mailbox values that are not domain names.
    pub fn validate(&self) -> Result<(), DnsError> {
        for (field, value) in [("mname", &self.mname), ("rname", &self.rname)] {
            Name::from_ascii(value)
                .map_err(|e| DnsError::Config(format!("invalid soa.{field} {value:?}: {e}")))?;
        }
        Ok(())
    }
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.example.com".to_string(),
            rname: "admin.example.com".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}
