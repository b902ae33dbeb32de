//! Immutable name -> A records mapping for one refresh generation.

use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::DnsError;
use crate::inventory::Instance;
use crate::naming::NamingRule;

/// One generation of records, keyed by normalized fully-qualified name.
///
/// Never mutated after [`Snapshot::build`]; each refresh builds a new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: HashMap<LowerName, Vec<Record>>,
    record_count: usize,
}

impl Snapshot {
    /// A snapshot with no names.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from an instance list.
    ///
    /// Each instance contributes one A record under the name rendered by
    /// `rule`. Instances rendering the same name are grouped, in input order.
    /// Any template, name or address failure aborts the whole build.
    pub fn build(instances: &[Instance], rule: &NamingRule, ttl: u32) -> Result<Self, DnsError> {
        let mut records: HashMap<LowerName, Vec<Record>> =
            HashMap::with_capacity(instances.len() / 2);

        for instance in instances {
            let name = render_name(instance, rule)?;
            let ip: Ipv4Addr =
                instance
                    .ip
                    .parse()
                    .map_err(|_| DnsError::InvalidAddress {
                        instance: instance.name.clone(),
                        address: instance.ip.clone(),
                    })?;

            let mut record = Record::from_rdata(name.clone(), ttl, RData::A(A::from(ip)));
            record.set_dns_class(DNSClass::IN);
            debug!(instance = %instance.name, name = %name, %ip, "found instance record");

            records.entry(LowerName::from(&name)).or_default().push(record);
        }

        Ok(Self {
            records,
            record_count: instances.len(),
        })
    }

    /// Records under `name`, in build order.
    pub fn get(&self, name: &LowerName) -> Option<&[Record]> {
        self.records.get(name).map(Vec::as_slice)
    }

    /// Whether `name` has any records.
    pub fn contains(&self, name: &LowerName) -> bool {
        self.records.contains_key(name)
    }

    /// Number of distinct names.
    pub fn name_count(&self) -> usize {
        self.records.len()
    }

    /// Total number of records across all names.
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

/// Render and parse an instance's name, made fully qualified and lowercased.
fn render_name(instance: &Instance, rule: &NamingRule) -> Result<Name, DnsError> {
    let rendered = rule.render(instance).map_err(|source| DnsError::Naming {
        instance: instance.name.clone(),
        source,
    })?;

    let invalid = |reason: String| DnsError::InvalidName {
        instance: instance.name.clone(),
        name: rendered.clone(),
        reason,
    };

    if rendered.is_empty() || rendered == "." {
        return Err(invalid("empty name".to_string()));
    }

    let mut name = Name::from_ascii(&rendered).map_err(|e| invalid(e.to_string()))?;
    name.set_fqdn(true);
    Ok(name.to_lowercase())
}
