//! Hickory DNS authority backed by the instance snapshot.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::SoaConfig;
use crate::query::{QueryServer, Resolution};

/// Authority for one configured zone, answering from the shared snapshot.
///
/// Misses in a fallthrough zone return [`LookupControlFlow::Skip`] so the
/// catalog runs the next authority registered for the zone. With no next
/// authority the catalog answers SERVFAIL.
pub struct InstanceAuthority {
    origin: LowerName,
    server: QueryServer,
    soa: Arc<SoaConfig>,
    mname: Name,
    rname: Name,
    ttl: u32,
}

impl InstanceAuthority {
    /// Create an authority for `zone`.
    pub fn new(
        zone: &str,
        server: QueryServer,
        soa: SoaConfig,
        ttl: u32,
    ) -> Result<Self, hickory_proto::ProtoError> {
        let mut name = Name::from_ascii(zone)?;
        name.set_fqdn(true);
        let mname = Name::from_ascii(&soa.mname)?;
        let rname = Name::from_ascii(&soa.rname)?;

        Ok(Self {
            origin: LowerName::from(&name),
            server,
            soa: Arc::new(soa),
            mname,
            rname,
            ttl,
        })
    }

    /// Build the A record set answering `name`.
    fn build_a_records(name: Name, records: Vec<Record>) -> RecordSet {
        let mut record_set = RecordSet::new(name, RecordType::A, 0);
        for record in records {
            record_set.insert(record, 0);
        }
        record_set
    }

    /// Build the SOA record for this zone, serial tracking the snapshot generation.
    fn build_soa_record(&self) -> RecordSet {
        let soa = SOA::new(
            self.mname.clone(),
            self.rname.clone(),
            self.server.store().generation() as u32,
            self.soa.refresh as i32,
            self.soa.retry as i32,
            self.soa.expire as i32,
            self.soa.minimum,
        );

        let name = Name::from(self.origin.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::SOA, 0);
        let mut record = Record::from_rdata(name, self.ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }
}

#[async_trait]
impl Authority for InstanceAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        trace!(name = %name, rtype = ?rtype, "DNS lookup");

        if rtype == RecordType::SOA && *name == self.origin && self.server.store().is_ready() {
            debug!(name = %name, "SOA lookup");
            let record_set = Arc::new(self.build_soa_record());
            return LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)));
        }

        match self.server.resolve(name, rtype) {
            Resolution::Answer(records) => {
                let record_set = Arc::new(Self::build_a_records(Name::from(name.clone()), records));
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            Resolution::NoData => {
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
            }
            Resolution::NameError => {
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
            }
            Resolution::Fallthrough => {
                debug!(name = %name, "declining, next authority consulted");
                LookupControlFlow::Skip
            }
            Resolution::NotReady => LookupControlFlow::Break(Err(LookupError::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "no instance snapshot installed yet",
            )))),
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
