//! Query path: snapshot lookup, fallthrough policy and delegation.
//!
//! [`QueryServer::resolve`] makes the decision; the hickory authority and
//! [`QueryServer::serve`] both translate it into a response.

use async_trait::async_trait;
use hickory_proto::op::{Query, ResponseCode};
use hickory_proto::rr::{LowerName, Name, Record, RecordType};
use tracing::{debug, trace};

use crate::metrics::{self, QueryResult, Timer};
use crate::state::SnapshotStore;

/// Zones whose misses are passed to the next handler instead of NXDOMAIN.
#[derive(Debug, Clone, Default)]
pub struct Fallthrough {
    zones: Vec<LowerName>,
}

impl Fallthrough {
    /// No fallthrough: every miss is answered NXDOMAIN.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Fall through for every zone.
    pub fn all() -> Self {
        Self::zones([Name::root()])
    }

    /// Fall through for names at or below any of `zones`.
    pub fn zones(zones: impl IntoIterator<Item = Name>) -> Self {
        Self {
            zones: zones.into_iter().map(|z| LowerName::from(&z)).collect(),
        }
    }

    /// Whether a miss on `name` should be delegated.
    pub fn through(&self, name: &LowerName) -> bool {
        self.zones.iter().any(|zone| zone.zone_of(name))
    }
}

/// Outcome of looking a query up in the current snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Name found with A records; answer with exactly these.
    Answer(Vec<Record>),
    /// Name exists but the query asked for a type we do not hold.
    NoData,
    /// Name absent and its zone falls through: ask the next handler.
    Fallthrough,
    /// Name absent: answer NXDOMAIN.
    NameError,
    /// No snapshot installed yet.
    NotReady,
}

/// Response produced by the query path or by a next handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsResponse {
    /// Response status.
    pub response_code: ResponseCode,
    /// Whether the answer is authoritative.
    pub authoritative: bool,
    /// Answer section.
    pub answers: Vec<Record>,
}

impl DnsResponse {
    /// Authoritative NOERROR carrying `answers`.
    pub fn answer(answers: Vec<Record>) -> Self {
        Self {
            response_code: ResponseCode::NoError,
            authoritative: true,
            answers,
        }
    }

    /// Authoritative response with `code` and no answers.
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            response_code: code,
            authoritative: true,
            answers: Vec::new(),
        }
    }
}

/// Next handler in the delegation chain.
#[async_trait]
pub trait NextHandler: Send + Sync {
    /// Resolve a query this server declined to answer.
    async fn handle(&self, query: &Query) -> DnsResponse;
}

/// Answers queries from the snapshot store. Never writes to it.
#[derive(Debug, Clone)]
pub struct QueryServer {
    store: SnapshotStore,
    fallthrough: Fallthrough,
}

impl QueryServer {
    /// Create a query server over `store` with the given policy.
    pub fn new(store: SnapshotStore, fallthrough: Fallthrough) -> Self {
        Self { store, fallthrough }
    }

    /// The store this server reads.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Decide how to answer `rtype` for an already-normalized `name`.
    pub fn resolve(&self, name: &LowerName, rtype: RecordType) -> Resolution {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();

        if !self.store.is_ready() {
            debug!("no snapshot installed, cannot answer");
            metrics::record_query(&rtype_str, QueryResult::NotReady, timer.elapsed());
            return Resolution::NotReady;
        }

        let snapshot = self.store.current();
        trace!(name = %name, rtype = ?rtype, "snapshot lookup");

        match snapshot.get(name) {
            Some(records) if rtype == RecordType::A || rtype == RecordType::ANY => {
                debug!(name = %name, count = records.len(), "A lookup: returning records");
                metrics::record_answers_returned(records.len());
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                Resolution::Answer(records.to_vec())
            }
            Some(_) => {
                debug!(name = %name, rtype = ?rtype, "name exists, no records of this type");
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                Resolution::NoData
            }
            None if self.fallthrough.through(name) => {
                debug!(name = %name, "no records found, falling through");
                metrics::record_query(&rtype_str, QueryResult::Fallthrough, timer.elapsed());
                Resolution::Fallthrough
            }
            None => {
                debug!(name = %name, "no records found");
                metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                Resolution::NameError
            }
        }
    }

    /// Answer `query`, delegating to `next` when fallthrough applies.
    pub async fn serve(&self, query: &Query, next: &dyn NextHandler) -> DnsResponse {
        let name = LowerName::from(query.name());
        debug!(name = %name, rtype = ?query.query_type(), "received query");

        match self.resolve(&name, query.query_type()) {
            Resolution::Answer(records) => DnsResponse::answer(records),
            Resolution::NoData => DnsResponse::empty(ResponseCode::NoError),
            Resolution::NameError => DnsResponse::empty(ResponseCode::NXDomain),
            Resolution::Fallthrough => next.handle(query).await,
            Resolution::NotReady => DnsResponse::empty(ResponseCode::ServFail),
        }
    }
}
