//! Shared test infrastructure for catalog integration tests.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{Catalog, MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use gce_dns::config::{DnsConfig, SoaConfig};
use gce_dns::inventory::{Instance, InventoryError, InventorySource, DEFAULT_API_ENDPOINT};
use gce_dns::{NamingRule, QueryServer, Snapshot, SnapshotStore};

// --- Constants ---

pub const ZONE: &str = "example.org.";
pub const PROJECT: &str = "test-project";
pub const TTL: u32 = 60;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to `Catalog::handle_request()`.
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Inventory ---

/// In-memory inventory whose contents can be swapped between refreshes.
#[derive(Default)]
pub struct StaticInventory {
    instances: Mutex<Vec<Instance>>,
    calls: AtomicUsize,
}

impl StaticInventory {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: Mutex::new(instances),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, instances: Vec<Instance>) {
        *self.instances.lock().unwrap() = instances;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn list_all_instances(&self, _project: &str) -> Result<Vec<Instance>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.instances.lock().unwrap().clone())
    }
}

/// An instance with just a name and address.
pub fn instance(name: &str, ip: &str) -> Instance {
    Instance {
        name: name.to_string(),
        ip: ip.to_string(),
        zone: "us-central1-a".to_string(),
        project: PROJECT.to_string(),
        ..Default::default()
    }
}

/// An instance carrying one label.
pub fn labelled(name: &str, ip: &str, key: &str, value: &str) -> Instance {
    let mut instance = instance(name, ip);
    instance.labels.insert(key.to_string(), value.to_string());
    instance
}

// --- Config builders ---

pub fn test_dns_config(template: &str) -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        zones: vec![format!("{ZONE}:{PROJECT}:internal")],
        project: PROJECT.to_string(),
        template: template.to_string(),
        refresh_interval_secs: 20,
        ttl: TTL,
        credentials: None,
        fallthrough: None,
        api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        soa: SoaConfig::default(),
    }
}

// --- State builder ---

/// Build a store with one installed snapshot.
pub fn ready_store(template: &str, instances: &[Instance]) -> SnapshotStore {
    let rule = NamingRule::parse(template).expect("invalid template");
    let snapshot = Snapshot::build(instances, &rule, TTL).expect("snapshot build failed");
    let store = SnapshotStore::new();
    store.replace(snapshot);
    store
}

/// Build a Catalog for `config` answering from `store`.
pub fn build_catalog(config: &DnsConfig, store: SnapshotStore) -> Catalog {
    let server = QueryServer::new(store, config.fallthrough().expect("invalid fallthrough"));
    gce_dns::server::build_catalog(config, &server).expect("failed to build catalog")
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a fixed client address.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "10.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected addresses.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
