//! Shared test infrastructure for lease-dns integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{Catalog, MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use lease_dns::config::{DnsConfig, RegistrationConfig, SoaConfig};
use lease_dns::server::build_catalog;
use lease_dns::{RegisterError, RegistrationService, RegistryStore};

// --- Constants ---

pub const ZONE: &str = "dyn.example.com";
pub const SECRET: &str = "s3cret";
pub const LEASE: Duration = Duration::from_secs(300);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is emitted as wire bytes and parsed back with
/// `Message::from_vec()`, so assertions see what a client would.
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
        response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

// --- Config builders ---

pub fn test_dns_config(zones: &[&str]) -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        zones: zones.iter().map(|z| z.to_string()).collect(),
        soa: SoaConfig::default(),
    }
}

pub fn test_registration_config() -> RegistrationConfig {
    RegistrationConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        secret: SECRET.to_string(),
        host_timeout: LEASE,
        shutdown_grace: Duration::from_secs(1),
    }
}

// --- Harness ---

/// Registration service and catalog sharing one store.
pub struct TestHarness {
    pub store: RegistryStore,
    pub registration: RegistrationService,
    pub catalog: Catalog,
    next_id: u16,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_zones(&[ZONE])
    }

    pub fn with_zones(zones: &[&str]) -> Self {
        let store = RegistryStore::new();
        let registration = RegistrationService::new(store.clone(), SECRET, LEASE);
        let catalog = build_catalog(&test_dns_config(zones), store.clone())
            .expect("failed to build catalog");
        Self {
            store,
            registration,
            catalog,
            next_id: 0,
        }
    }

    /// Register `peer` under `backend` with the correct secret.
    pub fn register(&self, backend: &str, peer: &str) -> Result<IpAddr, RegisterError> {
        self.registration.register(Some(SECRET.as_bytes()), Some(backend), peer)
    }

    /// Send a query through the catalog.
    pub async fn query(&mut self, name: &str, record_type: RecordType) -> Message {
        self.next_id = self.next_id.wrapping_add(1);
        execute_query(
            &self.catalog,
            name,
            record_type,
            client_src(),
            self.next_id,
        )
        .await
    }
}

pub fn client_src() -> SocketAddr {
    "192.0.2.53:5353".parse().unwrap()
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

/// Build a full `Request` arriving from `src` over UDP.
pub fn build_request(name: &str, record_type: RecordType, src: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, Protocol::Udp)
}

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    src: SocketAddr,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, src, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

// --- Response helpers ---

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

/// Extract AAAA addresses from a response.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// TTLs of all answer records, in answer order.
pub fn answer_ttls(msg: &Message) -> Vec<u32> {
    msg.answers().iter().map(|r| r.ttl()).collect()
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

/// Assert response is an authoritative answer with exactly the expected
/// IPv4 addresses.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    assert!(msg.authoritative(), "answer is not authoritative");
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

/// Assert the response is NXDOMAIN with no answers.
pub fn assert_nxdomain(msg: &Message) {
    assert_response_code(msg, ResponseCode::NXDomain);
    assert!(msg.answers().is_empty(), "unexpected answers: {:?}", msg.answers());
}
