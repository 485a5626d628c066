//! Shared test infrastructure for the pipeline and store tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};

use glimpse_dns::handler::{
    CatalogHandler, DnsHandler, Peer, Protocol, ResponseWriter, TruncatingHandler,
};
use glimpse_dns::logging::LoggingHandler;
use glimpse_dns::metrics::MetricsHandler;
use glimpse_dns::{Identity, Instance, Store, StoreError};

// --- TestStore ---

/// Scripted store resolving out of in-memory maps, counting calls so
/// tests can assert which questions reach the catalog.
pub struct TestStore {
    pub instances: HashMap<String, Vec<Instance>>,
    pub servers: HashMap<String, Vec<Instance>>,
    pub calls: Arc<AtomicUsize>,
}

impl TestStore {
    pub fn new(
        instances: HashMap<String, Vec<Instance>>,
        servers: HashMap<String, Vec<Instance>>,
    ) -> Self {
        Self {
            instances,
            servers,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Store for TestStore {
    async fn get_instances(&self, identity: &Identity) -> Result<Vec<Instance>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.instances.get(&identity.addr()) {
            Some(instances) => Ok(instances.clone()),
            None => Err(StoreError::NoInstances(identity.addr())),
        }
    }

    async fn get_servers(&self, zone: &str) -> Result<Vec<Instance>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !zone.is_empty() {
            return Ok(self.servers.get(zone).cloned().unwrap_or_default());
        }
        Ok(self.servers.values().flatten().cloned().collect())
    }
}

pub fn instance(host: &str, ip: &str, port: u16) -> Instance {
    Instance {
        host: host.to_string(),
        ip: ip.parse().unwrap(),
        port,
    }
}

// --- CaptureWriter ---

/// Captures the response message for inspection in tests.
pub struct CaptureWriter {
    peer: Peer,
    pub msg: Option<Message>,
}

impl CaptureWriter {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            peer: Peer {
                addr: "127.0.0.1:4321".parse().unwrap(),
                protocol,
            },
            msg: None,
        }
    }
}

#[async_trait]
impl ResponseWriter for CaptureWriter {
    fn peer(&self) -> Peer {
        self.peer
    }

    async fn write(&mut self, res: Message) -> io::Result<()> {
        self.msg = Some(res);
        Ok(())
    }
}

// --- Chain and query helpers ---

/// Build the full middleware chain over `store`:
/// logging -> metrics -> truncation -> core.
pub fn chain<S: Store + 'static>(
    store: S,
    domain: &str,
    max_answers: usize,
) -> impl DnsHandler {
    LoggingHandler::new(MetricsHandler::new(TruncatingHandler::new(
        CatalogHandler::new(store, domain),
        max_answers,
    )))
}

/// Build a query message for `name`.
pub fn question(name: &str, qtype: RecordType) -> Message {
    let mut msg = Message::new();
    msg.set_id(1234);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(qtype);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg
}

/// Execute a query through the chain and return the response.
pub async fn execute_query(
    handler: &impl DnsHandler,
    name: &str,
    qtype: RecordType,
    protocol: Protocol,
) -> Message {
    let mut w = CaptureWriter::new(protocol);
    handler.serve(&mut w, &question(name, qtype)).await;
    w.msg.expect("no response was captured")
}

// --- Response helpers ---

/// Extract `(port, target)` pairs from SRV answers, sorted.
pub fn extract_srv(msg: &Message) -> Vec<(u16, String)> {
    let mut srvs: Vec<(u16, String)> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SRV(srv) => Some((srv.port(), srv.target().to_string())),
            _ => None,
        })
        .collect();
    srvs.sort();
    srvs
}

/// Extract A addresses from a response, sorted.
pub fn extract_a(msg: &Message) -> Vec<std::net::Ipv4Addr> {
    let mut ips: Vec<std::net::Ipv4Addr> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(std::net::Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect();
    ips.sort();
    ips
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        expected,
        msg.response_code(),
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
