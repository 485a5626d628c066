//! Core DNS request handler and the truncation middleware.
//!
//! The handler classifies each question by the shape of its name under
//! the configured zone suffix and answers out of the catalog store:
//! service questions resolve to `A`/`SRV` records, server questions
//! enumerate the catalog agents as `NS`/`A` records, and anything else
//! under the zone is a grammar failure answered with `NXDOMAIN` plus a
//! long-lived SOA hint so resolvers cache the negative response
//! (RFC 2308 section 5).

use std::io;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, NS, SOA, SRV};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};

use crate::name::{classify, parse_identity, parse_server_question, QuestionKind};
use crate::store::{Instance, Store};

/// Time in seconds a positive response can be cached.
pub const DEFAULT_TTL: u32 = 5;

/// Time in seconds an NXDOMAIN response for a question format not
/// supported by the agent can be cached.
pub const INVALID_TTL: u32 = 86400;

/// Transport a request arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Datagram transport, subject to answer truncation.
    Udp,
    /// Stream transport, never truncated.
    Tcp,
}

impl Protocol {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// The remote end of a request.
#[derive(Debug, Clone, Copy)]
pub struct Peer {
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Transport the request arrived over.
    pub protocol: Protocol,
}

/// Sink for a single DNS response.
///
/// Middleware wrap the writer handed to the inner handler; the core
/// writes once and the wrappers post-process in reverse chain order.
#[async_trait]
pub trait ResponseWriter: Send {
    /// The remote end this response goes to.
    fn peer(&self) -> Peer;

    /// Write the response message to the transport.
    async fn write(&mut self, res: Message) -> io::Result<()>;
}

/// A DNS request handler.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    /// Answer `req`, writing exactly one response to `w`.
    async fn serve(&self, w: &mut dyn ResponseWriter, req: &Message);
}

/// Start a reply to `req`: same id, opcode and questions, recursion
/// desired echoed, recursion available always off.
pub fn reply(req: &Message) -> Message {
    let mut res = Message::new();
    res.set_id(req.id());
    res.set_message_type(MessageType::Response);
    res.set_op_code(req.op_code());
    res.set_recursion_desired(req.recursion_desired());
    res.set_recursion_available(false);
    for query in req.queries() {
        res.add_query(query.clone());
    }
    res
}

/// A SERVFAIL reply to `req`, used by the recovery perimeter.
pub fn servfail(req: &Message) -> Message {
    let mut res = reply(req);
    res.set_response_code(ResponseCode::ServFail);
    res
}

/// Handler resolving questions under a zone suffix out of a catalog
/// store.
pub struct CatalogHandler<S> {
    store: S,
    domain: String,
}

impl<S: Store> CatalogHandler<S> {
    /// Create a handler authoritative for `domain`.
    pub fn new(store: S, domain: &str) -> Self {
        let mut domain = domain.to_lowercase();
        if !domain.ends_with('.') {
            domain.push('.');
        }
        Self { store, domain }
    }

    /// Strip the zone suffix, yielding the local name, or `None` when
    /// the question lies outside our authority. The comparison is a
    /// label-boundary suffix match on the lowercased name.
    fn local_name(&self, qname: &str) -> Option<String> {
        if qname == self.domain {
            return Some(String::new());
        }
        qname
            .strip_suffix(&self.domain)
            .and_then(|prefix| prefix.strip_suffix('.'))
            .map(str::to_string)
    }

    async fn service_response(&self, local: &str, query: &Query, res: &mut Message) {
        let qtype = query.query_type();
        if qtype != RecordType::A && qtype != RecordType::SRV {
            return;
        }

        let identity = match parse_identity(local) {
            Ok(identity) => identity,
            Err(_) => {
                res.set_response_code(ResponseCode::NXDomain);
                return;
            }
        };

        match self.store.get_instances(&identity).await {
            Ok(instances) => {
                for instance in &instances {
                    if let Some(rr) = answer_record(query.name(), qtype, instance) {
                        res.add_answer(rr);
                    }
                }
            }
            Err(err) if err.is_no_instances() => {
                res.set_response_code(ResponseCode::NXDomain);
            }
            Err(_) => {
                res.set_response_code(ResponseCode::ServFail);
            }
        }
    }

    async fn server_response(&self, local: &str, query: &Query, res: &mut Message) {
        let qtype = query.query_type();
        if qtype != RecordType::A && qtype != RecordType::NS {
            return;
        }

        let (nameserver, zone) = parse_server_question(local);

        // A specific nameserver is not an NS of itself.
        if nameserver.is_some() && qtype == RecordType::NS {
            return;
        }

        let mut servers = match self.store.get_servers(zone).await {
            Ok(servers) => servers,
            Err(err) if err.is_no_instances() => Vec::new(),
            Err(_) => {
                res.set_response_code(ResponseCode::ServFail);
                return;
            }
        };
        servers.sort_by(|a, b| a.host.cmp(&b.host));

        match nameserver {
            // Enumerate all servers under synthesized ns<N> names that
            // can themselves be resolved.
            None => {
                for (i, server) in servers.iter().enumerate() {
                    let mut server = server.clone();
                    server.host = format!("ns{}.{}", i, query.name());
                    if let Some(rr) = answer_record(query.name(), qtype, &server) {
                        res.add_answer(rr);
                    }
                }
            }
            Some(nameserver) => {
                let index: usize = match nameserver[2..].parse() {
                    Ok(index) => index,
                    Err(_) => {
                        res.set_response_code(ResponseCode::NXDomain);
                        return;
                    }
                };
                if let Some(server) = servers.get(index) {
                    if let Some(rr) = answer_record(query.name(), qtype, server) {
                        res.add_answer(rr);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<S: Store> DnsHandler for CatalogHandler<S> {
    async fn serve(&self, w: &mut dyn ResponseWriter, req: &Message) {
        let mut res = reply(req);

        // http://maradns.samiam.org/multiple.qdcount.html
        let queries = req.queries();
        if queries.is_empty() {
            res.set_response_code(ResponseCode::FormErr);
            let _ = w.write(res).await;
            return;
        }
        if queries.len() > 1 {
            res.set_response_code(ResponseCode::NotImp);
            let _ = w.write(res).await;
            return;
        }

        let query = queries[0].clone();
        let qname = query.name().clone();
        let lower = qname.to_lowercase().to_string();

        let Some(local) = self.local_name(&lower) else {
            res.set_response_code(ResponseCode::NXDomain);
            let _ = w.write(res).await;
            return;
        };

        res.set_authoritative(true);

        match classify(&local) {
            QuestionKind::Service => self.service_response(&local, &query, &mut res).await,
            QuestionKind::Server => self.server_response(&local, &query, &mut res).await,
            QuestionKind::Invalid => {
                res.set_response_code(ResponseCode::NXDomain);
                res.add_additional(soa_record(qname, &self.domain));
            }
        }

        let _ = w.write(res).await;
    }
}

/// Middleware enforcing the UDP answer limit.
///
/// Datagram responses carrying more than `max_answers` records are cut
/// down to the limit with the `TC` flag set so clients retry over TCP.
/// Stream responses pass through unchanged. The decision is based on
/// answer count alone, not wire-byte size.
pub struct TruncatingHandler<H> {
    next: H,
    max_answers: usize,
}

impl<H: DnsHandler> TruncatingHandler<H> {
    /// Wrap `next`, limiting UDP responses to `max_answers` records.
    pub fn new(next: H, max_answers: usize) -> Self {
        Self { next, max_answers }
    }
}

#[async_trait]
impl<H: DnsHandler> DnsHandler for TruncatingHandler<H> {
    async fn serve(&self, w: &mut dyn ResponseWriter, req: &Message) {
        let mut tw = TruncatingWriter {
            inner: w,
            max_answers: self.max_answers,
        };
        self.next.serve(&mut tw, req).await;
    }
}

struct TruncatingWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    max_answers: usize,
}

#[async_trait]
impl ResponseWriter for TruncatingWriter<'_> {
    fn peer(&self) -> Peer {
        self.inner.peer()
    }

    async fn write(&mut self, mut res: Message) -> io::Result<()> {
        if self.peer().protocol == Protocol::Udp && res.answers().len() > self.max_answers {
            let mut answers = res.take_answers();
            answers.truncate(self.max_answers);
            res.insert_answers(answers);
            res.set_truncated(true);
        }

        self.inner.write(res).await
    }
}

fn answer_record(qname: &Name, qtype: RecordType, instance: &Instance) -> Option<Record> {
    let rdata = match qtype {
        RecordType::A => RData::A(A::from(instance.ip)),
        RecordType::SRV => RData::SRV(SRV::new(0, 0, instance.port, fqdn(&instance.host)?)),
        RecordType::NS => RData::NS(NS(fqdn(&instance.host)?)),
        _ => return None,
    };

    let mut record = Record::from_rdata(qname.clone(), DEFAULT_TTL, rdata);
    record.set_dns_class(DNSClass::IN);
    Some(record)
}

fn soa_record(qname: Name, domain: &str) -> Record {
    let ns = Name::from_ascii(format!("ns0.{domain}")).unwrap_or_else(|_| Name::root());
    let mbox = Name::from_ascii(format!("hostmaster.{domain}")).unwrap_or_else(|_| Name::root());
    let serial = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let soa = SOA::new(ns, mbox, serial, 3600, 600, 86400, DEFAULT_TTL);

    let mut record = Record::from_rdata(qname, INVALID_TTL, RData::SOA(soa));
    record.set_dns_class(DNSClass::IN);
    record
}

fn fqdn(host: &str) -> Option<Name> {
    if host.ends_with('.') {
        Name::from_ascii(host).ok()
    } else {
        Name::from_ascii(format!("{host}.")).ok()
    }
}
