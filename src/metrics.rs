//! Metrics instrumentation for glimpse-dns.
//!
//! All series are prefixed with `glimpse_agent.` and exposed through
//! the Prometheus exporter on the HTTP address.

use std::io;
use std::time::Instant;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use metrics::{counter, gauge, histogram};

use crate::error::StoreError;
use crate::handler::{DnsHandler, Peer, ResponseWriter};
use crate::name::Identity;
use crate::store::{Instance, Store};

/// Stable label for a response code.
pub fn rcode_label(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::NoError => "noerror",
        ResponseCode::FormErr => "formerr",
        ResponseCode::ServFail => "servfail",
        ResponseCode::NXDomain => "nxdomain",
        ResponseCode::NotImp => "notimp",
        ResponseCode::Refused => "refused",
        _ => "other",
    }
}

/// Stable label for a question type.
pub fn qtype_label(req: &Message) -> String {
    match req.queries().first() {
        Some(query) => query.query_type().to_string().to_lowercase(),
        None => "unknown".to_string(),
    }
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

/// DNS middleware recording one latency sample per request, labelled
/// by protocol, question type, and response code.
///
/// The response is buffered so the final rcode is observable after the
/// inner chain has run, then forwarded to the real writer.
pub struct MetricsHandler<H> {
    next: H,
}

impl<H: DnsHandler> MetricsHandler<H> {
    /// Wrap `next` with request metrics.
    pub fn new(next: H) -> Self {
        Self { next }
    }
}

#[async_trait]
impl<H: DnsHandler> DnsHandler for MetricsHandler<H> {
    async fn serve(&self, w: &mut dyn ResponseWriter, req: &Message) {
        let timer = Timer::start();
        let peer = w.peer();
        let qtype = qtype_label(req);

        let mut buffer = BufferedWriter { peer, msg: None };
        self.next.serve(&mut buffer, req).await;

        let mut rcode = "unknown";
        if let Some(msg) = buffer.msg {
            rcode = rcode_label(msg.response_code());
            let _ = w.write(msg).await;
        }

        histogram!(
            "glimpse_agent.dns.request_duration_seconds",
            "protocol" => peer.protocol.as_str(),
            "qtype" => qtype,
            "rcode" => rcode,
        )
        .record(timer.elapsed().as_secs_f64());
    }
}

struct BufferedWriter {
    peer: Peer,
    msg: Option<Message>,
}

#[async_trait]
impl ResponseWriter for BufferedWriter {
    fn peer(&self) -> Peer {
        self.peer
    }

    async fn write(&mut self, res: Message) -> io::Result<()> {
        self.msg = Some(res);
        Ok(())
    }
}

/// Store decorator recording latency, error, and instance-count
/// metrics per operation.
pub struct MetricsStore<S> {
    next: S,
}

impl<S: Store> MetricsStore<S> {
    /// Wrap `next` with store metrics.
    pub fn new(next: S) -> Self {
        Self { next }
    }
}

#[async_trait]
impl<S: Store> Store for MetricsStore<S> {
    async fn get_instances(&self, identity: &Identity) -> Result<Vec<Instance>, StoreError> {
        let timer = Timer::start();
        let result = self.next.get_instances(identity).await;

        let error = track("get_instances", timer, &result);

        gauge!(
            "glimpse_agent.store.instances",
            "service" => identity.service.clone(),
            "job" => identity.job.clone(),
            "env" => identity.env.clone(),
            "product" => identity.product.clone(),
            "zone" => identity.zone.clone(),
            "operation" => "get_instances",
            "error" => error,
        )
        .set(result.as_ref().map(Vec::len).unwrap_or(0) as f64);

        result
    }

    async fn get_servers(&self, zone: &str) -> Result<Vec<Instance>, StoreError> {
        let timer = Timer::start();
        let result = self.next.get_servers(zone).await;
        track("get_servers", timer, &result);
        result
    }
}

fn track(
    operation: &'static str,
    timer: Timer,
    result: &Result<Vec<Instance>, StoreError>,
) -> &'static str {
    let error = match result {
        Ok(_) => "none",
        Err(err) => err.kind().as_label(),
    };

    histogram!(
        "glimpse_agent.store.request_duration_seconds",
        "operation" => operation,
        "error" => error,
    )
    .record(timer.elapsed().as_secs_f64());

    if result.is_err() {
        counter!(
            "glimpse_agent.store.errors",
            "operation" => operation,
            "error" => error,
        )
        .increment(1);
    }

    error
}
