//! Structured-log middleware for the DNS chain and the store.

use std::io;
use std::time::Instant;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::handler::{DnsHandler, Peer, ResponseWriter};
use crate::metrics::{rcode_label, Timer};
use crate::name::Identity;
use crate::store::{Instance, Store};

/// DNS middleware emitting one access-log line per response write.
pub struct LoggingHandler<H> {
    next: H,
}

impl<H: DnsHandler> LoggingHandler<H> {
    /// Wrap `next` with access logging.
    pub fn new(next: H) -> Self {
        Self { next }
    }
}

#[async_trait]
impl<H: DnsHandler> DnsHandler for LoggingHandler<H> {
    async fn serve(&self, w: &mut dyn ResponseWriter, req: &Message) {
        let mut lw = LoggingWriter {
            inner: w,
            start: Instant::now(),
        };
        self.next.serve(&mut lw, req).await;
    }
}

struct LoggingWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    start: Instant,
}

#[async_trait]
impl ResponseWriter for LoggingWriter<'_> {
    fn peer(&self) -> Peer {
        self.inner.peer()
    }

    async fn write(&mut self, res: Message) -> io::Result<()> {
        let (qtype, qname) = match res.queries().first() {
            Some(query) => (query.query_type().to_string(), query.name().to_string()),
            None => ("empty".to_string(), "empty".to_string()),
        };
        let rcode = rcode_label(res.response_code());
        let answers = res.answers().len();
        let peer = self.inner.peer();

        let result = self.inner.write(res).await;

        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                elapsed_ms,
                peer = %peer.addr,
                protocol = peer.protocol.as_str(),
                qtype = %qtype,
                qname = %qname,
                rcode,
                answers,
                "DNS request"
            ),
            Err(err) => warn!(
                elapsed_ms,
                peer = %peer.addr,
                protocol = peer.protocol.as_str(),
                qtype = %qtype,
                qname = %qname,
                rcode,
                answers,
                error = %err,
                "DNS request"
            ),
        }

        result
    }
}

/// Store decorator logging failed operations.
///
/// Successful calls are silent; failures produce one warn line with
/// the elapsed time, operation, and input.
pub struct LoggingStore<S> {
    next: S,
}

impl<S: Store> LoggingStore<S> {
    /// Wrap `next` with failure logging.
    pub fn new(next: S) -> Self {
        Self { next }
    }
}

#[async_trait]
impl<S: Store> Store for LoggingStore<S> {
    async fn get_instances(&self, identity: &Identity) -> Result<Vec<Instance>, StoreError> {
        let timer = Timer::start();
        let result = self.next.get_instances(identity).await;

        if let Err(err) = &result {
            warn!(
                elapsed_ms = timer.elapsed().as_millis() as u64,
                operation = "get_instances",
                input = %identity.addr(),
                error = %err,
                "store call failed"
            );
        }

        result
    }

    async fn get_servers(&self, zone: &str) -> Result<Vec<Instance>, StoreError> {
        let timer = Timer::start();
        let result = self.next.get_servers(zone).await;

        if let Err(err) = &result {
            warn!(
                elapsed_ms = timer.elapsed().as_millis() as u64,
                operation = "get_servers",
                input = zone,
                error = %err,
                "store call failed"
            );
        }

        result
    }
}
