//! Listener supervisor: UDP + TCP DNS servers, the metrics HTTP
//! exporter, the upstream collector, and signal handling.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::collector::UpstreamCollector;
use crate::config::Config;
use crate::consul::ConsulStore;
use crate::error::Error;
use crate::handler::{
    self, CatalogHandler, DnsHandler, Peer, Protocol, ResponseWriter, TruncatingHandler,
};
use crate::logging::{LoggingHandler, LoggingStore};
use crate::metrics::{MetricsHandler, MetricsStore};

/// Largest request datagram the server reads.
const MAX_UDP_PACKET: usize = 4096;

/// Idle timeout for a TCP connection between messages.
const TCP_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The glimpse-dns agent: DNS front-end plus metrics surface.
pub struct Agent {
    config: Config,
}

impl Agent {
    /// Create an agent with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the agent until a fatal error or a termination signal.
    ///
    /// Returns `Ok(())` only on clean signal shutdown.
    pub async fn run(self) -> Result<(), Error> {
        self.config.validate()?;

        let store = LoggingStore::new(MetricsStore::new(ConsulStore::new(&self.config.upstream)?));
        let handler = Arc::new(LoggingHandler::new(MetricsHandler::new(
            TruncatingHandler::new(
                CatalogHandler::new(store, &self.config.dns.zone),
                self.config.dns.udp_max_answers,
            ),
        )));

        let (errc, mut errs) = mpsc::channel::<Error>(1);

        let udp = Arc::new(UdpSocket::bind(self.config.dns.addr).await?);
        info!("DNS/udp listening on {}", udp.local_addr()?);
        tokio::spawn(run_udp(udp, handler.clone(), errc.clone()));

        let tcp = TcpListener::bind(self.config.dns.addr).await?;
        info!("DNS/tcp listening on {}", tcp.local_addr()?);
        tokio::spawn(run_tcp(tcp, handler.clone(), errc.clone()));

        let exporter = crate::telemetry::prometheus_exporter(self.config.http.addr)?;
        info!("HTTP listening on {}", self.config.http.addr);
        {
            let errc = errc.clone();
            tokio::spawn(async move {
                if let Err(err) = exporter.await {
                    let _ = errc.try_send(err);
                }
            });
        }

        tokio::spawn(UpstreamCollector::new(&self.config.upstream.info).run());

        {
            let errc = errc.clone();
            tokio::spawn(async move {
                let _ = errc.try_send(watch_signals().await);
            });
        }

        match errs.recv().await {
            Some(Error::Signal(sig)) => {
                info!(signal = sig, "shutting down");
                Ok(())
            }
            Some(err) => {
                error!(error = %err, "fatal error");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

async fn watch_signals() -> Error {
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(err) => return Error::Io(err),
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => return Error::Io(err),
    };

    tokio::select! {
        _ = interrupt.recv() => Error::Signal("SIGINT"),
        _ = terminate.recv() => Error::Signal("SIGTERM"),
    }
}

async fn run_udp<H>(socket: Arc<UdpSocket>, handler: Arc<H>, errc: mpsc::Sender<Error>)
where
    H: DnsHandler + 'static,
{
    let mut buf = vec![0u8; MAX_UDP_PACKET];

    loop {
        let (n, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                let _ = errc.try_send(Error::Io(err));
                return;
            }
        };

        let packet = buf[..n].to_vec();
        let socket = socket.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            let req = match Message::from_vec(&packet) {
                Ok(req) => req,
                Err(err) => {
                    debug!(peer = %peer_addr, error = %err, "dropping unparsable datagram");
                    return;
                }
            };

            let mut w = UdpWriter {
                socket,
                peer: Peer {
                    addr: peer_addr,
                    protocol: Protocol::Udp,
                },
            };
            serve_with_recovery(handler.as_ref(), &mut w, &req).await;
        });
    }
}

async fn run_tcp<H>(listener: TcpListener, handler: Arc<H>, errc: mpsc::Sender<Error>)
where
    H: DnsHandler + 'static,
{
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                let _ = errc.try_send(Error::Io(err));
                return;
            }
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_tcp_conn(stream, peer_addr, handler).await {
                debug!(peer = %peer_addr, error = %err, "TCP connection ended");
            }
        });
    }
}

async fn serve_tcp_conn<H>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> io::Result<()>
where
    H: DnsHandler,
{
    loop {
        let mut len_buf = [0u8; 2];
        match timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Err(_) => return Ok(()),
            Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(err),
            Ok(Ok(_)) => {}
        }

        let len = u16::from_be_bytes(len_buf) as usize;
        let mut packet = vec![0u8; len];
        match timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut packet)).await {
            Err(_) => return Ok(()),
            Ok(read) => {
                read?;
            }
        }

        let req = match Message::from_vec(&packet) {
            Ok(req) => req,
            Err(err) => {
                debug!(peer = %peer_addr, error = %err, "dropping unparsable message");
                return Ok(());
            }
        };

        let mut w = TcpWriter {
            stream: &mut stream,
            peer: Peer {
                addr: peer_addr,
                protocol: Protocol::Tcp,
            },
        };
        serve_with_recovery(handler.as_ref(), &mut w, &req).await;
    }
}

/// Recovery perimeter: a panic inside the handler chain must not take
/// the listener down, so it is converted into a SERVFAIL write.
async fn serve_with_recovery<H>(handler: &H, w: &mut dyn ResponseWriter, req: &Message)
where
    H: DnsHandler + ?Sized,
{
    let served = AssertUnwindSafe(handler.serve(&mut *w, req)).catch_unwind().await;

    if served.is_err() {
        error!(id = req.id(), "handler panicked");
        let _ = w.write(handler::servfail(req)).await;
    }
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
    peer: Peer,
}

#[async_trait]
impl ResponseWriter for UdpWriter {
    fn peer(&self) -> Peer {
        self.peer
    }

    async fn write(&mut self, res: Message) -> io::Result<()> {
        let bytes = res
            .to_vec()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.socket.send_to(&bytes, self.peer.addr).await?;
        Ok(())
    }
}

struct TcpWriter<'a> {
    stream: &'a mut TcpStream,
    peer: Peer,
}

#[async_trait]
impl ResponseWriter for TcpWriter<'_> {
    fn peer(&self) -> Peer {
        self.peer
    }

    async fn write(&mut self, res: Message) -> io::Result<()> {
        let bytes = res
            .to_vec()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let len = u16::try_from(bytes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "response too large"))?;

        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
