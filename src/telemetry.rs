//! Telemetry setup for glimpse-dns.
//!
//! Tracing goes to stdout through a `fmt` layer with an `EnvFilter`;
//! metrics are exposed through the Prometheus exporter, whose HTTP
//! listener is supervised alongside the DNS servers.

use std::future::Future;
use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

/// Initialize tracing with the configured log level.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(log_level: &str) -> Result<(), Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Telemetry(e.to_string()))
}

/// Install the Prometheus recorder and return the exporter future
/// serving `/metrics` on `addr`.
///
/// The caller spawns the returned future as a supervised task.
pub fn prometheus_exporter(
    addr: SocketAddr,
) -> Result<impl Future<Output = Result<(), Error>>, Error> {
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| Error::Telemetry(format!("{e:?}")))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| Error::Telemetry("global metrics recorder already installed".to_string()))?;

    Ok(async move { exporter.await.map_err(|e| Error::Telemetry(format!("{e:?}"))) })
}
