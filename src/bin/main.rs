//! glimpse-dns binary entry point.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use glimpse_dns::{
    telemetry, Agent, Config, DnsConfig, HttpConfig, TelemetryConfig, UpstreamConfig,
};
use tracing::{error, info};

/// Authoritative service-discovery DNS agent backed by a catalog.
#[derive(Parser, Debug)]
#[command(name = "glimpse-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Catalog agent endpoint, host:port.
    #[arg(long = "upstream-addr", env = "GLIMPSE_UPSTREAM_ADDR", default_value = "127.0.0.1:8500")]
    upstream_addr: String,

    /// Command invoked to scrape upstream internals for metrics.
    #[arg(long = "upstream-info", env = "GLIMPSE_UPSTREAM_INFO", default_value = "consul info")]
    upstream_info: String,

    /// DNS bind address (UDP and TCP).
    #[arg(long = "dns-addr", env = "GLIMPSE_DNS_ADDR", default_value = "0.0.0.0:5959")]
    dns_addr: SocketAddr,

    /// Authoritative zone suffix.
    #[arg(long = "dns-zone", env = "GLIMPSE_DNS_ZONE", default_value = "srv.glimpse.io")]
    dns_zone: String,

    /// Maximum answers in a UDP response before truncation.
    #[arg(long = "dns-udp-maxanswers", env = "GLIMPSE_DNS_UDP_MAXANSWERS", default_value_t = 43)]
    dns_udp_maxanswers: usize,

    /// Default catalog datacenter.
    #[arg(long = "srv-zone", env = "GLIMPSE_SRV_ZONE", default_value = "gg")]
    srv_zone: String,

    /// Metrics HTTP bind address.
    #[arg(long = "http-addr", env = "GLIMPSE_HTTP_ADDR", default_value = "0.0.0.0:5960")]
    http_addr: SocketAddr,

    /// Log level filter (e.g. "info", "glimpse_dns=debug,warn").
    #[arg(long = "log-level", env = "GLIMPSE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            dns: DnsConfig {
                addr: self.dns_addr,
                zone: self.dns_zone,
                udp_max_answers: self.dns_udp_maxanswers,
            },
            upstream: UpstreamConfig {
                addr: self.upstream_addr,
                info: self.upstream_info,
                zone: self.srv_zone,
            },
            http: HttpConfig {
                addr: self.http_addr,
            },
            telemetry: TelemetryConfig {
                log_level: self.log_level,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Args::parse().into_config();

    if let Err(err) = telemetry::init(&config.telemetry.log_level) {
        eprintln!("telemetry setup failed: {err}");
        return ExitCode::FAILURE;
    }

    info!(
        dns_addr = %config.dns.addr,
        dns_zone = %config.dns.zone,
        upstream_addr = %config.upstream.addr,
        http_addr = %config.http.addr,
        "starting glimpse-dns"
    );

    match Agent::new(config).run().await {
        Ok(()) => {
            info!("glimpse-dns shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "glimpse-dns failed");
            ExitCode::FAILURE
        }
    }
}
