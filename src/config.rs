//! Configuration types for glimpse-dns.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::name;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Upstream catalog configuration.
    pub upstream: UpstreamConfig,

    /// Metrics HTTP surface configuration.
    pub http: HttpConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Validate the configuration before any listener binds.
    pub fn validate(&self) -> Result<(), Error> {
        if !name::is_valid_domain(&self.dns.zone) {
            return Err(Error::Config(format!(
                "dns zone {:?} is invalid",
                self.dns.zone
            )));
        }
        if !name::is_valid_zone(&self.upstream.zone) {
            return Err(Error::Config(format!(
                "srv zone {:?} is invalid",
                self.upstream.zone
            )));
        }
        if self.dns.udp_max_answers == 0 {
            return Err(Error::Config(
                "dns udp max answers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on (UDP and TCP).
    pub addr: SocketAddr,

    /// Authoritative zone suffix (e.g. "srv.glimpse.io").
    #[serde(default = "default_zone")]
    pub zone: String,

    /// Maximum number of answers in a UDP response before truncation.
    #[serde(default = "default_udp_max_answers")]
    pub udp_max_answers: usize,
}

/// Upstream catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Catalog agent endpoint, host:port.
    #[serde(default = "default_upstream_addr")]
    pub addr: String,

    /// Command invoked to scrape upstream internals for metrics.
    #[serde(default = "default_upstream_info")]
    pub info: String,

    /// Default catalog datacenter for identities without a zone.
    #[serde(default = "default_srv_zone")]
    pub zone: String,
}

/// Metrics HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address serving `/metrics`.
    pub addr: SocketAddr,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "debug", "glimpse_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_zone() -> String {
    "srv.glimpse.io".to_string()
}

fn default_udp_max_answers() -> usize {
    43
}

fn default_upstream_addr() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_upstream_info() -> String {
    "consul info".to_string()
}

fn default_srv_zone() -> String {
    "gg".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
