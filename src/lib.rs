//! glimpse-dns - An authoritative service-discovery DNS agent.
//!
//! This crate provides a per-node DNS front-end for a Consul-style
//! service catalog. Clients ask which healthy backends implement a
//! logical service and receive the answer as standard `A`, `SRV`, and
//! `NS` records under a configured zone suffix.
//!
//! ## Features
//!
//! - Structured service names: `<service>.<job>.<env>.<product>.<zone>`
//! - Health-filtered answers straight from the local catalog agent
//! - UDP answer truncation with the `TC` flag, full answers over TCP
//! - Nameserver enumeration for operability (`ns<N>` questions)
//! - Prometheus metrics over HTTP
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          glimpse-dns                           │
//! │                                                                │
//! │   UDP/TCP ──▶ logging ─▶ metrics ─▶ truncation ─▶ handler      │
//! │   :5959                                             │          │
//! │                                                     ▼          │
//! │               logging store ─▶ metrics store ─▶ consul store   │
//! │                                                     │          │
//! │   HTTP /metrics ◀── prometheus exporter             ▼          │
//! │   :5960                                      catalog agent     │
//! │                                              :8500             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! http.api.prod.harpoon.tt.srv.glimpse.io.
//!   → parse identity (service=http job=api env=prod product=harpoon zone=tt)
//!   → catalog health query, passing instances only
//!   → one A or SRV record per instance, TTL 5
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use glimpse_dns::{Agent, Config, DnsConfig, HttpConfig, TelemetryConfig, UpstreamConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config {
//!         dns: DnsConfig {
//!             addr: "0.0.0.0:5959".parse().unwrap(),
//!             zone: "srv.glimpse.io".to_string(),
//!             udp_max_answers: 43,
//!         },
//!         upstream: UpstreamConfig {
//!             addr: "127.0.0.1:8500".to_string(),
//!             info: "consul info".to_string(),
//!             zone: "gg".to_string(),
//!         },
//!         http: HttpConfig {
//!             addr: "0.0.0.0:5960".parse().unwrap(),
//!         },
//!         telemetry: TelemetryConfig::default(),
//!     };
//!
//!     Agent::new(config).run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod collector;
pub mod config;
pub mod consul;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod name;
pub mod server;
pub mod store;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, HttpConfig, TelemetryConfig, UpstreamConfig};
pub use error::{Error, ErrorKind, StoreError};
pub use name::Identity;
pub use server::Agent;
pub use store::{Instance, Store};
