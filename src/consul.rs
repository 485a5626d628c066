//! Upstream catalog adapter speaking the Consul HTTP API.
//!
//! Translates identities into health-filtered service queries and the
//! zone roster into membership lookups. The upstream is asked to
//! pre-filter to passing instances; the critical-check drop below is
//! defence-in-depth on top of that.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::UpstreamConfig;
use crate::error::{Error, StoreError};
use crate::name::Identity;
use crate::store::{Instance, Store};

/// Deadline for a single upstream request.
const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(250);

/// Health check status reported by the upstream.
const HEALTH_CRITICAL: &str = "critical";

/// Upstream error fragment signalling an unknown datacenter.
const NO_PATH_TO_DATACENTER: &str = "no path to datacenter";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    node: Node,
    service: AgentService,
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Node {
    node: String,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(default)]
    tags: Vec<String>,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Member {
    name: String,
    addr: String,
}

/// Store implementation backed by a Consul-style catalog agent.
///
/// The HTTP client and its connection pool are shared across requests
/// for the process lifetime.
pub struct ConsulStore {
    client: reqwest::Client,
    base_url: String,
    default_zone: String,
}

impl ConsulStore {
    /// Create a store talking to the configured catalog agent.
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("http://{}", config.addr),
            default_zone: config.zone.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<T, StoreError> {
        let res = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::CatalogUnreachable(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            if body.to_lowercase().contains(NO_PATH_TO_DATACENTER) {
                return Err(StoreError::NoInstances(format!("unknown zone: {body}")));
            }
            return Err(StoreError::CatalogUnreachable(format!(
                "unexpected response {status}: {body}"
            )));
        }

        res.json()
            .await
            .map_err(|e| StoreError::CatalogUnreachable(e.to_string()))
    }
}

#[async_trait]
impl Store for ConsulStore {
    async fn get_instances(&self, identity: &Identity) -> Result<Vec<Instance>, StoreError> {
        let zone = if identity.zone.is_empty() {
            &self.default_zone
        } else {
            &identity.zone
        };
        let job_tag = format!("glimpse:job={}", identity.job);

        let entries: Vec<ServiceEntry> = self
            .get_json(
                format!("{}/v1/health/service/{}", self.base_url, identity.product),
                &[
                    ("dc", zone.as_str()),
                    ("tag", job_tag.as_str()),
                    ("passing", "1"),
                    ("stale", ""),
                ],
            )
            .await?;

        let instances = entries_to_instances(drop_critical(entries), identity)?;
        if instances.is_empty() {
            return Err(StoreError::NoInstances(identity.addr()));
        }

        Ok(instances)
    }

    async fn get_servers(&self, zone: &str) -> Result<Vec<Instance>, StoreError> {
        let members: Vec<Member> = self
            .get_json(format!("{}/v1/agent/members", self.base_url), &[])
            .await?;

        let suffix = format!(".{zone}");
        let mut servers = Vec::new();

        for member in members {
            if !zone.is_empty() && !member.name.ends_with(&suffix) {
                continue;
            }

            // One malformed peer must not fail the whole enumeration.
            let ip: Ipv4Addr = match member.addr.parse() {
                Ok(ip) => ip,
                Err(_) => {
                    warn!(
                        member = %member.name,
                        addr = %member.addr,
                        "skipping member with unparsable address"
                    );
                    continue;
                }
            };

            servers.push(Instance {
                host: strip_final_label(&member.name).to_string(),
                ip,
                port: 0,
            });
        }

        if servers.is_empty() {
            return Err(StoreError::NoInstances(format!("no servers in {zone:?}")));
        }

        Ok(servers)
    }
}

/// Drop entries whose check set contains any critical check.
///
/// Idempotent: applying it twice equals applying it once.
fn drop_critical(entries: Vec<ServiceEntry>) -> Vec<ServiceEntry> {
    entries
        .into_iter()
        .filter(|e| e.checks.iter().all(|c| c.status != HEALTH_CRITICAL))
        .collect()
}

/// Normalize entries into instances, keeping only those tagged for the
/// requested env and service. An unparsable node address aborts the
/// whole call.
fn entries_to_instances(
    entries: Vec<ServiceEntry>,
    identity: &Identity,
) -> Result<Vec<Instance>, StoreError> {
    let env_tag = format!("glimpse:env={}", identity.env);
    let service_tag = format!("glimpse:service={}", identity.service);

    let mut instances = Vec::with_capacity(entries.len());

    for entry in entries {
        let tags = &entry.service.tags;
        if !tags.contains(&env_tag) || !tags.contains(&service_tag) {
            continue;
        }

        let ip: Ipv4Addr = entry
            .node
            .address
            .parse()
            .map_err(|_| StoreError::InvalidIp(entry.node.address.clone()))?;

        instances.push(Instance {
            host: entry.node.node,
            ip,
            port: entry.service.port,
        });
    }

    Ok(instances)
}

/// Strip the trailing label from a membership name, `foo.tt` -> `foo`.
fn strip_final_label(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((host, _)) => host,
        None => name,
    }
}
