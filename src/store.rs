//! Store port abstracting the catalog from the DNS handler.

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::name::Identity;

/// A resolved backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Node display name.
    pub host: String,
    /// IPv4 address of the node.
    pub ip: Ipv4Addr,
    /// Service port; zero for roster members.
    pub port: u16,
}

/// Health-aware lookups against the service catalog.
///
/// Implementations must be safe for concurrent use and must not panic;
/// failures surface through the tagged [`StoreError`] taxonomy.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve the healthy instances implementing `identity`.
    ///
    /// Only instances whose upstream health state is passing are
    /// returned. A registered service with zero healthy instances
    /// yields [`StoreError::NoInstances`].
    async fn get_instances(&self, identity: &Identity) -> Result<Vec<Instance>, StoreError>;

    /// Enumerate the catalog servers backing `zone`.
    ///
    /// An empty `zone` means all servers known to the local agent;
    /// otherwise only servers whose membership name ends in `.<zone>`
    /// are returned, with that trailing label stripped from the
    /// reported host.
    async fn get_servers(&self, zone: &str) -> Result<Vec<Instance>, StoreError>;
}
