//! Agent discovery.
//!
//! The network provider learns about agents from a [`ServiceDiscovery`]
//! collaborator which it polls on every housekeeping tick.  Agents announce
//! themselves over mDNS in the field; that browser lives outside this crate.
//! [`StaticDiscovery`] serves the `[[network.agents]]` list from the config
//! file.

use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::storage::config::AgentEntry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("cannot resolve address {address:?} for agent {hostname}")]
    Resolve { hostname: String, address: String },
}

/// Where an agent can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAddress {
    pub hostname: String,
    pub addr: SocketAddr,
}

impl AgentAddress {
    pub fn new(hostname: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            hostname: hostname.into(),
            addr,
        }
    }
}

/// A change in the set of reachable agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(AgentAddress),
    Lost { hostname: String },
}

/// Source of agent announcements.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceDiscovery: Send + 'static {
    /// Events since the previous call.  Must not block.
    fn poll(&mut self) -> Vec<DiscoveryEvent>;
}

/// A fixed agent list, announced once on the first poll.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    pending: Vec<AgentAddress>,
}

impl StaticDiscovery {
    pub fn new(agents: Vec<AgentAddress>) -> Self {
        Self { pending: agents }
    }

    /// Resolves every configured agent.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Resolve`] for the first entry whose address
    /// does not resolve.
    pub fn from_config(entries: &[AgentEntry]) -> Result<Self, DiscoveryError> {
        let agents = entries
            .iter()
            .map(|entry| {
                let addr = (entry.address.as_str(), entry.port)
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .ok_or_else(|| DiscoveryError::Resolve {
                        hostname: entry.hostname.clone(),
                        address: entry.address.clone(),
                    })?;
                debug!(hostname = %entry.hostname, %addr, "configured agent");
                Ok(AgentAddress::new(entry.hostname.clone(), addr))
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(agents = agents.len(), "static agent discovery ready");
        Ok(Self::new(agents))
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn poll(&mut self) -> Vec<DiscoveryEvent> {
        self.pending.drain(..).map(DiscoveryEvent::Found).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hostname: &str, address: &str, port: u16) -> AgentEntry {
        AgentEntry {
            hostname: hostname.to_string(),
            address: address.to_string(),
            port,
        }
    }

    #[test]
    fn test_static_discovery_announces_once() {
        // Arrange
        let mut discovery = StaticDiscovery::from_config(&[entry("esp-1", "127.0.0.1", 8090)]).unwrap();

        // Act
        let first = discovery.poll();
        let second = discovery.poll();

        // Assert
        assert_eq!(
            first,
            vec![DiscoveryEvent::Found(AgentAddress::new(
                "esp-1",
                "127.0.0.1:8090".parse().unwrap()
            ))]
        );
        assert!(second.is_empty());
    }

    #[test]
    fn test_unresolvable_address_is_rejected() {
        let result = StaticDiscovery::from_config(&[entry("esp-1", "not an address", 8090)]);

        assert_eq!(
            result.unwrap_err(),
            DiscoveryError::Resolve {
                hostname: "esp-1".to_string(),
                address: "not an address".to_string()
            }
        );
    }

    #[test]
    fn test_empty_config_announces_nothing() {
        let mut discovery = StaticDiscovery::from_config(&[]).unwrap();

        assert!(discovery.poll().is_empty());
    }
}
