// Copyright © 2026 Pathway

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cached::{Cached, SizedCache};
use elasticsearch::http::transport::{Connection, ConnectionPool};
use elasticsearch::http::Url;
use log::debug;

use super::client::Error as ClientError;
use super::hosts::parse_hostname;

const RESOLVED_HOSTS_CACHE_SIZE: usize = 1024;

/// A connection to one cluster node together with the host it points to.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    connection: Connection,
    host: String,
}

impl NodeConnection {
    pub fn new(url: Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_string();
        Self {
            connection: Connection::new(url),
            host,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn select<'a, T>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(idx)
    }
}

/// Prefers a node running on this machine, so that shard scans issued by a
/// worker co-located with the shard do not leave the host. Falls back to
/// round-robin when no candidate is local.
pub struct NodeLocalSelector {
    local_addresses: HashSet<IpAddr>,
    resolved_hosts: Mutex<SizedCache<String, Vec<IpAddr>>>,
    fallback: RoundRobinSelector,
}

impl NodeLocalSelector {
    pub fn new(local_addresses: HashSet<IpAddr>) -> Self {
        Self {
            local_addresses,
            resolved_hosts: Mutex::new(SizedCache::with_size(RESOLVED_HOSTS_CACHE_SIZE)),
            fallback: RoundRobinSelector::default(),
        }
    }

    pub fn local_addresses(&self) -> &HashSet<IpAddr> {
        &self.local_addresses
    }

    pub fn is_local(&self, host: &str) -> bool {
        self.resolve(host)
            .iter()
            .any(|address| self.local_addresses.contains(address))
    }

    pub fn select<'a>(&self, candidates: &'a [NodeConnection]) -> Option<&'a NodeConnection> {
        candidates
            .iter()
            .find(|candidate| self.is_local(candidate.host()))
            .or_else(|| self.fallback.select(candidates))
    }

    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let key = host.to_string();
        if let Some(addresses) = self.resolved_hosts.lock().unwrap().cache_get(&key) {
            return addresses.clone();
        }

        let hostname = parse_hostname(host).unwrap_or_else(|| key.clone());
        let addresses = if let Ok(ip) = hostname.parse::<IpAddr>() {
            vec![ip]
        } else {
            match (hostname.as_str(), 0).to_socket_addrs() {
                Ok(resolved) => resolved.map(|address| address.ip()).collect(),
                Err(e) => {
                    debug!("Failed to resolve {hostname:?}: {e}");
                    Vec::new()
                }
            }
        };
        self.resolved_hosts
            .lock()
            .unwrap()
            .cache_set(key, addresses.clone());
        addresses
    }
}

impl fmt::Debug for NodeLocalSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NodeLocalSelector")
            .field("local_addresses", &self.local_addresses)
            .finish_non_exhaustive()
    }
}

/// Connection pool of the `elasticsearch` transport that routes every request
/// through a `NodeLocalSelector`. Never empty.
#[derive(Debug, Clone)]
pub struct NodeLocalConnectionPool {
    connections: Vec<NodeConnection>,
    selector: Arc<NodeLocalSelector>,
}

impl NodeLocalConnectionPool {
    pub fn new(urls: Vec<Url>, selector: Arc<NodeLocalSelector>) -> Result<Self, ClientError> {
        if urls.is_empty() {
            return Err(ClientError::NoHosts);
        }
        Ok(Self {
            connections: urls.into_iter().map(NodeConnection::new).collect(),
            selector,
        })
    }

    pub fn connections(&self) -> &[NodeConnection] {
        &self.connections
    }
}

impl ConnectionPool for NodeLocalConnectionPool {
    fn next(&self) -> Connection {
        self.selector
            .select(&self.connections)
            .unwrap_or(&self.connections[0])
            .connection()
            .clone()
    }
}
