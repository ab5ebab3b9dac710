// Copyright © 2026 Pathway

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use cached::{Cached, SizedCache};
use elasticsearch::http::Url;
use log::warn;

use crate::engine::{LocalNode, WorkerRegistry};

const HOST_SET_CACHE_SIZE: usize = 128;
const HOSTNAME_CACHE_SIZE: usize = 1024;

/// Canonical identity of a cluster's contact points: sorted, deduplicated host
/// tokens. Equal logical inputs always give equal values, which makes it usable
/// as a pool key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostSet(Arc<[String]>);

impl HostSet {
    /// Each token may itself be a comma separated list.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: BTreeSet<String> = tokens
            .into_iter()
            .flat_map(|token| {
                token
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self(hosts.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Extracts the bare hostname or IP from a node transport address.
///
/// Accepted forms: `inet[/10.0.0.1:9300]`, `inet[node-1/10.0.0.1:9300]`,
/// `10.0.0.1:9300`, `[::1]:9300`, a bare host or a URL.
pub fn parse_hostname(address: &str) -> Option<String> {
    let mut address = address.trim();
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Some(ip.to_string());
    }

    if let Some(open) = address.find('[') {
        let prefix = &address[..open];
        if open > 0
            && address.ends_with(']')
            && prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            let inner = &address[open + 1..address.len() - 1];
            address = inner.rsplit_once('/').map_or(inner, |(_, bound)| bound);
        }
    }

    let url = if address.contains("://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("http://{address}"))
    }
    .ok()?;
    let host = url
        .host_str()?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Turns host specifications into `HostSet`s and transport addresses into
/// hostnames. Both lookups are memoized in bounded LRU caches owned by the
/// resolver.
pub struct HostResolver {
    workers: Arc<dyn WorkerRegistry>,
    local_node: Arc<dyn LocalNode>,
    host_sets: Mutex<SizedCache<Vec<String>, HostSet>>,
    hostnames: Mutex<SizedCache<String, String>>,
}

impl HostResolver {
    pub fn new(workers: Arc<dyn WorkerRegistry>, local_node: Arc<dyn LocalNode>) -> Self {
        Self {
            workers,
            local_node,
            host_sets: Mutex::new(SizedCache::with_size(HOST_SET_CACHE_SIZE)),
            hostnames: Mutex::new(SizedCache::with_size(HOSTNAME_CACHE_SIZE)),
        }
    }

    /// Without explicit tokens the contact points are the addresses of all
    /// known workers, or of this node when no worker is known. That case
    /// depends on the current topology and is not memoized.
    pub fn resolve<S: AsRef<str>>(&self, tokens: &[S]) -> HostSet {
        let key: Vec<String> = tokens.iter().map(|t| t.as_ref().to_string()).collect();
        if let Some(hosts) = self.host_sets.lock().unwrap().cache_get(&key) {
            return hosts.clone();
        }

        let hosts = HostSet::from_tokens(&key);
        if hosts.is_empty() {
            return self.worker_hosts();
        }
        self.host_sets
            .lock()
            .unwrap()
            .cache_set(key, hosts.clone());
        hosts
    }

    fn worker_hosts(&self) -> HostSet {
        let mut addresses: BTreeSet<IpAddr> = self
            .workers
            .list_workers()
            .into_iter()
            .flat_map(|worker| worker.ip_addresses)
            .collect();
        if addresses.is_empty() {
            addresses = self.local_node.local_ip_addresses().into_iter().collect();
        }
        HostSet::from_tokens(addresses.iter().map(ToString::to_string))
    }

    /// Memoized `parse_hostname`; unparsable addresses are returned unchanged.
    pub fn hostname(&self, address: &str) -> String {
        let key = address.to_string();
        let mut cache = self.hostnames.lock().unwrap();
        if let Some(hostname) = cache.cache_get(&key) {
            return hostname.clone();
        }
        let hostname = parse_hostname(address).unwrap_or_else(|| {
            warn!("Can't extract a hostname from the transport address {address:?}");
            address.to_string()
        });
        cache.cache_set(key, hostname.clone());
        hostname
    }
}
