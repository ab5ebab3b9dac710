// Copyright © 2026 Pathway

//! The parts of the compute engine the connectors rely on: worker identity,
//! the local node, the `Dataset`/`Partition` contracts and a local executor.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use log::warn;
use nix::ifaddrs::getifaddrs;
use serde::{Deserialize, Serialize};

pub mod collection;
pub mod dataset;
pub mod error;
pub mod executor;

pub use collection::Collection;
pub use dataset::{Dataset, DatasetExt, Map, Partition, PartitionIter};
pub use error::{DynError, DynResult, Error, Result};
pub use executor::{Executor, Placement};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A compute worker as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub ip_addresses: BTreeSet<IpAddr>,
}

impl WorkerInfo {
    pub fn new(id: impl Into<WorkerId>, ip_addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            id: id.into(),
            ip_addresses: ip_addresses.into_iter().collect(),
        }
    }

    /// Whether any of the worker's addresses is among `hosts`.
    pub fn shares_address_with(&self, hosts: &BTreeSet<String>) -> bool {
        self.ip_addresses
            .iter()
            .any(|address| hosts.contains(&address.to_string()))
    }
}

pub trait WorkerRegistry: Send + Sync {
    fn list_workers(&self) -> Vec<WorkerInfo>;
}

pub trait LocalNode: Send + Sync {
    fn local_ip_addresses(&self) -> HashSet<IpAddr>;
}

/// A fixed set of workers, for deployments where the topology is known up front.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkers {
    workers: Vec<WorkerInfo>,
}

impl StaticWorkers {
    pub fn new(workers: Vec<WorkerInfo>) -> Self {
        Self { workers }
    }
}

impl WorkerRegistry for StaticWorkers {
    fn list_workers(&self) -> Vec<WorkerInfo> {
        self.workers.clone()
    }
}

/// The addresses bound to the network interfaces of this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceAddresses;

impl InterfaceAddresses {
    pub fn collect() -> HashSet<IpAddr> {
        let interfaces = match getifaddrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Failed to enumerate network interfaces: {e}");
                return HashSet::new();
            }
        };

        interfaces
            .filter_map(|interface| {
                let address = interface.address?;
                if let Some(v4) = address.as_sockaddr_in() {
                    Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()))
                } else {
                    address
                        .as_sockaddr_in6()
                        .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
                }
            })
            .collect()
    }
}

impl LocalNode for InterfaceAddresses {
    fn local_ip_addresses(&self) -> HashSet<IpAddr> {
        Self::collect()
    }
}
