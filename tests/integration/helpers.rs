// Copyright © 2026 Pathway

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use mockall::mock;

use pathway_elastic::connectors::elasticsearch::client::{MemoryCluster, MemoryNode};
use pathway_elastic::connectors::elasticsearch::{ElasticConfig, ElasticContext};
use pathway_elastic::engine::{
    DynError, Executor, LocalNode, StaticWorkers, WorkerInfo, WorkerRegistry,
};

pub const INDEX: &str = "test";

mock! {
    pub Workers {}
    impl WorkerRegistry for Workers {
        fn list_workers(&self) -> Vec<WorkerInfo>;
    }
}

mock! {
    pub Node {}
    impl LocalNode for Node {
        fn local_ip_addresses(&self) -> HashSet<IpAddr>;
    }
}

/// Type-erased engine errors are not `std::error::Error` themselves.
pub fn report(error: DynError) -> eyre::Report {
    eyre::eyre!(error)
}

pub fn ip(address: &str) -> IpAddr {
    address.parse().unwrap()
}

/// Three nodes, each reporting its transport address in a different format.
pub fn three_node_cluster() -> MemoryCluster {
    MemoryCluster::new(vec![
        MemoryNode::new("node-0", "inet[/10.0.0.1:9300]"),
        MemoryNode::new("node-1", "inet[es-1/10.0.0.2:9300]"),
        MemoryNode::new("node-2", "10.0.0.3:9300"),
    ])
}

/// One worker next to every node of `three_node_cluster` and one elsewhere.
pub fn workers() -> Vec<WorkerInfo> {
    vec![
        WorkerInfo::new("worker-0", [ip("10.0.0.1")]),
        WorkerInfo::new("worker-1", [ip("10.0.0.2"), ip("192.168.0.2")]),
        WorkerInfo::new("worker-2", [ip("10.0.0.3")]),
        WorkerInfo::new("worker-3", [ip("10.0.0.9")]),
    ]
}

pub fn test_config() -> ElasticConfig {
    ElasticConfig {
        hosts: vec!["10.0.0.1:9200".to_string()],
        index: Some(INDEX.to_string()),
        ..ElasticConfig::default()
    }
}

pub fn context_with_config(cluster: &MemoryCluster, config: ElasticConfig) -> ElasticContext {
    let mut local_node = MockNode::new();
    local_node
        .expect_local_ip_addresses()
        .returning(|| HashSet::from([ip("127.0.0.1")]));
    ElasticContext::with_factory(
        config,
        Arc::new(StaticWorkers::new(workers())),
        Arc::new(local_node),
        Arc::new(cluster.clone()),
    )
}

pub fn context(cluster: &MemoryCluster) -> ElasticContext {
    context_with_config(cluster, test_config())
}

pub fn executor(n_threads: usize) -> Executor {
    Executor::new(Arc::new(StaticWorkers::new(workers())), n_threads)
        .expect("failed to start the executor")
}
