// Copyright © 2026 Pathway

//! Elasticsearch as a partitioned dataset.
//!
//! Reading: an index is split into one partition per shard. Every partition
//! knows which nodes host its shard, reports the workers sharing an address
//! with them as node-local, and scans only its own shard.
//!
//! Writing: a dataset of documents is turned into bulk actions, sent in
//! bounded chunks per partition, and optionally followed by a single refresh
//! once all partitions are done.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{Dataset, DatasetExt, LocalNode, Map, WorkerRegistry};

pub mod bulk;
pub mod client;
pub mod config;
pub mod dataset;
pub mod hosts;
pub mod pool;
pub mod selector;

pub use bulk::{BulkAction, BulkOperation, BulkWrite};
pub use client::{ClientFactory, ClusterClient, Document, Hit, ScanOptions};
pub use config::ElasticConfig;
pub use dataset::{ElasticSearchDataset, ShardDescriptor, ShardPartition};
pub use hosts::{HostResolver, HostSet};
pub use pool::{ClientPoolRegistry, PooledClient};

use bulk::{BulkLimits, BulkWriteSettings};
use client::{Error as ClientError, HttpClientFactory};
use selector::NodeLocalSelector;

/// Remote operations, for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SearchShards,
    Scan,
    Bulk,
    Refresh,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let description = match self {
            Self::SearchShards => "look up the shards",
            Self::Scan => "scan",
            Self::Bulk => "submit a bulk request",
            Self::Refresh => "refresh",
        };
        write!(f, "{description}")
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no index given and no default index configured")]
    MissingIndex,

    #[error("couldn't get an elasticsearch session for hosts {hosts}: {source}")]
    Connect {
        hosts: HostSet,
        #[source]
        source: ClientError,
    },

    #[error("failed to {operation} on index {index:?}: {source}")]
    Request {
        operation: Operation,
        index: String,
        #[source]
        source: ClientError,
    },

    #[error("{rejected} bulk actions were rejected by index {index:?}")]
    BulkItemsRejected { index: String, rejected: usize },
}

/// The index (and optionally the document type) an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexTarget {
    pub index: String,
    pub doc_type: Option<String>,
}

/// Per-call overrides for reading an index.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub hosts: Vec<String>,
    pub scan: ScanOptions,
}

/// Per-call overrides for writing.
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
    /// For `bulk`, a comma separated list of the indices to refresh.
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub hosts: Vec<String>,
    /// Refresh the index once every partition has been written.
    pub refresh: bool,
    pub chunk_size: Option<usize>,
    pub max_chunk_bytes: Option<usize>,
    pub timeout: Option<Duration>,
    /// Fail the partition if the cluster rejects any of its actions.
    pub raise_on_error: bool,
}

/// Entry point for reading and writing elasticsearch from a job.
///
/// Owns the host resolver and the client pools; clones share them.
#[derive(Clone)]
pub struct ElasticContext {
    config: Arc<ElasticConfig>,
    resolver: Arc<HostResolver>,
    pools: Arc<ClientPoolRegistry>,
}

impl ElasticContext {
    /// A context talking HTTP to the cluster, preferring nodes on this machine.
    pub fn new(
        config: ElasticConfig,
        workers: Arc<dyn WorkerRegistry>,
        local_node: Arc<dyn LocalNode>,
    ) -> Self {
        let selector = Arc::new(NodeLocalSelector::new(local_node.local_ip_addresses()));
        let factory = Arc::new(HttpClientFactory::new(selector));
        Self::with_factory(config, workers, local_node, factory)
    }

    pub fn with_factory(
        config: ElasticConfig,
        workers: Arc<dyn WorkerRegistry>,
        local_node: Arc<dyn LocalNode>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let pools = ClientPoolRegistry::new(
            factory,
            config.client_settings(),
            config.pool_capacity,
        );
        Self {
            config: Arc::new(config),
            resolver: Arc::new(HostResolver::new(workers, local_node)),
            pools: Arc::new(pools),
        }
    }

    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    pub fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    pub fn pools(&self) -> &ClientPoolRegistry {
        &self.pools
    }

    /// Contact points for a call: the given hosts, else the configured ones,
    /// else the workers' addresses.
    pub fn hosts(&self, hosts: &[String]) -> HostSet {
        if hosts.is_empty() {
            self.resolver.resolve(&self.config.hosts)
        } else {
            self.resolver.resolve(hosts)
        }
    }

    /// A session for exclusive use, returned to its pool when dropped.
    pub fn client(&self, hosts: &[String]) -> Result<PooledClient, Error> {
        let hosts = self.hosts(hosts);
        self.pools
            .acquire(&hosts)
            .map_err(|source| Error::Connect { hosts, source })
    }

    pub fn target(&self, index: Option<&str>, doc_type: Option<&str>) -> Result<IndexTarget, Error> {
        let index = index
            .or(self.config.index.as_deref())
            .ok_or(Error::MissingIndex)?;
        Ok(IndexTarget {
            index: index.to_string(),
            doc_type: doc_type
                .or(self.config.doc_type.as_deref())
                .map(ToString::to_string),
        })
    }

    pub fn refresh(&self, hosts: &[String], indices: &[String]) -> Result<(), Error> {
        let mut client = self.client(hosts)?;
        client.refresh(indices).map_err(|source| Error::Request {
            operation: Operation::Refresh,
            index: indices.join(","),
            source,
        })
    }

    /// The documents of an index, one partition per shard.
    pub fn search(&self, options: SearchOptions) -> Result<ElasticSearchDataset, Error> {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        Ok(ElasticSearchDataset::new(
            self.clone(),
            target,
            options.hosts,
            options.scan,
        ))
    }

    fn bulk_settings(&self, options: &BulkOptions, refresh_indices: Vec<String>) -> BulkWriteSettings {
        BulkWriteSettings {
            context: self.clone(),
            hosts: options.hosts.clone(),
            limits: BulkLimits {
                chunk_size: options.chunk_size.unwrap_or(self.config.bulk_chunk_size),
                max_chunk_bytes: options
                    .max_chunk_bytes
                    .unwrap_or(self.config.bulk_max_chunk_bytes),
                timeout: options.timeout.unwrap_or(self.config.bulk_timeout()),
            },
            refresh_indices,
            raise_on_error: options.raise_on_error,
        }
    }

    /// Writes already built actions. With `refresh`, the indices named in
    /// `options.index` (or the default index) are refreshed afterwards.
    pub fn bulk<D>(&self, dataset: D, options: &BulkOptions) -> Result<BulkWrite<D>, Error>
    where
        D: Dataset<Item = BulkAction>,
    {
        let refresh_indices = if options.refresh {
            let indices = options
                .index
                .as_deref()
                .or(self.config.index.as_deref())
                .ok_or(Error::MissingIndex)?;
            indices
                .split(',')
                .map(str::trim)
                .filter(|index| !index.is_empty())
                .map(ToString::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };
        Ok(BulkWrite::new(
            dataset,
            self.bulk_settings(options, refresh_indices),
        ))
    }

    fn typed_bulk<D>(
        &self,
        dataset: D,
        options: &BulkOptions,
        target: &IndexTarget,
    ) -> BulkWrite<D>
    where
        D: Dataset<Item = BulkAction>,
    {
        let refresh_indices = if options.refresh {
            vec![target.index.clone()]
        } else {
            Vec::new()
        };
        BulkWrite::new(dataset, self.bulk_settings(options, refresh_indices))
    }

    /// Indexes whole documents under generated ids, overwriting nothing but
    /// documents with the same id.
    pub fn index<D>(
        &self,
        dataset: D,
        options: &BulkOptions,
    ) -> Result<BulkWrite<Map<D, impl Fn(Document) -> BulkAction + Send + Sync>>, Error>
    where
        D: Dataset<Item = Document>,
    {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        let actions_target = target.clone();
        let actions = dataset.map(move |document| BulkAction::index(&actions_target, document));
        Ok(self.typed_bulk(actions, options, &target))
    }

    /// Creates documents from `(id, document)` pairs; ids already present are
    /// rejected by the cluster and not counted.
    pub fn create<D, K>(
        &self,
        dataset: D,
        options: &BulkOptions,
    ) -> Result<BulkWrite<Map<D, impl Fn((K, Document)) -> BulkAction + Send + Sync>>, Error>
    where
        D: Dataset<Item = (K, Document)>,
        K: ToString + Send,
    {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        let actions_target = target.clone();
        let actions = dataset
            .map(move |(id, document)| BulkAction::create(&actions_target, id, document));
        Ok(self.typed_bulk(actions, options, &target))
    }

    /// Merges partial documents from `(id, partial)` pairs into existing ones.
    pub fn update<D, K>(
        &self,
        dataset: D,
        options: &BulkOptions,
    ) -> Result<BulkWrite<Map<D, impl Fn((K, Document)) -> BulkAction + Send + Sync>>, Error>
    where
        D: Dataset<Item = (K, Document)>,
        K: ToString + Send,
    {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        let actions_target = target.clone();
        let actions =
            dataset.map(move |(id, partial)| BulkAction::update(&actions_target, id, partial));
        Ok(self.typed_bulk(actions, options, &target))
    }

    /// Like `update`, but missing documents are created from the partial ones.
    pub fn upsert<D, K>(
        &self,
        dataset: D,
        options: &BulkOptions,
    ) -> Result<BulkWrite<Map<D, impl Fn((K, Document)) -> BulkAction + Send + Sync>>, Error>
    where
        D: Dataset<Item = (K, Document)>,
        K: ToString + Send,
    {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        let actions_target = target.clone();
        let actions =
            dataset.map(move |(id, partial)| BulkAction::upsert(&actions_target, id, partial));
        Ok(self.typed_bulk(actions, options, &target))
    }

    /// Deletes the documents with the given ids.
    pub fn delete<D, K>(
        &self,
        dataset: D,
        options: &BulkOptions,
    ) -> Result<BulkWrite<Map<D, impl Fn(K) -> BulkAction + Send + Sync>>, Error>
    where
        D: Dataset<Item = K>,
        K: ToString + Send,
    {
        let target = self.target(options.index.as_deref(), options.doc_type.as_deref())?;
        let actions_target = target.clone();
        let actions = dataset.map(move |id| BulkAction::delete(&actions_target, id));
        Ok(self.typed_bulk(actions, options, &target))
    }
}
