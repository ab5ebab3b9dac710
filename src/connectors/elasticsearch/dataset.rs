// Copyright © 2026 Pathway

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};

use super::client::{Hit, ScanOptions, ScanRequest, ScrollPage};
use super::pool::PooledClient;
use super::{ElasticContext, Error, IndexTarget, Operation};
use crate::engine::{Dataset, DynResult, Partition, PartitionIter, WorkerId, WorkerInfo};

/// Where one shard of an index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub index: String,
    pub shard: u32,
    /// Hostnames of the nodes holding a copy of the shard.
    pub hosts: BTreeSet<String>,
}

impl ShardDescriptor {
    /// Routing hint restricting a search to this shard.
    pub fn preference(&self) -> String {
        format!("_shards:{}", self.shard)
    }
}

struct DatasetInner {
    context: ElasticContext,
    target: IndexTarget,
    hosts: Vec<String>,
    scan: ScanOptions,
}

/// The documents of one index, partitioned along its shards.
#[derive(Clone)]
pub struct ElasticSearchDataset {
    inner: Arc<DatasetInner>,
}

impl ElasticSearchDataset {
    pub(crate) fn new(
        context: ElasticContext,
        target: IndexTarget,
        hosts: Vec<String>,
        scan: ScanOptions,
    ) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                context,
                target,
                hosts,
                scan,
            }),
        }
    }

    pub fn target(&self) -> &IndexTarget {
        &self.inner.target
    }

    pub fn scan_options(&self) -> &ScanOptions {
        &self.inner.scan
    }

    /// Current allocation of the index, one descriptor per shard, in the order
    /// the cluster reports them.
    pub fn shards(&self) -> Result<Vec<ShardDescriptor>, Error> {
        let inner = &self.inner;
        let target = &inner.target;
        let mut client = inner.context.client(&inner.hosts)?;
        let response = client
            .search_shards(&target.index, target.doc_type.as_deref())
            .map_err(|source| Error::Request {
                operation: Operation::SearchShards,
                index: target.index.clone(),
                source,
            })?;

        let resolver = inner.context.resolver();
        let mut shards = Vec::with_capacity(response.shards.len());
        for (position, copies) in response.shards.iter().enumerate() {
            let mut hosts = BTreeSet::new();
            for copy in copies {
                let Some(node_id) = &copy.node else {
                    continue;
                };
                match response.nodes.get(node_id) {
                    Some(node) => {
                        hosts.insert(resolver.hostname(&node.transport_address));
                    }
                    None => warn!(
                        "Shard {} of index {:?} is allocated to unknown node {node_id:?}",
                        copy.shard, copy.index
                    ),
                }
            }
            if hosts.is_empty() {
                warn!(
                    "No copy of shard {position} of index {:?} is assigned to a node",
                    target.index
                );
            }
            shards.push(match copies.first() {
                Some(first) => ShardDescriptor {
                    index: first.index.clone(),
                    shard: first.shard,
                    hosts,
                },
                None => ShardDescriptor {
                    index: target.index.clone(),
                    shard: u32::try_from(position).unwrap_or(u32::MAX),
                    hosts,
                },
            });
        }
        Ok(shards)
    }
}

impl Dataset for ElasticSearchDataset {
    type Item = Hit;
    type Part = ShardPartition;

    fn parts(&self) -> DynResult<Vec<ShardPartition>> {
        let shards = self.shards()?;
        info!(
            "Index {:?} has {} shards",
            self.inner.target.index,
            shards.len()
        );
        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(idx, shard)| ShardPartition {
                dataset: self.inner.clone(),
                idx,
                shard,
            })
            .collect())
    }
}

/// One shard of an `ElasticSearchDataset`.
pub struct ShardPartition {
    dataset: Arc<DatasetInner>,
    idx: usize,
    shard: ShardDescriptor,
}

impl ShardPartition {
    pub fn shard(&self) -> &ShardDescriptor {
        &self.shard
    }
}

impl Partition for ShardPartition {
    type Item = Hit;

    fn idx(&self) -> usize {
        self.idx
    }

    fn compute(&self) -> DynResult<PartitionIter<'_, Hit>> {
        Ok(Box::new(ScanIter::new(&self.dataset, &self.shard)))
    }

    fn locality(&self, workers: &[WorkerInfo]) -> Vec<WorkerId> {
        workers
            .iter()
            .filter(|worker| worker.shares_address_with(&self.shard.hosts))
            .map(|worker| worker.id.clone())
            .collect()
    }
}

/// Scroll over a single shard. Nothing is sent before the first `next`; the
/// session goes back to its pool and the scroll context is cleared as soon as
/// the scan is exhausted, fails or is dropped.
struct ScanIter<'a> {
    dataset: &'a DatasetInner,
    shard: &'a ShardDescriptor,
    client: Option<PooledClient>,
    scroll_id: Option<String>,
    buffer: VecDeque<Hit>,
    started: bool,
    done: bool,
}

impl<'a> ScanIter<'a> {
    fn new(dataset: &'a DatasetInner, shard: &'a ShardDescriptor) -> Self {
        Self {
            dataset,
            shard,
            client: None,
            scroll_id: None,
            buffer: VecDeque::new(),
            started: false,
            done: false,
        }
    }

    fn fetch_page(&mut self) -> Result<ScrollPage, Error> {
        let dataset = self.dataset;
        let scan_error = |source| Error::Request {
            operation: Operation::Scan,
            index: dataset.target.index.clone(),
            source,
        };

        if !self.started {
            self.started = true;
            let client = self.client.insert(dataset.context.client(&dataset.hosts)?);
            let request = ScanRequest {
                index: &dataset.target.index,
                doc_type: dataset.target.doc_type.as_deref(),
                preference: Some(self.shard.preference()),
                options: &dataset.scan,
            };
            debug!(
                "Opening a scroll over shard {} of index {:?}",
                self.shard.shard, self.shard.index
            );
            return client.open_scroll(&request).map_err(scan_error);
        }

        match (&mut self.client, &self.scroll_id) {
            (Some(client), Some(scroll_id)) => client
                .scroll(scroll_id, &dataset.scan.scroll)
                .map_err(scan_error),
            _ => Ok(ScrollPage::default()),
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let (Some(client), Some(scroll_id)) = (&mut self.client, self.scroll_id.take()) {
            if let Err(e) = client.clear_scroll(&scroll_id) {
                warn!("Failed to clear scroll context of index {:?}: {e}", self.shard.index);
            }
        }
        self.client = None;
    }
}

impl Iterator for ScanIter<'_> {
    type Item = DynResult<Hit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.buffer.pop_front() {
                return Some(Ok(hit));
            }
            if self.done {
                return None;
            }
            match self.fetch_page() {
                Ok(page) => {
                    if page.scroll_id.is_some() {
                        self.scroll_id = page.scroll_id;
                    }
                    if page.hits.is_empty() {
                        self.finish();
                    } else {
                        self.buffer.extend(page.hits);
                    }
                }
                Err(e) => {
                    self.finish();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

impl Drop for ScanIter<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.finish();
        }
    }
}
