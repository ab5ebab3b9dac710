// Copyright © 2026 Pathway

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::client::{ClusterClient, Document};
use super::{ElasticContext, Error, IndexTarget, Operation};
use crate::engine::{Dataset, DynResult, Partition, PartitionIter, WorkerId, WorkerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    /// Writes the whole document, replacing any previous version.
    Index,
    /// Writes the document only if the id is not taken yet.
    Create,
    /// Merges a partial document into an existing one.
    Update,
    /// Like `Update`, but creates the document when the id is absent.
    Upsert,
    Delete,
}

impl BulkOperation {
    /// Name of the action in the bulk API.
    pub fn action_name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Create => "create",
            Self::Update | Self::Upsert => "update",
            Self::Delete => "delete",
        }
    }
}

/// A single document operation, built on the fly from a source record.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub operation: BulkOperation,
    pub index: String,
    pub doc_type: Option<String>,
    pub id: Option<String>,
    pub source: Option<Document>,
}

impl BulkAction {
    fn new(
        operation: BulkOperation,
        target: &IndexTarget,
        id: Option<String>,
        source: Option<Document>,
    ) -> Self {
        Self {
            operation,
            index: target.index.clone(),
            doc_type: target.doc_type.clone(),
            id,
            source,
        }
    }

    pub fn index(target: &IndexTarget, document: Document) -> Self {
        Self::new(BulkOperation::Index, target, None, Some(document))
    }

    pub fn create(target: &IndexTarget, id: impl ToString, document: Document) -> Self {
        Self::new(
            BulkOperation::Create,
            target,
            Some(id.to_string()),
            Some(document),
        )
    }

    pub fn update(target: &IndexTarget, id: impl ToString, partial: Document) -> Self {
        Self::new(
            BulkOperation::Update,
            target,
            Some(id.to_string()),
            Some(partial),
        )
    }

    pub fn upsert(target: &IndexTarget, id: impl ToString, partial: Document) -> Self {
        Self::new(
            BulkOperation::Upsert,
            target,
            Some(id.to_string()),
            Some(partial),
        )
    }

    pub fn delete(target: &IndexTarget, id: impl ToString) -> Self {
        Self::new(BulkOperation::Delete, target, Some(id.to_string()), None)
    }

    /// The lines this action contributes to a bulk request body.
    pub fn encode(&self) -> Result<Vec<Vec<u8>>, serde_json::Error> {
        let mut metadata = JsonMap::new();
        metadata.insert("_index".to_string(), json!(self.index));
        if let Some(doc_type) = &self.doc_type {
            metadata.insert("_type".to_string(), json!(doc_type));
        }
        if let Some(id) = &self.id {
            metadata.insert("_id".to_string(), json!(id));
        }

        let mut action = JsonMap::new();
        action.insert(
            self.operation.action_name().to_string(),
            JsonValue::Object(metadata),
        );
        let mut lines = vec![serde_json::to_vec(&action)?];
        let source = self.source.clone().unwrap_or(JsonValue::Null);
        match self.operation {
            BulkOperation::Index | BulkOperation::Create => {
                lines.push(serde_json::to_vec(&source)?);
            }
            BulkOperation::Update => {
                lines.push(serde_json::to_vec(&json!({ "doc": source }))?);
            }
            BulkOperation::Upsert => {
                lines.push(serde_json::to_vec(
                    &json!({ "doc": source, "doc_as_upsert": true }),
                )?);
            }
            BulkOperation::Delete => {}
        }
        Ok(lines)
    }
}

/// Actions sent in one bulk request, with their encoded body.
#[derive(Debug, Clone, Default)]
pub struct BulkChunk {
    actions: Vec<BulkAction>,
    body: Vec<Vec<u8>>,
    n_bytes: usize,
}

impl BulkChunk {
    fn push(&mut self, action: BulkAction, lines: Vec<Vec<u8>>, n_bytes: usize) {
        self.actions.push(action);
        self.body.extend(lines);
        self.n_bytes += n_bytes;
    }

    pub fn actions(&self) -> &[BulkAction] {
        &self.actions
    }

    /// Newline delimited JSON lines, without the delimiters.
    pub fn body(&self) -> &[Vec<u8>] {
        &self.body
    }

    pub fn n_bytes(&self) -> usize {
        self.n_bytes
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn index(&self) -> &str {
        self.actions.first().map_or("", |action| action.index.as_str())
    }
}

/// Request bounds of the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLimits {
    pub chunk_size: usize,
    pub max_chunk_bytes: usize,
    pub timeout: Duration,
}

/// Groups actions into chunks of at most `chunk_size` actions and
/// `max_chunk_bytes` bytes, keeping their order. An action larger than the
/// byte limit is sent alone.
pub struct BulkChunker<I> {
    actions: I,
    limits: BulkLimits,
    pending: Option<(BulkAction, Vec<Vec<u8>>, usize)>,
}

impl<I> BulkChunker<I> {
    pub fn new(actions: I, limits: BulkLimits) -> Self {
        Self {
            actions,
            limits,
            pending: None,
        }
    }
}

impl<I> Iterator for BulkChunker<I>
where
    I: Iterator<Item = DynResult<BulkAction>>,
{
    type Item = DynResult<BulkChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk_size = self.limits.chunk_size.max(1);
        let mut chunk = BulkChunk::default();
        if let Some((action, lines, n_bytes)) = self.pending.take() {
            chunk.push(action, lines, n_bytes);
        }

        while chunk.len() < chunk_size {
            let action = match self.actions.next() {
                Some(Ok(action)) => action,
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            };
            let lines = match action.encode() {
                Ok(lines) => lines,
                Err(e) => return Some(Err(e.into())),
            };
            // every line is followed by a newline in the request body
            let n_bytes = lines.iter().map(|line| line.len() + 1).sum::<usize>();
            if !chunk.is_empty() && chunk.n_bytes() + n_bytes > self.limits.max_chunk_bytes {
                self.pending = Some((action, lines, n_bytes));
                break;
            }
            chunk.push(action, lines, n_bytes);
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub succeeded: u64,
    pub failed: u64,
}

/// Sends `actions` chunk by chunk, in order, through one session.
///
/// Rejected actions are only counted unless `raise_on_error` is set. A failing
/// request aborts the submission; chunks sent before it stay applied.
pub fn submit_actions(
    client: &mut dyn ClusterClient,
    actions: impl Iterator<Item = DynResult<BulkAction>>,
    limits: BulkLimits,
    raise_on_error: bool,
) -> DynResult<BulkStats> {
    let mut stats = BulkStats::default();
    for chunk in BulkChunker::new(actions, limits) {
        let chunk = chunk?;
        debug!(
            "Submitting {} bulk actions ({} bytes) to index {:?}",
            chunk.len(),
            chunk.n_bytes(),
            chunk.index()
        );
        let response = client
            .bulk(&chunk, limits.timeout)
            .map_err(|source| Error::Request {
                operation: Operation::Bulk,
                index: chunk.index().to_string(),
                source,
            })?;

        let n_failed = response.n_failed();
        stats.succeeded += response.n_succeeded() as u64;
        stats.failed += n_failed as u64;
        if n_failed > 0 {
            warn!(
                "{n_failed} of {} bulk actions were rejected by index {:?}",
                chunk.len(),
                chunk.index()
            );
            if raise_on_error {
                return Err(Error::BulkItemsRejected {
                    index: chunk.index().to_string(),
                    rejected: n_failed,
                }
                .into());
            }
        }
    }
    Ok(stats)
}

pub(crate) struct BulkWriteSettings {
    pub context: ElasticContext,
    pub hosts: Vec<String>,
    pub limits: BulkLimits,
    pub refresh_indices: Vec<String>,
    pub raise_on_error: bool,
}

/// Writes every partition of `source` with bulk requests. Each partition
/// yields the number of actions the cluster applied; the indices to refresh,
/// if any, are refreshed once after all partitions are done.
pub struct BulkWrite<D> {
    source: D,
    settings: Arc<BulkWriteSettings>,
}

impl<D> BulkWrite<D> {
    pub(crate) fn new(source: D, settings: BulkWriteSettings) -> Self {
        Self {
            source,
            settings: Arc::new(settings),
        }
    }

    pub fn refresh_indices(&self) -> &[String] {
        &self.settings.refresh_indices
    }
}

pub struct BulkPartition<P> {
    source: P,
    settings: Arc<BulkWriteSettings>,
}

impl<D> Dataset for BulkWrite<D>
where
    D: Dataset<Item = BulkAction>,
{
    type Item = u64;
    type Part = BulkPartition<D::Part>;

    fn parts(&self) -> DynResult<Vec<Self::Part>> {
        Ok(self
            .source
            .parts()?
            .into_iter()
            .map(|source| BulkPartition {
                source,
                settings: self.settings.clone(),
            })
            .collect())
    }

    fn cleanup(&self) -> DynResult<()> {
        if !self.settings.refresh_indices.is_empty() {
            self.settings
                .context
                .refresh(&self.settings.hosts, &self.settings.refresh_indices)?;
        }
        self.source.cleanup()
    }
}

impl<P> Partition for BulkPartition<P>
where
    P: Partition<Item = BulkAction>,
{
    type Item = u64;

    fn idx(&self) -> usize {
        self.source.idx()
    }

    fn compute(&self) -> DynResult<PartitionIter<'_, u64>> {
        let settings = &self.settings;
        let mut client = settings.context.client(&settings.hosts)?;
        let stats = submit_actions(
            &mut **client,
            self.source.compute()?,
            settings.limits,
            settings.raise_on_error,
        )?;
        if stats.failed > 0 {
            info!(
                "Bulk partition {}: {} actions applied, {} rejected",
                self.source.idx(),
                stats.succeeded,
                stats.failed
            );
        }
        Ok(Box::new(std::iter::once(Ok(stats.succeeded))))
    }

    fn locality(&self, workers: &[WorkerInfo]) -> Vec<WorkerId> {
        self.source.locality(workers)
    }
}
