// Copyright © 2026 Pathway

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use elasticsearch::http::transport::BuildError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::bulk::BulkChunk;
use super::hosts::HostSet;

pub use http::{HttpClient, HttpClientFactory};
pub use memory::{ClusterStats, MemoryCluster, MemoryNode};

pub mod http;
pub mod memory;

pub type Document = JsonValue;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("elasticsearch client error: {0:?}")]
    Elasticsearch(#[from] elasticsearch::Error),

    #[error("failed to build elasticsearch transport: {0:?}")]
    TransportBuild(#[from] BuildError),

    #[error("failed to parse node URL {host:?}: {reason}")]
    InvalidUrl { host: String, reason: String },

    #[error("no hosts to connect to")]
    NoHosts,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cluster is unavailable: {0}")]
    Unavailable(String),

    #[error("index {0:?} doesn't exist")]
    IndexNotFound(String),

    #[error("scroll context {0:?} doesn't exist")]
    ScrollNotFound(String),
}

/// Session parameters shared by all sessions of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_on_timeout: bool,
}

/// Reply to a shard-allocation lookup: the nodes involved and, for every shard,
/// the list of its copies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchShardsResponse {
    pub nodes: HashMap<String, NodeInfo>,
    pub shards: Vec<Vec<ShardRouting>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub name: Option<String>,
    pub transport_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardRouting {
    pub index: String,
    pub shard: u32,
    /// Unassigned copies have no node.
    pub node: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Document,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<Hit>,
}

/// Parameters of a scan. The query is passed to the cluster untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Search request body, e.g. `{"query": {"range": {...}}}`.
    pub query: Option<JsonValue>,
    /// Query in the Lucene query-string syntax.
    pub q: Option<String>,
    /// Hits per scroll page.
    pub size: u32,
    /// How long the server keeps the scroll context between pages.
    pub scroll: String,
    pub request_timeout: Option<Duration>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            query: None,
            q: None,
            size: 1000,
            scroll: "5m".to_string(),
            request_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub index: &'a str,
    pub doc_type: Option<&'a str>,
    /// Routing hint, e.g. `_shards:3`.
    pub preference: Option<String>,
    pub options: &'a ScanOptions,
}

/// Outcome of a single action within a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub operation: String,
    pub id: Option<String>,
    pub status: u16,
    pub error: Option<JsonValue>,
}

impl BulkItem {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn n_succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn n_failed(&self) -> usize {
        self.items.len() - self.n_succeeded()
    }

    /// Reads the `items` of a bulk API reply, where every item is an object
    /// with the operation name as its only key.
    pub fn from_json(reply: &JsonValue) -> Result<Self, Error> {
        let items = reply
            .get("items")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| Error::MalformedResponse("bulk reply has no items".to_string()))?;

        let items = items
            .iter()
            .map(|item| {
                let (operation, result) = item
                    .as_object()
                    .and_then(|item| item.iter().next())
                    .ok_or_else(|| {
                        Error::MalformedResponse(format!("unexpected bulk item: {item}"))
                    })?;
                let status = result
                    .get("status")
                    .and_then(JsonValue::as_u64)
                    .and_then(|status| u16::try_from(status).ok())
                    .ok_or_else(|| {
                        Error::MalformedResponse(format!("bulk item without status: {item}"))
                    })?;
                Ok(BulkItem {
                    operation: operation.clone(),
                    id: result
                        .get("_id")
                        .and_then(JsonValue::as_str)
                        .map(ToString::to_string),
                    status,
                    error: result.get("error").cloned(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { items })
    }
}

/// One session with a cluster. `&mut self` everywhere: a session serves a
/// single logical operation at a time.
pub trait ClusterClient: Send {
    fn search_shards(
        &mut self,
        index: &str,
        doc_type: Option<&str>,
    ) -> Result<SearchShardsResponse, Error>;

    fn open_scroll(&mut self, request: &ScanRequest<'_>) -> Result<ScrollPage, Error>;

    fn scroll(&mut self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage, Error>;

    fn clear_scroll(&mut self, scroll_id: &str) -> Result<(), Error>;

    fn bulk(&mut self, chunk: &BulkChunk, timeout: Duration) -> Result<BulkResponse, Error>;

    fn refresh(&mut self, indices: &[String]) -> Result<(), Error>;

    /// Releases the resources of a session that is not going back to a pool.
    fn shutdown(self: Box<Self>) {}
}

pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        hosts: &HostSet,
        settings: &ClientSettings,
    ) -> Result<Box<dyn ClusterClient>, Error>;
}
