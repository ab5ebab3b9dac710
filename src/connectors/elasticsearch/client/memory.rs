// Copyright © 2026 Pathway

//! A cluster that lives in process memory and serves the same calls as a real
//! one: shard allocation lookups, scrolls restricted by shard preference, bulk
//! writes and refreshes. Writes become visible to searches only after a refresh.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use xxhash_rust::xxh3::xxh3_64;

use super::{
    BulkItem, BulkResponse, ClientFactory, ClientSettings, ClusterClient, Document, Error, Hit,
    NodeInfo, ScanRequest, ScrollPage, SearchShardsResponse, ShardRouting,
};
use crate::connectors::elasticsearch::bulk::BulkChunk;
use crate::connectors::elasticsearch::hosts::HostSet;

/// Number of shards of indices created implicitly by a write.
const AUTO_CREATED_SHARDS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNode {
    pub id: String,
    pub transport_address: String,
}

impl MemoryNode {
    pub fn new(id: impl Into<String>, transport_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transport_address: transport_address.into(),
        }
    }
}

/// Counters of the requests a `MemoryCluster` has served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub sessions_created: usize,
    pub sessions_shut_down: usize,
    /// Hosts of every created session, in creation order.
    pub session_hosts: Vec<HostSet>,
    pub search_shards_requests: usize,
    pub scrolls_opened: usize,
    pub scrolls_cleared: usize,
    /// Number of actions in every bulk request, in arrival order.
    pub bulk_sizes: Vec<usize>,
    /// Indices of every refresh request, in arrival order.
    pub refreshes: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryShard {
    /// Primary and replicas; copies beyond `nodes` are unassigned.
    n_copies: usize,
    nodes: Vec<usize>,
    documents: BTreeMap<String, Document>,
    searchable: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct MemoryIndex {
    shards: Vec<MemoryShard>,
}

impl MemoryIndex {
    fn route(&self, id: &str) -> usize {
        let n_shards = self.shards.len().max(1) as u64;
        usize::try_from(xxh3_64(id.as_bytes()) % n_shards).unwrap_or_default()
    }

    fn shard_of(&mut self, id: &str) -> Option<&mut MemoryShard> {
        let shard = self.route(id);
        self.shards.get_mut(shard)
    }
}

struct ScrollContext {
    hits: VecDeque<Hit>,
    page_size: usize,
}

#[derive(Default)]
struct ClusterState {
    nodes: Vec<MemoryNode>,
    indices: HashMap<String, MemoryIndex>,
    scrolls: HashMap<String, ScrollContext>,
    next_scroll_id: u64,
    unavailable: bool,
    stats: ClusterStats,
}

impl ClusterState {
    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable {
            Err(Error::Unavailable("no cluster node is reachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn create_index(&mut self, name: &str, n_shards: usize, n_replicas: usize) {
        let n_nodes = self.nodes.len();
        let shards = (0..n_shards)
            .map(|shard| MemoryShard {
                n_copies: n_replicas + 1,
                nodes: if n_nodes == 0 {
                    Vec::new()
                } else {
                    (0..=n_replicas.min(n_nodes - 1))
                        .map(|copy| (shard + copy) % n_nodes)
                        .collect()
                },
                ..MemoryShard::default()
            })
            .collect();
        self.indices.insert(name.to_string(), MemoryIndex { shards });
    }

    fn index_mut(&mut self, name: &str) -> &mut MemoryIndex {
        if !self.indices.contains_key(name) {
            debug!("Creating index {name:?} on first write");
            self.create_index(name, AUTO_CREATED_SHARDS, 0);
        }
        self.indices.entry(name.to_string()).or_default()
    }

    fn next_scroll_id(&mut self) -> String {
        self.next_scroll_id += 1;
        format!("scroll-{}", self.next_scroll_id)
    }
}

/// Handle to an in-memory cluster. Clones share the same cluster.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new(nodes: Vec<MemoryNode>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                nodes,
                ..ClusterState::default()
            })),
        }
    }

    /// Copies of shard `i` are placed on nodes `i`, `i + 1`, ... (modulo the
    /// number of nodes), one primary and up to `n_replicas` replicas.
    pub fn create_index(&self, name: &str, n_shards: usize, n_replicas: usize) {
        self.state
            .lock()
            .unwrap()
            .create_index(name, n_shards, n_replicas);
    }

    /// Ids of the nodes holding a copy of a shard.
    pub fn shard_nodes(&self, index: &str, shard: usize) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .indices
            .get(index)
            .and_then(|index| index.shards.get(shard))
            .map(|shard| {
                shard
                    .nodes
                    .iter()
                    .map(|node| state.nodes[*node].id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// While unavailable, every request fails as if no node could be reached.
    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().unavailable = !available;
    }

    /// Documents written so far, searchable or not.
    pub fn n_documents(&self, index: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .indices
            .get(index)
            .map_or(0, |index| {
                index.shards.iter().map(|shard| shard.documents.len()).sum()
            })
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        let mut state = self.state.lock().unwrap();
        let index = state.indices.get_mut(index)?;
        index.shard_of(id)?.documents.get(id).cloned()
    }

    pub fn n_open_scrolls(&self) -> usize {
        self.state.lock().unwrap().scrolls.len()
    }

    pub fn stats(&self) -> ClusterStats {
        self.state.lock().unwrap().stats.clone()
    }
}

impl ClientFactory for MemoryCluster {
    fn create(
        &self,
        hosts: &HostSet,
        _settings: &ClientSettings,
    ) -> Result<Box<dyn ClusterClient>, Error> {
        if hosts.is_empty() {
            return Err(Error::NoHosts);
        }
        let mut state = self.state.lock().unwrap();
        state.stats.sessions_created += 1;
        state.stats.session_hosts.push(hosts.clone());
        Ok(Box::new(MemoryClient {
            state: self.state.clone(),
        }))
    }
}

/// A session with a `MemoryCluster`.
pub struct MemoryClient {
    state: Arc<Mutex<ClusterState>>,
}

impl ClusterClient for MemoryClient {
    fn search_shards(
        &mut self,
        index: &str,
        _doc_type: Option<&str>,
    ) -> Result<SearchShardsResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        state.stats.search_shards_requests += 1;
        let memory_index = state
            .indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

        let mut response = SearchShardsResponse::default();
        for (shard_idx, shard) in memory_index.shards.iter().enumerate() {
            let copies = (0..shard.n_copies.max(shard.nodes.len()))
                .map(|copy| {
                    let node = shard.nodes.get(copy).map(|node| {
                        let node = &state.nodes[*node];
                        response.nodes.insert(
                            node.id.clone(),
                            NodeInfo {
                                name: Some(node.id.clone()),
                                transport_address: node.transport_address.clone(),
                            },
                        );
                        node.id.clone()
                    });
                    ShardRouting {
                        index: index.to_string(),
                        shard: u32::try_from(shard_idx).unwrap_or(u32::MAX),
                        node,
                        primary: copy == 0,
                    }
                })
                .collect();
            response.shards.push(copies);
        }
        Ok(response)
    }

    fn open_scroll(&mut self, request: &ScanRequest<'_>) -> Result<ScrollPage, Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        let index = state
            .indices
            .get(request.index)
            .ok_or_else(|| Error::IndexNotFound(request.index.to_string()))?;

        let selected = match &request.preference {
            Some(preference) => parse_shard_preference(preference)?,
            None => (0..index.shards.len()).collect(),
        };
        let matcher = QueryMatcher::new(request.options.query.as_ref(), request.options.q.as_deref())?;
        let mut hits = VecDeque::new();
        for shard in selected {
            let Some(shard) = index.shards.get(shard) else {
                continue;
            };
            for (id, source) in &shard.searchable {
                if matcher.matches(id, source) {
                    hits.push_back(Hit {
                        index: request.index.to_string(),
                        id: id.clone(),
                        source: source.clone(),
                    });
                }
            }
        }

        let page_size = usize::try_from(request.options.size).unwrap_or(usize::MAX).max(1);
        let page = take_page(&mut hits, page_size);
        let scroll_id = state.next_scroll_id();
        state.stats.scrolls_opened += 1;
        state
            .scrolls
            .insert(scroll_id.clone(), ScrollContext { hits, page_size });
        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            hits: page,
        })
    }

    fn scroll(&mut self, scroll_id: &str, _keep_alive: &str) -> Result<ScrollPage, Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        let context = state
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| Error::ScrollNotFound(scroll_id.to_string()))?;
        let page_size = context.page_size;
        Ok(ScrollPage {
            scroll_id: Some(scroll_id.to_string()),
            hits: take_page(&mut context.hits, page_size),
        })
    }

    fn clear_scroll(&mut self, scroll_id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        if state.scrolls.remove(scroll_id).is_some() {
            state.stats.scrolls_cleared += 1;
        }
        Ok(())
    }

    fn bulk(&mut self, chunk: &BulkChunk, _timeout: Duration) -> Result<BulkResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;

        let mut lines = chunk
            .body()
            .iter()
            .map(|line| serde_json::from_slice::<JsonValue>(line));
        let mut items = Vec::with_capacity(chunk.len());
        while let Some(action) = lines.next() {
            let action = action.map_err(|e| Error::MalformedResponse(e.to_string()))?;
            let (operation, metadata) = action
                .as_object()
                .and_then(|action| action.iter().next())
                .ok_or_else(|| Error::MalformedResponse(format!("bad bulk action: {action}")))?;
            let body = if operation == "delete" {
                None
            } else {
                let body = lines
                    .next()
                    .ok_or_else(|| {
                        Error::MalformedResponse(format!("{operation} action without a body"))
                    })?
                    .map_err(|e| Error::MalformedResponse(e.to_string()))?;
                Some(body)
            };
            let index = metadata
                .get("_index")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| Error::MalformedResponse("bulk action without an index".to_string()))?;
            let id = metadata
                .get("_id")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string);
            let item = apply_action(state.index_mut(index), operation, id, body)?;
            items.push(item);
        }

        state.stats.bulk_sizes.push(items.len());
        Ok(BulkResponse { items })
    }

    fn refresh(&mut self, indices: &[String]) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        for name in indices {
            let index = state
                .indices
                .get_mut(name)
                .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
            for shard in &mut index.shards {
                shard.searchable = shard.documents.clone();
            }
        }
        state.stats.refreshes.push(indices.to_vec());
        Ok(())
    }

    fn shutdown(self: Box<Self>) {
        self.state.lock().unwrap().stats.sessions_shut_down += 1;
    }
}

fn take_page(hits: &mut VecDeque<Hit>, page_size: usize) -> Vec<Hit> {
    let n_hits = page_size.min(hits.len());
    hits.drain(..n_hits).collect()
}

/// Shards named by a `_shards:0,2` preference.
fn parse_shard_preference(preference: &str) -> Result<Vec<usize>, Error> {
    let unsupported = || Error::MalformedResponse(format!("unsupported preference {preference:?}"));
    let shards = preference.strip_prefix("_shards:").ok_or_else(unsupported)?;
    let shards = shards.split_once('|').map_or(shards, |(shards, _)| shards);
    shards
        .split(',')
        .map(|shard| shard.trim().parse::<usize>().map_err(|_| unsupported()))
        .collect()
}

fn bulk_item(operation: &str, id: &str, status: u16, error: Option<JsonValue>) -> BulkItem {
    BulkItem {
        operation: operation.to_string(),
        id: Some(id.to_string()),
        status,
        error,
    }
}

fn apply_action(
    index: &mut MemoryIndex,
    operation: &str,
    id: Option<String>,
    body: Option<JsonValue>,
) -> Result<BulkItem, Error> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let Some(shard) = index.shard_of(&id) else {
        let error = json!({ "type": "no_shard_available_action_exception" });
        return Ok(bulk_item(operation, &id, 503, Some(error)));
    };
    let documents = &mut shard.documents;
    let item = match operation {
        "index" => {
            let status = if documents.contains_key(&id) { 200 } else { 201 };
            documents.insert(id.clone(), body.unwrap_or(JsonValue::Null));
            bulk_item(operation, &id, status, None)
        }
        "create" => {
            if documents.contains_key(&id) {
                let error = json!({
                    "type": "version_conflict_engine_exception",
                    "reason": format!("[{id}]: version conflict, document already exists"),
                });
                bulk_item(operation, &id, 409, Some(error))
            } else {
                documents.insert(id.clone(), body.unwrap_or(JsonValue::Null));
                bulk_item(operation, &id, 201, None)
            }
        }
        "update" => {
            let body = body.unwrap_or(JsonValue::Null);
            let partial = body.get("doc").cloned().unwrap_or(JsonValue::Null);
            let as_upsert = body
                .get("doc_as_upsert")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            if let Some(document) = documents.get_mut(&id) {
                merge(document, partial);
                bulk_item(operation, &id, 200, None)
            } else if as_upsert {
                documents.insert(id.clone(), partial);
                bulk_item(operation, &id, 201, None)
            } else {
                let error = json!({
                    "type": "document_missing_exception",
                    "reason": format!("[{id}]: document missing"),
                });
                bulk_item(operation, &id, 404, Some(error))
            }
        }
        "delete" => {
            let status = if documents.remove(&id).is_some() { 200 } else { 404 };
            bulk_item(operation, &id, status, None)
        }
        _ => {
            return Err(Error::MalformedResponse(format!(
                "unknown bulk operation {operation:?}"
            )))
        }
    };
    Ok(item)
}

fn merge(document: &mut JsonValue, partial: JsonValue) {
    match (document, partial) {
        (JsonValue::Object(document), JsonValue::Object(partial)) => {
            for (key, value) in partial {
                match document.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        document.insert(key, value);
                    }
                }
            }
        }
        (document, partial) => *document = partial,
    }
}

/// The subset of the query DSL the in-memory cluster understands:
/// `match_all`, `term`, `terms`, `ids` and `range`, or a `field:value`
/// query string.
enum QueryMatcher {
    All,
    Term(String, JsonValue),
    Terms(String, Vec<JsonValue>),
    Ids(Vec<String>),
    Range(String, JsonMap<String, JsonValue>),
    QueryString(String, String),
}

impl QueryMatcher {
    fn new(body: Option<&JsonValue>, q: Option<&str>) -> Result<Self, Error> {
        if let Some(q) = q {
            return Ok(match q.split_once(':') {
                Some((field, value)) => Self::QueryString(field.to_string(), value.to_string()),
                None if q.trim() == "*" => Self::All,
                None => return Err(unsupported_query(q)),
            });
        }
        let Some(query) = body.and_then(|body| body.get("query")) else {
            return Ok(Self::All);
        };
        let (kind, clause) = query
            .as_object()
            .and_then(|query| query.iter().next())
            .ok_or_else(|| unsupported_query(query))?;
        let field_clause = || {
            clause
                .as_object()
                .and_then(|clause| clause.iter().next())
                .map(|(field, value)| (field.clone(), value.clone()))
                .ok_or_else(|| unsupported_query(query))
        };
        match kind.as_str() {
            "match_all" => Ok(Self::All),
            "term" => {
                let (field, value) = field_clause()?;
                let value = value.get("value").cloned().unwrap_or(value);
                Ok(Self::Term(field, value))
            }
            "terms" => {
                let (field, values) = field_clause()?;
                match values {
                    JsonValue::Array(values) => Ok(Self::Terms(field, values)),
                    _ => Err(unsupported_query(query)),
                }
            }
            "ids" => {
                let ids = clause
                    .get("values")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| unsupported_query(query))?
                    .iter()
                    .filter_map(|id| id.as_str().map(ToString::to_string))
                    .collect();
                Ok(Self::Ids(ids))
            }
            "range" => {
                let (field, bounds) = field_clause()?;
                match bounds {
                    JsonValue::Object(bounds) => Ok(Self::Range(field, bounds)),
                    _ => Err(unsupported_query(query)),
                }
            }
            _ => Err(unsupported_query(query)),
        }
    }

    fn matches(&self, id: &str, source: &JsonValue) -> bool {
        match self {
            Self::All => true,
            Self::Term(field, value) => source.get(field) == Some(value),
            Self::Terms(field, values) => source
                .get(field)
                .is_some_and(|actual| values.contains(actual)),
            Self::Ids(ids) => ids.iter().any(|candidate| candidate == id),
            Self::Range(field, bounds) => source
                .get(field)
                .is_some_and(|actual| within_bounds(actual, bounds)),
            Self::QueryString(field, value) => source.get(field).is_some_and(|actual| match actual {
                JsonValue::String(actual) => actual == value,
                actual => actual.to_string() == *value,
            }),
        }
    }
}

fn unsupported_query(query: impl std::fmt::Display) -> Error {
    Error::MalformedResponse(format!("query not supported by the in-memory cluster: {query}"))
}

fn within_bounds(actual: &JsonValue, bounds: &JsonMap<String, JsonValue>) -> bool {
    bounds.iter().all(|(bound, limit)| {
        let Some(ordering) = compare(actual, limit) else {
            return false;
        };
        match bound.as_str() {
            "gt" => ordering.is_gt(),
            "gte" => ordering.is_ge(),
            "lt" => ordering.is_lt(),
            "lte" => ordering.is_le(),
            _ => true,
        }
    })
}

fn compare(left: &JsonValue, right: &JsonValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (JsonValue::Number(left), JsonValue::Number(right)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (JsonValue::String(left), JsonValue::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}
