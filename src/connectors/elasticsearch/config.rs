// Copyright © 2026 Pathway

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::client::ClientSettings;
use super::pool::DEFAULT_POOL_CAPACITY;
use crate::env::{parse_env_list, parse_env_seconds, parse_env_var, Error as EnvError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_BULK_CHUNK_SIZE: usize = 100;
const DEFAULT_BULK_MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Defaults for every elasticsearch operation; most can be overridden per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    /// Contact points. When empty, the addresses of the workers are used.
    pub hosts: Vec<String>,
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_on_timeout: bool,
    /// Falls back to `timeout` when not set.
    pub bulk_timeout: Option<Duration>,
    pub bulk_chunk_size: usize,
    pub bulk_max_chunk_bytes: usize,
    /// Idle sessions kept per set of hosts.
    pub pool_capacity: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            index: None,
            doc_type: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_on_timeout: true,
            bulk_timeout: None,
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            bulk_max_chunk_bytes: DEFAULT_BULK_MAX_CHUNK_BYTES,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl ElasticConfig {
    /// Defaults overridden by the `PATHWAY_ELASTIC_*` environment variables that are set.
    pub fn from_env() -> Result<Self, EnvError> {
        let mut config = Self::default();
        if let Some(hosts) = parse_env_list("PATHWAY_ELASTIC_HOSTS")? {
            config.hosts = hosts;
        }
        if let Some(index) = parse_env_var("PATHWAY_ELASTIC_INDEX")? {
            config.index = Some(index);
        }
        if let Some(doc_type) = parse_env_var("PATHWAY_ELASTIC_DOC_TYPE")? {
            config.doc_type = Some(doc_type);
        }
        if let Some(timeout) = parse_env_seconds("PATHWAY_ELASTIC_TIMEOUT")? {
            config.timeout = timeout;
        }
        if let Some(max_retries) = parse_env_var("PATHWAY_ELASTIC_MAX_RETRIES")? {
            config.max_retries = max_retries;
        }
        if let Some(retry_on_timeout) = parse_env_var("PATHWAY_ELASTIC_RETRY_ON_TIMEOUT")? {
            config.retry_on_timeout = retry_on_timeout;
        }
        if let Some(bulk_timeout) = parse_env_seconds("PATHWAY_ELASTIC_BULK_TIMEOUT")? {
            config.bulk_timeout = Some(bulk_timeout);
        }
        if let Some(chunk_size) = parse_env_var("PATHWAY_ELASTIC_BULK_CHUNK_SIZE")? {
            config.bulk_chunk_size = chunk_size;
        }
        if let Some(max_chunk_bytes) = parse_env_var("PATHWAY_ELASTIC_BULK_MAX_CHUNK_BYTES")? {
            config.bulk_max_chunk_bytes = max_chunk_bytes;
        }
        if let Some(pool_capacity) = parse_env_var("PATHWAY_ELASTIC_POOL_CAPACITY")? {
            config.pool_capacity = pool_capacity;
        }
        Ok(config)
    }

    pub fn bulk_timeout(&self) -> Duration {
        self.bulk_timeout.unwrap_or(self.timeout)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_on_timeout: self.retry_on_timeout,
        }
    }
}
