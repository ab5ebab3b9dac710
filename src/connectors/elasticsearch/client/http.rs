// Copyright © 2026 Pathway

use std::future::Future;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use elasticsearch::http::response::Response;
use elasticsearch::http::transport::TransportBuilder;
use elasticsearch::http::{StatusCode, Url};
use elasticsearch::indices::IndicesRefreshParts;
use elasticsearch::{
    BulkParts, ClearScrollParts, Elasticsearch, ScrollParts, SearchParts, SearchShardsParts,
};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::runtime::Runtime as TokioRuntime;

use super::{
    BulkResponse, ClientFactory, ClientSettings, ClusterClient, Error, Hit, ScanRequest,
    ScrollPage, SearchShardsResponse,
};
use crate::async_runtime::create_async_tokio_runtime;
use crate::connectors::elasticsearch::bulk::BulkChunk;
use crate::connectors::elasticsearch::hosts::HostSet;
use crate::connectors::elasticsearch::selector::{NodeLocalConnectionPool, NodeLocalSelector};
use crate::retry::{execute_with_retries, RetryConfig};

const DEFAULT_PORT: u16 = 9200;

/// Turns a host token into a node URL: `http` and port 9200 unless given.
pub fn node_url(host: &str) -> Result<Url, Error> {
    let address = if host.contains("://") {
        host.to_string()
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        format!("http://[{ip}]:{DEFAULT_PORT}")
    } else if host.starts_with('[') || has_port(host) {
        format!("http://{host}")
    } else {
        format!("http://{host}:{DEFAULT_PORT}")
    };
    Url::parse(&address).map_err(|e| Error::InvalidUrl {
        host: host.to_string(),
        reason: e.to_string(),
    })
}

fn has_port(host: &str) -> bool {
    host.rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
}

/// Creates HTTP sessions whose requests go to a node-local cluster member
/// whenever one is among the hosts.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    selector: Arc<NodeLocalSelector>,
}

impl HttpClientFactory {
    pub fn new(selector: Arc<NodeLocalSelector>) -> Self {
        Self { selector }
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(
        &self,
        hosts: &HostSet,
        settings: &ClientSettings,
    ) -> Result<Box<dyn ClusterClient>, Error> {
        let urls = hosts.iter().map(node_url).collect::<Result<Vec<_>, _>>()?;
        let pool = NodeLocalConnectionPool::new(urls, self.selector.clone())?;
        let transport = TransportBuilder::new(pool)
            .timeout(settings.timeout)
            .disable_proxy()
            .build()?;
        info!("Opened an elasticsearch session to hosts {hosts}");
        Ok(Box::new(HttpClient {
            runtime: create_async_tokio_runtime()?,
            client: Elasticsearch::new(transport),
            settings: settings.clone(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: HitsReply,
}

#[derive(Debug, Deserialize)]
struct HitsReply {
    #[serde(default)]
    hits: Vec<Hit>,
}

impl From<SearchReply> for ScrollPage {
    fn from(reply: SearchReply) -> Self {
        Self {
            scroll_id: reply.scroll_id,
            hits: reply.hits.hits,
        }
    }
}

/// A session backed by the official `elasticsearch` client.
pub struct HttpClient {
    runtime: TokioRuntime,
    client: Elasticsearch,
    settings: ClientSettings,
}

impl HttpClient {
    fn is_retriable(&self, error: &elasticsearch::Error) -> bool {
        if error.is_timeout() {
            return self.settings.retry_on_timeout;
        }
        match error.status_code() {
            Some(status) => matches!(
                status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            None => true,
        }
    }

    /// Sends a request, retrying failed attempts the settings allow to retry.
    fn execute<F, Fut>(&self, request: F) -> Result<Response, elasticsearch::Error>
    where
        F: Fn(Elasticsearch) -> Fut,
        Fut: Future<Output = Result<Response, elasticsearch::Error>>,
    {
        execute_with_retries(
            || {
                self.runtime.block_on(async {
                    request(self.client.clone()).await?.error_for_status_code()
                })
            },
            RetryConfig::default(),
            self.settings.max_retries,
            |error| self.is_retriable(error),
        )
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, response: Response) -> Result<T, Error> {
        Ok(self.runtime.block_on(response.json::<T>())?)
    }
}

impl ClusterClient for HttpClient {
    fn search_shards(
        &mut self,
        index: &str,
        _doc_type: Option<&str>,
    ) -> Result<SearchShardsResponse, Error> {
        let indices = [index];
        let response = self
            .execute(|client| async move {
                client
                    .search_shards(SearchShardsParts::Index(&indices))
                    .send()
                    .await
            })
            .map_err(|e| match e.status_code() {
                Some(StatusCode::NOT_FOUND) => Error::IndexNotFound(index.to_string()),
                _ => e.into(),
            })?;
        self.decode(response)
    }

    fn open_scroll(&mut self, request: &ScanRequest<'_>) -> Result<ScrollPage, Error> {
        let indices = [request.index];
        let options = request.options;
        let size = i64::from(options.size);
        let response = self.execute(|client| async move {
            let mut search = client
                .search(SearchParts::Index(&indices))
                .scroll(&options.scroll)
                .size(size);
            if let Some(preference) = &request.preference {
                search = search.preference(preference);
            }
            if let Some(q) = &options.q {
                search = search.q(q);
            }
            if let Some(timeout) = options.request_timeout {
                search = search.request_timeout(timeout);
            }
            match &options.query {
                Some(query) => search.body(query.clone()).send().await,
                None => search.send().await,
            }
        })?;
        let page: ScrollPage = self.decode::<SearchReply>(response)?.into();
        debug!(
            "Scroll over index {:?} opened with {} hits",
            request.index,
            page.hits.len()
        );
        Ok(page)
    }

    fn scroll(&mut self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage, Error> {
        let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
        let response = self.execute(|client| {
            let body = body.clone();
            async move { client.scroll(ScrollParts::None).body(body).send().await }
        })?;
        Ok(self.decode::<SearchReply>(response)?.into())
    }

    fn clear_scroll(&mut self, scroll_id: &str) -> Result<(), Error> {
        let body = json!({ "scroll_id": [scroll_id] });
        self.execute(|client| {
            let body = body.clone();
            async move {
                client
                    .clear_scroll(ClearScrollParts::None)
                    .body(body)
                    .send()
                    .await
            }
        })?;
        Ok(())
    }

    fn bulk(&mut self, chunk: &BulkChunk, timeout: Duration) -> Result<BulkResponse, Error> {
        let response = self.execute(|client| async move {
            client
                .bulk(BulkParts::None)
                .request_timeout(timeout)
                .body(chunk.body().to_vec())
                .send()
                .await
        })?;
        let reply: JsonValue = self.decode(response)?;
        BulkResponse::from_json(&reply)
    }

    fn refresh(&mut self, indices: &[String]) -> Result<(), Error> {
        let indices: Vec<&str> = indices.iter().map(String::as_str).collect();
        self.execute(|client| {
            let indices = indices.clone();
            async move {
                client
                    .indices()
                    .refresh(IndicesRefreshParts::Index(&indices))
                    .send()
                    .await
            }
        })?;
        Ok(())
    }

    fn shutdown(self: Box<Self>) {
        let Self { runtime, .. } = *self;
        runtime.shutdown_background();
    }
}
