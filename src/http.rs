//! HTTP transport for node RPC
//!
//! `HttpTransport` performs requests with `reqwest`; `SpawnedFetch` adapts
//! any [`Transport`] to the client's synchronous [`Fetch`] capability by
//! spawning each request on tokio and posting the completion to the event
//! loop.

use crate::rpc::{Fetch, FetchRequest, FetchResponse};
use crate::runtime::Event;
use crate::{Error, Result, APP_NAME, APP_VERSION};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// Performs one request and returns the node's response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a per-request timeout
    pub fn new(timeout: Duration, insecure: bool) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .user_agent(format!("{}/{}", APP_NAME, APP_VERSION))
            .build()
            .map_err(Error::from)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(id = request.id, method = request.rpc_method))]
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::network(format!("Invalid HTTP method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, request.url());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let ip = response.remote_addr().map(|addr| addr.ip());
        let body = response.text().await?;

        debug!("HTTP {} ({} bytes)", status, body.len());

        Ok(FetchResponse {
            status,
            body,
            ip,
            // not exposed by reqwest
            tls_version: None,
            tls_fingerprint: None,
        })
    }
}

/// Runs every request as its own tokio task
pub struct SpawnedFetch {
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<Event>,
}

impl SpawnedFetch {
    pub fn new(transport: Arc<dyn Transport>, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { transport, events }
    }
}

impl Fetch for SpawnedFetch {
    fn fetch(&mut self, request: FetchRequest) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();

        tokio::spawn(async move {
            let id = request.id;
            let result = transport.send(request).await;
            if events.send(Event::Fetched { id, result }).is_err() {
                debug!("Event loop gone, dropping response {}", id);
            }
        });
    }
}
