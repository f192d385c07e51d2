//! Remote event-stream backends
//!
//! The gateway opens a long-lived `GET` on the configured URL. The server's
//! first event is `endpoint`, carrying the URL that outbound messages are
//! POSTed to; every later `message` event carries one JSON-RPC frame.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use relay_core::{
    BackendClient, BackendDescriptor, GatewayError, GatewayResult, PendingConnection,
    StreamConfig,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::client::{McpBackendClient, DEFAULT_INIT_TIMEOUT};
use crate::peer::{FrameSink, RpcPeer};
use crate::sse::{SseEvent, SseParser};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// A stream backend whose HTTP client is built but not yet connected
pub struct StreamConnection {
    name: String,
    url: Url,
    http: Client,
    init_timeout: Duration,
}

impl StreamConnection {
    /// Build the HTTP client. The configured `Authorization` value is sent on
    /// every request and marked sensitive so it is never rendered.
    pub fn new(descriptor: &BackendDescriptor, config: &StreamConfig) -> GatewayResult<Self> {
        let creation_error = |reason: String| GatewayError::TransportCreation {
            backend: descriptor.name.clone(),
            reason,
        };

        let url = config.parsed_url().map_err(|e| creation_error(e.to_string()))?;

        let mut headers = HeaderMap::new();
        if let Some(auth) = &config.headers.authorization {
            let mut value = HeaderValue::from_str(auth.expose())
                .map_err(|_| creation_error("invalid Authorization header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| creation_error(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: descriptor.name.clone(),
            url,
            http,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        })
    }

    pub fn with_init_timeout(mut self, init_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self
    }

    fn connection_error(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::Connection {
            backend: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Open the event stream and wait for the `endpoint` event.
    ///
    /// Returns the resolved POST endpoint, the live byte stream, the parser
    /// state and any `message` events that arrived in the same chunk.
    async fn open(&self) -> GatewayResult<(Url, ByteStream, SseParser, Vec<SseEvent>)> {
        let response = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| self.connection_error(format!("GET {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(self.connection_error(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }

        let mut stream: ByteStream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();

        loop {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(self.connection_error(format!("event stream error: {}", e))),
                None => return Err(self.connection_error("event stream ended before endpoint event")),
            };

            let mut events = parser.feed(&chunk).into_iter();
            while let Some(event) = events.next() {
                if event.event_type() != "endpoint" {
                    trace!(backend = %self.name, event = %event.event_type(), "Event before endpoint ignored");
                    continue;
                }

                let endpoint = self.resolve_endpoint(event.data.trim())?;
                return Ok((endpoint, stream, parser, events.collect()));
            }
        }
    }

    /// Endpoints are relative to the stream URL and must stay on its origin
    fn resolve_endpoint(&self, raw: &str) -> GatewayResult<Url> {
        let endpoint = self
            .url
            .join(raw)
            .map_err(|e| self.connection_error(format!("invalid endpoint '{}': {}", raw, e)))?;

        if endpoint.origin() != self.url.origin() {
            return Err(self.connection_error(format!(
                "endpoint origin {} does not match {}",
                endpoint.origin().ascii_serialization(),
                self.url.origin().ascii_serialization()
            )));
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl PendingConnection for StreamConnection {
    async fn connect(self: Box<Self>) -> GatewayResult<Arc<dyn BackendClient>> {
        let (endpoint, mut stream, mut parser, early) =
            tokio::time::timeout(self.init_timeout, self.open())
                .await
                .map_err(|_| self.connection_error("timed out waiting for endpoint event"))??;

        info!(backend = %self.name, url = %self.url, "Event stream open");
        debug!(backend = %self.name, endpoint = %endpoint.path(), "Backend announced endpoint");

        let sink = Arc::new(StreamSink {
            backend: self.name.clone(),
            http: self.http.clone(),
            endpoint,
        });
        let peer = Arc::new(RpcPeer::new(&self.name, sink));

        let reader_peer = peer.clone();
        let reader = tokio::spawn(async move {
            for event in early {
                deliver(&reader_peer, event).await;
            }

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for event in parser.feed(&chunk) {
                            deliver(&reader_peer, event).await;
                        }
                    }
                    Err(e) => {
                        warn!(backend = %reader_peer.backend(), error = %e, "Event stream error");
                        break;
                    }
                }
            }
            debug!(backend = %reader_peer.backend(), "Event stream closed");
            reader_peer.mark_closed();
        });

        let client = McpBackendClient::handshake(&self.name, peer, vec![reader], self.init_timeout).await?;
        Ok(Arc::new(client))
    }
}

async fn deliver(peer: &RpcPeer, event: SseEvent) {
    match event.event_type() {
        "message" => peer.dispatch(&event.data).await,
        other => trace!(backend = %peer.backend(), event = %other, "Ignoring event"),
    }
}

/// POSTs frames to the announced endpoint
struct StreamSink {
    backend: String,
    http: Client,
    endpoint: Url,
}

#[async_trait]
impl FrameSink for StreamSink {
    async fn send_frame(&self, frame: String) -> GatewayResult<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("POST to '{}' failed: {}", self.backend, e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!(
                "POST to '{}' returned {}",
                self.backend,
                response.status()
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> GatewayResult<()> {
        // the event stream is owned by the reader task, which the client aborts
        Ok(())
    }
}
