//! Feed Client
//!
//! Holds one live WebSocket connection to the provider selected by the
//! failover controller, normalizes inbound frames into quotes, and writes
//! them into the quote cache.
//!
//! The client performs no retries of its own: `start` resolves once the
//! connection is established or has failed, and a later connection-level
//! failure is reported exactly once through the returned handle. Retry and
//! source-switching policy belong to the failover controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::QuoteCache;
use crate::infrastructure::feed::normalizer::FrameNormalizer;
use crate::infrastructure::feed::source::{FeedSourceId, SourceDescriptors};
use crate::infrastructure::feed::status::FeedStatus;
use crate::infrastructure::metrics;

/// Errors from the feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// Connecting took longer than the configured timeout.
    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint that was being dialed.
        url: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No frame arrived within the idle window; upstream presumed dead.
    #[error("no frame received for {0:?}")]
    ReadTimeout(Duration),

    /// Server closed the stream.
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// How a feed session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// `stop()` was called; not a failure.
    Cancelled,
    /// Connection-level failure, reported once.
    Failed(FeedClientError),
}

/// Handle to a running feed session.
///
/// `stop` is idempotent and safe to call at any time, including mid-read;
/// the underlying connection is released exactly once.
#[derive(Debug)]
pub struct FeedHandle {
    cancel: CancellationToken,
    closed: oneshot::Receiver<SessionEnd>,
}

impl FeedHandle {
    /// Create a handle from a session's cancellation token and terminal
    /// outcome channel.
    #[must_use]
    pub const fn new(cancel: CancellationToken, closed: oneshot::Receiver<SessionEnd>) -> Self {
        Self { cancel, closed }
    }

    /// Stop the session. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to end.
    pub async fn closed(self) -> SessionEnd {
        self.closed
            .await
            .unwrap_or(SessionEnd::Failed(FeedClientError::ConnectionClosed))
    }

    /// Split into the stop token and the terminal outcome receiver, for
    /// callers that need to select over the outcome while retaining stop.
    #[must_use]
    pub fn into_parts(self) -> (CancellationToken, oneshot::Receiver<SessionEnd>) {
        (self.cancel, self.closed)
    }
}

/// Port for establishing feed connections. The failover supervisor is
/// generic over this so tests can drive it with a scripted connector.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a connection to `source`. Resolves once the connection is
    /// established (returning a session handle) or has failed. Never
    /// retries internally.
    async fn start(&self, source: FeedSourceId) -> Result<FeedHandle, FeedClientError>;
}

/// Tuning for the WebSocket feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Max silence on the stream before the session fails.
    pub idle_timeout: Duration,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// WebSocket implementation of [`FeedConnector`].
pub struct WsFeedClient {
    config: FeedClientConfig,
    cache: Arc<QuoteCache>,
    descriptors: Arc<SourceDescriptors>,
    status: Arc<FeedStatus>,
    shutdown: CancellationToken,
}

impl WsFeedClient {
    /// Create a client writing into `cache`.
    #[must_use]
    pub const fn new(
        config: FeedClientConfig,
        cache: Arc<QuoteCache>,
        descriptors: Arc<SourceDescriptors>,
        status: Arc<FeedStatus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            cache,
            descriptors,
            status,
            shutdown,
        }
    }
}

#[async_trait]
impl FeedConnector for WsFeedClient {
    async fn start(&self, source: FeedSourceId) -> Result<FeedHandle, FeedClientError> {
        let url = self.descriptors.url(source);

        tracing::info!(source = source.as_str(), url = %url, "connecting to feed");

        let connect = tokio_tungstenite::connect_async(&url);
        let (ws_stream, _response) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| FeedClientError::ConnectTimeout {
                url: url.clone(),
                timeout: self.config.connect_timeout,
            })??;

        let cancel = self.shutdown.child_token();
        let (end_tx, end_rx) = oneshot::channel();

        let session = FeedSession {
            source,
            normalizer: FrameNormalizer::for_source(source),
            idle_timeout: self.config.idle_timeout,
            cache: Arc::clone(&self.cache),
            descriptors: Arc::clone(&self.descriptors),
            status: Arc::clone(&self.status),
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            let outcome = session.run(ws_stream).await;
            let _ = end_tx.send(outcome);
        });

        Ok(FeedHandle::new(cancel, end_rx))
    }
}

/// One live connection's read loop.
struct FeedSession {
    source: FeedSourceId,
    normalizer: FrameNormalizer,
    idle_timeout: Duration,
    cache: Arc<QuoteCache>,
    descriptors: Arc<SourceDescriptors>,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl FeedSession {
    async fn run(
        self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        let outcome = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    break SessionEnd::Cancelled;
                }
                msg = tokio::time::timeout(self.idle_timeout, read.next()) => {
                    match msg {
                        Err(_) => break SessionEnd::Failed(
                            FeedClientError::ReadTimeout(self.idle_timeout),
                        ),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            self.handle_frame(text.as_str());
                        }
                        Ok(Some(Ok(Message::Ping(data)))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break SessionEnd::Failed(e.into());
                            }
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            tracing::info!(
                                source = self.source.as_str(),
                                "feed sent close frame"
                            );
                            break SessionEnd::Failed(FeedClientError::ConnectionClosed);
                        }
                        Ok(Some(Ok(_))) => {
                            // Binary and pong frames are not part of either
                            // provider's protocol.
                        }
                        Ok(Some(Err(e))) => break SessionEnd::Failed(e.into()),
                        Ok(None) => break SessionEnd::Failed(FeedClientError::ConnectionClosed),
                    }
                }
            }
        };

        if matches!(outcome, SessionEnd::Cancelled) {
            let _ = write.send(Message::Close(None)).await;
        }

        outcome
    }

    /// Normalize one inbound frame and offer its quotes to the cache.
    fn handle_frame(&self, text: &str) {
        self.status.record_frame();
        metrics::record_frame(self.source);

        match self.normalizer.parse(text, Utc::now()) {
            Ok(quotes) => {
                self.descriptors.record_success(self.source);

                for quote in quotes {
                    if self.cache.set(quote) {
                        self.status.record_quote_applied();
                        metrics::record_quote_applied(self.source);
                    } else {
                        // Out-of-order or duplicate frame; dropped silently.
                        self.status.record_quote_stale();
                        metrics::record_quote_stale(self.source);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    source = self.source.as_str(),
                    error = %e,
                    "skipping unparseable frame"
                );
            }
        }
    }
}
