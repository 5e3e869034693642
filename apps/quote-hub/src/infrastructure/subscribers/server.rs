//! Subscriber WebSocket Server
//!
//! Accepts downstream WebSocket connections, performs the subscribe
//! handshake, and then runs one task per connection that relays broadcast
//! frames from the registry channel and handles inbound control messages.
//!
//! A connection must send its initial subscribe within the handshake
//! timeout or it is dropped before ever reaching the registry. After the
//! handshake, malformed inbound messages are logged and ignored; only a
//! transport error, a close frame, or an idle sweep ends the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::SymbolFilter;
use crate::infrastructure::metrics;
use crate::infrastructure::subscribers::protocol::{ClientMessage, ServerMessage};
use crate::infrastructure::subscribers::registry::{
    SubscriberHandle, SubscriberId, SubscriberRegistry,
};

/// Errors that stop the subscriber server.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberServerError {
    /// Could not bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Address that was being bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Tuning for the subscriber server.
#[derive(Debug, Clone)]
pub struct SubscriberServerConfig {
    /// Listen address for downstream WebSocket clients.
    pub bind_addr: SocketAddr,
    /// How long a new connection has to send its initial subscribe.
    pub handshake_timeout: Duration,
    /// Outbound frame buffer per subscriber.
    pub frame_buffer: usize,
}

impl Default for SubscriberServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8900)),
            handshake_timeout: Duration::from_secs(10),
            frame_buffer: 16,
        }
    }
}

/// Accept loop for downstream subscribers.
pub struct SubscriberServer {
    config: SubscriberServerConfig,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
}

impl SubscriberServer {
    /// Create a server registering connections into `registry`.
    #[must_use]
    pub const fn new(
        config: SubscriberServerConfig,
        registry: Arc<SubscriberRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            cancel,
        }
    }

    /// Bind the listen socket without starting the accept loop.
    ///
    /// Separated from [`run`](Self::run) so callers binding to port zero can
    /// learn the assigned port before accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn bind(self) -> Result<BoundSubscriberServer, SubscriberServerError> {
        let bind_failed = |source| SubscriberServerError::BindFailed {
            addr: self.config.bind_addr,
            source,
        };
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        Ok(BoundSubscriberServer {
            listener,
            local_addr,
            config: self.config,
            registry: self.registry,
            cancel: self.cancel,
        })
    }

    /// Bind and run the accept loop until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listen address cannot be bound. Accept
    /// and per-connection failures are logged and do not stop the loop.
    pub async fn run(self) -> Result<(), SubscriberServerError> {
        self.bind().await?.run().await;
        Ok(())
    }
}

/// A subscriber server whose listen socket is bound but not yet accepting.
pub struct BoundSubscriberServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: SubscriberServerConfig,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
}

impl BoundSubscriberServer {
    /// The address the listen socket actually bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until shutdown. Accept and per-connection
    /// failures are logged and do not stop the loop.
    pub async fn run(self) {
        tracing::info!(addr = %self.local_addr, "subscriber server listening");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("subscriber server shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn = SubscriberConnection {
                                registry: Arc::clone(&self.registry),
                                handshake_timeout: self.config.handshake_timeout,
                                frame_buffer: self.config.frame_buffer,
                                cancel: self.cancel.child_token(),
                            };
                            tokio::spawn(async move {
                                conn.run(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }
}

/// One downstream connection's lifecycle.
struct SubscriberConnection {
    registry: Arc<SubscriberRegistry>,
    handshake_timeout: Duration,
    frame_buffer: usize,
    cancel: CancellationToken,
}

impl SubscriberConnection {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        // A connection is anonymous until its first subscribe arrives.
        let filter = match tokio::time::timeout(
            self.handshake_timeout,
            self.await_subscribe(&mut write, &mut read),
        )
        .await
        {
            Ok(Some(filter)) => filter,
            Ok(None) => return,
            Err(_) => {
                tracing::debug!(%peer, "no subscribe within handshake timeout");
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        };

        let (frames_tx, mut frames_rx) = mpsc::channel(self.frame_buffer);
        let handle = SubscriberHandle {
            frames: frames_tx,
            cancel: self.cancel.clone(),
        };

        let Ok(id) = self.registry.register(handle, filter) else {
            return;
        };
        metrics::set_subscribers(self.registry.len());
        tracing::info!(%peer, subscriber_id = id, "subscriber connected");

        self.relay(id, &mut write, &mut read, &mut frames_rx).await;

        self.registry.unregister(id);
        metrics::set_subscribers(self.registry.len());
        tracing::info!(%peer, subscriber_id = id, "subscriber disconnected");
    }

    /// Wait for the initial subscribe, answering pings in the meantime.
    /// Returns `None` if the connection ends first.
    async fn await_subscribe<W, R>(&self, write: &mut W, read: &mut R) -> Option<SymbolFilter>
    where
        W: SinkExt<Message> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Subscribe { symbols }) => {
                            return Some(symbols.to_filter());
                        }
                        Ok(ClientMessage::Ping) => {
                            // Answered the same way as after the handshake.
                            let Ok(json) = serde_json::to_string(&ServerMessage::Pong) else {
                                continue;
                            };
                            if write.send(Message::Text(json.into())).await.is_err() {
                                return None;
                            }
                        }
                        Err(_) => {
                            // Not a subscribe yet; keep waiting.
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => {}
                Some(Err(_)) => return None,
            }
        }
    }

    /// Post-handshake loop: relay broadcast frames out, handle control
    /// messages in.
    async fn relay<W, R>(
        &self,
        id: SubscriberId,
        write: &mut W,
        read: &mut R,
        frames_rx: &mut mpsc::Receiver<ServerMessage>,
    ) where
        W: SinkExt<Message> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
                frame = frames_rx.recv() => {
                    let Some(frame) = frame else { return };
                    let Ok(json) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if write.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_client_message(id, text.as_str(), write).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(
                                subscriber_id = id,
                                error = %e,
                                "subscriber read error"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_client_message<W>(&self, id: SubscriberId, text: &str, write: &mut W)
    where
        W: SinkExt<Message> + Unpin,
    {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => {
                self.registry.touch(id);
                if let Ok(json) = serde_json::to_string(&ServerMessage::Pong) {
                    let _ = write.send(Message::Text(json.into())).await;
                }
            }
            Ok(ClientMessage::Subscribe { symbols }) => {
                self.registry.update_filter(id, symbols.to_filter());
            }
            Err(e) => {
                // Tolerated; the subscription stays as it was.
                tracing::debug!(
                    subscriber_id = id,
                    error = %e,
                    "ignoring malformed client message"
                );
            }
        }
    }
}
