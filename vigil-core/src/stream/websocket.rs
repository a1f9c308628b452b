//! WebSocket implementation of [`Connector`].
//!
//! Each successful handshake spawns two pump tasks around the split
//! stream, in the same shape as a framed TCP connection:
//!
//! - **writer**: drains the link's outbound queue into the sink,
//!   acknowledging bytes as they are written.
//! - **reader**: forwards text messages to the link's inbound queue and
//!   drops it on close or error, which the manager observes as `Closed`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::VigilError;
use crate::stream::link::{Connector, Link, LinkDriver};

/// Default endpoint path dedicated to video streaming.
pub const VIDEO_PATH: &str = "/ws/video";

// ── WebSocketConnector ───────────────────────────────────────────

/// Connects to a fixed `ws://` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, VigilError> {
        debug!(endpoint = %self.endpoint, "opening websocket");
        let (ws, _response) =
            tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(self.endpoint.as_str()))
                .await
                .map_err(|_| VigilError::Timeout(self.timeout))?
                .map_err(|e| VigilError::Transport(format!("{}: {e}", self.endpoint)))?;
        info!(endpoint = %self.endpoint, "websocket handshake complete");
        Ok(attach(ws))
    }
}

/// Wrap an established WebSocket in a [`Link`] and spawn its pumps.
pub fn attach<S>(ws: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (link, driver) = Link::channel();
    let ack = driver.ack();
    let shutdown = ack.shutdown();
    let LinkDriver {
        mut outbound,
        inbound,
        ..
    } = driver;
    let (mut sink, mut stream) = ws.split();

    // Writer task: Link -> Network
    let writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                next = outbound.recv() => match next {
                    Some(text) => {
                        let len = text.len();
                        let result = sink.send(Message::Text(text)).await;
                        ack.acknowledge(len);
                        if let Err(e) = result {
                            warn!(error = %e, "websocket write failed");
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    });

    // Reader task: Network -> Link
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "remote closed websocket");
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "ignoring binary message");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
        shutdown.cancel();
    });

    link
}
