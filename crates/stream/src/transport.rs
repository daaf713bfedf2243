//! Channel transport for the per-job report stream.
//!
//! [`Transport`] opens a bidirectional text [`Channel`] to a URL. The
//! connection manager only ever sees the channel, which lets tests swap
//! in a scripted transport. [`WsTransport`] is the production
//! implementation over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::{CancellationToken, DropGuard};

/// An inbound event on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame from the server.
    Text(String),
    /// A receive or send failure. The channel closes right after.
    Error(String),
    /// The server closed the channel, with its reason if one was given.
    Closed(Option<String>),
}

/// A live channel. Dropping it closes the underlying connection.
pub struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    _close_on_drop: DropGuard,
}

impl Channel {
    /// Assemble a channel from its pump endpoints.
    ///
    /// `close` is cancelled when the channel is dropped; the transport's
    /// pump watches it to shut the connection down.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
        close: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            _close_on_drop: close.drop_guard(),
        }
    }

    /// Queue a text frame for sending.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Next inbound frame; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.inbound.recv().await
    }
}

/// Opens channels to the report server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Channel, TransportError>;
}

/// WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Channel, TransportError> {
        let (ws_stream, _response) = connect_async(url).await?;
        tracing::debug!(url, "WebSocket handshake complete");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let close = CancellationToken::new();
        let closed = close.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    out = out_rx.recv() => match out {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = in_tx.send(InboundFrame::Error(e.to_string()));
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = in_tx.send(InboundFrame::Text(text.to_string()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            let _ = in_tx.send(InboundFrame::Closed(reason));
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol;
                            // control frames are answered by tungstenite.
                        }
                        Some(Err(e)) => {
                            let _ = in_tx.send(InboundFrame::Error(e.to_string()));
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("WebSocket pump exited");
        });

        Ok(Channel::new(out_tx, in_rx, close))
    }
}

/// Errors that can occur when opening or using a channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The WebSocket handshake or connection failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The channel has already shut down.
    #[error("Channel closed")]
    Closed,

    /// A transport-specific failure.
    #[error("{0}")]
    Other(String),
}
