//! Text-frame socket used by the push connection.
//!
//! A [`Dialer`] opens one socket and hands back a write half ([`FrameSink`])
//! and a read half ([`FrameStream`]) carrying whole WebSocket text messages.
//! [`WsDialer`] is the network implementation over `tokio-tungstenite`;
//! [`MemoryDialer`] is an in-process implementation whose far end is driven
//! through [`MemoryPeer`].

use std::pin::Pin;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use kindred_types::stomp::Frame;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a fresh socket. Each call is a new, independent session.
    async fn dial(&self) -> Result<(FrameSink, FrameStream)>;

    /// Value for the STOMP `host` header.
    fn host(&self) -> String {
        "localhost".to_string()
    }
}

/// Dials a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<(FrameSink, FrameStream)> {
        use tungstenite::client::IntoClientRequest;

        let request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid WebSocket URL: {}", self.url))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .context("WebSocket connect failed")?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .with(|text: String| async move {
                Ok::<_, tungstenite::Error>(tungstenite::Message::Text(text.into()))
            })
            .sink_map_err(anyhow::Error::from);

        // Pings are answered by tungstenite itself; only text frames matter here.
        let stream = stream.filter_map(|msg| async move {
            match msg {
                Ok(tungstenite::Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(anyhow!("WebSocket read error: {}", e))),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn host(&self) -> String {
        self.url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost")
            .to_string()
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

/// In-process dialer. Every `dial` produces a [`MemoryPeer`] on the acceptor
/// channel returned by [`MemoryDialer::new`]; dialing fails once that
/// receiver is dropped.
#[derive(Debug, Clone)]
pub struct MemoryDialer {
    acceptor: mpsc::UnboundedSender<MemoryPeer>,
}

/// The server end of an in-process socket.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryDialer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (acceptor, accepted) = mpsc::unbounded_channel();
        (Self { acceptor }, accepted)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self) -> Result<(FrameSink, FrameStream)> {
        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();

        self.acceptor
            .send(MemoryPeer {
                to_client,
                from_client,
            })
            .map_err(|_| anyhow!("connection refused: no acceptor"))?;

        let sink = futures_util::sink::unfold(
            client_tx,
            |tx: mpsc::UnboundedSender<String>, text: String| async move {
                tx.send(text).map_err(|_| anyhow!("peer closed"))?;
                Ok::<_, anyhow::Error>(tx)
            },
        );
        let stream = futures_util::stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|text| (Ok(text), rx))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

impl MemoryPeer {
    /// Returns `false` once the client has dropped its read half.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.to_client.send(frame.encode()).is_ok()
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    /// Next decodable frame from the client, skipping heart-beats.
    /// `None` once the client has dropped its write half.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(text) = self.from_client.recv().await {
            if let Ok(Some(frame)) = Frame::decode(&text) {
                return Some(frame);
            }
        }
        None
    }

    /// Next raw text message from the client, heart-beats included.
    pub async fn next_raw(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}
