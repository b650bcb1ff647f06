//! Frame-level transport underneath the push channel.
//!
//! The connection driver only sees JSON text frames; [`Connector`] hides how a
//! duplex socket is opened so tests can substitute in-memory channels.

use std::{fmt, pin::Pin};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use url::Url;

/// Bearer credential produced by the external login flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub struct TransportPair {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url, credential: &Credential) -> Result<TransportPair>;
}

/// WebSocket connector. The credential travels in the query string the same
/// way the admin handshake expects it.
pub struct WsConnector;

pub fn handshake_url(url: &Url, credential: &Credential) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("token", credential.expose())
        .append_pair("userType", "admin");
    url
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url, credential: &Credential) -> Result<TransportPair> {
        let request_url = handshake_url(url, credential);
        let (ws_stream, _) = connect_async(request_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (writer, reader) = ws_stream.split();

        let sink = writer
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text))))
            .sink_map_err(anyhow::Error::from);

        let stream = reader.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(_)) => Some(Err(anyhow!("websocket closed by server"))),
                Ok(_) => None,
                Err(err) => Some(Err(anyhow!("websocket receive failed: {err}"))),
            })
        });

        Ok(TransportPair {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
