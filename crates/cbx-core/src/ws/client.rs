//! Transport seam: how a connection's socket is opened.
//!
//! The registry never talks to tungstenite directly. It asks a [`Connector`]
//! for a text-frame sink and a text-frame stream, which lets production code
//! use [`TungsteniteConnector`] (TLS WebSocket) and tests use the in-process
//! `MemoryConnector` (behind the `testing` feature).

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::FeedError;

/// Outbound half of an open connection: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = FeedError> + Send>>;

/// Inbound half of an open connection: yields text frames in arrival order.
///
/// The stream ends (`None`) when the peer goes away; an `Err` item reports
/// why the connection broke.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, FeedError>> + Send>>;

/// Opens transport connections for the registry.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`. Suspends only the calling task.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), FeedError>;
}

/// TLS WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), FeedError> {
        let parsed = url::Url::parse(url).map_err(|e| FeedError::Config(format!("{url}: {e}")))?;
        debug!("opening websocket to host {}", parsed.host_str().unwrap_or(""));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(parsed.as_str()).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(FeedError::from)
            .with(|text: String| future::ready(Ok::<_, FeedError>(Message::Text(text.into()))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".into());
                    Some(Err(FeedError::Connection(format!("closed by server: {reason}"))))
                }
                Ok(other) => {
                    // Ping/Pong/Binary: tungstenite answers pings itself.
                    trace!("ignoring non-text frame ({} bytes)", other.len());
                    None
                }
                Err(e) => Some(Err(FeedError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
