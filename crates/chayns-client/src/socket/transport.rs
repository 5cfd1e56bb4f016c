use async_trait::async_trait;
use futures_util::{Sink, SinkExt as _, Stream, StreamExt as _, future};
use std::pin::Pin;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};

use crate::error::ClientError;

/// Outbound half of a connection, accepts encoded text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Inbound half of a connection; ends when the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// An open message-oriented connection
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Socket primitive used by the client
///
/// The production implementation is [`TungsteniteTransport`]; tests plug in
/// in-memory transports.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection, ClientError>;
}

/// [`Transport`] over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Connection, ClientError> {
        let (ws_stream, response) = connect_async(url).await?;
        log::debug!(
            "WebSocket handshake with {url} completed: {}",
            response.status()
        );

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, tungstenite::Error>(Message::text(frame))))
            .sink_map_err(ClientError::from);
        let stream = stream.filter_map(|message| future::ready(inbound_frame(message)));

        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Control frames are answered by tungstenite itself and never surface
fn inbound_frame(
    message: Result<Message, tungstenite::Error>,
) -> Option<Result<String, ClientError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(e) => {
                log::warn!("Dropping binary frame that is not UTF-8: {e}");
                None
            }
        },
        Ok(Message::Close(frame)) => {
            log::debug!("Peer sent close frame: {frame:?}");
            None
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}
