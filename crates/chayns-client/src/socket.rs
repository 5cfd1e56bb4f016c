/// Reconnecting websocket client
///
/// provides the wire envelope, the text-frame codec, the transport seam
/// and the client that ties them together.
pub mod client;
pub mod codec;
pub mod envelope;
pub mod transport;

pub use client::{ClientStats, ConnectionState, ConnectionStatus, ListenerId, WebSocketClient};
pub use codec::{CodecError, EnvelopeCodec};
pub use envelope::{Envelope, LifecycleEvent};
pub use transport::{Connection, Transport, TungsteniteTransport};
