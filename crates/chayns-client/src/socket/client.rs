#[expect(clippy::module_inception)]
pub mod client;
pub mod backoff;
mod event_loop;
pub mod listener;
pub mod queue;

pub use backoff::{Backoff, FailureReset, ReconnectConfig};
pub use client::{ClientStats, ConnectionState, ConnectionStatus, WebSocketClient};
pub use listener::ListenerId;
