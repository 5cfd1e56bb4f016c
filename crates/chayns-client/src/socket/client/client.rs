use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strum_macros::{Display, EnumString};
use tokio::sync::{mpsc, watch};

use super::event_loop::{Command, EventLoop};
use super::listener::ListenerId;
use crate::config::ClientConfig;
use crate::logger::{LogLogger, Logger};
use crate::socket::envelope::Envelope;
use crate::socket::transport::{Transport, TungsteniteTransport};

/// Socket-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// socket open and `register` sent
    Online,
    /// a liveness probe went unanswered, a forced close follows
    Degraded,
}

/// Externally driven connectivity hint, e.g. from an OS network monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

/// Snapshot of the client, published on every change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientStats {
    pub state: ConnectionState,
    /// server acknowledged the registration on the current socket
    pub registered: bool,
    pub pending_messages: usize,
    pub consecutive_failures: u32,
    /// connection attempts started so far
    pub connection_attempts: u64,
    pub reconnect_scheduled: bool,
}

/// Reconnecting websocket client
///
/// Keeps one logical connection to the service, registers `application`
/// with its `conditions` on every (re)connect and routes inbound messages
/// to topic listeners. All state lives in a background task; this handle
/// only forwards commands, so every method returns immediately.
#[derive(Clone)]
pub struct WebSocketClient {
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<ClientStats>,
    next_listener_id: Arc<AtomicU64>,
}

impl WebSocketClient {
    /// Create a client and start connecting right away
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(application: impl Into<String>, conditions: Value, config: ClientConfig) -> Self {
        Self::with_transport(
            application,
            conditions,
            config,
            Arc::new(TungsteniteTransport),
            Arc::new(LogLogger::default()),
        )
    }

    pub fn with_transport(
        application: impl Into<String>,
        conditions: Value,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (stats_sender, stats) = watch::channel(ClientStats::default());

        let event_loop = EventLoop::new(
            application.into(),
            conditions,
            config,
            transport,
            logger,
            command_receiver,
            stats_sender,
        );
        tokio::spawn(event_loop.run());

        Self {
            commands,
            stats,
            next_listener_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send a message, queued until the registration is acknowledged
    pub fn send(&self, topic: impl Into<String>, data: Value) {
        self.dispatch(Command::Send(Envelope::new(topic, data)));
    }

    /// Register `callback` for `topic`, replacing any previous listener
    ///
    /// Lifecycle events use the topics of
    /// [`LifecycleEvent`](crate::socket::envelope::LifecycleEvent).
    /// Callbacks run on the client task and should return quickly.
    pub fn add_listener<F>(&self, topic: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.dispatch(Command::AddListener {
            topic: topic.into(),
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove the listener registered under `id`; a newer listener for the same topic stays
    pub fn remove_listener(&self, topic: impl Into<String>, id: ListenerId) {
        self.dispatch(Command::RemoveListener {
            topic: topic.into(),
            id,
        });
    }

    /// `Offline` closes the socket and suppresses reconnects until `Online`
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.dispatch(Command::SetStatus(status));
    }

    /// Close for good; the client does not reconnect afterwards
    pub fn close(&self) {
        self.dispatch(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        self.stats.borrow().state
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStats> {
        self.stats.clone()
    }

    /// Wait until the published stats satisfy `condition`
    ///
    /// Returns `None` if the client shut down first.
    pub async fn wait_for<F>(&self, condition: F) -> Option<ClientStats>
    where
        F: FnMut(&ClientStats) -> bool,
    {
        let mut receiver = self.stats.clone();
        let stats = receiver.wait_for(condition).await.ok()?.clone();
        Some(stats)
    }

    /// Resolves once the background task has stopped
    pub async fn closed(&self) {
        let mut receiver = self.stats.clone();
        while receiver.changed().await.is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("WebSocket client already closed, dropping command");
        }
    }
}
