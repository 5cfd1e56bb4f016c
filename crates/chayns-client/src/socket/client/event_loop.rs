use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use std::future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

use super::backoff::Backoff;
use super::client::{ClientStats, ConnectionState, ConnectionStatus};
use super::listener::{Callback, Dispatch, ListenerId, ListenerTable};
use super::queue::PendingQueue;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::logger::Logger;
use crate::socket::codec::EnvelopeCodec;
use crate::socket::envelope::{Envelope, InboundControl, LifecycleEvent};
use crate::socket::transport::{Connection, Transport};

/// Upper bound for the close handshake of a discarded socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests from [`super::WebSocketClient`] handles
pub(crate) enum Command {
    Send(Envelope),
    AddListener {
        topic: String,
        id: ListenerId,
        callback: Callback,
    },
    RemoveListener {
        topic: String,
        id: ListenerId,
    },
    SetStatus(ConnectionStatus),
    Close,
}

/// Socket events, tagged with the generation of the attempt that produced them
enum SocketEvent {
    Opened {
        generation: u64,
        result: Result<Connection, ClientError>,
    },
    Frame {
        generation: u64,
        frame: String,
    },
    Failed {
        generation: u64,
        error: ClientError,
    },
    Closed {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// transport error, peer close or failed liveness
    Lost,
    /// external offline hint
    Offline,
    /// `close()`
    Deliberate,
}

struct ActiveSocket {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
}

struct PendingOpen {
    generation: u64,
    task: JoinHandle<()>,
}

/// Owner of all client state
///
/// Runs as a single task; socket reads and connect attempts run in helper
/// tasks that report back through `events`.
pub(crate) struct EventLoop {
    application: String,
    conditions: Value,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    logger: Arc<dyn Logger>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    event_sender: mpsc::UnboundedSender<SocketEvent>,
    stats: watch::Sender<ClientStats>,

    state: ConnectionState,
    status: ConnectionStatus,
    /// last generation handed out
    generation: u64,
    socket: Option<ActiveSocket>,
    opening: Option<PendingOpen>,
    registered: bool,
    pong_received: bool,

    liveness: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    registration_deadline: Option<Pin<Box<Sleep>>>,

    backoff: Backoff,
    listeners: ListenerTable,
    pending: PendingQueue,
}

impl EventLoop {
    pub(crate) fn new(
        application: String,
        conditions: Value,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        commands: mpsc::UnboundedReceiver<Command>,
        stats: watch::Sender<ClientStats>,
    ) -> Self {
        let (event_sender, events) = mpsc::unbounded_channel();
        let backoff = config.reconnect.create_backoff();

        Self {
            application,
            conditions,
            config,
            transport,
            logger,
            commands,
            events,
            event_sender,
            stats,
            state: ConnectionState::Disconnected,
            status: ConnectionStatus::Online,
            generation: 0,
            socket: None,
            opening: None,
            registered: false,
            pong_received: true,
            liveness: None,
            reconnect: None,
            registration_deadline: None,
            backoff,
            listeners: ListenerTable::new(),
            pending: PendingQueue::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.open();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        log::debug!("All client handles dropped, shutting down");
                        self.shutdown();
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                () = next_tick(&mut self.liveness) => self.on_liveness_tick(),
                () = expire(&mut self.reconnect) => {
                    self.reconnect = None;
                    log::debug!("Reconnect timer fired");
                    self.open();
                }
                () = expire(&mut self.registration_deadline) => {
                    self.registration_deadline = None;
                    self.on_registration_timeout();
                }
            }
        }

        log::debug!("WebSocket event loop for '{}' stopped", self.application);
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Send(envelope) => {
                if !self.registered {
                    log::debug!("Not registered yet, queueing '{}'", envelope.topic);
                    self.pending.push(envelope);
                    self.publish();
                } else {
                    match self.try_write(&envelope) {
                        Ok(()) => {}
                        // the socket died but its close is not processed yet
                        Err(ClientError::Closed) => {
                            log::debug!("Socket gone, queueing '{}'", envelope.topic);
                            self.pending.push(envelope);
                            self.publish();
                        }
                        Err(e) => log::warn!("Dropping '{}': {e}", envelope.topic),
                    }
                }
            }
            Command::AddListener {
                topic,
                id,
                callback,
            } => {
                if self.listeners.insert(topic.clone(), id, callback).is_some() {
                    log::debug!("Replaced listener for topic '{topic}'");
                }
            }
            Command::RemoveListener { topic, id } => {
                if !self.listeners.remove(&topic, id) {
                    log::debug!("Listener {id:?} for topic '{topic}' is not registered");
                }
            }
            Command::SetStatus(status) => self.set_status(status),
            Command::Close => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened { generation, result } => {
                if self.opening.as_ref().map(|open| open.generation) != Some(generation) {
                    log::debug!("Ignoring stale connect result (generation {generation})");
                    return;
                }
                self.opening = None;

                match result {
                    Ok(connection) => self.on_open(generation, connection),
                    Err(error) => self.on_error(&error),
                }
            }
            SocketEvent::Frame { generation, frame } => {
                if self.is_current(generation) {
                    self.on_frame(&frame);
                }
            }
            SocketEvent::Failed { generation, error } => {
                if self.is_current(generation) {
                    self.on_error(&error);
                }
            }
            SocketEvent::Closed { generation } => {
                if self.is_current(generation) {
                    log::info!("Connection closed by server");
                    self.teardown();
                    self.on_close(CloseReason::Lost);
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self.socket.as_ref().map(|socket| socket.generation) == Some(generation);
        if !current {
            log::trace!("Ignoring event from discarded socket (generation {generation})");
        }
        current
    }

    /// start a connection attempt unless one is already open or in flight
    fn open(&mut self) {
        if self.socket.is_some() || self.opening.is_some() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let url = self.config.endpoint_url.clone();
        log::info!("Connecting to {url} (attempt {generation})");

        let transport = self.transport.clone();
        let events = self.event_sender.clone();
        let task = tokio::spawn(async move {
            let result = transport.connect(&url).await;
            if events
                .send(SocketEvent::Opened { generation, result })
                .is_err()
            {
                log::trace!("Event loop gone before connect attempt {generation} finished");
            }
        });

        self.opening = Some(PendingOpen { generation, task });
        self.set_state(ConnectionState::Connecting);
    }

    fn on_open(&mut self, generation: u64, connection: Connection) {
        self.reconnect = None;
        self.backoff.on_open();

        let (outbound, outbound_receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(
            generation,
            connection,
            outbound_receiver,
            self.event_sender.clone(),
        ));
        self.socket = Some(ActiveSocket {
            generation,
            outbound,
        });
        log::info!("Connected to {}", self.config.endpoint_url);
        self.set_state(ConnectionState::Online);

        let registration = Envelope::register(&self.application, &self.conditions);
        if let Err(e) = self.try_write(&registration) {
            self.logger
                .error(&format!("Failed to send registration for '{}': {e}", self.application));
        }

        // a new interval is only created after the previous one is gone
        self.liveness = None;
        let period = self.config.heartbeat_period().max(Duration::from_millis(1));
        self.liveness = Instant::now().checked_add(period).map(|start| {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        self.pong_received = true;

        self.registration_deadline = self
            .config
            .registration_deadline()
            .map(|timeout| Box::pin(tokio::time::sleep(timeout)));

        self.emit(LifecycleEvent::Open, &json!({ "url": self.config.endpoint_url }));
    }

    fn on_frame(&mut self, frame: &str) {
        let envelope = match EnvelopeCodec::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping malformed frame: {e}");
                return;
            }
        };

        match envelope.control() {
            Some(InboundControl::Registered) => self.on_registered(&envelope.data),
            Some(InboundControl::Pong) => {
                log::trace!("Pong received");
                self.pong_received = true;
            }
            None => self.deliver(&envelope.topic, &envelope.data),
        }
    }

    fn on_registered(&mut self, data: &Value) {
        self.registration_deadline = None;
        self.registered = true;
        self.backoff.on_registered();

        let queued: Vec<Envelope> = self.pending.drain().collect();
        let mut flushed = 0;
        for envelope in queued {
            // keeps FIFO order: once the socket is gone every later write fails too
            match self.try_write(&envelope) {
                Ok(()) => flushed += 1,
                Err(ClientError::Closed) => self.pending.push(envelope),
                Err(e) => log::warn!("Dropping '{}': {e}", envelope.topic),
            }
        }

        log::info!(
            "Registered as '{}', flushed {flushed} queued message(s)",
            self.application
        );
        self.publish();
        self.emit(LifecycleEvent::Online, data);
    }

    fn on_liveness_tick(&mut self) {
        if self.socket.is_none() {
            self.liveness = None;
            return;
        }

        if !self.pong_received {
            log::debug!("Liveness probe unanswered, closing connection");
            self.set_state(ConnectionState::Degraded);
            self.teardown();
            self.on_close(CloseReason::Lost);
            return;
        }

        self.pong_received = false;
        self.write(&Envelope::ping());
    }

    fn on_registration_timeout(&mut self) {
        let timeout_ms = self.config.registration_timeout_ms.unwrap_or_default();
        self.logger.error(&format!(
            "No registration acknowledgment for '{}' within {timeout_ms} ms",
            self.application
        ));
        self.emit(
            LifecycleEvent::RegistrationTimeout,
            &json!({ "application": self.application, "timeoutMs": timeout_ms }),
        );
    }

    /// errors never get their own recovery path, they always end in a close
    fn on_error(&mut self, error: &ClientError) {
        self.backoff.record_failure();
        self.logger.warning(&format!(
            "WebSocket error ({} consecutive): {error}",
            self.backoff.failures()
        ));
        self.emit(LifecycleEvent::Error, &json!({ "message": error.to_string() }));

        self.teardown();
        self.on_close(CloseReason::Lost);
    }

    fn on_close(&mut self, reason: CloseReason) {
        self.liveness = None;
        self.registration_deadline = None;
        self.registered = false;
        self.set_state(ConnectionState::Disconnected);
        self.emit(LifecycleEvent::Offline, &Value::Null);

        if reason != CloseReason::Lost
            || self.status == ConnectionStatus::Offline
            || !self.config.auto_reconnect
            || self.reconnect.is_some()
        {
            self.publish();
            return;
        }

        let delay = self.backoff.delay();
        log::info!(
            "Reconnecting in {delay:?} ({} consecutive failures)",
            self.backoff.failures()
        );
        self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        self.publish();
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        log::info!("Connection status set to {status}");

        match status {
            ConnectionStatus::Offline => {
                self.reconnect = None;
                if self.teardown() {
                    self.on_close(CloseReason::Offline);
                } else {
                    self.publish();
                }
            }
            ConnectionStatus::Online => self.open(),
        }
    }

    /// deliberate close, nothing is scheduled afterwards
    fn shutdown(&mut self) {
        self.reconnect = None;
        self.liveness = None;
        self.registration_deadline = None;

        if self.teardown() {
            self.on_close(CloseReason::Deliberate);
        }

        if !self.pending.is_empty() {
            log::warn!(
                "Discarding {} queued message(s) on close",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.publish();
        log::info!("WebSocket client for '{}' closed", self.application);
    }

    /// Drop the socket and any in-flight attempt; returns whether there was one
    ///
    /// Dropping `outbound` makes the connection task send a close frame and
    /// exit. Anything it still reports carries a retired generation.
    fn teardown(&mut self) -> bool {
        let mut had_connection = false;

        if let Some(open) = self.opening.take() {
            open.task.abort();
            had_connection = true;
        }
        if let Some(socket) = self.socket.take() {
            log::debug!("Discarding socket (generation {})", socket.generation);
            had_connection = true;
        }

        had_connection
    }

    fn write(&self, envelope: &Envelope) {
        if let Err(e) = self.try_write(envelope) {
            log::debug!("Could not write '{}': {e}", envelope.topic);
        }
    }

    fn try_write(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::Closed)?;
        let frame = EnvelopeCodec::encode(envelope)?;
        socket
            .outbound
            .send(frame)
            .map_err(|_closed| ClientError::Closed)
    }

    fn emit(&self, event: LifecycleEvent, data: &Value) {
        self.deliver(event.as_ref(), data);
    }

    fn deliver(&self, topic: &str, data: &Value) {
        if self.listeners.dispatch(topic, data) == Dispatch::Panicked {
            self.logger
                .critical(&format!("Listener for topic '{topic}' panicked"));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("Connection state {} -> {state}", self.state);
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.stats.send_replace(ClientStats {
            state: self.state,
            registered: self.registered,
            pending_messages: self.pending.len(),
            consecutive_failures: self.backoff.failures(),
            connection_attempts: self.generation,
            reconnect_scheduled: self.reconnect.is_some(),
        });
    }
}

/// Pump one connection: frames in, frames out
///
/// Ends when the peer closes, on the first transport error, or when the
/// event loop drops `outbound`.
async fn run_connection(
    generation: u64,
    connection: Connection,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let Connection {
        mut sink,
        mut stream,
    } = connection;

    let last_event = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => {
                    if events.send(SocketEvent::Frame { generation, frame }).is_err() {
                        return;
                    }
                }
                Some(Err(ClientError::Closed)) | None => break SocketEvent::Closed { generation },
                Some(Err(error)) => break SocketEvent::Failed { generation, error },
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(error) = sink.send(frame).await {
                        break SocketEvent::Failed { generation, error };
                    }
                }
                None => {
                    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                        Ok(Ok(())) => log::trace!("Socket {generation} closed"),
                        Ok(Err(e)) => log::debug!("Error while closing socket {generation}: {e}"),
                        Err(_elapsed) => log::debug!("Close handshake for socket {generation} timed out"),
                    }
                    return;
                }
            },
        }
    };

    if events.send(last_event).is_err() {
        log::trace!("Event loop gone before socket {generation} finished");
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLogger;
    use async_trait::async_trait;

    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn connect(&self, _url: &str) -> Result<Connection, ClientError> {
            future::pending().await
        }
    }

    fn event_loop() -> (EventLoop, watch::Receiver<ClientStats>) {
        let (_commands, command_receiver) = mpsc::unbounded_channel();
        let (stats, stats_receiver) = watch::channel(ClientStats::default());
        let event_loop = EventLoop::new(
            "chat".to_owned(),
            Value::Null,
            ClientConfig::default(),
            Arc::new(IdleTransport),
            Arc::new(LogLogger::default()),
            command_receiver,
            stats,
        );
        (event_loop, stats_receiver)
    }

    /// registered socket whose connection task has already exited
    fn attach_dead_socket(event_loop: &mut EventLoop) {
        let (outbound, outbound_receiver) = mpsc::unbounded_channel();
        drop(outbound_receiver);
        event_loop.socket = Some(ActiveSocket {
            generation: 1,
            outbound,
        });
    }

    #[test]
    fn test_send_to_live_socket_is_written() {
        let (mut event_loop, stats) = event_loop();
        let (outbound, mut frames) = mpsc::unbounded_channel();
        event_loop.socket = Some(ActiveSocket {
            generation: 1,
            outbound,
        });
        event_loop.registered = true;

        let flow = event_loop.handle_command(Command::Send(Envelope::new("message", json!("m"))));
        assert!(flow.is_continue());

        assert_eq!(
            frames.try_recv().ok().as_deref(),
            Some(r#"{"topic":"message","data":"m"}"#)
        );
        assert!(event_loop.pending.is_empty());
        assert_eq!(stats.borrow().pending_messages, 0);
    }

    #[test]
    fn test_send_to_dead_socket_is_queued() {
        let (mut event_loop, stats) = event_loop();
        attach_dead_socket(&mut event_loop);
        event_loop.registered = true;

        let flow = event_loop.handle_command(Command::Send(Envelope::new("message", json!("m"))));
        assert!(flow.is_continue());

        assert_eq!(event_loop.pending.len(), 1);
        assert_eq!(stats.borrow().pending_messages, 1);
    }

    #[test]
    fn test_flush_to_dead_socket_keeps_queue_order() {
        let (mut event_loop, stats) = event_loop();
        attach_dead_socket(&mut event_loop);
        event_loop.pending.push(Envelope::new("message", json!(1)));
        event_loop.pending.push(Envelope::new("message", json!(2)));

        event_loop.on_registered(&Value::Null);

        let kept: Vec<Value> = event_loop.pending.drain().map(|e| e.data).collect();
        assert_eq!(kept, vec![json!(1), json!(2)]);
        assert_eq!(stats.borrow().pending_messages, 2);
    }
}
