//! In-memory transport for driving the client without a network

use async_trait::async_trait;
use chayns_client::{
    ClientError, Envelope, Logger,
    socket::{Connection, EnvelopeCodec, Transport},
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one accepted connection
pub struct Peer {
    frames: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Result<String, ClientError>>,
}

impl Peer {
    /// Next decoded frame from the client, `None` once the client dropped the socket
    pub async fn recv(&mut self) -> Option<Envelope> {
        let frame = self.frames.recv().await?;
        Some(EnvelopeCodec::decode(&frame).expect("client sent an invalid frame"))
    }

    /// Like [`Self::recv`] but skips liveness probes
    pub async fn recv_message(&mut self) -> Option<Envelope> {
        loop {
            let envelope = self.recv().await?;
            if envelope.topic != "ping" {
                return Some(envelope);
            }
        }
    }

    pub fn push(&self, topic: &str, data: Value) {
        let frame = EnvelopeCodec::encode(&Envelope::new(topic, data)).expect("encode");
        self.push_raw(&frame);
    }

    pub fn push_raw(&self, frame: &str) {
        self.to_client.send(Ok(frame.to_owned())).ok();
    }

    pub fn fail(&self, reason: &str) {
        self.to_client
            .send(Err(ClientError::Transport(reason.to_owned())))
            .ok();
    }

    /// Peer-initiated close
    pub fn close(self) {}

    /// Waits until the client side has dropped the socket
    pub async fn closed(&mut self) {
        while self.frames.recv().await.is_some() {}
    }
}

#[derive(Default)]
struct Script {
    /// connect attempts that fail before one succeeds
    failures: u32,
    always_fail: bool,
    attempts: Vec<Instant>,
}

/// Transport that hands every accepted connection to the test as a [`Peer`]
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            script: Arc::new(Mutex::new(Script::default())),
            peers,
        };
        (transport, accepted)
    }

    pub fn fail_next(&self, attempts: u32) {
        self.script.lock().expect("poisoned").failures = attempts;
    }

    pub fn always_fail(&self) {
        self.script.lock().expect("poisoned").always_fail = true;
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.script.lock().expect("poisoned").attempts.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<Connection, ClientError> {
        {
            let mut script = self.script.lock().expect("poisoned");
            script.attempts.push(Instant::now());
            if script.always_fail {
                return Err(ClientError::Transport("connection refused".to_owned()));
            }
            if script.failures > 0 {
                script.failures -= 1;
                return Err(ClientError::Transport("connection refused".to_owned()));
            }
        }

        let (to_server, frames) = mpsc::unbounded_channel::<String>();
        let (to_client, from_server) = mpsc::unbounded_channel::<Result<String, ClientError>>();

        let sink = futures_util::sink::unfold(
            to_server,
            |to_server: mpsc::UnboundedSender<String>, frame: String| async move {
                to_server.send(frame).map_err(|_closed| ClientError::Closed)?;
                Ok::<_, ClientError>(to_server)
            },
        );
        let stream = futures_util::stream::unfold(from_server, |mut from_server| async move {
            from_server.recv().await.map(|item| (item, from_server))
        });

        self.peers
            .send(Peer { frames, to_client })
            .map_err(|_closed| ClientError::Transport("test server gone".to_owned()))?;

        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Logger that keeps every entry for assertions
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingLogger {
    pub fn entries(&self, level: &str) -> Vec<String> {
        self.entries
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn record(&self, level: &'static str, message: &str) {
        self.entries
            .lock()
            .expect("poisoned")
            .push((level, message.to_owned()));
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str) {
        self.record("info", message);
    }

    fn warning(&self, message: &str) {
        self.record("warning", message);
    }

    fn error(&self, message: &str) {
        self.record("error", message);
    }

    fn critical(&self, message: &str) {
        self.record("critical", message);
    }
}

/// Forward every payload delivered to a listener into a channel
pub fn channel_listener() -> (
    impl Fn(&Value) + Send + 'static,
    mpsc::UnboundedReceiver<Value>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let callback = move |data: &Value| {
        sender.send(data.clone()).ok();
    };
    (callback, receiver)
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(Duration::from_secs(600), peers.recv())
        .await
        .expect("no connection attempt")
        .expect("transport dropped")
}
