use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Wire message format
///
/// Every frame exchanged with the websocket service is a JSON object
/// carrying a topic name and an arbitrary payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic used for routing on both ends
    pub topic: String,
    /// Message content, `null` when the sender omitted it
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Registration handshake sent right after the socket opens
    pub fn register(application: &str, conditions: &Value) -> Self {
        let registration = Registration {
            application: application.to_owned(),
            conditions: conditions.clone(),
        };

        Self::new(
            OutboundControl::Register.as_ref(),
            serde_json::to_value(registration).unwrap_or(Value::Null),
        )
    }

    /// Liveness probe
    pub fn ping() -> Self {
        Self::new(OutboundControl::Ping.as_ref(), Value::Null)
    }

    /// Returns the control topic this envelope carries, if any
    pub fn control(&self) -> Option<InboundControl> {
        self.topic.parse().ok()
    }
}

/// Payload of the `register` message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Registration {
    pub application: String,
    pub conditions: Value,
}

/// Topics the client produces for its own bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutboundControl {
    Register,
    Ping,
}

/// Topics the client consumes itself instead of forwarding them raw
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InboundControl {
    /// server confirmed the registration
    Registered,
    /// liveness reply
    Pong,
}

/// Local events delivered through the listener table
///
/// These never travel over the wire. Listeners subscribe to them with the
/// same topic-keyed table used for server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    /// socket opened and `register` was sent
    Open,
    /// registration acknowledged, pending queue flushed
    Online,
    /// socket closed for any reason
    Offline,
    /// transport error
    Error,
    /// no `registered` within the configured timeout
    RegistrationTimeout,
}
