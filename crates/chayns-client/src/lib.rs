//! Client library for the chayns websocket service
//!
//! The centerpiece is [`WebSocketClient`], which keeps a registered
//! connection alive, buffers outbound messages until the server confirms
//! the registration and dispatches inbound messages by topic.

pub mod config;
pub mod error;
pub mod logger;
pub mod socket;

pub use config::ClientConfig;
pub use error::{ClientError, ConfigError};
pub use logger::{LogLogger, Logger};
pub use socket::{
    ClientStats, ConnectionState, ConnectionStatus, Envelope, LifecycleEvent, ListenerId,
    WebSocketClient,
};

/// Load `.env` and initialise `env_logger`
///
/// `RUST_LOG` is honoured; `log_level` overrides it when given. Safe to
/// call more than once.
pub fn setup(log_level: Option<log::LevelFilter>) {
    let env_file = dotenvy::dotenv();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = log_level {
        builder.filter_level(level);
    }
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized, using existing logger");
    }

    match env_file {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => log::trace!("No .env file found"),
        Err(e) => log::warn!("Failed to load .env file: {e}"),
    }
}
