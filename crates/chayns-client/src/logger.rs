//! Logger capability handed to the websocket client
//!
//! The client reports notable transitions (transport errors, registration
//! problems) through this four-level interface so embedders can route them
//! to their own sinks. [`LogLogger`] forwards everything to the `log` facade.

use log::Level;

pub trait Logger: Send + Sync {
    fn info(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Unrecoverable from the caller's point of view
    fn critical(&self, message: &str);
}

/// Default [`Logger`] backed by the `log` crate
#[derive(Debug, Clone)]
pub struct LogLogger {
    target: String,
}

impl LogLogger {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    fn emit(&self, level: Level, message: &str) {
        log::log!(target: &self.target, level, "{message}");
    }
}

impl Default for LogLogger {
    fn default() -> Self {
        Self::new("chayns_client::socket")
    }
}

impl Logger for LogLogger {
    fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    fn warning(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }

    // `log` has no level above error
    fn critical(&self, message: &str) {
        self.emit(Level::Error, &format!("[CRITICAL] {message}"));
    }
}
