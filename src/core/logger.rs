//! Verbosity-gated diagnostics.
//!
//! Each actor and the interpreter own a [`Logger`]. Records that pass the
//! logger's verbosity gate are forwarded to `tracing` with the owner's label
//! attached, so the subscriber installed by the CLI decides where they go.

use std::fmt::Display;
use tracing::{debug, error, info, warn};

/// Session-wide verbosity used when nothing else is configured.
pub const DEFAULT_VERBOSITY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    label: String,
    session: u8,
    local: u8,
}

impl Logger {
    pub fn new(label: impl Into<String>, session: u8) -> Self {
        Self {
            label: label.into(),
            session,
            local: 0,
        }
    }

    /// A logger for another owner sharing this logger's session verbosity.
    pub fn for_label(&self, label: impl Into<String>) -> Self {
        Self::new(label, self.session)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_session_verbosity(&mut self, verbosity: u8) {
        self.session = verbosity;
    }

    /// Per-owner verbosity, e.g. an actor's `verbosity` option.
    pub fn set_local_verbosity(&mut self, verbosity: u8) {
        self.local = verbosity;
    }

    pub fn verbosity(&self) -> u8 {
        self.session.max(self.local)
    }

    pub fn err(&self, message: impl Display) {
        if self.verbosity() > 0 {
            error!(actor = %self.label, "{message}");
        }
    }

    pub fn warn(&self, message: impl Display) {
        if self.verbosity() > 1 {
            warn!(actor = %self.label, "{message}");
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.verbosity() > 2 {
            info!(actor = %self.label, "{message}");
        }
    }

    pub fn dbg(&self, message: impl Display) {
        if self.verbosity() > 3 {
            debug!(actor = %self.label, "{message}");
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("session", DEFAULT_VERBOSITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_verbosity_raises_but_never_lowers_the_session_level() {
        let mut logger = Logger::new("openai:gpt-4o", 2);
        logger.set_local_verbosity(4);
        assert_eq!(logger.verbosity(), 4);
        logger.set_local_verbosity(0);
        assert_eq!(logger.verbosity(), 2);
    }

    #[test]
    fn derived_loggers_share_session_verbosity() {
        let mut root = Logger::default();
        root.set_session_verbosity(3);
        let child = root.for_label("user");
        assert_eq!(child.label(), "user");
        assert_eq!(child.verbosity(), 3);
    }
}
