//! Relay error type

use crate::unit::Phase;

/// Errors raised while relaying between handset and card
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The handset transport had nothing to deliver in time
    #[error("Handset transport timed out")]
    TransportTimeout,

    /// The handset transport failed for any other reason
    #[error("Handset transport failure: {0}")]
    TransportFailure(String),

    /// A byte arrived that is not a legal continuation of the current phase
    #[error("Protocol violation in {phase} at byte {byte:02X}: {reason}")]
    ProtocolViolation {
        /// Phase the session was in when the byte arrived
        phase: Phase,
        /// The offending byte
        byte: u8,
        /// What was wrong with it
        reason: &'static str,
    },

    /// The card backend could not answer
    #[error("Card backend failure: {0}")]
    BackendFailure(#[from] simrelay_apdu_core::Error),

    /// The diagnostic sink could not record a capture
    #[error("Diagnostic sink error: {0}")]
    Sink(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error must terminate the relay
    ///
    /// Transport failures and bad configuration are fatal. Everything else is
    /// recovered locally: timeouts are retried, violations reset the session,
    /// backend failures are answered with an error status and sink failures
    /// are ignored.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::Config(_))
    }

    /// Whether this is a timeout on the handset transport
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TransportTimeout)
    }

    pub(crate) fn sink<E: std::fmt::Display>(error: E) -> Self {
        Self::Sink(error.to_string())
    }
}
