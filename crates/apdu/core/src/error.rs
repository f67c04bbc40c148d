//! Core error type for all APDU operations
//!
//! This module provides a centralized error type used throughout the simrelay_apdu_core crate
//! and by every card backend, so that errors bubble up the relay with their context intact.

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Failed to connect to the device
    #[error("Connection error: failed to connect to device")]
    ConnectionError,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// No card is present or the card connection was lost
    #[error("No card present")]
    NoCard,

    //
    // Response related errors
    //
    /// Parse error when processing response
    #[error("Parse error: {0}")]
    ParseError(&'static str),

    //
    // Framing related errors
    //
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Malformed Answer To Reset
    #[error("Invalid ATR: {0}")]
    InvalidAtr(&'static str),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Create a new parse error
    pub const fn parse(message: &'static str) -> Self {
        Self::ParseError(message)
    }

    /// The innermost error, looking through any context wrappers
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause of this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout)
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain() {
        let result: Result<(), Error> = Err(Error::Timeout);
        let err = result
            .context("Reading card")
            .context("Relaying command")
            .unwrap_err();

        assert_eq!(err.to_string(), "Relaying command: Reading card: Operation timed out");
        assert!(err.is_timeout());
        assert_eq!(err.root(), &Error::Timeout);
    }

    #[test]
    fn test_backend_errors_display() {
        let reset = Error::message("Card was reset").with_context("PC/SC");
        assert_eq!(reset.to_string(), "PC/SC: Card was reset");
        assert!(!reset.is_timeout());

        assert_eq!(Error::InvalidAtr("empty").to_string(), "Invalid ATR: empty");
        assert_eq!(Error::InvalidCommandLength(3).to_string(), "Invalid command length: 3");
        assert_eq!(Error::NoCard.to_string(), "No card present");
    }
}
