//! Diagnostic sinks receiving reconstructed units for offline analysis
//!
//! Captures are best effort. The relay logs sink failures and carries on.

mod buffered;
mod gsmtap;

pub use buffered::BufferedSink;
pub use gsmtap::{GsmtapConfig, GsmtapSink};

use std::{fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::Error;

/// What a capture contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    /// A complete command: header, data and status word
    Apdu,
    /// The card's Answer To Reset
    Atr,
    /// A PTS request from the handset
    PpsRequest,
}

/// Bytes handed to a diagnostic sink, unmodified by any interception policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// What the bytes are
    pub kind: CaptureKind,
    /// The bytes as reconstructed
    pub bytes: Bytes,
}

impl Capture {
    /// Create a capture
    pub const fn new(kind: CaptureKind, bytes: Bytes) -> Self {
        Self { kind, bytes }
    }
}

/// Receiver of captures
pub trait DiagnosticSink: fmt::Debug + Send {
    /// Record one capture
    fn capture(&mut self, capture: Capture) -> Result<(), Error>;
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Box<S> {
    fn capture(&mut self, capture: Capture) -> Result<(), Error> {
        (**self).capture(capture)
    }
}

/// Discards every capture
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn capture(&mut self, _capture: Capture) -> Result<(), Error> {
        Ok(())
    }
}

/// Keeps captures in memory; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    captures: Arc<Mutex<Vec<Capture>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captures so far
    pub fn captures(&self) -> Vec<Capture> {
        self.captures.lock().clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn capture(&mut self, capture: Capture) -> Result<(), Error> {
        self.captures.lock().push(capture);
        Ok(())
    }
}
