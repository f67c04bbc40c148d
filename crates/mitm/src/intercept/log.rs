//! Append-only record of interceptions

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::unit::Tag;

/// One consultation of the interception policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRecord {
    /// Position in arrival order, starting at zero
    pub sequence: u64,
    /// Interception point
    pub tag: Tag,
    /// Bytes as reconstructed
    pub original: Bytes,
    /// Bytes actually forwarded
    pub forwarded: Bytes,
}

impl InterceptRecord {
    /// Whether the policy replaced the original bytes
    pub fn substituted(&self) -> bool {
        self.original != self.forwarded
    }
}

/// Shared, ordered interception log
///
/// Clones share the same records, so one log can be attached to several relays.
#[derive(Debug, Clone, Default)]
pub struct InterceptLog {
    records: Arc<Mutex<Vec<InterceptRecord>>>,
}

impl InterceptLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, tag: Tag, original: Bytes, forwarded: Bytes) {
        let mut records = self.records.lock();
        let sequence = records.len() as u64;
        records.push(InterceptRecord {
            sequence,
            tag,
            original,
            forwarded,
        });
    }

    /// Snapshot of all records so far
    pub fn records(&self) -> Vec<InterceptRecord> {
        self.records.lock().clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
