//! Capture off the relay thread

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{debug, warn};

use super::{Capture, DiagnosticSink};
use crate::Error;

/// Hands captures to a worker thread through a bounded channel
///
/// When the channel is full the capture is dropped and counted; the relay
/// never waits for the inner sink.
#[derive(Debug)]
pub struct BufferedSink {
    sender: Option<Sender<Capture>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl BufferedSink {
    /// Default channel capacity
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Spawn a worker feeding `inner`
    pub fn new<S: DiagnosticSink + 'static>(mut inner: S, capacity: usize) -> Result<Self, Error> {
        let (sender, receiver) = bounded::<Capture>(capacity);
        let worker = thread::Builder::new()
            .name("simrelay-capture".into())
            .spawn(move || {
                for capture in receiver {
                    if let Err(e) = inner.capture(capture) {
                        debug!(error = %e, "Capture failed");
                    }
                }
            })
            .map_err(Error::sink)?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Captures dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for BufferedSink {
    fn capture(&mut self, capture: Capture) -> Result<(), Error> {
        let Some(sender) = &self.sender else {
            return Err(Error::Sink("capture worker stopped".into()));
        };
        match sender.try_send(capture) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::Sink("capture queue full".into()))
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::Sink("capture worker stopped".into())),
        }
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue is drained
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Capture worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CaptureKind, MemorySink};
    use bytes::Bytes;

    #[test]
    fn test_captures_are_drained_on_drop() {
        let memory = MemorySink::new();
        let mut sink = BufferedSink::new(memory.clone(), 16).unwrap();
        for i in 0..10u8 {
            sink.capture(Capture::new(CaptureKind::Apdu, Bytes::copy_from_slice(&[i])))
                .unwrap();
        }
        drop(sink);

        let captures = memory.captures();
        assert_eq!(captures.len(), 10);
        assert!(captures.iter().enumerate().all(|(i, c)| c.bytes.as_ref() == [i as u8]));
    }

    #[derive(Debug)]
    struct Stalled(crossbeam_channel::Receiver<()>);

    impl DiagnosticSink for Stalled {
        fn capture(&mut self, _capture: Capture) -> Result<(), Error> {
            let _ = self.0.recv();
            Ok(())
        }
    }

    #[test]
    fn test_full_queue_drops() {
        let (release, gate) = bounded(0);
        let mut sink = BufferedSink::new(Stalled(gate), 1).unwrap();

        let capture = Capture::new(CaptureKind::Atr, Bytes::from_static(&[0x3B, 0x00]));
        // The worker may or may not have picked up the first capture yet;
        // either way the queue overflows within three sends
        let results: Vec<_> = (0..3).map(|_| sink.capture(capture.clone())).collect();
        assert!(results.iter().any(Result::is_err));
        assert!(sink.dropped() >= 1);

        drop(release);
        drop(sink);
    }
}
