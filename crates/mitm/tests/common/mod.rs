//! Shared helpers for relay tests

#![allow(dead_code, unreachable_pub)]

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use simrelay_mitm::{
    EmulatedCard, Error, HandsetTransport, InterceptPipeline, MemorySink, RelayConfig,
    SessionRelay,
};

/// One thing the handset does
#[derive(Debug, Clone)]
pub enum Step {
    /// Raise an interrupt with these bytes
    Interrupt(Bytes),
    /// Send these bytes on the data channel
    Data(Bytes),
    /// Fail the data channel
    Fail(String),
}

/// Handset that plays a script and records what it is sent
#[derive(Debug, Default)]
pub struct ScriptedHandset {
    script: VecDeque<Step>,
    writes: Vec<Bytes>,
    attempts: usize,
    timed_out: Vec<usize>,
}

impl ScriptedHandset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(mut self) -> Self {
        self.script.push_back(Step::Interrupt(Bytes::from_static(b"R")));
        self
    }

    pub fn interrupt(mut self, bytes: &[u8]) -> Self {
        self.script.push_back(Step::Interrupt(Bytes::copy_from_slice(bytes)));
        self
    }

    pub fn send(mut self, bytes: &[u8]) -> Self {
        self.script.push_back(Step::Data(Bytes::copy_from_slice(bytes)));
        self
    }

    pub fn fail(mut self, reason: &str) -> Self {
        self.script.push_back(Step::Fail(reason.to_string()));
        self
    }

    /// Let the `n`th write (1-based) time out instead of reaching the handset
    pub fn time_out_write(mut self, n: usize) -> Self {
        self.timed_out.push(n);
        self
    }

    pub fn is_done(&self) -> bool {
        self.script.is_empty()
    }

    /// Every write, in order
    pub fn writes(&self) -> &[Bytes] {
        &self.writes
    }

    /// All bytes written, concatenated
    pub fn received(&self) -> Vec<u8> {
        self.writes.iter().flat_map(|w| w.iter().copied()).collect()
    }
}

impl HandsetTransport for ScriptedHandset {
    fn poll_interrupt(&mut self, _timeout: Duration) -> Result<Option<Bytes>, Error> {
        match self.script.front() {
            Some(Step::Interrupt(_)) => match self.script.pop_front() {
                Some(Step::Interrupt(bytes)) => Ok(Some(bytes)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn poll_data(&mut self, _timeout: Duration) -> Result<Option<Bytes>, Error> {
        match self.script.front() {
            Some(Step::Data(_) | Step::Fail(_)) => match self.script.pop_front() {
                Some(Step::Data(bytes)) => Ok(Some(bytes)),
                Some(Step::Fail(reason)) => Err(Error::TransportFailure(reason)),
                _ => Ok(None),
            },
            // Nothing left: behave like an idle link
            None => Err(Error::TransportTimeout),
            _ => Ok(None),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.attempts += 1;
        if self.timed_out.contains(&self.attempts) {
            return Err(Error::TransportTimeout);
        }
        self.writes.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

pub type TestRelay = SessionRelay<ScriptedHandset, EmulatedCard>;

/// Build a relay with an in-memory sink
pub fn relay(
    handset: ScriptedHandset,
    card: EmulatedCard,
    pipeline: InterceptPipeline,
) -> (TestRelay, MemorySink) {
    let sink = MemorySink::new();
    let relay = SessionRelay::new(
        handset,
        card,
        pipeline,
        Box::new(sink.clone()),
        RelayConfig::default().with_poll_timeout(Duration::ZERO),
    );
    (relay, sink)
}

/// Poll until the script is exhausted
pub fn run_script(relay: &mut TestRelay) {
    let mut iterations = 0;
    while !relay.handset().is_done() {
        relay.poll_once().unwrap();
        iterations += 1;
        assert!(iterations < 1000, "script did not finish");
    }
}
