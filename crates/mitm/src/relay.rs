//! The relay control loop
//!
//! One [`SessionRelay`] serves one handset. Each iteration polls the interrupt
//! channel and then the data channel, in that order, with a short timeout.
//! Commands are submitted to the card backend synchronously; the handset cannot
//! send the next command before it has the status word of the current one.

use std::time::Duration;

use bytes::Bytes;
use simrelay_apdu_core::{
    Atr, CardTransport, OutgoingInstructions, StatusWord, response::status::common,
    tpdu::NULL_PROCEDURE,
};
use tracing::{Level, debug, error, info, trace, warn};

use crate::{
    Error,
    handset::{HandsetTransport, RESET_INDICATION},
    intercept::InterceptPipeline,
    reconstructor::Reconstructor,
    session::Session,
    sink::{Capture, CaptureKind, DiagnosticSink},
    unit::{CommandUnit, Phase, Tag, Unit},
};

/// Relay behaviour
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long each poll of a handset channel may wait
    pub poll_timeout: Duration,
    /// Reset the card backend whenever the handset requests a reset
    pub reset_card_on_handset_reset: bool,
    /// Instructions whose data flows from the card
    pub outgoing: OutgoingInstructions,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            reset_card_on_handset_reset: false,
            outgoing: OutgoingInstructions::default(),
        }
    }
}

impl RelayConfig {
    /// Set the poll timeout
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set whether the card is reset along with the handset
    pub const fn with_card_reset(mut self, reset: bool) -> Self {
        self.reset_card_on_handset_reset = reset;
        self
    }

    /// Set the instructions whose data flows from the card
    pub fn with_outgoing(mut self, outgoing: OutgoingInstructions) -> Self {
        self.outgoing = outgoing;
        self
    }
}

/// Relays one handset to one card backend
///
/// The backend is closed when the relay is dropped.
#[derive(Debug)]
pub struct SessionRelay<H: HandsetTransport, B: CardTransport> {
    handset: H,
    backend: B,
    reconstructor: Reconstructor,
    pipeline: InterceptPipeline,
    sink: Box<dyn DiagnosticSink>,
    session: Session,
    config: RelayConfig,
}

impl<H: HandsetTransport, B: CardTransport> SessionRelay<H, B> {
    /// Create a relay; nothing is sent until the handset requests a reset
    pub fn new(
        handset: H,
        backend: B,
        pipeline: InterceptPipeline,
        sink: Box<dyn DiagnosticSink>,
        config: RelayConfig,
    ) -> Self {
        let reconstructor = Reconstructor::new(config.outgoing.clone());
        let session = reconstructor.new_session(0);
        Self {
            handset,
            backend,
            reconstructor,
            pipeline,
            sink,
            session,
            config,
        }
    }

    /// The current session
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The handset link
    pub const fn handset(&self) -> &H {
        &self.handset
    }

    /// The card backend
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Relay until a fatal error
    pub fn run(&mut self) -> Result<(), Error> {
        info!(
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "Relay running, waiting for handset reset"
        );
        loop {
            if let Err(e) = self.poll_once() {
                error!(error = %e, "Relay stopped");
                return Err(e);
            }
        }
    }

    /// One iteration: poll the interrupt channel, then the data channel
    ///
    /// Only fatal errors are returned; everything else is logged and recovered.
    pub fn poll_once(&mut self) -> Result<(), Error> {
        let timeout = self.config.poll_timeout;

        if let Some(bytes) = poll(self.handset.poll_interrupt(timeout))? {
            let result = self.handle_interrupt(&bytes);
            recover(result)?;
        }

        if let Some(bytes) = poll(self.handset.poll_data(timeout))? {
            trace!(data = %hex::encode(&bytes), "Handset sent");
            let result = self.handle_data(&bytes);
            recover(result)?;
        }

        Ok(())
    }

    fn handle_interrupt(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match bytes.first() {
            Some(&RESET_INDICATION) => self.reset_session(),
            _ => {
                debug!(data = %hex::encode(bytes), "Ignoring interrupt");
                Ok(())
            }
        }
    }

    fn reset_session(&mut self) -> Result<(), Error> {
        let id = self.session.id() + 1;
        info!(session = id, previous_phase = %self.session.phase(), "Handset requested reset");

        self.session = self.reconstructor.new_session(id);
        self.reconstructor.signal_reset(&mut self.session);

        if self.config.reset_card_on_handset_reset {
            self.backend.reset()?;
        }
        let atr = self.backend.atr()?;
        match Atr::parse(&atr) {
            Ok(parsed) => info!(
                atr = %parsed,
                convention = ?parsed.convention(),
                protocols = ?parsed.protocols(),
                fd_ratio = ?parsed.fd_ratio(),
                "Card ATR"
            ),
            Err(e) => warn!(atr = %hex::encode(&atr), error = %e, "Card ATR does not parse"),
        }

        let unit = self.reconstructor.accept_atr(&mut self.session, &atr)?;
        self.forward_card_unit(unit)
    }

    fn handle_data(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for (pos, &byte) in bytes.iter().enumerate() {
            if !self.session.awaits_handset() && self.session.phase() != Phase::AwaitingReset {
                debug!(dropped = bytes.len() - pos, "Handset spoke out of turn");
                return Err(self.reconstructor.violation(
                    &mut self.session,
                    byte,
                    "handset byte while the card has the line",
                ));
            }

            let unit = match self.reconstructor.advance(&mut self.session, byte) {
                Ok(Some(unit)) => unit,
                Ok(None) => continue,
                Err(e) => {
                    if bytes.len() > pos + 1 {
                        debug!(dropped = bytes.len() - pos - 1, "Discarding rest of transfer");
                    }
                    return Err(e);
                }
            };
            self.handle_handset_unit(byte, unit)?;
        }
        Ok(())
    }

    fn handle_handset_unit(&mut self, byte: u8, unit: Unit) -> Result<(), Error> {
        match unit {
            Unit::Pts(pts) => {
                self.capture(CaptureKind::PpsRequest, pts.clone());
                // The card's answer to the null PTS is the request itself
                let echo = self.pipeline.intercept(Tag::Pts, pts);
                self.write(&echo)
            }
            Unit::Header(header) => {
                debug!(%header, "Command from handset");
                self.submit(None)
            }
            Unit::InstructionEcho(ins) => {
                let echo = self
                    .pipeline
                    .intercept(Tag::InstructionEcho, Bytes::copy_from_slice(&[ins]));
                self.write(&echo)?;
                if self.session.phase() == Phase::StatusWord {
                    self.submit(None)?;
                }
                Ok(())
            }
            Unit::ResponseData(data) => {
                let data = self.pipeline.intercept(Tag::ResponseData, data);
                self.submit(Some(data))
            }
            Unit::Atr(_) | Unit::Null | Unit::Complete(_) => Err(Error::ProtocolViolation {
                phase: self.session.phase(),
                byte,
                reason: "card-side unit from the handset",
            }),
        }
    }

    /// Get the card's answer to the command in progress and forward it
    fn submit(&mut self, data: Option<Bytes>) -> Result<(), Error> {
        if let Some(units) = self.reconstructor.answer_from_stash(&mut self.session)? {
            return self.forward_card_units(units);
        }

        let Some(command) = self.session.pending_command(data) else {
            return Ok(());
        };
        let raw = match self.backend.transmit_raw(&command.to_bytes()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    error = %Error::BackendFailure(e),
                    %command,
                    "Answering handset with {}",
                    common::NO_PRECISE_DIAGNOSIS
                );
                Bytes::copy_from_slice(&common::NO_PRECISE_DIAGNOSIS.to_bytes())
            }
        };

        let units = self.reconstructor.feed_response(&mut self.session, &raw)?;
        self.forward_card_units(units)
    }

    fn forward_card_units(&mut self, units: Vec<Unit>) -> Result<(), Error> {
        for unit in units {
            self.forward_card_unit(unit)?;
        }
        Ok(())
    }

    fn forward_card_unit(&mut self, unit: Unit) -> Result<(), Error> {
        match unit {
            Unit::Atr(atr) => {
                self.capture(CaptureKind::Atr, atr.clone());
                let atr = self.pipeline.intercept(Tag::Atr, atr);
                self.write(&atr)
            }
            Unit::InstructionEcho(ack) => {
                let ack = self
                    .pipeline
                    .intercept(Tag::InstructionEcho, Bytes::copy_from_slice(&[ack]));
                self.write(&ack)
            }
            Unit::ResponseData(data) => {
                let data = self.pipeline.intercept(Tag::ResponseData, data);
                self.write(&data)
            }
            Unit::Null => self.write(&[NULL_PROCEDURE]),
            Unit::Complete(command) => {
                self.write(&command.status().to_bytes())?;
                log_complete(&command);
                self.capture(CaptureKind::Apdu, command.to_bytes());
                Ok(())
            }
            Unit::Header(_) | Unit::Pts(_) => Ok(()),
        }
    }

    fn capture(&mut self, kind: CaptureKind, bytes: Bytes) {
        if let Err(e) = self.sink.capture(Capture::new(kind, bytes)) {
            debug!(error = %e, ?kind, "Capture skipped");
        }
    }

    /// Send bytes to the handset. A timed out write is dropped and the exchange
    /// carries on.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        trace!(data = %hex::encode(bytes), "To handset");
        match self.handset.write(bytes) {
            Err(Error::TransportTimeout) => {
                warn!(
                    data = %hex::encode(bytes),
                    phase = %self.session.phase(),
                    "Handset write timed out"
                );
                Ok(())
            }
            other => other,
        }
    }
}

impl<H: HandsetTransport, B: CardTransport> Drop for SessionRelay<H, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            warn!(error = %e, "Closing card backend failed");
        }
    }
}

/// A timeout is a poll that found nothing
fn poll(result: Result<Option<Bytes>, Error>) -> Result<Option<Bytes>, Error> {
    match result {
        Err(Error::TransportTimeout) => Ok(None),
        other => other,
    }
}

fn recover(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "Recovered");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn log_complete(command: &CommandUnit) {
    let status: StatusWord = command.status();
    match status.tracing_level() {
        Level::DEBUG => debug!(%command, "{}", status.description()),
        Level::INFO => info!(%command, "{}", status.description()),
        _ => warn!(%command, "{}", status.description()),
    }
}
