//! APDU reconstruction on top of the framer
//!
//! The reconstructor applies framer transitions to a [`Session`] and turns
//! framer failures into session resets. It also produces the card's side of
//! the T=0 conversation: a card backend answers with `data ‖ SW1 SW2` as a
//! whole, and [`Reconstructor::feed_response`] converts that into procedure
//! bytes, data and status word, fed through the same framer so the session
//! state follows both directions.

use bytes::{BufMut, Bytes, BytesMut};
use simrelay_apdu_core::{
    DataDirection, OutgoingInstructions, Response, StatusWord, TpduHeader,
    response::status::common,
};
use tracing::{debug, trace, warn};

use crate::Error;
use crate::framer::FramerEvent;
use crate::session::Session;
use crate::unit::{Phase, Unit};

/// GET RESPONSE instruction
pub const GET_RESPONSE: u8 = 0xC0;

/// Drives sessions through the T=0 state machine
#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
    outgoing: OutgoingInstructions,
}

impl Reconstructor {
    /// Create a reconstructor treating `outgoing` as the instructions whose data
    /// flows from the card
    pub const fn new(outgoing: OutgoingInstructions) -> Self {
        Self { outgoing }
    }

    /// Start a session waiting for a reset
    pub fn new_session(&self, id: u64) -> Session {
        Session::new(id, self.outgoing.clone())
    }

    /// Feed one byte received from the handset
    ///
    /// Returns the unit the byte completed, if any. A byte that does not fit
    /// the current phase resets the session to [`Phase::AwaitingReset`].
    pub fn advance(&self, session: &mut Session, byte: u8) -> Result<Option<Unit>, Error> {
        session.stats.handset_bytes += 1;
        self.step(session, byte)
    }

    /// Reset signalled by the handset: drop everything in flight and expect an ATR
    pub fn signal_reset(&self, session: &mut Session) {
        debug!(session = session.id(), phase = %session.phase(), "Reset signalled");
        session.framer.signal_reset();
        session.clear_stash();
    }

    /// Feed the card's Answer To Reset
    ///
    /// The ATR must end exactly on its last byte, as computed from its own
    /// structure.
    pub fn accept_atr(&self, session: &mut Session, atr: &[u8]) -> Result<Unit, Error> {
        if session.phase() != Phase::ExpectAtr {
            let byte = atr.first().copied().unwrap_or_default();
            return Err(self.violation(session, byte, "ATR outside of a reset"));
        }
        let Some(&last) = atr.last() else {
            return Err(simrelay_apdu_core::Error::InvalidAtr("empty").into());
        };

        for (pos, &byte) in atr.iter().enumerate() {
            if let Some(unit) = self.step(session, byte)? {
                if pos + 1 != atr.len() {
                    return Err(self.violation(session, byte, "bytes after the end of the ATR"));
                }
                return Ok(unit);
            }
        }

        Err(self.violation(session, last, "ATR ended early"))
    }

    /// Feed the card backend's answer to the command in progress
    ///
    /// `raw` is the backend's `data ‖ SW1 SW2`. Returns the units to forward to
    /// the handset, in order.
    pub fn feed_response(&self, session: &mut Session, raw: &[u8]) -> Result<Vec<Unit>, Error> {
        let wire = match Response::from_bytes(raw) {
            Ok(response) => self.synthesize(session, response)?,
            Err(e) => {
                warn!(error = %e, response = %hex::encode(raw), "Unusable card response");
                no_precise_diagnosis()
            }
        };
        self.feed_wire(session, &wire)
    }

    /// Answer a GET RESPONSE from the data stashed by the previous command
    ///
    /// Returns `None` when the command in progress is not a GET RESPONSE or
    /// nothing is stashed; the command then goes to the card backend.
    pub fn answer_from_stash(&self, session: &mut Session) -> Result<Option<Vec<Unit>>, Error> {
        let Some(header) = session.framer.header().copied() else {
            return Ok(None);
        };
        if header.ins != GET_RESPONSE {
            return Ok(None);
        }
        let Some(stashed) = session.take_stash() else {
            return Ok(None);
        };

        let expected = header.data_len(DataDirection::Outgoing);
        let available = stashed.payload().len();
        if available != expected {
            debug!(expected, available, "GET RESPONSE length mismatch");
            session.stash_response(stashed);
            return self.feed_wire(session, &wrong_le(available)).map(Some);
        }

        trace!(len = available, "Answering GET RESPONSE from stash");
        self.feed_response(session, &stashed.to_bytes()).map(Some)
    }

    fn synthesize(&self, session: &mut Session, response: Response) -> Result<Bytes, Error> {
        let Some(header) = session.framer.header().copied() else {
            let byte = response.status().sw1;
            return Err(self.violation(session, byte, "card answer without a command"));
        };
        if !response.has_payload() {
            return Ok(Bytes::copy_from_slice(&response.status().to_bytes()));
        }

        let payload = response.payload().len();
        if payload > MAX_SHORT_PAYLOAD {
            // Neither 6C nor 61 can announce more than 256 bytes
            warn!(%header, payload, "Card answer too long for a short APDU");
            return Ok(no_precise_diagnosis());
        }
        match session.framer.direction() {
            DataDirection::Outgoing if payload == header.data_len(DataDirection::Outgoing) => {
                let mut wire = BytesMut::with_capacity(payload + 3);
                wire.put_u8(header.ins);
                wire.put_slice(response.payload());
                wire.put_slice(&response.status().to_bytes());
                Ok(wire.freeze())
            }
            DataDirection::Outgoing => {
                debug!(%header, payload, "Card returned a different length, asking for a retry");
                Ok(wrong_le(payload))
            }
            DataDirection::Incoming => {
                // T=0 cannot return data for an incoming command; hold it for GET RESPONSE
                debug!(%header, payload, "Stashing card data for GET RESPONSE");
                session.stash_response(response);
                Ok(Bytes::copy_from_slice(&more_data(payload).to_bytes()))
            }
        }
    }

    fn feed_wire(&self, session: &mut Session, wire: &[u8]) -> Result<Vec<Unit>, Error> {
        let mut units = Vec::new();
        for &byte in wire {
            if let Some(unit) = self.step(session, byte)? {
                units.push(unit);
            }
        }
        Ok(units)
    }

    fn step(&self, session: &mut Session, byte: u8) -> Result<Option<Unit>, Error> {
        let phase = session.phase();
        match session.framer.consume(byte) {
            FramerEvent::NeedMore => Ok(None),
            FramerEvent::UnitReady(unit) => {
                session.stats.units += 1;
                match &unit {
                    Unit::Complete(command) => {
                        session.stats.commands += 1;
                        trace!(session = session.id(), %command, "Command complete");
                    }
                    Unit::Header(TpduHeader { ins, .. }) if *ins != GET_RESPONSE => {
                        session.clear_stash();
                    }
                    Unit::InstructionEcho(ins) if opens_command(phase) && *ins != GET_RESPONSE => {
                        session.clear_stash();
                    }
                    _ => {}
                }
                Ok(Some(unit))
            }
            FramerEvent::InvalidSequence(reason) => Err(self.violation(session, byte, reason)),
        }
    }

    /// Discard the session state after a byte that broke the protocol
    pub(crate) fn violation(&self, session: &mut Session, byte: u8, reason: &'static str) -> Error {
        let phase = session.phase();
        debug!(
            session = session.id(),
            %phase,
            byte = format_args!("{byte:02X}"),
            reason,
            "Protocol violation, discarding session state"
        );
        session.stats.violations += 1;
        session.framer.discard();
        session.clear_stash();
        Error::ProtocolViolation {
            phase,
            byte,
            reason,
        }
    }
}

const fn opens_command(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::CommandHeader | Phase::PtsNegotiation | Phase::Complete
    )
}

/// Largest payload a short response carries; encoded as `00` in `6C`/`61`
const MAX_SHORT_PAYLOAD: usize = 256;

/// `6C xx`: wrong length, `xx` bytes available
fn wrong_le(available: usize) -> Bytes {
    let status = StatusWord::new(common::WRONG_LE.sw1, available as u8);
    Bytes::copy_from_slice(&status.to_bytes())
}

/// `61 xx`: `xx` bytes waiting for GET RESPONSE
const fn more_data(available: usize) -> StatusWord {
    StatusWord::new(common::MORE_DATA.sw1, available as u8)
}

fn no_precise_diagnosis() -> Bytes {
    Bytes::copy_from_slice(&common::NO_PRECISE_DIAGNOSIS.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn ready_session(reconstructor: &Reconstructor) -> Session {
        let mut session = reconstructor.new_session(1);
        reconstructor.signal_reset(&mut session);
        reconstructor.accept_atr(&mut session, &hex!("3B00")).unwrap();
        session
    }

    fn advance_all(
        reconstructor: &Reconstructor,
        session: &mut Session,
        bytes: &[u8],
    ) -> Vec<Unit> {
        bytes
            .iter()
            .filter_map(|&byte| reconstructor.advance(session, byte).unwrap())
            .collect()
    }

    fn wire(units: &[Unit]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            match unit {
                Unit::InstructionEcho(byte) => out.push(*byte),
                Unit::Null => out.push(0x60),
                Unit::ResponseData(data) => out.extend_from_slice(data),
                Unit::Complete(command) => out.extend_from_slice(&command.status().to_bytes()),
                Unit::Atr(bytes) | Unit::Pts(bytes) => out.extend_from_slice(bytes),
                Unit::Header(_) => {}
            }
        }
        out
    }

    #[test]
    fn test_atr_then_zero_length_echo() {
        let reconstructor = Reconstructor::default();
        let mut session = reconstructor.new_session(1);
        reconstructor.signal_reset(&mut session);

        assert_eq!(reconstructor.advance(&mut session, 0x3B).unwrap(), None);
        assert_eq!(
            reconstructor.advance(&mut session, 0x00).unwrap(),
            Some(Unit::Atr(Bytes::from_static(&hex!("3B00"))))
        );

        let units = advance_all(&reconstructor, &mut session, &hex!("00A4000000"));
        assert_eq!(units, vec![Unit::InstructionEcho(0xA4)]);
        assert_eq!(session.phase(), Phase::StatusWord);
    }

    #[test]
    fn test_accept_atr_rejects_trailing_bytes() {
        let reconstructor = Reconstructor::default();
        let mut session = reconstructor.new_session(1);
        reconstructor.signal_reset(&mut session);

        let err = reconstructor
            .accept_atr(&mut session, &hex!("3B0000"))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert_eq!(session.phase(), Phase::AwaitingReset);

        reconstructor.signal_reset(&mut session);
        let err = reconstructor
            .accept_atr(&mut session, &hex!("3B02AA"))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { reason: "ATR ended early", .. }));
    }

    #[test]
    fn test_violation_resets_session() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("A0B0000002"));

        let err = reconstructor.advance(&mut session, 0x42).unwrap_err();
        assert_eq!(
            err,
            Error::ProtocolViolation {
                phase: Phase::ProcedureByte,
                byte: 0x42,
                reason: "illegal procedure byte",
            }
        );
        assert_eq!(session.phase(), Phase::AwaitingReset);
        assert_eq!(session.stats().violations, 1);
        assert!(session.framer().header().is_none());
    }

    #[test]
    fn test_outgoing_exact_length() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        assert_eq!(
            advance_all(&reconstructor, &mut session, &hex!("A0B0000002")),
            vec![Unit::Header(TpduHeader::new(0xA0, 0xB0, 0x00, 0x00, 0x02))]
        );

        let units = reconstructor
            .feed_response(&mut session, &hex!("12349000"))
            .unwrap();
        assert_eq!(wire(&units), hex!("B012349000"));
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(session.stats().commands, 1);
    }

    #[test]
    fn test_outgoing_length_mismatch_asks_for_retry() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("A0B0000004"));

        let units = reconstructor
            .feed_response(&mut session, &hex!("12349000"))
            .unwrap();
        assert_eq!(wire(&units), hex!("6C02"));
    }

    #[test]
    fn test_incoming_data_is_stashed_for_get_response() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("00A40004023F00"));
        assert_eq!(session.phase(), Phase::StatusWord);

        let units = reconstructor
            .feed_response(&mut session, &hex!("AABBCC9000"))
            .unwrap();
        assert_eq!(wire(&units), hex!("6103"));
        assert!(session.stash().is_some());

        // Wrong length first: the stash survives
        advance_all(&reconstructor, &mut session, &hex!("00C0000010"));
        let units = reconstructor.answer_from_stash(&mut session).unwrap().unwrap();
        assert_eq!(wire(&units), hex!("6C03"));

        advance_all(&reconstructor, &mut session, &hex!("00C0000003"));
        let units = reconstructor.answer_from_stash(&mut session).unwrap().unwrap();
        assert_eq!(wire(&units), hex!("C0AABBCC9000"));
        assert!(session.stash().is_none());
    }

    #[test]
    fn test_stash_dropped_by_other_command() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("00A40004023F00"));
        reconstructor.feed_response(&mut session, &hex!("AA9000")).unwrap();
        assert!(session.stash().is_some());

        advance_all(&reconstructor, &mut session, &hex!("00B0000001"));
        assert!(session.stash().is_none());
        assert_eq!(reconstructor.answer_from_stash(&mut session).unwrap(), None);
    }

    #[test]
    fn test_short_backend_answer() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("00A4000000"));

        let units = reconstructor.feed_response(&mut session, &hex!("90")).unwrap();
        assert_eq!(wire(&units), hex!("6F00"));
    }

    #[test]
    fn test_oversized_answer_is_refused() {
        let mut raw = vec![0x5A; MAX_SHORT_PAYLOAD + 1];
        raw.extend_from_slice(&hex!("9000"));
        let reconstructor = Reconstructor::default();

        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("A0B0000000"));
        let units = reconstructor.feed_response(&mut session, &raw).unwrap();
        assert_eq!(wire(&units), hex!("6F00"));
        assert_eq!(session.phase(), Phase::Complete);

        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("00A40004023F00"));
        let units = reconstructor.feed_response(&mut session, &raw).unwrap();
        assert_eq!(wire(&units), hex!("6F00"));
        assert!(session.stash().is_none());
    }

    #[test]
    fn test_full_length_answer_announces_zero() {
        let mut raw = vec![0x5A; MAX_SHORT_PAYLOAD];
        raw.extend_from_slice(&hex!("9000"));
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("00A40004023F00"));

        let units = reconstructor.feed_response(&mut session, &raw).unwrap();
        assert_eq!(wire(&units), hex!("6100"));
        assert!(session.stash().is_some());
    }

    #[test]
    fn test_framing_is_idempotent() {
        let reconstructor = Reconstructor::default();
        let mut session = ready_session(&reconstructor);
        advance_all(&reconstructor, &mut session, &hex!("A0A40000023F00"));
        let units = reconstructor.feed_response(&mut session, &hex!("9F17")).unwrap();
        let Some(Unit::Complete(first)) = units.last().cloned() else {
            panic!("expected a complete command");
        };

        // Replay the handset-observed stream of the reconstructed command
        let mut replay = ready_session(&reconstructor);
        let mut stream = first.header().to_bytes().to_vec();
        stream.extend_from_slice(first.data());
        stream.extend_from_slice(&first.status().to_bytes());
        let units = advance_all(&reconstructor, &mut replay, &stream);

        assert_eq!(units.last(), Some(&Unit::Complete(first)));
    }
}
