//! Byte framer for the T=0 conversation between handset and card
//!
//! The framer sees one byte at a time and classifies it against the current
//! [`Phase`]. It keeps the bytes of the unit being assembled and hands the unit
//! out as soon as its last byte arrives. It knows nothing about transports:
//! bytes from the handset and bytes synthesised for the card side go through
//! the same [`Framer::consume`].
//!
//! The relay acknowledges handset data on the card's behalf, so for a command
//! whose data flows from the handset the framer produces the `INS` procedure
//! byte itself when the header completes. For commands whose data flows from
//! the card, procedure bytes are consumed like any other byte, including NULL
//! and single-byte acknowledgements.

use bytes::{BufMut, Bytes, BytesMut};
use simrelay_apdu_core::{
    DataDirection, OutgoingInstructions, Procedure, StatusWord, TpduHeader, atr,
    tpdu::{HEADER_LEN, NULL_PROCEDURE},
};

use crate::unit::{CommandUnit, Phase, Unit};

/// PTS request recognised at the start of a command header
pub const PTS_LITERAL: [u8; 3] = [0xFF, 0x00, 0xFF];

/// Outcome of feeding one byte to the framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// The byte was buffered; the current unit is not complete yet
    NeedMore,
    /// The byte completed a unit
    UnitReady(Unit),
    /// The byte is not a legal continuation of the current phase
    InvalidSequence(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckMode {
    All,
    Single,
}

/// Incremental T=0 framer
#[derive(Debug, Clone)]
pub struct Framer {
    phase: Phase,
    /// Bytes of the unit being assembled: ATR, PTS look-ahead, header or SW1
    buf: BytesMut,
    header: Option<TpduHeader>,
    direction: DataDirection,
    data: BytesMut,
    remaining: usize,
    ack: AckMode,
    consumed: u64,
    outgoing: OutgoingInstructions,
}

impl Framer {
    /// Create a framer waiting for a reset
    ///
    /// `outgoing` lists the instructions whose data flows from the card.
    pub fn new(outgoing: OutgoingInstructions) -> Self {
        Self {
            phase: Phase::AwaitingReset,
            buf: BytesMut::with_capacity(atr::MAX_ATR_LEN),
            header: None,
            direction: DataDirection::Incoming,
            data: BytesMut::new(),
            remaining: 0,
            ack: AckMode::All,
            consumed: 0,
            outgoing,
        }
    }

    /// Current phase
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Total number of bytes fed through [`consume`](Self::consume)
    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes of the partially assembled unit
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Header of the command in progress
    pub const fn header(&self) -> Option<&TpduHeader> {
        self.header.as_ref()
    }

    /// Direction of the data phase of the command in progress
    pub const fn direction(&self) -> DataDirection {
        self.direction
    }

    /// Data bytes collected for the command in progress
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the handset, rather than the card, is expected to send next
    pub const fn expects_handset(&self) -> bool {
        self.phase.expects_handset(self.direction)
    }

    /// A reset was signalled: drop everything in flight and wait for an ATR
    pub fn signal_reset(&mut self) {
        self.clear();
        self.phase = Phase::ExpectAtr;
    }

    /// Drop everything in flight and wait for the next reset
    pub fn discard(&mut self) {
        self.clear();
        self.phase = Phase::AwaitingReset;
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.data.clear();
        self.header = None;
        self.remaining = 0;
        self.ack = AckMode::All;
    }

    /// Classify one byte and advance the phase
    pub fn consume(&mut self, byte: u8) -> FramerEvent {
        self.consumed += 1;
        match self.phase {
            Phase::AwaitingReset => FramerEvent::InvalidSequence("no reset signalled"),
            Phase::ExpectAtr => self.consume_atr(byte),
            Phase::CommandHeader | Phase::Complete => self.consume_header(byte),
            Phase::PtsNegotiation => self.consume_pts(byte),
            Phase::ProcedureByte => self.consume_procedure(byte),
            Phase::DataTransfer => self.consume_data(byte),
            Phase::StatusWord => self.consume_status(byte),
        }
    }

    fn consume_atr(&mut self, byte: u8) -> FramerEvent {
        self.buf.put_u8(byte);
        match atr::expected_len(&self.buf) {
            Ok(Some(len)) if self.buf.len() >= len => {
                self.phase = Phase::CommandHeader;
                FramerEvent::UnitReady(Unit::Atr(self.buf.split().freeze()))
            }
            Ok(_) => FramerEvent::NeedMore,
            Err(simrelay_apdu_core::Error::InvalidAtr(reason)) => {
                FramerEvent::InvalidSequence(reason)
            }
            Err(_) => FramerEvent::InvalidSequence("malformed ATR"),
        }
    }

    fn consume_header(&mut self, byte: u8) -> FramerEvent {
        self.phase = Phase::CommandHeader;
        if self.buf.is_empty() && byte == PTS_LITERAL[0] {
            self.buf.put_u8(byte);
            self.phase = Phase::PtsNegotiation;
            return FramerEvent::NeedMore;
        }
        self.push_header_byte(byte)
    }

    fn consume_pts(&mut self, byte: u8) -> FramerEvent {
        if PTS_LITERAL.get(self.buf.len()) == Some(&byte) {
            self.buf.put_u8(byte);
            if self.buf.len() < PTS_LITERAL.len() {
                return FramerEvent::NeedMore;
            }
            self.phase = Phase::CommandHeader;
            return FramerEvent::UnitReady(Unit::Pts(self.buf.split().freeze()));
        }

        // Not the literal; the look-ahead is the start of a header
        self.phase = Phase::CommandHeader;
        self.push_header_byte(byte)
    }

    fn push_header_byte(&mut self, byte: u8) -> FramerEvent {
        self.buf.put_u8(byte);
        if self.buf.len() < HEADER_LEN {
            return FramerEvent::NeedMore;
        }

        let Ok(header) = TpduHeader::from_slice(&self.buf) else {
            return FramerEvent::InvalidSequence("malformed command header");
        };
        self.buf.clear();

        // ISO 7816-3 reserves 6X and 9X so they cannot be mistaken for procedure bytes
        if matches!(header.ins & 0xF0, 0x60 | 0x90) {
            return FramerEvent::InvalidSequence("instruction byte 6X or 9X");
        }

        self.begin_command(header)
    }

    fn begin_command(&mut self, header: TpduHeader) -> FramerEvent {
        let direction = self.outgoing.direction(header.ins);
        self.header = Some(header);
        self.direction = direction;
        self.data.clear();
        self.remaining = header.data_len(direction);
        self.ack = AckMode::All;

        match direction {
            DataDirection::Outgoing => {
                self.phase = Phase::ProcedureByte;
                FramerEvent::UnitReady(Unit::Header(header))
            }
            DataDirection::Incoming => {
                self.phase = if self.remaining == 0 {
                    Phase::StatusWord
                } else {
                    Phase::DataTransfer
                };
                FramerEvent::UnitReady(Unit::InstructionEcho(header.ins))
            }
        }
    }

    fn consume_procedure(&mut self, byte: u8) -> FramerEvent {
        let Some(header) = self.header else {
            return FramerEvent::InvalidSequence("procedure byte without a command");
        };

        match Procedure::classify(byte, header.ins) {
            Procedure::Null => FramerEvent::UnitReady(Unit::Null),
            Procedure::AckAll => {
                self.ack = AckMode::All;
                self.phase = Phase::DataTransfer;
                FramerEvent::UnitReady(Unit::InstructionEcho(byte))
            }
            Procedure::AckSingle => {
                self.ack = AckMode::Single;
                self.phase = Phase::DataTransfer;
                FramerEvent::UnitReady(Unit::InstructionEcho(byte))
            }
            Procedure::Sw1 => {
                self.buf.put_u8(byte);
                self.phase = Phase::StatusWord;
                FramerEvent::NeedMore
            }
            Procedure::Invalid => FramerEvent::InvalidSequence("illegal procedure byte"),
        }
    }

    fn consume_data(&mut self, byte: u8) -> FramerEvent {
        self.data.put_u8(byte);
        self.remaining = self.remaining.saturating_sub(1);

        if self.remaining == 0 {
            self.phase = Phase::StatusWord;
            return FramerEvent::UnitReady(Unit::ResponseData(Bytes::copy_from_slice(&self.data)));
        }
        if self.ack == AckMode::Single {
            self.phase = Phase::ProcedureByte;
        }
        FramerEvent::NeedMore
    }

    fn consume_status(&mut self, byte: u8) -> FramerEvent {
        let Some(&sw1) = self.buf.first() else {
            if byte == NULL_PROCEDURE {
                return FramerEvent::UnitReady(Unit::Null);
            }
            if !StatusWord::is_sw1(byte) {
                return FramerEvent::InvalidSequence("expected SW1");
            }
            self.buf.put_u8(byte);
            return FramerEvent::NeedMore;
        };

        let Some(header) = self.header.take() else {
            return FramerEvent::InvalidSequence("status word without a command");
        };
        self.buf.clear();
        self.phase = Phase::Complete;

        FramerEvent::UnitReady(Unit::Complete(CommandUnit::new(
            header,
            self.direction,
            self.data.split().freeze(),
            StatusWord::new(sw1, byte),
        )))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(OutgoingInstructions::default())
    }
}
