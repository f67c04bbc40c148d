//! T=0 transport framing
//!
//! On a T=0 link a command travels as a five byte TPDU header (CLA INS P1 P2 P3),
//! after which the card answers with procedure bytes that either acknowledge a data
//! transfer or open the closing status word. Which side sends the data depends on
//! the instruction: this is the [`DataDirection`] of the command.

use std::fmt;

use bytes::Bytes;

use crate::{Command, Error, response::status::StatusWord};

/// Length of a T=0 TPDU header
pub const HEADER_LEN: usize = 5;

/// The NULL procedure byte, sent by a card asking for more time
pub const NULL_PROCEDURE: u8 = 0x60;

/// Which side of the link transfers the data of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataDirection {
    /// Data flows from the terminal to the card (P3 is Lc)
    Incoming,
    /// Data flows from the card to the terminal (P3 is Le)
    Outgoing,
}

/// The set of instructions whose data flows from card to terminal
///
/// T=0 cannot tell the direction from the header alone, so the relay must know
/// which instructions return data.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingInstructions {
    set: [bool; 256],
}

impl OutgoingInstructions {
    /// Instructions returning data on a SIM/USIM: GET RESPONSE, READ BINARY,
    /// READ RECORD, FETCH, STATUS, GET DATA and GET CHALLENGE
    pub const DEFAULT: [u8; 7] = [0xC0, 0xB0, 0xB2, 0x12, 0xF2, 0xCA, 0x84];

    /// An empty set, every command is incoming
    pub const fn empty() -> Self {
        Self { set: [false; 256] }
    }

    /// Build a set from a list of instruction bytes
    pub fn from_instructions(instructions: &[u8]) -> Self {
        let mut set = Self::empty();
        for &ins in instructions {
            set.insert(ins);
        }
        set
    }

    /// Add an instruction to the set
    pub const fn insert(&mut self, ins: u8) {
        self.set[ins as usize] = true;
    }

    /// Whether the instruction returns data
    pub const fn contains(&self, ins: u8) -> bool {
        self.set[ins as usize]
    }

    /// Direction of the data phase for `ins`
    pub const fn direction(&self, ins: u8) -> DataDirection {
        if self.contains(ins) {
            DataDirection::Outgoing
        } else {
            DataDirection::Incoming
        }
    }

    /// Iterate over the instructions in the set
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|&ins| self.contains(ins))
    }
}

impl Default for OutgoingInstructions {
    fn default() -> Self {
        Self::from_instructions(&Self::DEFAULT)
    }
}

impl fmt::Debug for OutgoingInstructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(|ins| format!("{ins:#04x}")))
            .finish()
    }
}

/// A T=0 command header: CLA INS P1 P2 P3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TpduHeader {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Length of the data phase (Lc or Le depending on direction)
    pub p3: u8,
}

impl TpduHeader {
    /// Create a header from its five bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8, p3: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            p3,
        }
    }

    /// Parse a header from exactly five bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        match *bytes {
            [cla, ins, p1, p2, p3] => Ok(Self::new(cla, ins, p1, p2, p3)),
            _ => Err(Error::InvalidCommandLength(bytes.len())),
        }
    }

    /// The header in wire order
    pub const fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [self.cla, self.ins, self.p1, self.p2, self.p3]
    }

    /// Number of data bytes transferred after the header
    ///
    /// An outgoing P3 of zero asks for 256 bytes; an incoming P3 of zero carries none.
    pub const fn data_len(&self, direction: DataDirection) -> usize {
        match direction {
            DataDirection::Outgoing if self.p3 == 0 => 256,
            _ => self.p3 as usize,
        }
    }

    /// Build the APDU submitted to a card backend
    pub fn to_command(&self, direction: DataDirection, data: Bytes) -> Command {
        let command = Command::new(self.cla, self.ins, self.p1, self.p2);
        match direction {
            DataDirection::Outgoing => command.with_le(self.p3),
            DataDirection::Incoming if data.is_empty() => command,
            DataDirection::Incoming => command.with_data(data),
        }
    }
}

impl fmt::Display for TpduHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X} {:02X} {:02X}",
            self.cla, self.ins, self.p1, self.p2, self.p3
        )
    }
}

/// Meaning of a byte sent by the card after a TPDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// `60`: the card needs more time
    Null,
    /// `INS`: transfer all remaining data bytes
    AckAll,
    /// `INS ^ FF`: transfer the next data byte only
    AckSingle,
    /// `6X`/`9X`: first byte of the status word
    Sw1,
    /// Not a legal procedure byte for this instruction
    Invalid,
}

impl Procedure {
    /// Classify `byte` as the answer to a header carrying `ins`
    pub const fn classify(byte: u8, ins: u8) -> Self {
        if byte == NULL_PROCEDURE {
            Self::Null
        } else if byte == ins {
            Self::AckAll
        } else if byte == ins ^ 0xFF {
            Self::AckSingle
        } else if StatusWord::is_sw1(byte) {
            Self::Sw1
        } else {
            Self::Invalid
        }
    }

    /// Whether this procedure byte acknowledges a data transfer
    pub const fn is_ack(&self) -> bool {
        matches!(self, Self::AckAll | Self::AckSingle)
    }
}
