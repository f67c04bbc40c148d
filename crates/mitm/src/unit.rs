//! Protocol phases and the units reconstructed from the byte stream

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use simrelay_apdu_core::{Command, DataDirection, StatusWord, TpduHeader, tpdu::HEADER_LEN};

/// Where a session is in the T=0 conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No reset seen yet, or the session was discarded after a violation
    AwaitingReset,
    /// Reset signalled, the card's Answer To Reset is being collected
    ExpectAtr,
    /// Looking ahead at a possible `FF 00 FF` PTS request
    PtsNegotiation,
    /// Collecting the five header bytes of the next command
    CommandHeader,
    /// Header complete, waiting for the card's procedure byte
    ProcedureByte,
    /// Data bytes flowing in the direction of the command
    DataTransfer,
    /// Waiting for SW1 SW2
    StatusWord,
    /// Status word received; the next byte starts a new command
    Complete,
}

impl Phase {
    /// Whether the handset, rather than the card, is expected to send next
    pub const fn expects_handset(&self, direction: DataDirection) -> bool {
        match self {
            Self::PtsNegotiation | Self::CommandHeader | Self::Complete => true,
            Self::DataTransfer => matches!(direction, DataDirection::Incoming),
            Self::AwaitingReset | Self::ExpectAtr | Self::ProcedureByte | Self::StatusWord => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Interception point a unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Answer To Reset sent to the handset
    Atr,
    /// PTS request echoed to the handset
    Pts,
    /// Procedure byte acknowledging a data transfer
    InstructionEcho,
    /// Data phase of a command, in either direction
    ResponseData,
}

impl Tag {
    /// Lower-case name used in configuration files
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Atr => "atr",
            Self::Pts => "pts",
            Self::InstructionEcho => "instruction_echo",
            Self::ResponseData => "response_data",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tag {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atr" => Ok(Self::Atr),
            "pts" => Ok(Self::Pts),
            "instruction_echo" => Ok(Self::InstructionEcho),
            "response_data" => Ok(Self::ResponseData),
            other => Err(crate::Error::Config(format!("unknown interception tag `{other}`"))),
        }
    }
}

/// A protocol unit completed by the framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// Complete Answer To Reset
    Atr(Bytes),
    /// Complete `FF 00 FF` PTS request
    Pts(Bytes),
    /// Header of a command whose data flows from the card; the card must answer
    Header(TpduHeader),
    /// Procedure byte acknowledging data (`INS`, or `INS ^ FF` for a single byte)
    InstructionEcho(u8),
    /// NULL procedure byte
    Null,
    /// All data bytes of the current command
    ResponseData(Bytes),
    /// A finished command with its status word
    Complete(CommandUnit),
}

impl Unit {
    /// Interception point for this unit, if it has one
    ///
    /// Headers, NULL bytes and status words are forwarded verbatim.
    pub const fn tag(&self) -> Option<Tag> {
        match self {
            Self::Atr(_) => Some(Tag::Atr),
            Self::Pts(_) => Some(Tag::Pts),
            Self::InstructionEcho(_) => Some(Tag::InstructionEcho),
            Self::ResponseData(_) => Some(Tag::ResponseData),
            Self::Header(_) | Self::Null | Self::Complete(_) => None,
        }
    }
}

/// A command that went through every phase up to its status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandUnit {
    header: TpduHeader,
    direction: DataDirection,
    data: Bytes,
    status: StatusWord,
}

impl CommandUnit {
    pub(crate) const fn new(
        header: TpduHeader,
        direction: DataDirection,
        data: Bytes,
        status: StatusWord,
    ) -> Self {
        Self {
            header,
            direction,
            data,
            status,
        }
    }

    /// The five header bytes
    pub const fn header(&self) -> &TpduHeader {
        &self.header
    }

    /// Class byte
    pub const fn cla(&self) -> u8 {
        self.header.cla
    }

    /// Instruction byte
    pub const fn ins(&self) -> u8 {
        self.header.ins
    }

    /// Parameter 1
    pub const fn p1(&self) -> u8 {
        self.header.p1
    }

    /// Parameter 2
    pub const fn p2(&self) -> u8 {
        self.header.p2
    }

    /// Number of data bytes announced by P3
    pub const fn expected_len(&self) -> usize {
        self.header.data_len(self.direction)
    }

    /// Which way the data flowed
    pub const fn direction(&self) -> DataDirection {
        self.direction
    }

    /// Data bytes, empty when the card answered with a status word only
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Final status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// The APDU as submitted to a card backend
    pub fn to_command(&self) -> Command {
        match self.direction {
            DataDirection::Outgoing => self.header.to_command(self.direction, Bytes::new()),
            DataDirection::Incoming => self.header.to_command(self.direction, self.data.clone()),
        }
    }

    /// Header, data and status word, the layout used for captures
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data.len() + 2);
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.data);
        buf.put_slice(&self.status.to_bytes());
        buf.freeze()
    }
}

impl fmt::Display for CommandUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} data bytes] {}", self.header, self.data.len(), self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handset_turns() {
        assert!(Phase::CommandHeader.expects_handset(DataDirection::Outgoing));
        assert!(Phase::Complete.expects_handset(DataDirection::Incoming));
        assert!(Phase::DataTransfer.expects_handset(DataDirection::Incoming));
        assert!(!Phase::DataTransfer.expects_handset(DataDirection::Outgoing));
        assert!(!Phase::StatusWord.expects_handset(DataDirection::Incoming));
        assert!(!Phase::ExpectAtr.expects_handset(DataDirection::Incoming));
    }

    #[test]
    fn test_tag_names() {
        for tag in [Tag::Atr, Tag::Pts, Tag::InstructionEcho, Tag::ResponseData] {
            assert_eq!(tag.as_str().parse::<Tag>().unwrap(), tag);
        }
        assert!("sw".parse::<Tag>().is_err());
        assert_eq!(Unit::Null.tag(), None);
        assert_eq!(Unit::InstructionEcho(0xA4).tag(), Some(Tag::InstructionEcho));
    }

    #[test]
    fn test_command_unit_bytes() {
        let unit = CommandUnit::new(
            TpduHeader::new(0xA0, 0xA4, 0x00, 0x00, 0x02),
            DataDirection::Incoming,
            Bytes::from_static(&[0x3F, 0x00]),
            StatusWord::new(0x9F, 0x17),
        );

        assert_eq!(unit.expected_len(), 2);
        assert_eq!(
            unit.to_bytes().as_ref(),
            &[0xA0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00, 0x9F, 0x17]
        );
        assert_eq!(
            unit.to_command().to_bytes().as_ref(),
            &[0xA0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]
        );
        assert_eq!(unit.to_string(), "A0 A4 00 00 02 [2 data bytes] 9F 17");
    }
}
