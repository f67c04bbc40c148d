//! Short APDU commands as submitted to a card backend
//!
//! The relay rebuilds a [`Command`] from each T=0 exchange: `P3` becomes `Lc`
//! for commands carrying data to the card and `Le` for commands reading data
//! back. Card backends expect the ISO/IEC 7816-4 case 1 to 3 encodings.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length; `0` asks for 256 bytes
    pub le: Option<u8>,
}

impl Command {
    /// Create a case 1 command, header only
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Length of the encoded command
    pub fn encoded_len(&self) -> usize {
        4 + self.data.as_ref().map_or(0, |data| 1 + data.len()) + usize::from(self.le.is_some())
    }

    /// Encode as `CLA INS P1 P2 [Lc data] [Le]`
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());
        buffer.put_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }
        if let Some(le) = self.le {
            buffer.put_u8(le);
        }
        buffer.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X} {:02X}",
            self.cla, self.ins, self.p1, self.p2
        )?;
        if let Some(data) = &self.data {
            write!(f, " Lc={} {}", data.len(), hex::encode_upper(data))?;
        }
        if let Some(le) = self.le {
            write!(f, " Le={le}")?;
        }
        Ok(())
    }
}
