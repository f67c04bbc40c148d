//! Answer To Reset structure
//!
//! An ATR carries no length field: its end follows from the format byte T0, the
//! chain of TDi interface bytes and the number of historical bytes. [`expected_len`]
//! works on a growing prefix so a byte-at-a-time reader knows when the ATR is over.

use std::fmt;

use bytes::Bytes;

use crate::{Error, fidi};

/// Initial character for the direct convention
pub const TS_DIRECT: u8 = 0x3B;

/// Initial character for the inverse convention
pub const TS_INVERSE: u8 = 0x3F;

/// Maximum length of an ATR, TS included
pub const MAX_ATR_LEN: usize = 33;

/// Electrical convention announced by TS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// TS = 3B
    Direct,
    /// TS = 3F
    Inverse,
}

/// Length of the ATR starting with `prefix`, once the prefix is long enough to tell
///
/// Returns `Ok(None)` while more bytes are needed to determine the length.
pub fn expected_len(prefix: &[u8]) -> Result<Option<usize>, Error> {
    let Some(&ts) = prefix.first() else {
        return Ok(None);
    };
    if ts != TS_DIRECT && ts != TS_INVERSE {
        return Err(Error::InvalidAtr("initial character is neither 3B nor 3F"));
    }
    let Some(&t0) = prefix.get(1) else {
        return Ok(None);
    };

    let historical = usize::from(t0 & 0x0F);
    let mut indicator = t0 >> 4;
    let mut pos = 2;
    let mut tck = false;

    loop {
        // TAi, TBi and TCi precede TDi
        pos += (indicator & 0x07).count_ones() as usize;
        if indicator & 0x08 == 0 {
            break;
        }
        let Some(&td) = prefix.get(pos) else {
            return Ok(None);
        };
        pos += 1;
        if td & 0x0F != 0 {
            tck = true;
        }
        indicator = td >> 4;
        if pos > MAX_ATR_LEN {
            return Err(Error::InvalidAtr("interface bytes exceed maximum ATR length"));
        }
    }

    let len = pos + historical + usize::from(tck);
    if len > MAX_ATR_LEN {
        return Err(Error::InvalidAtr("longer than 33 bytes"));
    }
    Ok(Some(len))
}

/// A parsed Answer To Reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atr {
    raw: Bytes,
    convention: Convention,
    ta1: Option<u8>,
    protocols: Vec<u8>,
    historical: Bytes,
}

impl Atr {
    /// Parse a complete ATR
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let len = expected_len(raw)?.ok_or(Error::InvalidAtr("truncated"))?;
        if len != raw.len() {
            return Err(Error::InvalidAtr("length does not match structure"));
        }

        let convention = if raw[0] == TS_DIRECT {
            Convention::Direct
        } else {
            Convention::Inverse
        };

        let t0 = raw[1];
        let mut indicator = t0 >> 4;
        let mut pos = 2;
        let mut ta1 = None;
        let mut protocols = Vec::new();
        let mut first = true;

        loop {
            if indicator & 0x01 != 0 {
                if first {
                    ta1 = Some(raw[pos]);
                }
                pos += 1;
            }
            pos += ((indicator >> 1) & 0x03).count_ones() as usize;
            if indicator & 0x08 == 0 {
                break;
            }
            let td = raw[pos];
            pos += 1;
            let protocol = td & 0x0F;
            if !protocols.contains(&protocol) {
                protocols.push(protocol);
            }
            indicator = td >> 4;
            first = false;
        }

        if protocols.is_empty() {
            // No TD1 means T=0 only
            protocols.push(0);
        }

        let historical_len = usize::from(t0 & 0x0F);
        let historical = Bytes::copy_from_slice(&raw[pos..pos + historical_len]);

        Ok(Self {
            raw: Bytes::copy_from_slice(raw),
            convention,
            ta1,
            protocols,
            historical,
        })
    }

    /// The ATR bytes as received
    pub const fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Electrical convention
    pub const fn convention(&self) -> Convention {
        self.convention
    }

    /// TA1 (Fi/Di indices), if present
    pub const fn ta1(&self) -> Option<u8> {
        self.ta1
    }

    /// Protocols offered, in announcement order
    pub fn protocols(&self) -> &[u8] {
        &self.protocols
    }

    /// Historical bytes
    pub const fn historical(&self) -> &Bytes {
        &self.historical
    }

    /// F/D ratio announced by TA1, or the default ratio without TA1
    pub fn fd_ratio(&self) -> Option<u16> {
        self.ta1
            .map_or(Some(fidi::DEFAULT_FD_RATIO), fidi::fd_ratio_from_byte)
    }
}

impl fmt::Display for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.raw))
    }
}
