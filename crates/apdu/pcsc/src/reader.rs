//! Readers discovered through PC/SC

use std::fmt;

use pcsc::{ReaderState, State};

/// A card reader and the card sitting in it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcscReader {
    name: String,
    atr: Option<Vec<u8>>,
}

impl PcscReader {
    /// Describe a reader
    pub const fn new(name: String, atr: Option<Vec<u8>>) -> Self {
        Self { name, atr }
    }

    /// Name the PC/SC daemon reports for this reader
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a card is inserted
    pub const fn has_card(&self) -> bool {
        self.atr.is_some()
    }

    /// ATR of the inserted card
    pub fn atr(&self) -> Option<&[u8]> {
        self.atr.as_deref()
    }

    pub(crate) fn from_reader_state(state: &ReaderState) -> Self {
        let flags = state.event_state();
        let present = flags.contains(State::PRESENT) && !flags.contains(State::EMPTY);

        Self {
            name: state.name().to_string_lossy().into_owned(),
            atr: present.then(|| state.atr().to_vec()),
        }
    }
}

impl fmt::Display for PcscReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.atr {
            Some(atr) => {
                write!(f, "{} [ATR ", self.name)?;
                for byte in atr {
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "]")
            }
            None => write!(f, "{} [no card]", self.name),
        }
    }
}
