//! Software card answering from a table of canned responses

use std::collections::HashMap;

use bytes::Bytes;
use simrelay_apdu_core::{CardTransport, Error, StatusWord, response::status::common};
use tracing::debug;

/// Card backend that answers known commands with fixed responses
///
/// Unknown commands get the default status word, `6D 00` unless configured.
/// Every command received is recorded.
#[derive(Debug, Clone)]
pub struct EmulatedCard {
    atr: Bytes,
    responses: HashMap<Bytes, Bytes>,
    default_status: StatusWord,
    received: Vec<Bytes>,
    connected: bool,
}

impl EmulatedCard {
    /// ATR of a USIM, offering T=0 with Fi/Di 9/6
    pub const DEFAULT_ATR: &'static [u8] = &[
        0x3B, 0x9F, 0x96, 0x80, 0x1F, 0xC7, 0x80, 0x31, 0xA0, 0x73, 0xBE, 0x21, 0x13, 0x67, 0x43,
        0x20, 0x07, 0x18, 0x00, 0x00, 0x01, 0xA5,
    ];

    /// Create a card with the given ATR and no canned responses
    pub fn new(atr: impl Into<Bytes>) -> Self {
        Self {
            atr: atr.into(),
            responses: HashMap::new(),
            default_status: common::INVALID_INSTRUCTION,
            received: Vec::new(),
            connected: true,
        }
    }

    /// Answer `command` with `response` (data followed by the status word)
    pub fn with_response(mut self, command: impl Into<Bytes>, response: impl Into<Bytes>) -> Self {
        self.responses.insert(command.into(), response.into());
        self
    }

    /// Status word for commands without a canned response
    pub const fn with_default_status(mut self, status: StatusWord) -> Self {
        self.default_status = status;
        self
    }

    /// Commands received so far, in order
    pub fn received(&self) -> &[Bytes] {
        &self.received
    }
}

impl Default for EmulatedCard {
    fn default() -> Self {
        Self::new(Bytes::from_static(Self::DEFAULT_ATR))
    }
}

impl CardTransport for EmulatedCard {
    fn atr(&mut self) -> Result<Bytes, Error> {
        if !self.connected {
            return Err(Error::NoCard);
        }
        Ok(self.atr.clone())
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        if !self.connected {
            return Err(Error::ConnectionError);
        }
        let command = Bytes::copy_from_slice(command);
        let response = self
            .responses
            .get(&command)
            .cloned()
            .unwrap_or_else(|| Bytes::copy_from_slice(&self.default_status.to_bytes()));
        debug!(
            command = %hex::encode(&command),
            response = %hex::encode(&response),
            "Emulated card answered"
        );
        self.received.push(command);
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.connected = false;
        Ok(())
    }
}
