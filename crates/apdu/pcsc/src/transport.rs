//! PC/SC transport implementation

use bytes::Bytes;
use pcsc::{Card, Context, Disposition};
use simrelay_apdu_core::{CardTransport, Error};
use std::{ffi::CString, fmt};
use tracing::{debug, warn};

use crate::{config::PcscConfig, error::PcscError};

/// Largest T=0 response: 256 data bytes plus the status word
const MAX_RESPONSE_LEN: usize = 258;

/// Card backend talking to a SIM in a PC/SC reader
pub struct PcscTransport {
    context: Context,
    card: Option<Card>,
    reader_name: String,
    config: PcscConfig,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Create a new PC/SC transport for the specified reader
    ///
    /// A missing card is not an error here; the connection is retried on first use.
    pub(crate) fn new(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut transport = Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            config,
        };

        if let Err(e) = transport.connect_card() {
            debug!(reader = %transport.reader_name, error = %e, "Card not connected yet");
        }

        Ok(transport)
    }

    fn connect_card(&mut self) -> Result<&mut Card, PcscError> {
        if self.card.is_none() {
            let reader = CString::new(self.reader_name.as_str())
                .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

            let card = match self.context.connect(
                &reader,
                self.config.share_mode.into(),
                self.config.protocols,
            ) {
                Ok(card) => card,
                Err(pcsc::Error::NoSmartcard) => {
                    return Err(PcscError::NoCard(self.reader_name.clone()));
                }
                Err(pcsc::Error::UnknownReader) => {
                    return Err(PcscError::ReaderNotFound(self.reader_name.clone()));
                }
                Err(e) => return Err(e.into()),
            };
            debug!(reader = %self.reader_name, "Connected to card");
            self.card = Some(card);
        }

        self.card
            .as_mut()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn transmit_command(&mut self, command: &[u8], retry: bool) -> Result<Bytes, PcscError> {
        let card = self.connect_card()?;
        let mut buffer = [0u8; MAX_RESPONSE_LEN];

        match card.transmit(command, &mut buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(e @ (pcsc::Error::ResetCard | pcsc::Error::RemovedCard)) => {
                self.card = None;
                if retry && self.config.auto_reconnect && e == pcsc::Error::ResetCard {
                    warn!(reader = %self.reader_name, "Card was reset, reconnecting");
                    return self.transmit_command(command, false);
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl CardTransport for PcscTransport {
    fn atr(&mut self) -> Result<Bytes, Error> {
        let card = self.connect_card()?;
        let atr = card
            .get_attribute_owned(pcsc::Attribute::AtrString)
            .map_err(PcscError::from)?;
        Ok(Bytes::from(atr))
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        Ok(self.transmit_command(command, true)?)
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn reset(&mut self) -> Result<(), Error> {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::ResetCard) {
                debug!(error = %e, "Disconnect with reset failed");
            }
        }

        self.connect_card()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| PcscError::from(e))?;
            debug!(reader = %self.reader_name, "Disconnected from card");
        }
        Ok(())
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
