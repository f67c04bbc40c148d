//! Transport traits for card backends
//!
//! A card backend answers the APDUs reconstructed by the relay. It may be a real
//! smartcard behind a reader or a software emulation; both expose the same
//! synchronous request/response capability.

use bytes::Bytes;
use std::fmt;
use tracing::{debug, trace};

use crate::Error;

/// Trait for card backend connections
///
/// At most one request is outstanding at a time. Implementors provide
/// [`do_transmit_raw`](Self::do_transmit_raw); callers use [`transmit_raw`](Self::transmit_raw),
/// which adds tracing around the exchange.
pub trait CardTransport: fmt::Debug + Send {
    /// The Answer To Reset of the card currently connected
    fn atr(&mut self) -> Result<Bytes, Error>;

    /// Send raw APDU bytes to card and return response bytes (data followed by SW1 SW2)
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = %e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;

    /// Check if the transport is connected to a card
    fn is_connected(&self) -> bool;

    /// Reset the card
    fn reset(&mut self) -> Result<(), Error>;

    /// Release the connection; the transport is unusable afterwards
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn atr(&mut self) -> Result<Bytes, Error> {
        (**self).atr()
    }

    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<(), Error> {
        (**self).reset()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

#[cfg(test)]
pub(crate) use mock::MockTransport;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_transport_delegates() {
        let mut transport: Box<dyn CardTransport> =
            Box::new(MockTransport::with_response(Bytes::from_static(&[0x90, 0x00])));

        let response = transport.transmit_raw(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!(response.as_ref(), &[0x90, 0x00]);
        assert_eq!(transport.atr().unwrap().as_ref(), &[0x3B, 0x00]);

        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.transmit_raw(&[0x00]).unwrap_err(),
            Error::ConnectionError
        );
    }
}
