//! Handset-facing transport

#[cfg(feature = "usb")]
pub mod usb;

use std::{fmt, time::Duration};

use bytes::Bytes;

use crate::Error;

/// Interrupt byte by which the handset requests a card reset
pub const RESET_INDICATION: u8 = b'R';

/// Link to the handset: an interrupt channel for reset indications and a
/// bulk channel for protocol bytes in both directions
///
/// A poll that sees no data within `timeout` returns `Ok(None)`. Writes are
/// fire and forget.
pub trait HandsetTransport: fmt::Debug + Send {
    /// Poll the interrupt channel
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error>;

    /// Poll the data channel
    fn poll_data(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error>;

    /// Send bytes to the handset
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

impl<T: HandsetTransport + ?Sized> HandsetTransport for Box<T> {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        (**self).poll_interrupt(timeout)
    }

    fn poll_data(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        (**self).poll_data(timeout)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        (**self).write(bytes)
    }
}
