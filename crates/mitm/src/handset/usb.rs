//! SIM tracer board attached over USB
//!
//! The board exposes the handset's SIM lines as three endpoints: an interrupt
//! endpoint carrying reset indications, a bulk IN endpoint with bytes sent by
//! the handset and a bulk OUT endpoint for bytes to send back.

use std::time::Duration;

use bytes::Bytes;
use rusb::{Context, DeviceHandle, UsbContext};
use tracing::{debug, trace};

use super::HandsetTransport;
use crate::Error;

/// Size of one USB transfer
pub const TRANSFER_SIZE: usize = 64;

/// USB identifiers and endpoints of the tracer board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbHandsetConfig {
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Interface to claim
    pub interface: u8,
    /// Interrupt IN endpoint carrying reset indications
    pub interrupt_endpoint: u8,
    /// Bulk IN endpoint with bytes from the handset
    pub read_endpoint: u8,
    /// Bulk OUT endpoint for bytes to the handset
    pub write_endpoint: u8,
    /// Timeout for writes
    pub write_timeout: Duration,
}

impl Default for UsbHandsetConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x1d50,
            product_id: 0x60e3,
            interface: 0,
            interrupt_endpoint: 0x83,
            read_endpoint: 0x82,
            write_endpoint: 0x01,
            write_timeout: Duration::from_millis(100),
        }
    }
}

impl UsbHandsetConfig {
    /// Set vendor and product id
    pub const fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Set the interface to claim
    pub const fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// Set the interrupt, bulk IN and bulk OUT endpoints
    pub const fn with_endpoints(mut self, interrupt: u8, read: u8, write: u8) -> Self {
        self.interrupt_endpoint = interrupt;
        self.read_endpoint = read;
        self.write_endpoint = write;
        self
    }

    /// Set the write timeout
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Handset link through a USB SIM tracer
pub struct UsbHandset {
    handle: DeviceHandle<Context>,
    config: UsbHandsetConfig,
}

impl std::fmt::Debug for UsbHandset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbHandset")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UsbHandset {
    /// Open the first device matching the configured ids and claim its interface
    pub fn open(config: UsbHandsetConfig) -> Result<Self, Error> {
        let context = Context::new().map_err(usb_failure)?;
        let handle = context
            .open_device_with_vid_pid(config.vendor_id, config.product_id)
            .ok_or_else(|| {
                Error::TransportFailure(format!(
                    "no USB device {:04x}:{:04x}",
                    config.vendor_id, config.product_id
                ))
            })?;

        // Not supported on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(error = %e, "Kernel driver auto-detach unavailable");
        }
        handle.claim_interface(config.interface).map_err(usb_failure)?;

        debug!(
            vendor_id = format_args!("{:04x}", config.vendor_id),
            product_id = format_args!("{:04x}", config.product_id),
            interface = config.interface,
            "Opened USB handset link"
        );
        Ok(Self { handle, config })
    }

    fn read(
        &self,
        endpoint: u8,
        interrupt: bool,
        timeout: Duration,
    ) -> Result<Option<Bytes>, Error> {
        let mut buf = [0u8; TRANSFER_SIZE];
        let result = if interrupt {
            self.handle.read_interrupt(endpoint, &mut buf, timeout)
        } else {
            self.handle.read_bulk(endpoint, &mut buf, timeout)
        };

        match result {
            Ok(0) | Err(rusb::Error::Timeout) => Ok(None),
            Ok(len) => {
                trace!(
                    endpoint = format_args!("{endpoint:#04x}"),
                    data = %hex::encode(&buf[..len]),
                    "USB read"
                );
                Ok(Some(Bytes::copy_from_slice(&buf[..len])))
            }
            Err(e) => Err(usb_failure(e)),
        }
    }
}

impl HandsetTransport for UsbHandset {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        self.read(self.config.interrupt_endpoint, true, timeout)
    }

    fn poll_data(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        self.read(self.config.read_endpoint, false, timeout)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for chunk in bytes.chunks(TRANSFER_SIZE) {
            match self
                .handle
                .write_bulk(self.config.write_endpoint, chunk, self.config.write_timeout)
            {
                Ok(_) => {}
                Err(rusb::Error::Timeout) => return Err(Error::TransportTimeout),
                Err(e) => return Err(usb_failure(e)),
            }
        }
        trace!(data = %hex::encode(bytes), "USB write");
        Ok(())
    }
}

impl Drop for UsbHandset {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.config.interface) {
            debug!(error = %e, "Releasing USB interface failed");
        }
    }
}

fn usb_failure(error: rusb::Error) -> Error {
    Error::TransportFailure(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UsbHandsetConfig::default();
        assert_eq!((config.vendor_id, config.product_id), (0x1d50, 0x60e3));
        assert_eq!(
            (config.interrupt_endpoint, config.read_endpoint, config.write_endpoint),
            (0x83, 0x82, 0x01)
        );

        let config = config.with_ids(0x1d50, 0x60e4).with_endpoints(0x84, 0x85, 0x02);
        assert_eq!(config.product_id, 0x60e4);
        assert_eq!(config.write_endpoint, 0x02);
    }

    #[test]
    fn test_open_missing_device() {
        // No device answers to this id pair
        let config = UsbHandsetConfig::default().with_ids(0xffff, 0xfffe);
        match UsbHandset::open(config) {
            Err(Error::TransportFailure(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("unexpected device"),
        }
    }
}
