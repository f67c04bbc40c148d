//! PC/SC card backend for the SIM relay
//!
//! This crate provides an implementation of the `CardTransport` trait from
//! `simrelay-apdu-core` using the PC/SC API, so that a real SIM sitting in a
//! reader can answer the commands a handset sends through the relay.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use simrelay_apdu_core::CardTransport;
//! use simrelay_apdu_transport_pcsc::{ConnectStrategy, PcscConfig, PcscDeviceManager};
//!
//! let manager = PcscDeviceManager::new()?;
//! let mut transport = manager.connect_strategy(ConnectStrategy::AnyCard, PcscConfig::default())?;
//!
//! println!("ATR: {:02X?}", transport.atr()?);
//!
//! // SELECT MF
//! let response = transport.transmit_raw(&[0xA0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00])?;
//! println!("Response: {:02X?}", response);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod reader;
mod transport;
mod util;

// Public exports
pub use config::{ConnectStrategy, PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;
pub use transport::PcscTransport;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};
