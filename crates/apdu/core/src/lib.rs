//! ISO 7816 primitives for relaying APDUs between a handset and a card
//!
//! This crate provides the foundational types shared by the relay and the card
//! backends:
//!
//! - Creating and parsing APDU commands and responses
//! - T=0 transport framing: TPDU headers, data direction and procedure bytes
//! - Answer To Reset structure and the ISO 7816-3 Fi/Di tables
//! - The [`CardTransport`] capability implemented by every card backend
//! - Error handling and status word interpretation
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod atr;
pub mod command;
pub mod error;
pub mod fidi;
pub mod response;
pub mod tpdu;
pub mod transport;

pub use atr::{Atr, Convention};
pub use command::Command;
pub use error::{Error, ResultExt};
pub use response::Response;
pub use response::status::StatusWord;
pub use tpdu::{DataDirection, OutgoingInstructions, Procedure, TpduHeader};
pub use transport::CardTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    // Core types
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    // Command related
    pub use crate::Command;
    pub use crate::tpdu::{DataDirection, OutgoingInstructions, Procedure, TpduHeader};

    // Response related
    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    // Answer To Reset
    pub use crate::atr::{Atr, Convention};

    // Transport layer
    pub use crate::CardTransport;
}
