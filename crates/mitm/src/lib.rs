//! Man-in-the-middle relay between a handset and its SIM
//!
//! The relay impersonates the SIM toward the handset and the handset toward a
//! real or emulated card. Every byte the handset sends is framed against the
//! T=0 conversation state, reconstructed into protocol units and passed through
//! an interception policy before it reaches the other side.
//!
//! The pieces, leaves first:
//!
//! - [`Framer`] classifies single bytes against the current [`Phase`]
//! - [`Reconstructor`] drives the framer for a [`Session`] and synthesises the
//!   card side of the conversation from backend responses
//! - [`InterceptPipeline`] consults an [`InterceptPolicy`] once per tagged unit
//! - [`SessionRelay`] owns the blocking I/O and the session lifecycle
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod emulator;
pub mod error;
pub mod framer;
pub mod handset;
pub mod intercept;
pub mod reconstructor;
pub mod relay;
pub mod session;
pub mod sink;
pub mod unit;

pub use emulator::EmulatedCard;
pub use error::Error;
pub use framer::{Framer, FramerEvent, PTS_LITERAL};
pub use handset::{HandsetTransport, RESET_INDICATION};
#[cfg(feature = "usb")]
pub use handset::usb::{UsbHandset, UsbHandsetConfig};
pub use intercept::{
    InterceptLog, InterceptPipeline, InterceptPolicy, InterceptRecord, PassThrough, PatternRule,
    PatternTable,
};
pub use reconstructor::Reconstructor;
pub use relay::{RelayConfig, SessionRelay};
pub use session::{Session, SessionStats};
pub use sink::{
    BufferedSink, Capture, CaptureKind, DiagnosticSink, GsmtapConfig, GsmtapSink, MemorySink,
    NullSink,
};
pub use unit::{CommandUnit, Phase, Tag, Unit};
