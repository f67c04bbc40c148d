//! GSMTAP over UDP, readable by Wireshark
//!
//! Each capture becomes one datagram: a 16-byte GSMTAP v2 header with type
//! SIM followed by the captured bytes.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::{Capture, CaptureKind, DiagnosticSink};
use crate::Error;

/// Well-known GSMTAP UDP port
pub const GSMTAP_PORT: u16 = 4729;

const GSMTAP_VERSION: u8 = 0x02;
/// Header length in 32-bit words
const GSMTAP_HDR_WORDS: u8 = 4;
const GSMTAP_TYPE_SIM: u8 = 0x04;
const GSMTAP_HDR_LEN: usize = 16;

const GSMTAP_SIM_APDU: u8 = 0x00;
const GSMTAP_SIM_ATR: u8 = 0x01;
const GSMTAP_SIM_PPS_REQ: u8 = 0x02;

/// Where GSMTAP datagrams go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GsmtapConfig {
    /// Destination of the datagrams
    pub destination: SocketAddr,
    /// Local address to send from
    pub bind: SocketAddr,
}

impl Default for GsmtapConfig {
    fn default() -> Self {
        Self {
            destination: SocketAddr::from((Ipv4Addr::LOCALHOST, GSMTAP_PORT)),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

impl GsmtapConfig {
    /// Set the destination
    pub const fn with_destination(mut self, destination: SocketAddr) -> Self {
        self.destination = destination;
        self
    }

    /// Set the local address
    pub const fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }
}

/// Sends captures as GSMTAP datagrams
#[derive(Debug)]
pub struct GsmtapSink {
    socket: UdpSocket,
}

impl GsmtapSink {
    /// Bind a socket and connect it to the destination
    pub fn new(config: GsmtapConfig) -> Result<Self, Error> {
        let socket = UdpSocket::bind(config.bind).map_err(Error::sink)?;
        socket.connect(config.destination).map_err(Error::sink)?;
        debug!(destination = %config.destination, "GSMTAP sink ready");
        Ok(Self { socket })
    }
}

impl DiagnosticSink for GsmtapSink {
    fn capture(&mut self, capture: Capture) -> Result<(), Error> {
        self.socket
            .send(&encode(&capture))
            .map(|_| ())
            .map_err(Error::sink)
    }
}

/// Build the GSMTAP datagram for a capture
pub fn encode(capture: &Capture) -> Bytes {
    let sub_type = match capture.kind {
        CaptureKind::Apdu => GSMTAP_SIM_APDU,
        CaptureKind::Atr => GSMTAP_SIM_ATR,
        CaptureKind::PpsRequest => GSMTAP_SIM_PPS_REQ,
    };

    let mut buf = BytesMut::with_capacity(GSMTAP_HDR_LEN + capture.bytes.len());
    buf.put_u8(GSMTAP_VERSION);
    buf.put_u8(GSMTAP_HDR_WORDS);
    buf.put_u8(GSMTAP_TYPE_SIM);
    buf.put_u8(0); // timeslot
    buf.put_u16(0); // arfcn
    buf.put_i8(0); // signal dBm
    buf.put_i8(0); // SNR
    buf.put_u32(0); // frame number
    buf.put_u8(sub_type);
    buf.put_u8(0); // antenna
    buf.put_u8(0); // sub-slot
    buf.put_u8(0); // reserved
    buf.put_slice(&capture.bytes);
    buf.freeze()
}
