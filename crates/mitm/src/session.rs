//! Per-pairing protocol state

use bytes::Bytes;
use simrelay_apdu_core::{Command, OutgoingInstructions, Response};

use crate::framer::Framer;
use crate::unit::Phase;

/// Counters kept for the lifetime of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes received from the handset
    pub handset_bytes: u64,
    /// Units completed, in both directions
    pub units: u64,
    /// Commands that reached their status word
    pub commands: u64,
    /// Protocol violations seen
    pub violations: u64,
}

/// State of one handset to card pairing
///
/// Created on handset reset and dropped when the next reset arrives or the
/// relay shuts down. The card backend is owned by the relay, not the session.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    pub(crate) framer: Framer,
    /// Card answer held back until the handset asks for it with GET RESPONSE
    stash: Option<Response>,
    pub(crate) stats: SessionStats,
}

impl Session {
    /// Create a session waiting for a reset
    pub fn new(id: u64, outgoing: OutgoingInstructions) -> Self {
        Self {
            id,
            framer: Framer::new(outgoing),
            stash: None,
            stats: SessionStats::default(),
        }
    }

    /// Session number, increasing with every handset reset
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current protocol phase
    pub const fn phase(&self) -> Phase {
        self.framer.phase()
    }

    /// The framer driving this session
    pub const fn framer(&self) -> &Framer {
        &self.framer
    }

    /// Counters for this session
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Whether the handset, rather than the card, is expected to send next
    pub const fn awaits_handset(&self) -> bool {
        self.framer.expects_handset()
    }

    /// Keep a card answer for a later GET RESPONSE
    pub fn stash_response(&mut self, response: Response) {
        self.stash = Some(response);
    }

    /// Take the stashed card answer
    pub const fn take_stash(&mut self) -> Option<Response> {
        self.stash.take()
    }

    /// The stashed card answer, if any
    pub const fn stash(&self) -> Option<&Response> {
        self.stash.as_ref()
    }

    /// The APDU for the command in progress, with `data` replacing the data
    /// collected from the handset
    pub fn pending_command(&self, data: Option<Bytes>) -> Option<Command> {
        let header = self.framer.header()?;
        let data = data.unwrap_or_else(|| Bytes::copy_from_slice(self.framer.data()));
        Some(header.to_command(self.framer.direction(), data))
    }

    pub(crate) fn clear_stash(&mut self) {
        self.stash = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::FramerEvent;

    #[test]
    fn test_pending_command() {
        let mut session = Session::new(1, OutgoingInstructions::default());
        assert_eq!(session.phase(), Phase::AwaitingReset);
        assert!(session.pending_command(None).is_none());

        session.framer.signal_reset();
        for byte in [0x3B, 0x00, 0xA0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00] {
            assert!(!matches!(session.framer.consume(byte), FramerEvent::InvalidSequence(_)));
        }

        let command = session.pending_command(None).unwrap();
        assert_eq!(command.to_bytes().as_ref(), &[0xA0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]);

        let substituted = session
            .pending_command(Some(Bytes::from_static(&[0x7F, 0x20])))
            .unwrap();
        assert_eq!(substituted.data.as_deref(), Some(&[0x7F, 0x20][..]));
    }

    #[test]
    fn test_stash() {
        let mut session = Session::new(7, OutgoingInstructions::default());
        assert_eq!(session.id(), 7);
        session.stash_response(Response::success(Bytes::from_static(&[0x01])));
        assert!(session.stash().is_some());
        assert!(session.take_stash().is_some());
        assert!(session.take_stash().is_none());
    }
}
