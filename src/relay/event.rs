//! Readiness events as seen by the engine's dispatcher.

use mio::event::Event;
use mio::Token;

/// Token reserved for the listening socket
pub const LISTENER: Token = Token(0);

/// What a single readiness notification asks the engine to do.
///
/// Exactly one variant is produced per notification. Readable wins over
/// writable, and both win over error/hangup, so data still queued on a
/// socket that is also hanging up is drained before the pair is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    Accept,
    Readable(Token),
    Writable(Token),
    Hangup(Token),
}

impl RelayEvent {
    /// Classify a `mio` event. Returns `None` for notifications that carry
    /// nothing actionable.
    pub fn classify(event: &Event) -> Option<Self> {
        Self::from_readiness(
            event.token(),
            event.is_readable(),
            event.is_writable(),
            event.is_error() || event.is_read_closed() || event.is_write_closed(),
        )
    }

    fn from_readiness(token: Token, readable: bool, writable: bool, hangup: bool) -> Option<Self> {
        if token == LISTENER {
            return Some(RelayEvent::Accept);
        }

        if readable {
            Some(RelayEvent::Readable(token))
        } else if writable {
            Some(RelayEvent::Writable(token))
        } else if hangup {
            Some(RelayEvent::Hangup(token))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_always_accepts() {
        assert_eq!(
            RelayEvent::from_readiness(LISTENER, true, false, true),
            Some(RelayEvent::Accept)
        );
        assert_eq!(
            RelayEvent::from_readiness(LISTENER, false, false, false),
            Some(RelayEvent::Accept)
        );
    }

    #[test]
    fn test_read_drains_before_hangup() {
        let token = Token(7);
        assert_eq!(
            RelayEvent::from_readiness(token, true, true, true),
            Some(RelayEvent::Readable(token))
        );
        assert_eq!(
            RelayEvent::from_readiness(token, false, true, true),
            Some(RelayEvent::Writable(token))
        );
        assert_eq!(
            RelayEvent::from_readiness(token, false, false, true),
            Some(RelayEvent::Hangup(token))
        );
        assert_eq!(RelayEvent::from_readiness(token, false, false, false), None);
    }
}
