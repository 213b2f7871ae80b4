
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {

    // Opening the TCP connection.
    Connecting,

    // Handshake sent, waiting for the peer's.
    Handshaking,

    // Handshake accepted, peer is not serving our requests.
    Choked,

    // Peer unchoked us, blocks are being requested.
    Requesting,

    // Connection is being torn down, terminal.
    Closing,

}

// Events that drive a connection through its states.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnEvent {
    Connected,
    Handshake,
    Unchoke,
    Choke,
    // Download finished, or a shutdown was requested.
    Done,
    // IO, protocol or timeout failure.
    Failed,
}

impl ConnState {

    // Transition table, None for an event that is not valid in the current state.
    pub fn next(self, event: ConnEvent) -> Option<ConnState> {
        use ConnEvent::*;
        use ConnState::*;
        let next = match (self, event) {
            (Closing, _) => Closing,
            (_, Done | Failed) => Closing,
            (Connecting, Connected) => Handshaking,
            (Handshaking, Handshake) => Choked,
            (Choked | Requesting, Unchoke) => Requesting,
            // A choke ends the session, there is no waiting for a later unchoke.
            (Choked | Requesting, Choke) => Closing,
            _ => return None,
        };
        Some(next)
    }

    pub fn is_closing(&self) -> bool {
        *self == ConnState::Closing
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnState::Connecting => "connecting",
            ConnState::Handshaking => "handshaking",
            ConnState::Choked => "choked",
            ConnState::Requesting => "requesting",
            ConnState::Closing => "closing",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnEvent::*;
    use ConnState::*;

    #[test]
    fn test_happy_path() {
        let mut state = Connecting;
        for (event, expected) in [
            (Connected, Handshaking),
            (Handshake, Choked),
            (Unchoke, Requesting),
            (Unchoke, Requesting),
            (Done, Closing),
        ] {
            state = state.next(event).unwrap();
            assert_eq!(state, expected);
        }
        assert!(state.is_closing());
    }

    #[test]
    fn test_choke_closes() {
        assert_eq!(Choked.next(Choke), Some(Closing));
        assert_eq!(Requesting.next(Choke), Some(Closing));
    }

    #[test]
    fn test_failure_from_any_state() {
        for state in [Connecting, Handshaking, Choked, Requesting, Closing] {
            assert_eq!(state.next(Failed), Some(Closing));
            assert_eq!(state.next(Done), Some(Closing));
        }
    }

    #[test]
    fn test_closing_is_terminal() {
        for event in [Connected, Handshake, Unchoke, Choke] {
            assert_eq!(Closing.next(event), Some(Closing));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(Connecting.next(Handshake), None);
        assert_eq!(Connecting.next(Unchoke), None);
        assert_eq!(Handshaking.next(Unchoke), None);
        assert_eq!(Handshaking.next(Choke), None);
        assert_eq!(Choked.next(Handshake), None);
        assert_eq!(Requesting.next(Connected), None);
    }
}
