use tokio::sync::mpsc;

mod frame;
mod handshake;
mod message;
mod session;
pub mod state;
#[cfg(test)]
pub(crate) mod seeder;

pub use frame::{split_frames, Frame, FrameCodec, Split};
pub use handshake::{is_handshake, Handshake};
pub use message::Message;
pub use session::PeerSession;

type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message payload for message id {0}")]
    InvalidMessage(u8),

    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(usize),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("connection timeout")]
    Timeout,
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer.
#[derive(Debug)]
pub enum PeerCommand {

    // End the peer session safely.
    Shutdown,

}

#[derive(Debug)]
pub struct PeerHandle {

    // Sends commands to the session.
    pub peer_tx: PeerTx,

    // Handle to the peer session.
    pub session_handle: tokio::task::JoinHandle<()>,

}

impl PeerHandle {

    // Connects to the peer and runs the session on a new task.
    pub fn start_session(session: PeerSession, peer_tx: PeerTx) -> PeerHandle {
        let session_handle = tokio::spawn(session.start_session());
        PeerHandle {
            peer_tx,
            session_handle,
        }
    }
}
