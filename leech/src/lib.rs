use tokio::sync::mpsc;

mod block;
mod config;
mod de;
mod disk;
mod info;
mod metainfo;
mod p2p;
mod picker;
mod torrent;
mod tracker;

// Most commonly used block size - 16KB.
const BLOCK_SIZE: usize = 0x4000;

pub type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// 20 byte SHA1 info hash, also used for peer ids.
pub type ID = [u8; 20];

// Messages the users of the client expect to recieve.
#[derive(Debug)]
pub enum UserCommand {

    // Sent as blocks arrive, counts are in blocks.
    Progress {
        received: u64,
        total: u64,
    },

    // Sent once every block has been written.
    TorrentComplete,

    // Sent when the download stops early, the error itself is returned by `Handle::join`.
    TorrentError(String),

}

type UserTx = mpsc::UnboundedSender<UserCommand>;
pub type UserRx = mpsc::UnboundedReceiver<UserCommand>;

// Re-exports
pub use config::{generate_client_id, Config};
pub use info::TorrentInfo;
pub use metainfo::{MetaInfo, MetaInfoError};
pub use torrent::TorrentError;
pub use tracker::{
    announce, build_announce_request, build_connect_request, AnnounceParams, AnnounceResponse,
    ConnectResponse, Response, RetryPolicy, TrackerError, TrackerState, Transport, UdpTracker,
};
pub use block::{Block, BlockRequest};
pub use p2p::{is_handshake, split_frames, Frame, FrameCodec, Handshake, Message, PeerError, Split};
pub use picker::{BlockQueue, BlockState, PieceSet};

use torrent::{Torrent, TorrentCommand, TorrentTx};

// Starts downloading the torrent into the configured directory.
pub fn start_download(metainfo: MetaInfo, config: Config) -> (Handle, UserRx) {
    let (user_tx, user_rx) = mpsc::unbounded_channel();
    let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();

    let tx = torrent_tx.clone();
    let torrent_handle = tokio::spawn(async move {
        let res = match Torrent::new(&metainfo, config, tx, torrent_rx, user_tx.clone()) {
            Ok(mut torrent) => torrent.run().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &res {
            tracing::error!("torrent error: {}", e);
            user_tx.send(UserCommand::TorrentError(e.to_string())).ok();
        }
        res
    });

    (
        Handle {
            torrent_tx,
            torrent_handle,
        },
        user_rx,
    )
}

// Handle returned to the user to interact with the download.
pub struct Handle {

    torrent_tx: TorrentTx,

    torrent_handle: tokio::task::JoinHandle<Result<(), TorrentError>>,

}

impl Handle {

    // Stops the download, waiting for peers to disconnect and the file to be flushed.
    pub async fn shutdown(self) -> Result<(), TorrentError> {
        self.torrent_tx.send(TorrentCommand::Shutdown).ok();
        self.join().await
    }

    // Waits for the download to finish, returning the error that stopped it if any.
    pub async fn join(self) -> Result<(), TorrentError> {
        self.torrent_handle
            .await
            .map_err(|e| TorrentError::ChannelError(e.to_string()))?
    }
}
