use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::{mpsc, watch}, task::JoinHandle};
use url::Url;
use crate::{
    config::Config,
    disk::{self, DiskCommand, DiskError, DiskTx},
    info::TorrentInfo,
    metainfo::MetaInfo,
    p2p::{PeerCommand, PeerHandle, PeerSession},
    picker::PieceSet,
    tracker::{self, AnnounceParams, TrackerError},
    UserCommand,
    UserTx,
    ID,
};

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("tracker error: {0}")]
    TrackerError(#[from] TrackerError),

    #[error("disk error: {0}")]
    DiskError(#[from] DiskError),

    #[error("all peers disconnected before the download completed")]
    PeersExhausted,

    #[error("channel error: {0}")]
    ChannelError(String),
}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::ChannelError(e.to_string())
    }
}

#[derive(Debug)]
pub enum TorrentCommand {

    // Sent by the tracker task with the announced peers.
    Peers(Vec<SocketAddr>),

    // Sent by the tracker task when the announce fails.
    TrackerFailed(TrackerError),

    // Sent by the disk task when a write fails.
    DiskFailed(DiskError),

    // Sent by a peer task for every new block.
    BlockReceived,

    // Sent by the peer task that observed the last block.
    Complete,

    // Sent by a peer task when its session ends.
    PeerDisconnected { address: SocketAddr },

    // Sent by the user to stop the download.
    Shutdown,

}

pub type Result<T> = std::result::Result<T, TorrentError>;
pub type TorrentTx = mpsc::UnboundedSender<TorrentCommand>;
pub type TorrentRx = mpsc::UnboundedReceiver<TorrentCommand>;

// Read only state shared with every peer session.
#[derive(Debug)]
pub struct TorrentContext {

    pub info_hash: ID,

    pub client_id: ID,

    pub info: TorrentInfo,

    // Download state of every block.
    pub pieces: PieceSet,

    pub torrent_tx: TorrentTx,

    pub disk_tx: DiskTx,

    pub connect_timeout: Duration,

    // Longest time a peer may go without sending a frame.
    pub idle_timeout: Duration,

}

#[derive(Debug)]
pub struct Torrent {

    ctx: Arc<TorrentContext>,

    name: String,

    announce: Url,

    config: Config,

    // Peers we have active sessions with.
    peers: HashMap<SocketAddr, PeerHandle>,

    // Peers we know about but don't have a session with.
    available: Vec<SocketAddr>,

    torrent_rx: TorrentRx,

    user_tx: UserTx,

    // Stops the tracker task.
    shutdown_tx: watch::Sender<bool>,

    tracker_handle: Option<JoinHandle<()>>,

    disk_handle: Option<JoinHandle<()>>,

}

impl Torrent {

    // Creates the output file and starts the disk task.
    pub fn new(
        metainfo: &MetaInfo,
        config: Config,
        torrent_tx: TorrentTx,
        torrent_rx: TorrentRx,
        user_tx: UserTx,
    ) -> Result<Self> {

        let info = metainfo.torrent_info();
        let path = config.dir.join(metainfo.name());
        let (disk_handle, disk_tx) = disk::start_disk(path, info.total_len, torrent_tx.clone())?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Torrent {
            ctx: Arc::new(TorrentContext {
                info_hash: metainfo.info_hash(),
                client_id: config.client_id,
                info,
                pieces: PieceSet::new(&info),
                torrent_tx,
                disk_tx,
                connect_timeout: config.connect_timeout,
                idle_timeout: config.idle_timeout,
            }),
            name: metainfo.name().to_string(),
            announce: metainfo.announce.clone(),
            config,
            peers: HashMap::new(),
            available: Vec::new(),
            torrent_rx,
            user_tx,
            shutdown_tx,
            tracker_handle: None,
            disk_handle: Some(disk_handle),
        })
    }

    // Runs the download to completion, then tears down every task.
    #[tracing::instrument(skip_all, name = "torrent", fields(name = %self.name))]
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("starting torrent");

        let params = AnnounceParams {
            info_hash: self.ctx.info_hash,
            client_id: self.ctx.client_id,
            port: self.config.port,
            uploaded: 0,
            downloaded: 0,
            left: self.ctx.info.total_len,
            key: rand::random(),
            num_want: None,
        };
        self.tracker_handle = Some(tracker::spawn_announce(
            self.announce.clone(),
            params,
            self.config.tracker_retry,
            self.ctx.torrent_tx.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let res = self.run_loop().await;
        self.shutdown().await;
        res
    }

    async fn run_loop(&mut self) -> Result<()> {

        if self.ctx.pieces.is_done().await {
            tracing::info!("nothing to download");
            self.user_tx.send(UserCommand::TorrentComplete)?;
            return Ok(());
        }

        while let Some(cmd) = self.torrent_rx.recv().await {
            match cmd {

                TorrentCommand::Peers(peers) => {
                    tracing::info!("tracker returned {} peers", peers.len());
                    self.available.extend(peers);
                    self.connect_to_peers();
                    if self.peers.is_empty() {
                        return Err(TorrentError::PeersExhausted);
                    }
                },

                TorrentCommand::TrackerFailed(e) => return Err(e.into()),

                TorrentCommand::DiskFailed(e) => return Err(e.into()),

                TorrentCommand::BlockReceived => {
                    let (received, total) = self.ctx.pieces.progress().await;
                    tracing::trace!("{}/{} blocks received", received, total);
                    self.user_tx.send(UserCommand::Progress { received, total })?;
                },

                TorrentCommand::Complete => {
                    tracing::info!("torrent download complete");
                    self.user_tx.send(UserCommand::TorrentComplete)?;
                    return Ok(());
                },

                TorrentCommand::PeerDisconnected { address } => {
                    if let Some(peer) = self.peers.remove(&address) {
                        peer.session_handle.await.ok();
                    }
                    tracing::debug!("peer {} disconnected, {} remain", address, self.peers.len());
                    self.connect_to_peers();
                    if self.peers.is_empty() {
                        return Err(TorrentError::PeersExhausted);
                    }
                },

                TorrentCommand::Shutdown => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                },
            }
        }

        Err(TorrentError::ChannelError("torrent channel closed".to_string()))
    }

    // Starts sessions with available peers, up to the configured maximum.
    fn connect_to_peers(&mut self) {
        let count = self.available.len().min(self.config.max_peers.saturating_sub(self.peers.len()));
        if count == 0 {
            return;
        }

        tracing::info!("connecting to {} peers", count);
        for address in self.available.drain(0..count) {
            if self.peers.contains_key(&address) {
                continue;
            }
            let (session, peer_tx) = PeerSession::new(address, self.ctx.clone());
            self.peers.insert(address, PeerHandle::start_session(session, peer_tx));
        }
    }

    // Stops the tracker and every session, then flushes the output file.
    async fn shutdown(&mut self) {

        self.shutdown_tx.send(true).ok();
        if let Some(handle) = self.tracker_handle.take() {
            handle.await.ok();
        }

        tracing::info!("disconnecting from {} peers", self.peers.len());
        for peer in self.peers.values() {
            peer.peer_tx.send(PeerCommand::Shutdown).ok();
        }
        for (address, peer) in self.peers.drain() {
            if let Err(e) = peer.session_handle.await {
                tracing::warn!("peer {} task failed: {}", address, e);
            }
        }

        self.ctx.disk_tx.send(DiskCommand::Shutdown).ok();
        if let Some(handle) = self.disk_handle.take() {
            handle.await.ok();
        }
    }
}
