use std::net::SocketAddr;
use tokio::{net::UdpSocket, sync::watch, task::JoinHandle};
use tracing::Instrument;
use url::Url;
use crate::{torrent::{TorrentCommand, TorrentTx}, ID};

mod retry;
mod udp;
pub use retry::RetryPolicy;
pub use udp::{
    build_announce_request, build_connect_request, AnnounceResponse, ConnectResponse, Response,
    TrackerState, UdpTracker,
};

type Result<T> = std::result::Result<T, TrackerError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid url")]
    InvalidUrl,

    #[error("unsupported tracker scheme: {0}")]
    UnsupportedScheme(String),

    #[error("response error: {0}")]
    ResponseError(String),

    #[error("no response from tracker after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

}

// Datagram transport to a single tracker.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {

    async fn send(&self, buf: &[u8]) -> std::io::Result<()>;

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

}

// Socket must already be connected to the tracker address.
#[async_trait::async_trait]
impl Transport for UdpSocket {

    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        UdpSocket::send(self, buf).await.map(|_| ())
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct AnnounceParams {

    // Hash of info dict.
    pub info_hash: ID,

    // 20-byte string used as a unique ID for the client.
    pub client_id: ID,

    // Port number.
    pub port: u16,

    // The total amount uploaded since the client started.
    pub uploaded: u64,

    // The total amount downloaded since the client started.
    pub downloaded: u64,

    // The number of bytes this client still has to download.
    pub left: u64,

    // Random key the tracker can use to identify the client across IP changes.
    pub key: u32,

    // Number of peers that the client would like to receive from the tracker, None for default.
    pub num_want: Option<usize>,

}

// Resolves the tracker and runs a single connect/announce exchange over UDP.
pub async fn announce(url: &Url, params: &AnnounceParams, policy: RetryPolicy) -> Result<Vec<SocketAddr>> {

    if url.scheme() != "udp" {
        return Err(TrackerError::UnsupportedScheme(url.scheme().to_string()));
    }
    let host = url.host_str().ok_or(TrackerError::InvalidUrl)?;
    let port = url.port().ok_or(TrackerError::InvalidUrl)?;
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or(TrackerError::InvalidUrl)?;

    // Uses first available local port.
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    tracing::debug!("resolved tracker to {}", addr);

    let mut tracker = UdpTracker::new(socket, policy);
    let resp = tracker.announce(params).await?;
    Ok(resp.peers)
}

// Announces on a separate task, reporting the peers (or failure) to the torrent.
// The task stops early when shutdown is signalled.
pub fn spawn_announce(
    url: Url,
    params: AnnounceParams,
    policy: RetryPolicy,
    torrent_tx: TorrentTx,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let span = tracing::info_span!("tracker", url = %url);
    tokio::spawn(async move {
        tokio::select! {
            res = announce(&url, &params, policy) => {
                let cmd = match res {
                    Ok(peers) => TorrentCommand::Peers(peers),
                    Err(e) => {
                        tracing::error!("announce failed: {}", e);
                        TorrentCommand::TrackerFailed(e)
                    },
                };
                torrent_tx.send(cmd).ok();
            },
            _ = shutdown_rx.wait_for(|stop| *stop) => tracing::info!("tracker shutdown"),
        }
    }.instrument(span))
}
