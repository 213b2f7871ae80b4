use std::path::PathBuf;
use tokio::{sync::mpsc, task::{self, JoinHandle}};
use tracing::Instrument;
use crate::torrent::{TorrentCommand, TorrentTx};

mod disk;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("write of {len} bytes at offset {offset} exceeds file length {file_len}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        file_len: u64,
    },

    // Usually relating to poisoned file locks or a panicked io thread.
    #[error("sync error: {0}")]
    SyncError(String),

}

impl<T> From<std::sync::PoisonError<T>> for DiskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DiskError::SyncError(e.to_string())
    }
}

type Result<T> = std::result::Result<T, DiskError>;
pub type DiskTx = mpsc::UnboundedSender<DiskCommand>;
type DiskRx = mpsc::UnboundedReceiver<DiskCommand>;

#[derive(Debug)]
pub enum DiskCommand {

    // From peers sending blocks, write block data at an absolute offset in the output file.
    WriteBlock {
        offset: u64,
        data: Vec<u8>,
    },

    // Flush the file and stop the task.
    Shutdown,

}

// Creates the output file, sized to the torrent, and starts the task writing to it.
// Write failures are reported to the torrent, after which the task stops.
pub fn start_disk(path: PathBuf, len: u64, torrent_tx: TorrentTx) -> Result<(JoinHandle<()>, DiskTx)> {
    let (mut disk, disk_tx) = disk::Disk::new(path, len)?;
    let handle = task::spawn(async move {
        if let Err(e) = disk.run().await {
            tracing::error!("disk error: {}", e);
            torrent_tx.send(TorrentCommand::DiskFailed(e)).ok();
        }
    }.instrument(tracing::info_span!("disk")));
    Ok((handle, disk_tx))
}
