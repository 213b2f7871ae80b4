use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use super::*;

#[derive(Debug)]
pub struct Disk {

    path: PathBuf,

    len: u64,

    // Shared with the blocking io threads.
    file: Arc<Mutex<File>>,

    // Commands to the disk task.
    disk_rx: DiskRx,

}

impl Disk {

    pub fn new(path: PathBuf, len: u64) -> Result<(Self, DiskTx)> {

        // Create the output directory if it doesn't exist.
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                std::fs::create_dir_all(dir)?;
                tracing::info!("created missing output directory: {:?}", dir);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.set_len(len)?;
        tracing::info!("created file: {:?} ({} bytes)", path, len);

        let (disk_tx, disk_rx) = mpsc::unbounded_channel();
        Ok((
            Disk {
                path,
                len,
                file: Arc::new(Mutex::new(file)),
                disk_rx,
            },
            disk_tx,
        ))
    }

    pub async fn run(&mut self) -> Result<()> {

        while let Some(cmd) = self.disk_rx.recv().await {
            match cmd {

                DiskCommand::WriteBlock { offset, data } => self.write_block(offset, data).await?,

                DiskCommand::Shutdown => break,

            }
        }

        self.flush().await?;
        tracing::info!("closed file: {:?}", self.path);
        Ok(())
    }

    async fn write_block(&self, offset: u64, data: Vec<u8>) -> Result<()> {
        if offset + data.len() as u64 > self.len {
            return Err(DiskError::OutOfBounds {
                offset,
                len: data.len(),
                file_len: self.len,
            });
        }

        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || -> Result<()> {
            let mut f = file.lock()?;
            f.seek(SeekFrom::Start(offset))?;
            f.write_all(&data)?;
            tracing::trace!("wrote {} bytes at offset {}", data.len(), offset);
            Ok(())
        })
        .await
        .map_err(|e| DiskError::SyncError(e.to_string()))?
    }

    async fn flush(&self) -> Result<()> {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || -> Result<()> {
            let mut f = file.lock()?;
            f.flush()?;
            f.sync_all()?;
            Ok(())
        })
        .await
        .map_err(|e| DiskError::SyncError(e.to_string()))?
    }
}
