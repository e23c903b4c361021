//! Positional file sink shared by all segment workers.
//!
//! Writes carry their absolute offset, so workers writing disjoint ranges
//! never contend on a file cursor or a lock. The actual pwrite runs on the
//! blocking pool to keep the reactor threads free.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;

/// Concurrent positional writer over one output file.
///
/// The engine owns the sink; workers get a cheap handle (`Arc`) and may
/// call [`FileSink::write_at`] from any task. Open, flush and close are
/// the only serialized operations.
#[derive(Debug)]
pub struct FileSink {
    file: Arc<File>,
    path: PathBuf,
    closed: AtomicBool,
}

impl FileSink {
    /// Create or truncate the output and pre-allocate `size` bytes.
    ///
    /// Pre-allocation uses `set_len`, which is sparse on filesystems that
    /// support it, so a 10 GiB download does not eat 10 GiB up front.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        if size > 0 {
            file.set_len(size)?;
        }
        debug!(path = %path.display(), size, "created output file");
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Reopen an existing partial output without truncating it.
    ///
    /// Used on resume; the file is extended to `size` if a previous run
    /// was interrupted before pre-allocation finished.
    pub fn resume(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if size > 0 && file.metadata()?.len() < size {
            file.set_len(size)?;
        }
        debug!(path = %path.display(), size, "reopened output file");
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Write `data` at the absolute `offset`.
    ///
    /// Safe to call concurrently for non-overlapping ranges; no lock is
    /// taken on this path.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(std::io::Error::other("file sink is closed").into());
        }
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, offset, &data))
            .await
            .map_err(|e| std::io::Error::other(e))??;
        Ok(())
    }

    /// Flush written data to the device.
    pub async fn flush(&self) -> Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(|e| std::io::Error::other(e))??;
        Ok(())
    }

    /// Flush and mark the sink closed. Idempotent; later writes fail and
    /// the OS handle is released once the last worker handle drops.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| std::io::Error::other(e))??;
        debug!(path = %self.path.display(), "closed output file");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0usize;
    while written < data.len() {
        let n = file.seek_write(&data[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        written += n;
    }
    Ok(())
}
