//! Optional write coalescer.
//!
//! Batches small enqueued writes and merges adjacent or overlapping
//! ranges before flushing them to the sink, trading a little memory for
//! fewer syscalls. The engine is correct without it; heavy fan-out
//! workloads can route their writes through one of these per sink.

use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::Result;
use crate::sink::FileSink;

#[derive(Default)]
struct Pending {
    writes: BTreeMap<u64, Vec<u8>>,
    total_bytes: u64,
}

/// Merging write queue keyed by file offset.
///
/// Overlapping enqueues resolve last-write-wins at every overlapping
/// byte.
#[derive(Default)]
pub struct WriteCoalescer {
    pending: Mutex<Pending>,
}

impl WriteCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `data` for `offset`, merging into any overlapping or
    /// adjacent pending writes.
    pub fn enqueue(&self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let end = offset + data.len() as u64;

        // Collect every pending write that touches [offset, end],
        // including one that starts before and reaches into it.
        let mut absorbed: Vec<(u64, Vec<u8>)> = Vec::new();
        let keys: Vec<u64> = pending
            .writes
            .range(..=end)
            .filter(|(k, v)| **k + v.len() as u64 >= offset)
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            let buf = pending.writes.remove(&key).unwrap();
            pending.total_bytes -= buf.len() as u64;
            absorbed.push((key, buf));
        }

        let start = absorbed
            .iter()
            .map(|(k, _)| *k)
            .min()
            .unwrap_or(offset)
            .min(offset);
        let stop = absorbed
            .iter()
            .map(|(k, buf)| k + buf.len() as u64)
            .max()
            .unwrap_or(end)
            .max(end);

        let mut merged = vec![0u8; (stop - start) as usize];
        for (key, buf) in &absorbed {
            let at = (key - start) as usize;
            merged[at..at + buf.len()].copy_from_slice(buf);
        }
        // The new data lands last so it wins on overlap.
        let at = (offset - start) as usize;
        merged[at..at + data.len()].copy_from_slice(data);

        pending.total_bytes += merged.len() as u64;
        pending.writes.insert(start, merged);
    }

    /// Write every pending run to the sink and clear the queue.
    pub async fn flush(&self, sink: &FileSink) -> Result<()> {
        let drained = {
            let mut pending = self.pending.lock().unwrap();
            pending.total_bytes = 0;
            std::mem::take(&mut pending.writes)
        };
        for (offset, buf) in drained {
            sink.write_at(offset, Bytes::from(buf)).await?;
        }
        Ok(())
    }

    /// Drop all pending writes.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.writes.clear();
        pending.total_bytes = 0;
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending.lock().unwrap().total_bytes
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().writes.len()
    }
}
