//! Download segments: a contiguous byte range owned by one worker.
//!
//! All hot counters live in atomics so the monitor loop and observers can
//! sample them without taking any lock. Counters use relaxed ordering,
//! state transitions use release/acquire, and readers tolerate slightly
//! stale values.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{SPEED_WINDOW_MS, STEAL_ALIGN};
use crate::error::{DownloadError, ErrorKind};
use crate::progress::SegmentSnapshot;

/// Per-segment state machine.
///
/// `Pending -> Connecting -> Downloading -> Completed` is the happy path;
/// `Stalled` bounces back to `Connecting` on restart. `Completed`,
/// `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentState {
    Pending = 0,
    Connecting = 1,
    Downloading = 2,
    Stalled = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl SegmentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SegmentState::Completed | SegmentState::Failed | SegmentState::Cancelled
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => SegmentState::Pending,
            1 => SegmentState::Connecting,
            2 => SegmentState::Downloading,
            3 => SegmentState::Stalled,
            4 => SegmentState::Completed,
            5 => SegmentState::Failed,
            _ => SegmentState::Cancelled,
        }
    }
}

/// One byte range of the resource.
///
/// `offset` and `file_offset` are fixed at creation; `size` is atomic
/// because work stealing and resegmentation shrink or grow it while the
/// worker is streaming. The HTTP range actually requested at any moment is
/// `[offset + downloaded, offset + size - 1]`, so resumption after a
/// restart is automatic.
#[derive(Debug)]
pub struct Segment {
    id: u32,
    offset: u64,
    file_offset: u64,
    size: AtomicU64,
    /// An unranged segment streams until EOF instead of a byte target.
    ranged: bool,
    downloaded: AtomicU64,
    state: AtomicU8,
    started_at: Instant,
    last_progress_ms: AtomicU64,
    window_bytes: AtomicU64,
    window_start_ms: AtomicU64,
    speed_bps: AtomicU64,
    error: Mutex<Option<(ErrorKind, String)>>,
}

impl Segment {
    pub fn new(id: u32, offset: u64, size: u64, file_offset: u64) -> Self {
        Self {
            id,
            offset,
            file_offset,
            size: AtomicU64::new(size),
            ranged: true,
            downloaded: AtomicU64::new(0),
            state: AtomicU8::new(SegmentState::Pending as u8),
            started_at: Instant::now(),
            last_progress_ms: AtomicU64::new(0),
            window_bytes: AtomicU64::new(0),
            window_start_ms: AtomicU64::new(0),
            speed_bps: AtomicU64::new(0),
            error: Mutex::new(None),
        }
    }

    /// A single segment streaming the whole resource without a Range
    /// header. `size` is 0 when the total is unknown.
    pub fn unranged(size: u64) -> Self {
        let mut seg = Self::new(0, 0, size, 0);
        seg.ranged = false;
        seg
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn is_ranged(&self) -> bool {
        self.ranged
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.downloaded())
    }

    pub fn percent(&self) -> f64 {
        let size = self.size();
        if size == 0 {
            return 0.0;
        }
        self.downloaded() as f64 * 100.0 / size as f64
    }

    pub fn state(&self) -> SegmentState {
        SegmentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, next: SegmentState) {
        self.state.store(next as u8, Ordering::Release);
    }

    /// Record a fatal worker error and move to `Failed`.
    pub fn fail(&self, err: &DownloadError) {
        *self.error.lock().unwrap() = Some((err.kind(), err.to_string()));
        self.set_state(SegmentState::Failed);
    }

    pub fn error(&self) -> Option<(ErrorKind, String)> {
        self.error.lock().unwrap().clone()
    }

    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Account freshly received bytes.
    ///
    /// Only the owning worker calls this, so the speed window needs no
    /// synchronization beyond the atomics themselves.
    pub fn add_downloaded(&self, bytes: u64) {
        let now = self.now_ms();
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.last_progress_ms.store(now, Ordering::Relaxed);

        let window_bytes = self.window_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let window_start = self.window_start_ms.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(window_start);
        if elapsed >= SPEED_WINDOW_MS {
            self.speed_bps
                .store(window_bytes * 1000 / elapsed, Ordering::Relaxed);
            self.window_start_ms.store(now, Ordering::Relaxed);
            self.window_bytes.store(0, Ordering::Relaxed);
        }
    }

    /// Restore progress from a resume journal.
    pub fn set_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Relaxed);
    }

    /// Instantaneous speed over the last sampling window.
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps.load(Ordering::Relaxed)
    }

    /// Lifetime average speed.
    pub fn average_speed_bps(&self) -> u64 {
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        if elapsed == 0 {
            return 0;
        }
        self.downloaded() * 1000 / elapsed
    }

    /// Freeze the instantaneous speed at zero, e.g. when the worker stops.
    pub fn reset_speed(&self) {
        self.speed_bps.store(0, Ordering::Relaxed);
        self.window_bytes.store(0, Ordering::Relaxed);
        self.window_start_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// True while downloading with no byte progress for `timeout`.
    pub fn is_stalled(&self, timeout: Duration) -> bool {
        if self.state() != SegmentState::Downloading {
            return false;
        }
        let last = self.last_progress_ms.load(Ordering::Relaxed);
        self.now_ms().saturating_sub(last) >= timeout.as_millis() as u64
    }

    /// Touch the progress stamp without adding bytes, e.g. right after a
    /// restart so the stall clock starts fresh.
    pub fn touch(&self) {
        self.last_progress_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// The largest 4 KiB-aligned tail that can be given away while this
    /// segment keeps at least `min_keep` of its remaining bytes.
    pub fn can_steal(&self, min_keep: u64) -> u64 {
        if !self.ranged {
            return 0;
        }
        let remaining = self.remaining();
        if remaining <= min_keep {
            return 0;
        }
        (remaining - min_keep) & !(STEAL_ALIGN - 1)
    }

    /// Give away `bytes` from the tail of this segment's range.
    pub fn steal_bytes(&self, bytes: u64) {
        self.size.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Take responsibility for `bytes` more past the current range end.
    pub fn add_bytes(&self, bytes: u64) {
        self.size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Shrink the range to end at `new_end` (exclusive, absolute offset).
    /// `downloaded` is untouched.
    pub fn reduce_range(&self, new_end: u64) {
        self.size.store(new_end - self.offset, Ordering::Relaxed);
    }

    /// Copy the current counters. May be slightly stale, which is fine for
    /// progress display and monitor decisions.
    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            id: self.id,
            offset: self.offset,
            size: self.size(),
            file_offset: self.file_offset,
            downloaded: self.downloaded(),
            speed_bps: self.speed_bps(),
            average_speed_bps: self.average_speed_bps(),
            state: self.state(),
            error: self.error.lock().unwrap().as_ref().map(|(kind, _)| *kind),
        }
    }
}
