//! Progress snapshot types handed to observers.

use crate::error::ErrorKind;
use crate::segment::SegmentState;

/// Aggregate progress of a download.
///
/// A plain copyable snapshot; the engine fills it on every monitor tick
/// and hands a copy to the observer callback with no lock held.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Sum of the per-segment instantaneous speeds.
    pub speed_bps: u64,
    /// Aggregate bytes over elapsed wall time, the stable figure.
    pub average_speed_bps: u64,
    pub active_segments: u32,
    pub completed_segments: u32,
    pub failed_segments: u32,
    pub eta_seconds: u64,
}

impl Progress {
    /// Completion percentage; 0.0 while the total size is unknown.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Point-in-time view of one segment, for per-segment UIs.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    pub id: u32,
    pub offset: u64,
    pub size: u64,
    pub file_offset: u64,
    pub downloaded: u64,
    pub speed_bps: u64,
    pub average_speed_bps: u64,
    pub state: SegmentState,
    pub error: Option<ErrorKind>,
}

impl SegmentSnapshot {
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_guards_unknown_total() {
        let mut p = Progress::default();
        assert_eq!(p.percent(), 0.0);

        p.total_bytes = 200;
        p.downloaded_bytes = 50;
        assert_eq!(p.percent(), 25.0);
    }

    #[test]
    fn snapshot_remaining_saturates() {
        let snap = SegmentSnapshot {
            id: 0,
            offset: 0,
            size: 100,
            file_offset: 0,
            downloaded: 100,
            speed_bps: 0,
            average_speed_bps: 0,
            state: SegmentState::Completed,
            error: None,
        };
        assert_eq!(snap.remaining(), 0);
    }
}
