//! Engine configuration and tuning constants.

use std::time::Duration;

/// Connect timeout for every HTTP request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A worker with no byte progress for this long is considered stalled.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Transient transport errors are retried this many times per worker.
pub const RETRY_COUNT: u32 = 3;

/// Fixed delay between worker retries.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Monitor loop tick.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// How often the resume journal is flushed while downloading.
pub const JOURNAL_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on a single segment regardless of profile.
pub const MAX_SEGMENT_SIZE: u64 = 50 * 1024 * 1024;

/// A donor keeps at least this much of its remaining range when robbed.
pub const STEAL_MIN_KEEP: u64 = 1024 * 1024;

/// Stolen byte counts are aligned down to this boundary.
pub const STEAL_ALIGN: u64 = 4096;

/// Segments below this speed are candidates for work stealing.
pub const SLOW_SEGMENT_BPS: u64 = 100 * 1000;

/// Minimum sampling window for the instantaneous speed estimate.
pub const SPEED_WINDOW_MS: u64 = 100;

/// Links at or above this rate get the profile maximum segment count.
pub const HIGH_BANDWIDTH_BPS: u64 = 100_000_000;

/// Links at or below this rate get the profile minimum segment count.
pub const LOW_BANDWIDTH_BPS: u64 = 1_000_000;

/// Redirect cap for HEAD and GET.
pub const MAX_REDIRECTS: usize = 10;

/// Idle pooled connections are evicted after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_USER_AGENT: &str = concat!("bolt/", env!("CARGO_PKG_VERSION"));

/// Segmentation profile.
///
/// `Aggressive` is the default: more and smaller segments, which wins on
/// fast links and CDNs. `Conservative` keeps fewer, larger segments for
/// servers that throttle per-connection concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    Conservative,
    #[default]
    Aggressive,
}

impl Profile {
    pub fn min_segments(self) -> u32 {
        match self {
            Profile::Conservative => 2,
            Profile::Aggressive => 4,
        }
    }

    pub fn max_segments(self) -> u32 {
        match self {
            Profile::Conservative => 16,
            Profile::Aggressive => 32,
        }
    }

    pub fn min_segment_size(self) -> u64 {
        match self {
            Profile::Conservative => 1024 * 1024,
            Profile::Aggressive => 256 * 1024,
        }
    }
}

/// Per-download configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub profile: Profile,
    /// Requested segment count; 0 picks automatically from the file size.
    pub segments: u32,
    /// Reassign tail ranges away from slow segments.
    pub work_stealing: bool,
    /// Split large in-flight segments when worker capacity is spare.
    pub dynamic_segmentation: bool,
    pub stall_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            segments: 0,
            work_stealing: true,
            dynamic_segmentation: true,
            stall_timeout: STALL_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_bounds() {
        assert_eq!(Profile::Conservative.min_segments(), 2);
        assert_eq!(Profile::Conservative.max_segments(), 16);
        assert_eq!(Profile::Conservative.min_segment_size(), 1024 * 1024);

        assert_eq!(Profile::Aggressive.min_segments(), 4);
        assert_eq!(Profile::Aggressive.max_segments(), 32);
        assert_eq!(Profile::Aggressive.min_segment_size(), 256 * 1024);
    }

    #[test]
    fn defaults_enable_adaptive_behavior() {
        let cfg = DownloadConfig::default();
        assert_eq!(cfg.profile, Profile::Aggressive);
        assert_eq!(cfg.segments, 0);
        assert!(cfg.work_stealing);
        assert!(cfg.dynamic_segmentation);
        assert_eq!(cfg.stall_timeout, STALL_TIMEOUT);
    }
}
