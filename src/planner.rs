//! Segmentation planning: how many pieces, and where the cuts go.

use crate::config::{HIGH_BANDWIDTH_BPS, LOW_BANDWIDTH_BPS, MAX_SEGMENT_SIZE, Profile};

/// One planned byte range, before a live [`crate::segment::Segment`] is
/// built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSegment {
    pub id: u32,
    pub offset: u64,
    pub size: u64,
    pub file_offset: u64,
    pub ranged: bool,
}

/// Segment count for a measured or assumed link speed.
///
/// Fast links saturate only with many concurrent streams, so the count
/// scales linearly from the profile minimum at 1 MB/s up to the profile
/// maximum at 100 MB/s.
pub fn count_for_bandwidth(bandwidth_bps: u64, profile: Profile) -> u32 {
    let min = profile.min_segments();
    let max = profile.max_segments();
    if bandwidth_bps >= HIGH_BANDWIDTH_BPS {
        return max;
    }
    if bandwidth_bps <= LOW_BANDWIDTH_BPS {
        return min;
    }
    let ratio = (bandwidth_bps - LOW_BANDWIDTH_BPS) as f64
        / (HIGH_BANDWIDTH_BPS - LOW_BANDWIDTH_BPS) as f64;
    min + ((max - min) as f64 * ratio) as u32
}

/// Size-driven fallback when bandwidth has not been probed.
pub fn count_for_size(total: u64) -> u32 {
    const MIB: u64 = 1024 * 1024;
    match total {
        t if t >= 100 * MIB => 16,
        t if t >= 50 * MIB => 12,
        t if t >= 10 * MIB => 6,
        t if t >= MIB => 4,
        _ => 2,
    }
}

/// Partition `[0, total)` into segments.
///
/// `requested` overrides the automatic count when non-zero. The result is
/// always a gapless, non-overlapping cover of the resource; when the
/// server rejects ranges, the size is unknown, or the file is smaller than
/// the profile's minimum segment, the plan is a single unranged stream.
pub fn plan(total: u64, accepts_ranges: bool, requested: u32, profile: Profile) -> Vec<PlannedSegment> {
    let min_segment = profile.min_segment_size();

    if !accepts_ranges || total < min_segment {
        return vec![PlannedSegment {
            id: 0,
            offset: 0,
            size: total,
            file_offset: 0,
            ranged: false,
        }];
    }

    let count = if requested > 0 {
        requested.min(profile.max_segments())
    } else {
        count_for_size(total).clamp(profile.min_segments(), profile.max_segments())
    };

    let segment_size = total
        .div_ceil(u64::from(count))
        .clamp(min_segment, MAX_SEGMENT_SIZE);

    let mut segments = Vec::new();
    let mut offset = 0u64;
    let mut id = 0u32;
    while offset < total {
        let size = segment_size.min(total - offset);
        segments.push(PlannedSegment {
            id,
            offset,
            size,
            file_offset: offset,
            ranged: true,
        });
        offset += size;
        id += 1;
    }
    segments
}

/// Whether the speed spread between segments justifies stealing.
///
/// Triggers when the slowest downloading segment runs at less than half
/// the fastest, or when any segment has gone silent.
pub fn should_steal(fast_bps: u64, slow_bps: u64) -> bool {
    if slow_bps == 0 {
        return true;
    }
    if fast_bps == 0 {
        return false;
    }
    (fast_bps - slow_bps) as f64 / fast_bps as f64 > 0.5
}
