//! Resume journal: the `.boltmeta` sidecar next to the output file.
//!
//! The journal captures per-segment progress so an interrupted download
//! can continue from where it stopped. The format is deliberately dumb,
//! one field per line:
//!
//! ```text
//! <url>
//! <output path>
//! <total size>
//! <aggregate downloaded>
//! <segment count N>
//! <id> <offset> <size> <file_offset> <downloaded> <ranged>   (N lines)
//! ```
//!
//! `ranged` is `1` for a byte-range segment and `0` for a single-stream
//! one, so a resumed download rebuilds its segments exactly as they were
//! planned.
//!
//! Saves go through a temp file in the same directory followed by an
//! atomic rename, so a crash mid-save leaves the previous journal intact.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{DownloadError, Result};

pub const META_EXTENSION: &str = ".boltmeta";

/// Persisted progress of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecord {
    pub id: u32,
    pub offset: u64,
    pub size: u64,
    pub file_offset: u64,
    pub downloaded: u64,
    /// Whether this segment downloads a byte range, as opposed to one
    /// unranged stream (small file, range-less server, unknown size).
    pub ranged: bool,
}

/// Persisted state of one download.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub url: String,
    pub output_path: String,
    pub total_size: u64,
    /// Advisory aggregate; the per-segment counters are authoritative.
    pub downloaded: u64,
    pub segments: Vec<SegmentRecord>,
}

impl Journal {
    /// The journal path for a given output file.
    pub fn meta_path(output: &Path) -> PathBuf {
        let mut os: OsString = output.as_os_str().to_os_string();
        os.push(META_EXTENSION);
        PathBuf::from(os)
    }

    pub fn exists(output: &Path) -> bool {
        Self::meta_path(output).exists()
    }

    /// Delete the journal for `output`. Missing files are fine.
    pub fn remove(output: &Path) {
        let _ = std::fs::remove_file(Self::meta_path(output));
    }

    /// Write the journal atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut body = String::new();
        let _ = writeln!(body, "{}", self.url);
        let _ = writeln!(body, "{}", self.output_path);
        let _ = writeln!(body, "{}", self.total_size);
        let _ = writeln!(body, "{}", self.downloaded);
        let _ = writeln!(body, "{}", self.segments.len());
        for seg in &self.segments {
            let _ = writeln!(
                body,
                "{} {} {} {} {} {}",
                seg.id,
                seg.offset,
                seg.size,
                seg.file_offset,
                seg.downloaded,
                u8::from(seg.ranged)
            );
        }

        let tmp = NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), body.as_bytes())?;
        tmp.persist(path).map_err(|e| DownloadError::Io(e.error))?;
        Ok(())
    }

    /// Parse a journal. Any malformed or truncated content yields
    /// `resume_failed`; callers discard and start fresh.
    pub fn load(path: &Path) -> Result<Journal> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DownloadError::ResumeFailed(format!("{}: {e}", path.display())))?;
        let mut lines = content.lines();

        let url = next_line(&mut lines, "url")?.to_string();
        let output_path = next_line(&mut lines, "output path")?.to_string();
        let total_size = parse_u64(next_line(&mut lines, "total size")?, "total size")?;
        let downloaded = parse_u64(next_line(&mut lines, "downloaded")?, "downloaded")?;
        let count = parse_u64(next_line(&mut lines, "segment count")?, "segment count")? as usize;
        // A corrupt count must not drive a huge allocation.
        if count > 4096 {
            return Err(DownloadError::ResumeFailed(format!(
                "implausible segment count {count}"
            )));
        }

        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let line = next_line(&mut lines, "segment record")?;
            segments.push(parse_segment(line, i)?);
        }

        Ok(Journal {
            url,
            output_path,
            total_size,
            downloaded,
            segments,
        })
    }

    /// Whether this journal can seed a resume of `url` with `total` bytes.
    ///
    /// The URL and total size must match and the recorded layout must be a
    /// sane partition, otherwise the journal is discarded and the engine
    /// starts fresh.
    pub fn compatible_with(&self, url: &str, total: u64) -> bool {
        if self.url != url || self.total_size != total {
            debug!(
                journal_url = %self.url,
                journal_total = self.total_size,
                "journal does not match the requested download"
            );
            return false;
        }
        self.layout_is_valid()
    }

    fn layout_is_valid(&self) -> bool {
        if self.segments.is_empty() {
            return false;
        }

        // Unknown-size downloads persist a single open-ended segment.
        if self.total_size == 0 {
            return self.segments.len() == 1 && self.segments[0].offset == 0;
        }

        // Ids must be unique; they are not necessarily dense because the
        // engine may have folded failed tail ranges back into neighbors.
        let mut ids: Vec<u32> = self.segments.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.segments.len() {
            return false;
        }

        let mut by_offset: Vec<&SegmentRecord> = self.segments.iter().collect();
        by_offset.sort_unstable_by_key(|s| s.offset);

        let mut expected = 0u64;
        for seg in by_offset {
            if seg.offset != expected || seg.downloaded > seg.size || seg.size == 0 {
                return false;
            }
            expected = seg.offset + seg.size;
        }
        expected == self.total_size
    }
}

fn next_line<'a>(lines: &mut std::str::Lines<'a>, field: &str) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| DownloadError::ResumeFailed(format!("missing {field}")))
}

fn parse_segment(line: &str, index: usize) -> Result<SegmentRecord> {
    let mut fields = line.split_ascii_whitespace();
    let mut field = |name: &str| -> Result<u64> {
        let raw = fields.next().ok_or_else(|| {
            DownloadError::ResumeFailed(format!("segment {index}: missing {name}"))
        })?;
        parse_u64(raw, name)
    };
    Ok(SegmentRecord {
        id: field("id")? as u32,
        offset: field("offset")?,
        size: field("size")?,
        file_offset: field("file offset")?,
        downloaded: field("downloaded")?,
        ranged: match field("ranged flag")? {
            0 => false,
            1 => true,
            other => {
                return Err(DownloadError::ResumeFailed(format!(
                    "segment {index}: bad ranged flag {other}"
                )));
            }
        },
    })
}

fn parse_u64(raw: &str, field: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| DownloadError::ResumeFailed(format!("bad {field}: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> Journal {
        Journal {
            url: "https://example.com/large_file.zip".into(),
            output_path: "large_file.zip".into(),
            total_size: 100_000_000,
            downloaded: 45_000_000,
            segments: vec![
                SegmentRecord { id: 0, offset: 0, size: 25_000_000, file_offset: 0, downloaded: 12_000_000, ranged: true },
                SegmentRecord { id: 1, offset: 25_000_000, size: 25_000_000, file_offset: 25_000_000, downloaded: 11_000_000, ranged: true },
                SegmentRecord { id: 2, offset: 50_000_000, size: 25_000_000, file_offset: 50_000_000, downloaded: 11_000_000, ranged: true },
                SegmentRecord { id: 3, offset: 75_000_000, size: 25_000_000, file_offset: 75_000_000, downloaded: 11_000_000, ranged: true },
            ],
        }
    }

    #[test]
    fn meta_path_appends_extension() {
        assert_eq!(
            Journal::meta_path(Path::new("test.bin")),
            PathBuf::from("test.bin.boltmeta")
        );
        assert_eq!(
            Journal::meta_path(Path::new("/path/to/file.zip")),
            PathBuf::from("/path/to/file.zip.boltmeta")
        );
        assert_eq!(
            Journal::meta_path(Path::new("/path/with spaces/file.bin")),
            PathBuf::from("/path/with spaces/file.bin.boltmeta")
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.zip.boltmeta");

        let original = sample();
        original.save(&path).unwrap();

        let loaded = Journal::load(&path).unwrap();
        assert_eq!(loaded.url, original.url);
        assert_eq!(loaded.output_path, original.output_path);
        assert_eq!(loaded.total_size, original.total_size);
        assert_eq!(loaded.downloaded, original.downloaded);
        assert_eq!(loaded.segments, original.segments);
    }

    #[test]
    fn load_missing_file_is_resume_failed() {
        let err = Journal::load(Path::new("does_not_exist.boltmeta")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeFailed);
    }

    #[test]
    fn load_rejects_truncated_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.boltmeta");
        std::fs::write(&path, "https://example.com/a\nout.bin\n1000\n").unwrap();

        let err = Journal::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeFailed);
    }

    #[test]
    fn load_rejects_garbage_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.boltmeta");
        std::fs::write(&path, "u\no\nnot-a-number\n0\n0\n").unwrap();

        let err = Journal::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeFailed);
    }

    #[test]
    fn load_rejects_short_segment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.boltmeta");
        // Five fields only, the ranged flag is missing.
        std::fs::write(&path, "u\no\n100\n0\n1\n0 0 100 0 50\n").unwrap();

        let err = Journal::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeFailed);
    }

    #[test]
    fn load_rejects_bad_ranged_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.boltmeta");
        std::fs::write(&path, "u\no\n100\n0\n1\n0 0 100 0 50 2\n").unwrap();

        let err = Journal::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeFailed);
    }

    #[test]
    fn round_trips_the_ranged_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.boltmeta");

        let journal = Journal {
            url: "https://example.com/small.bin".into(),
            output_path: "small.bin".into(),
            total_size: 100_000,
            downloaded: 40_000,
            segments: vec![SegmentRecord {
                id: 0,
                offset: 0,
                size: 100_000,
                file_offset: 0,
                downloaded: 40_000,
                ranged: false,
            }],
        };
        journal.save(&path).unwrap();

        let loaded = Journal::load(&path).unwrap();
        assert!(!loaded.segments[0].ranged);
        assert_eq!(loaded.segments, journal.segments);
    }

    #[test]
    fn compatibility_requires_matching_identity() {
        let journal = sample();
        assert!(journal.compatible_with("https://example.com/large_file.zip", 100_000_000));
        assert!(!journal.compatible_with("https://example.com/other.zip", 100_000_000));
        assert!(!journal.compatible_with("https://example.com/large_file.zip", 999));
    }

    #[test]
    fn compatibility_rejects_gapped_layout() {
        let mut journal = sample();
        journal.segments[2].offset += 1;
        assert!(!journal.compatible_with("https://example.com/large_file.zip", 100_000_000));
    }

    #[test]
    fn compatibility_rejects_overdownloaded_segment() {
        let mut journal = sample();
        journal.segments[1].downloaded = journal.segments[1].size + 1;
        assert!(!journal.compatible_with("https://example.com/large_file.zip", 100_000_000));
    }

    #[test]
    fn remove_tolerates_missing_file() {
        Journal::remove(Path::new("never_existed.bin"));
    }

    #[test]
    fn save_replaces_existing_journal_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.zip.boltmeta");

        let mut journal = sample();
        journal.save(&path).unwrap();
        journal.downloaded = 99_000_000;
        journal.save(&path).unwrap();

        let loaded = Journal::load(&path).unwrap();
        assert_eq!(loaded.downloaded, 99_000_000);
    }
}
