//! The download engine: lifecycle, monitor loop and adaptive control.
//!
//! One engine drives one resource to disk. It owns the HTTP client, the
//! file sink, the segment set and two kinds of tasks: a worker per
//! segment and a single monitor that restarts stalled workers, steals
//! work from slow segments, splits large in-flight segments when worker
//! capacity is spare, aggregates progress for observers, and snapshots
//! the resume journal.
//!
//! Teardown ordering is load-bearing: publish the terminal state, stop
//! and await the monitor, then cancel and await every worker, and only
//! then flush and close the sink. The monitor iterates the segment set,
//! so it must be gone before segments are torn down.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HttpClient, ResourceInfo};
use crate::config::{
    DownloadConfig, JOURNAL_SAVE_INTERVAL, MONITOR_INTERVAL, SLOW_SEGMENT_BPS, STEAL_MIN_KEEP,
};
use crate::error::{DownloadError, ErrorKind, Result};
use crate::journal::{Journal, SegmentRecord};
use crate::planner;
use crate::progress::{Progress, SegmentSnapshot};
use crate::segment::{Segment, SegmentState};
use crate::sink::FileSink;
use crate::url::Url;
use crate::worker::WorkerHandle;

/// Observer invoked with an aggregate snapshot on every monitor tick.
///
/// Called with no engine lock held; panics inside the callback are
/// swallowed.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync + 'static>;

/// Engine state machine. `Completed`, `Failed` and `Cancelled` are
/// terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preparing,
    Downloading,
    Paused,
    Stalled,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Failed | EngineState::Cancelled
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Preparing => "preparing",
            EngineState::Downloading => "downloading",
            EngineState::Paused => "paused",
            EngineState::Stalled => "stalled",
            EngineState::Completing => "completing",
            EngineState::Completed => "completed",
            EngineState::Failed => "failed",
            EngineState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Parallel segmented download of a single HTTP(S) resource.
pub struct DownloadEngine {
    config: Mutex<DownloadConfig>,
    url: Mutex<Option<Url>>,
    output_override: Mutex<Option<PathBuf>>,
    output: Mutex<Option<PathBuf>>,
    filename: Mutex<Option<String>>,
    info: Mutex<Option<ResourceInfo>>,
    client: Mutex<Option<Arc<HttpClient>>>,
    sink: Mutex<Option<Arc<FileSink>>>,
    segments: RwLock<Vec<Arc<Segment>>>,
    next_segment_id: AtomicU32,
    total_size: AtomicU64,
    workers: AsyncMutex<Vec<WorkerHandle>>,
    monitor: AsyncMutex<Option<(CancellationToken, JoinHandle<()>)>>,
    state_tx: watch::Sender<EngineState>,
    progress: Mutex<Progress>,
    // The callback slot has its own lock so the write path and the
    // progress path never contend.
    callback: Mutex<Option<ProgressCallback>>,
    prepare_error: Mutex<Option<(ErrorKind, String)>>,
    started_at: Mutex<Option<Instant>>,
}

impl DownloadEngine {
    pub fn new() -> Arc<Self> {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Arc::new(Self {
            config: Mutex::new(DownloadConfig::default()),
            url: Mutex::new(None),
            output_override: Mutex::new(None),
            output: Mutex::new(None),
            filename: Mutex::new(None),
            info: Mutex::new(None),
            client: Mutex::new(None),
            sink: Mutex::new(None),
            segments: RwLock::new(Vec::new()),
            next_segment_id: AtomicU32::new(0),
            total_size: AtomicU64::new(0),
            workers: AsyncMutex::new(Vec::new()),
            monitor: AsyncMutex::new(None),
            state_tx,
            progress: Mutex::new(Progress::default()),
            callback: Mutex::new(None),
            prepare_error: Mutex::new(None),
            started_at: Mutex::new(None),
        })
    }

    /// Set (and validate) the URL to download.
    pub fn set_url(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)?;
        *self.url.lock().unwrap() = Some(parsed);
        Ok(())
    }

    /// Override the output path. By default the filename is derived from
    /// the server response or the URL.
    pub fn output_path(&self, path: impl Into<PathBuf>) {
        *self.output_override.lock().unwrap() = Some(path.into());
    }

    pub fn config(&self, config: DownloadConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Install the observer callback.
    pub fn callback<F>(&self, callback: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        *self.callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Aggregate progress snapshot.
    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    /// Per-segment snapshots, for segment-level UIs.
    pub fn segment_progress(&self) -> Vec<SegmentSnapshot> {
        self.segments
            .read()
            .unwrap()
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Total size reported by the server; 0 while unknown.
    pub fn file_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    /// Resolved output filename, available after preparation.
    pub fn filename(&self) -> Option<String> {
        self.filename.lock().unwrap().clone()
    }

    pub fn content_type(&self) -> Option<String> {
        self.info
            .lock()
            .unwrap()
            .as_ref()
            .map(|i| i.content_type.clone())
    }

    /// Resolved output path, available after preparation.
    pub fn output(&self) -> Option<PathBuf> {
        self.output.lock().unwrap().clone()
    }

    /// Why the engine failed, once it has.
    pub fn failure(&self) -> Option<(ErrorKind, String)> {
        if let Some(err) = self.prepare_error.lock().unwrap().clone() {
            return Some(err);
        }
        self.segments
            .read()
            .unwrap()
            .iter()
            .find_map(|s| s.error())
    }

    /// Wait until the engine reaches a terminal state.
    pub async fn wait(&self) -> EngineState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Prepare and launch the download.
    ///
    /// HEADs the resource, restores a compatible resume journal or plans
    /// a fresh segmentation, opens the sink and spawns the workers and
    /// the monitor. Fails without creating the output file when the HEAD
    /// itself fails.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.try_transition(EngineState::Idle, EngineState::Preparing) {
            return Err(DownloadError::Network(format!(
                "cannot start from state {}",
                self.state()
            )));
        }

        if let Err(err) = self.prepare().await {
            *self.prepare_error.lock().unwrap() = Some((err.kind(), err.to_string()));
            self.set_state(EngineState::Failed);
            return Err(err);
        }

        self.launch().await;
        Ok(())
    }

    /// Pause the download, saving the journal for a later resume.
    ///
    /// In-flight workers cease at their next chunk boundary; their byte
    /// counters stay truthful for the resume.
    pub async fn pause(&self) -> Result<()> {
        if !matches!(self.state(), EngineState::Downloading | EngineState::Stalled) {
            return Err(DownloadError::Network(format!(
                "cannot pause from state {}",
                self.state()
            )));
        }
        self.save_journal().await;
        self.set_state(EngineState::Paused);
        self.stop_monitor().await;
        self.stop_workers(Some(SegmentState::Stalled)).await;
        // Counters have settled now that every worker ceased.
        self.save_journal().await;
        info!("download paused");
        Ok(())
    }

    /// Resume a paused download: restart incomplete workers and a fresh
    /// monitor.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        if self.state() != EngineState::Paused {
            return Err(DownloadError::Network(format!(
                "cannot resume from state {}",
                self.state()
            )));
        }
        self.launch().await;
        info!("download resumed");
        Ok(())
    }

    /// Cancel the download. The partial file and its journal stay on
    /// disk so the download can be picked up again later.
    pub async fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.set_state(EngineState::Cancelled);
        self.stop_monitor().await;
        self.stop_workers(Some(SegmentState::Cancelled)).await;
        self.close_sink().await;
        info!("download cancelled");
    }

    // ---- preparation -----------------------------------------------------

    async fn prepare(self: &Arc<Self>) -> Result<()> {
        let url = self
            .url
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DownloadError::InvalidUrl("no URL set".into()))?;
        let cfg = self.config.lock().unwrap().clone();

        let client = Arc::new(HttpClient::new(&cfg)?);
        *self.client.lock().unwrap() = Some(Arc::clone(&client));

        let resource = client.head(&url).await?;
        let total = resource.content_length;

        let filename = resource
            .filename
            .clone()
            .unwrap_or_else(|| url.filename());
        let output = self
            .output_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| PathBuf::from(&filename));

        self.total_size.store(total, Ordering::Relaxed);
        *self.filename.lock().unwrap() = Some(filename);
        *self.info.lock().unwrap() = Some(resource.clone());
        *self.output.lock().unwrap() = Some(output.clone());

        let restored = self.load_journal(&url, total, &output);
        let (segments, sink) = match restored {
            Some(records) => {
                let sink = Arc::new(FileSink::resume(&output, total)?);
                let segments = records
                    .iter()
                    .map(|r| Arc::new(restore_segment(r)))
                    .collect::<Vec<_>>();
                info!(
                    segments = segments.len(),
                    downloaded = segments.iter().map(|s| s.downloaded()).sum::<u64>(),
                    "resuming from journal"
                );
                (segments, sink)
            }
            None => {
                let plan = planner::plan(total, resource.accepts_ranges, cfg.segments, cfg.profile);
                let sink = Arc::new(FileSink::create(&output, total)?);
                let segments = plan
                    .iter()
                    .map(|p| {
                        Arc::new(if p.ranged {
                            Segment::new(p.id, p.offset, p.size, p.file_offset)
                        } else {
                            Segment::unranged(p.size)
                        })
                    })
                    .collect::<Vec<_>>();
                info!(total, segments = segments.len(), "planned fresh download");
                (segments, sink)
            }
        };

        let next_id = segments.iter().map(|s| s.id() + 1).max().unwrap_or(0);
        self.next_segment_id.store(next_id, Ordering::Relaxed);
        *self.sink.lock().unwrap() = Some(sink);
        *self.segments.write().unwrap() = segments;
        *self.started_at.lock().unwrap() = Some(Instant::now());
        {
            let mut progress = self.progress.lock().unwrap();
            *progress = Progress::default();
            progress.total_bytes = total;
        }
        self.save_journal().await;
        Ok(())
    }

    fn load_journal(&self, url: &Url, total: u64, output: &std::path::Path) -> Option<Vec<SegmentRecord>> {
        if !Journal::exists(output) {
            return None;
        }
        match Journal::load(&Journal::meta_path(output)) {
            Ok(journal) if journal.compatible_with(&url.full(), total) => Some(journal.segments),
            Ok(_) => {
                debug!("incompatible resume journal, starting fresh");
                None
            }
            Err(err) => {
                debug!(%err, "unreadable resume journal, starting fresh");
                None
            }
        }
    }

    /// Spawn workers for every incomplete segment plus the monitor.
    async fn launch(self: &Arc<Self>) {
        let (url, client, sink) = self.io_handles();
        {
            let segments = self.segments.read().unwrap().clone();
            let mut workers = self.workers.lock().await;
            for segment in segments {
                if segment.state().is_terminal() {
                    continue;
                }
                workers.push(WorkerHandle::spawn(
                    segment,
                    url.clone(),
                    Arc::clone(&client),
                    Arc::clone(&sink),
                ));
            }
        }
        self.set_state(EngineState::Downloading);

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::monitor_loop(Arc::clone(self), token.clone()));
        *self.monitor.lock().await = Some((token, handle));
    }

    fn io_handles(&self) -> (Url, Arc<HttpClient>, Arc<FileSink>) {
        let url = self.url.lock().unwrap().clone().expect("url set in prepare");
        let client = self
            .client
            .lock()
            .unwrap()
            .clone()
            .expect("client built in prepare");
        let sink = self.sink.lock().unwrap().clone().expect("sink opened in prepare");
        (url, client, sink)
    }

    // ---- monitor ---------------------------------------------------------

    async fn monitor_loop(engine: Arc<Self>, cancel: CancellationToken) {
        enum Outcome {
            Completed,
            Failed,
            Stopped,
        }

        let cfg = engine.config.lock().unwrap().clone();
        let mut last_save = Instant::now();
        let mut last_bytes = 0u64;
        let mut last_advance = Instant::now();

        let outcome = loop {
            if cancel.is_cancelled() {
                break Outcome::Stopped;
            }
            if !matches!(
                engine.state(),
                EngineState::Downloading | EngineState::Stalled
            ) {
                break Outcome::Stopped;
            }

            let segments = engine.segments.read().unwrap().clone();

            for segment in &segments {
                if segment.is_stalled(cfg.stall_timeout) {
                    warn!(segment = segment.id(), "segment stalled, restarting");
                    segment.set_state(SegmentState::Stalled);
                    engine.restart_worker(segment).await;
                }
            }

            engine.reclaim_failed_tails();

            if cfg.work_stealing {
                engine.attempt_work_stealing().await;
            }
            if cfg.dynamic_segmentation {
                engine.attempt_resegmentation(&cfg).await;
            }

            // Structural passes may have changed the segment set.
            let segments = engine.segments.read().unwrap().clone();
            let snapshot = engine.update_progress(&segments);

            let (mut completed, mut failed) = (0usize, 0usize);
            for segment in &segments {
                match segment.state() {
                    SegmentState::Completed => completed += 1,
                    SegmentState::Failed => failed += 1,
                    _ => {}
                }
            }
            if completed == segments.len() {
                break Outcome::Completed;
            }
            if failed > 0 && completed + failed == segments.len() {
                break Outcome::Failed;
            }

            // Engine-level stall signal: bytes stopped moving everywhere.
            if snapshot.downloaded_bytes != last_bytes {
                last_bytes = snapshot.downloaded_bytes;
                last_advance = Instant::now();
                if engine.state() == EngineState::Stalled {
                    engine.set_state(EngineState::Downloading);
                }
            } else if last_advance.elapsed() >= cfg.stall_timeout
                && engine.state() == EngineState::Downloading
            {
                warn!("no progress on any segment");
                engine.set_state(EngineState::Stalled);
            }

            engine.emit(&snapshot);

            if last_save.elapsed() >= JOURNAL_SAVE_INTERVAL {
                engine.save_journal().await;
                last_save = Instant::now();
            }

            tokio::select! {
                _ = cancel.cancelled() => break Outcome::Stopped,
                _ = sleep(MONITOR_INTERVAL) => {}
            }
        };

        match outcome {
            Outcome::Completed => {
                engine.set_state(EngineState::Completing);
                engine.stop_workers(None).await;
                engine.close_sink().await;
                if let Some(output) = engine.output() {
                    Journal::remove(&output);
                }
                engine.set_state(EngineState::Completed);
                let segments = engine.segments.read().unwrap().clone();
                let snapshot = engine.update_progress(&segments);
                engine.emit(&snapshot);
                info!(bytes = snapshot.downloaded_bytes, "download completed");
            }
            Outcome::Failed => {
                engine.save_journal().await;
                engine.stop_workers(None).await;
                engine.close_sink().await;
                engine.set_state(EngineState::Failed);
                let segments = engine.segments.read().unwrap().clone();
                let snapshot = engine.update_progress(&segments);
                engine.emit(&snapshot);
                warn!("download failed, journal kept for resume");
            }
            // Pause and cancel drive their own teardown.
            Outcome::Stopped => {}
        }
    }

    /// Restart the worker of one segment from its live offset.
    async fn restart_worker(self: &Arc<Self>, segment: &Arc<Segment>) {
        {
            let mut workers = self.workers.lock().await;
            if let Some(pos) = workers.iter().position(|w| w.id() == segment.id()) {
                let handle = workers.swap_remove(pos);
                drop(workers);
                handle.stop().await;
            }
        }
        if segment.state().is_terminal() {
            return;
        }
        let (url, client, sink) = self.io_handles();
        self.workers
            .lock()
            .await
            .push(WorkerHandle::spawn(Arc::clone(segment), url, client, sink));
    }

    /// Give the range of a failed, untouched tail segment back to the
    /// segment that precedes it, so one bad connection does not doom the
    /// whole download.
    fn reclaim_failed_tails(&self) {
        let mut segments = self.segments.write().unwrap();
        let mut index = 0;
        while index < segments.len() {
            let candidate = Arc::clone(&segments[index]);
            let reclaimable = candidate.state() == SegmentState::Failed
                && candidate.downloaded() == 0
                && candidate.is_ranged();
            if reclaimable {
                let upstream = segments
                    .iter()
                    .find(|s| {
                        s.id() != candidate.id()
                            && s.is_ranged()
                            && !s.state().is_terminal()
                            && s.offset() + s.size() == candidate.offset()
                    })
                    .cloned();
                if let Some(upstream) = upstream {
                    info!(
                        failed = candidate.id(),
                        into = upstream.id(),
                        bytes = candidate.size(),
                        "reassigning failed tail range"
                    );
                    upstream.add_bytes(candidate.size());
                    segments.remove(index);
                    continue;
                }
            }
            index += 1;
        }
    }

    /// Shrink the slowest donor and start a fresh worker on the freed
    /// tail. The donor keeps streaming toward its new, closer end.
    async fn attempt_work_stealing(self: &Arc<Self>) {
        let segments = self.segments.read().unwrap().clone();
        let speeds: Vec<u64> = segments
            .iter()
            .filter(|s| s.state() == SegmentState::Downloading)
            .map(|s| s.speed_bps())
            .collect();
        if speeds.len() < 2 {
            return;
        }
        let fast = speeds.iter().copied().max().unwrap_or(0);
        let slow = speeds.iter().copied().min().unwrap_or(0);
        if !planner::should_steal(fast, slow) {
            return;
        }

        let donor = segments
            .iter()
            .filter(|s| s.state() == SegmentState::Downloading)
            .filter(|s| s.speed_bps() < SLOW_SEGMENT_BPS)
            .max_by_key(|s| s.can_steal(STEAL_MIN_KEEP));
        let Some(donor) = donor else { return };

        let bytes = donor.can_steal(STEAL_MIN_KEEP);
        if bytes == 0 {
            return;
        }
        let new_size = donor.size() - bytes;
        if donor.downloaded() > new_size {
            // The donor crossed the boundary since we looked; skip this
            // tick rather than lose bytes.
            return;
        }

        donor.steal_bytes(bytes);
        let tail_offset = donor.offset() + new_size;
        info!(donor = donor.id(), bytes, "stealing tail from slow segment");
        self.spawn_tail_segment(tail_offset, bytes).await;
    }

    /// Split the largest in-flight segment when worker capacity is
    /// spare, so the tail downloads on its own connection.
    async fn attempt_resegmentation(self: &Arc<Self>, cfg: &DownloadConfig) {
        let segments = self.segments.read().unwrap().clone();
        let live = segments
            .iter()
            .filter(|s| !s.state().is_terminal())
            .count() as u32;
        let max = if cfg.segments > 0 {
            cfg.segments
        } else {
            cfg.profile.max_segments()
        };
        if live >= max {
            return;
        }

        let min_segment = cfg.profile.min_segment_size();
        let victim = segments
            .iter()
            .filter(|s| s.state() == SegmentState::Downloading && s.is_ranged())
            .filter(|s| s.remaining() > 2 * min_segment)
            .max_by_key(|s| s.remaining());
        let Some(victim) = victim else { return };

        let downloaded = victim.downloaded();
        let remaining = victim.size() - downloaded;
        let keep = remaining - remaining / 2;
        let new_end = victim.offset() + downloaded + keep;
        let old_end = victim.offset() + victim.size();
        let tail = old_end - new_end;
        if tail < min_segment {
            return;
        }

        victim.reduce_range(new_end);
        debug!(victim = victim.id(), tail, "splitting in-flight segment");
        self.spawn_tail_segment(new_end, tail).await;
    }

    async fn spawn_tail_segment(self: &Arc<Self>, offset: u64, size: u64) {
        let id = self.next_segment_id.fetch_add(1, Ordering::Relaxed);
        let segment = Arc::new(Segment::new(id, offset, size, offset));
        self.segments.write().unwrap().push(Arc::clone(&segment));
        let (url, client, sink) = self.io_handles();
        self.workers
            .lock()
            .await
            .push(WorkerHandle::spawn(segment, url, client, sink));
    }

    // ---- progress and persistence ---------------------------------------

    fn update_progress(&self, segments: &[Arc<Segment>]) -> Progress {
        let mut downloaded = 0u64;
        let mut speed = 0u64;
        let (mut active, mut completed, mut failed) = (0u32, 0u32, 0u32);

        for segment in segments {
            downloaded += segment.downloaded();
            match segment.state() {
                SegmentState::Connecting | SegmentState::Downloading => {
                    active += 1;
                    speed += segment.speed_bps();
                }
                SegmentState::Completed => completed += 1,
                SegmentState::Failed => failed += 1,
                _ => {}
            }
        }

        let total = self.total_size.load(Ordering::Relaxed);
        let elapsed_ms = self
            .started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let average = if elapsed_ms > 0 {
            downloaded * 1000 / elapsed_ms
        } else {
            0
        };
        let eta = if speed > 0 && total > downloaded {
            (total - downloaded) / speed
        } else {
            0
        };

        let mut progress = self.progress.lock().unwrap();
        progress.total_bytes = total;
        progress.downloaded_bytes = downloaded;
        progress.speed_bps = speed;
        progress.average_speed_bps = average;
        progress.active_segments = active;
        progress.completed_segments = completed;
        progress.failed_segments = failed;
        progress.eta_seconds = eta;
        progress.clone()
    }

    fn emit(&self, snapshot: &Progress) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(snapshot)));
        }
    }

    async fn save_journal(&self) {
        let Some(url) = self.url.lock().unwrap().clone() else {
            return;
        };
        let Some(output) = self.output() else { return };

        let segments = self.segments.read().unwrap().clone();
        let records: Vec<SegmentRecord> = segments
            .iter()
            .map(|s| SegmentRecord {
                id: s.id(),
                offset: s.offset(),
                size: s.size(),
                file_offset: s.file_offset(),
                downloaded: s.downloaded(),
                ranged: s.is_ranged(),
            })
            .collect();
        let journal = Journal {
            url: url.full(),
            output_path: output.display().to_string(),
            total_size: self.total_size.load(Ordering::Relaxed),
            downloaded: records.iter().map(|r| r.downloaded).sum(),
            segments: records,
        };
        let path = Journal::meta_path(&output);
        let saved = tokio::task::spawn_blocking(move || journal.save(&path)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "failed to save resume journal"),
            Err(err) => warn!(%err, "journal save task failed"),
        }
    }

    // ---- teardown --------------------------------------------------------

    fn set_state(&self, next: EngineState) {
        self.state_tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn try_transition(&self, from: EngineState, to: EngineState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    async fn stop_monitor(&self) {
        let taken = self.monitor.lock().await.take();
        if let Some((token, handle)) = taken {
            token.cancel();
            let _ = handle.await;
        }
    }

    /// Cancel and await every worker. Non-terminal segments are moved to
    /// `mark` when given, so pause leaves them restartable and cancel
    /// leaves them cancelled.
    async fn stop_workers(&self, mark: Option<SegmentState>) {
        let handles: Vec<WorkerHandle> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let segment = Arc::clone(&handle.segment);
            handle.stop().await;
            if let Some(state) = mark
                && !segment.state().is_terminal()
            {
                segment.reset_speed();
                segment.set_state(state);
            }
        }
    }

    async fn close_sink(&self) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            if let Err(err) = sink.close().await {
                warn!(%err, "failed to close output file");
            }
        }
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        // Best effort: request every task to stop. Callers that need the
        // full teardown ordering go through cancel() or wait().
        if let Ok(mut monitor) = self.monitor.try_lock()
            && let Some((token, _)) = monitor.take()
        {
            token.cancel();
        }
        if let Ok(workers) = self.workers.try_lock() {
            for worker in workers.iter() {
                worker.abort();
            }
        }
    }
}

fn restore_segment(record: &SegmentRecord) -> Segment {
    let segment = if record.ranged {
        Segment::new(record.id, record.offset, record.size, record.file_offset)
    } else {
        Segment::unranged(record.size)
    };
    segment.set_downloaded(record.downloaded);
    if record.size > 0 && record.downloaded >= record.size {
        segment.set_state(SegmentState::Completed);
    }
    segment
}
