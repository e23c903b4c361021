//! Segment workers: one streaming ranged GET per segment.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::HttpClient;
use crate::config::{RETRY_BACKOFF, RETRY_COUNT};
use crate::error::{DownloadError, Result};
use crate::segment::{Segment, SegmentState};
use crate::sink::FileSink;
use crate::url::Url;

/// Everything a worker task needs to run one segment.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub segment: Arc<Segment>,
    pub url: Url,
    pub client: Arc<HttpClient>,
    pub sink: Arc<FileSink>,
    pub cancel: CancellationToken,
}

/// Handle to a spawned worker.
pub(crate) struct WorkerHandle {
    pub segment: Arc<Segment>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker task for `segment`.
    pub fn spawn(
        segment: Arc<Segment>,
        url: Url,
        client: Arc<HttpClient>,
        sink: Arc<FileSink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            segment: Arc::clone(&segment),
            url,
            client,
            sink,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run(ctx));
        Self { segment, cancel, task }
    }

    pub fn id(&self) -> u32 {
        self.segment.id()
    }

    /// Request cancellation and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// Cancel without waiting; used from non-async teardown.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

enum Attempt {
    /// The segment reached its byte target or clean EOF.
    Complete,
    /// The range boundary moved under us (work stealing); re-check.
    Boundary,
}

/// Drive one segment to a terminal state.
///
/// Transient transport failures retry with a fixed backoff, restarting
/// the range from the live `downloaded` offset so no byte is fetched
/// twice. Making progress resets the retry counter.
pub(crate) async fn run(ctx: WorkerContext) {
    let segment = &ctx.segment;
    let mut attempts = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        if segment.is_ranged() && segment.downloaded() >= segment.size() {
            segment.set_state(SegmentState::Completed);
            return;
        }

        segment.set_state(SegmentState::Connecting);
        segment.touch();
        let before = segment.downloaded();

        match attempt(&ctx).await {
            Ok(Attempt::Complete) => {
                segment.reset_speed();
                segment.set_state(SegmentState::Completed);
                return;
            }
            Ok(Attempt::Boundary) => continue,
            Err(DownloadError::Cancelled) => {
                segment.reset_speed();
                return;
            }
            Err(err) if err.is_transient() => {
                if segment.downloaded() > before {
                    attempts = 0;
                }
                attempts += 1;
                if attempts > RETRY_COUNT {
                    warn!(segment = segment.id(), %err, "retries exhausted");
                    segment.reset_speed();
                    segment.fail(&err);
                    return;
                }
                debug!(
                    segment = segment.id(),
                    attempt = attempts,
                    %err,
                    "transient failure, backing off"
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    _ = sleep(RETRY_BACKOFF) => {}
                }
            }
            Err(err) => {
                warn!(segment = segment.id(), %err, "segment failed");
                segment.reset_speed();
                segment.fail(&err);
                return;
            }
        }
    }
}

/// One connection attempt: open the range and stream it to the sink.
async fn attempt(ctx: &WorkerContext) -> Result<Attempt> {
    let segment = &ctx.segment;

    let start = segment.offset() + segment.downloaded();
    let length = if segment.is_ranged() {
        segment.size().saturating_sub(segment.downloaded())
    } else {
        0
    };

    let mut body = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        opened = ctx.client.get_range(&ctx.url, start, length) => opened?,
    };

    // A 200 to a mid-stream range request means the server replayed the
    // whole body; restart accounting from byte zero.
    if start > 0 && !body.is_partial() {
        debug!(segment = segment.id(), "server ignored range, restarting from 0");
        segment.set_downloaded(0);
    }

    segment.set_state(SegmentState::Downloading);
    segment.touch();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = body.chunk() => chunk?,
        };

        let Some(mut chunk) = chunk else {
            // End of stream. A zero size means the total was unknown, so
            // EOF is the only completion signal we get.
            if segment.size() == 0 || segment.downloaded() >= segment.size() {
                return Ok(Attempt::Complete);
            }
            // The server closed early with bytes still owed.
            return Err(DownloadError::ConnectionLost);
        };

        if segment.is_ranged() {
            // The range may have been shrunk by a steal since the request
            // went out; never write past the current boundary.
            let remaining = segment.size().saturating_sub(segment.downloaded());
            if remaining == 0 {
                return Ok(Attempt::Boundary);
            }
            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }
        }

        let len = chunk.len() as u64;
        ctx.sink
            .write_at(segment.file_offset() + segment.downloaded(), chunk)
            .await?;
        segment.add_downloaded(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Network behavior is exercised end to end in tests/; here we only
    // check the handle plumbing the engine relies on.

    #[tokio::test]
    async fn stop_joins_the_task() {
        let segment = Arc::new(Segment::new(0, 0, 1024, 0));
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FileSink::create(&dir.path().join("out"), 0).unwrap());
        let client =
            Arc::new(HttpClient::new(&crate::config::DownloadConfig::default()).unwrap());
        let url = Url::parse("http://127.0.0.1:9/never").unwrap();

        let handle = WorkerHandle::spawn(segment, url, client, sink);
        handle.stop().await;
    }

    #[tokio::test]
    async fn exhausted_ranged_segment_completes_without_io() {
        let segment = Arc::new(Segment::new(0, 100, 50, 100));
        segment.set_downloaded(50);

        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FileSink::create(&dir.path().join("out"), 0).unwrap());
        let client =
            Arc::new(HttpClient::new(&crate::config::DownloadConfig::default()).unwrap());
        let url = Url::parse("http://127.0.0.1:9/never").unwrap();

        let handle = WorkerHandle::spawn(Arc::clone(&segment), url, client, sink);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle.task).await;
        assert_eq!(segment.state(), SegmentState::Completed);
    }
}
