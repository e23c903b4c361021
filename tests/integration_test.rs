//! End-to-end tests against a local mock server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use bolt::journal::{Journal, SegmentRecord};
use bolt::{DownloadConfig, DownloadEngine, DownloadManager, EngineState, ErrorKind};

/// Deterministic test payload.
fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i as u64 * 31 + 7) % 251) as u8).collect()
}

/// Serves `body` honoring `Range: bytes=a-b` requests with 206 replies,
/// like any range-capable origin.
struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeResponder {
    fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    fn delayed(body: Vec<u8>, delay: Duration) -> Self {
        Self { body, delay: Some(delay) }
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse::<u64>().ok()?) };
    Some((start, end))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let template = match range {
            Some((start, _)) if start >= len => ResponseTemplate::new(416),
            Some((start, end)) => {
                let end = end.unwrap_or(len - 1).min(len - 1);
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{len}"))
                    .set_body_raw(
                        self.body[start as usize..=end as usize].to_vec(),
                        "application/octet-stream",
                    )
            }
            None => ResponseTemplate::new(200)
                .set_body_raw(self.body.clone(), "application/octet-stream"),
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Mount a range-capable file at `route`.
async fn mount_file(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .set_body_raw(body.to_vec(), "application/octet-stream"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder::new(body.to_vec()))
        .mount(server)
        .await;
}

fn test_config(segments: u32) -> DownloadConfig {
    DownloadConfig {
        segments,
        // Keep the byte layout deterministic for assertions.
        work_stealing: false,
        dynamic_segmentation: false,
        ..DownloadConfig::default()
    }
}

fn engine_for(url: &str, output: &Path, segments: u32) -> Arc<DownloadEngine> {
    let engine = DownloadEngine::new();
    engine.set_url(url).expect("valid url");
    engine.output_path(output.to_path_buf());
    engine.config(test_config(segments));
    engine
}

#[tokio::test]
async fn multi_segment_download_stitches_file() {
    let body = test_body(1024 * 1024);
    let server = MockServer::start().await;
    mount_file(&server, "/file.bin", &body).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("file.bin");
    let engine = engine_for(&format!("{}/file.bin", server.uri()), &out, 4);

    engine.start().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Completed);

    assert_eq!(std::fs::read(&out).unwrap(), body);
    assert_eq!(engine.progress().downloaded_bytes, body.len() as u64);
    assert!(!Journal::exists(&out), "journal must be gone after success");

    // Every worker asked for its own disjoint range.
    let ranged_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.headers.contains_key("range"))
        .count();
    assert_eq!(ranged_requests, 4);
}

#[tokio::test]
async fn head_failure_leaves_no_file_behind() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("missing.bin");
    let engine = engine_for(&format!("{}/missing.bin", server.uri()), &out, 0);

    let err = engine.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(!out.exists(), "404 must not create the output file");
}

#[tokio::test]
async fn server_without_ranges_downloads_in_one_stream() {
    let body = test_body(300 * 1024);
    let server = MockServer::start().await;
    // HEAD without Accept-Ranges.
    Mock::given(method("HEAD"))
        .and(path("/plain.bin"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.clone(), "application/octet-stream"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("plain.bin");
    let engine = engine_for(&format!("{}/plain.bin", server.uri()), &out, 8);

    engine.start().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Completed);

    assert_eq!(engine.segment_progress().len(), 1, "no ranges means one segment");
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn fresh_416_fails_with_invalid_range_and_keeps_journal() {
    let body = test_body(1024 * 1024);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/odd.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .set_body_raw(body.clone(), "application/octet-stream"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/odd.bin"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("odd.bin");
    let engine = engine_for(&format!("{}/odd.bin", server.uri()), &out, 2);

    engine.start().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Failed);

    let (kind, _) = engine.failure().expect("failure recorded");
    assert_eq!(kind, ErrorKind::InvalidRange);
    assert!(Journal::exists(&out), "failure must preserve the journal");
}

#[tokio::test]
async fn resume_continues_from_journal_without_refetching() {
    let body = test_body(1024 * 1024);
    let half = body.len() as u64 / 2;
    let server = MockServer::start().await;
    mount_file(&server, "/file.bin", &body).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("file.bin");
    let url = format!("{}/file.bin", server.uri());

    // Fake a run that finished its first segment and then died: the first
    // half of the payload is on disk and the journal records it.
    let mut partial = vec![0u8; body.len()];
    partial[..half as usize].copy_from_slice(&body[..half as usize]);
    std::fs::write(&out, &partial).unwrap();

    let journal = Journal {
        url: url.clone(),
        output_path: out.display().to_string(),
        total_size: body.len() as u64,
        downloaded: half,
        segments: vec![
            SegmentRecord { id: 0, offset: 0, size: half, file_offset: 0, downloaded: half, ranged: true },
            SegmentRecord { id: 1, offset: half, size: half, file_offset: half, downloaded: 0, ranged: true },
        ],
    };
    journal.save(&Journal::meta_path(&out)).unwrap();

    let engine = engine_for(&url, &out, 2);
    engine.start().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Completed);
    assert_eq!(std::fs::read(&out).unwrap(), body);

    // The completed first segment must not have been requested again.
    for request in server.received_requests().await.unwrap() {
        if request.method.as_str() != "GET" {
            continue;
        }
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range)
            .expect("resumed GETs are ranged");
        assert!(range.0 >= half, "unexpected refetch from offset {}", range.0);
    }
}

#[tokio::test]
async fn incompatible_journal_is_discarded() {
    let body = test_body(400 * 1024);
    let server = MockServer::start().await;
    mount_file(&server, "/file.bin", &body).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("file.bin");
    let url = format!("{}/file.bin", server.uri());

    // Journal from some other download entirely.
    let journal = Journal {
        url: "https://elsewhere.example/other.bin".into(),
        output_path: out.display().to_string(),
        total_size: 12345,
        downloaded: 12,
        segments: vec![SegmentRecord { id: 0, offset: 0, size: 12345, file_offset: 0, downloaded: 12, ranged: true }],
    };
    journal.save(&Journal::meta_path(&out)).unwrap();

    let engine = engine_for(&url, &out, 0);
    engine.start().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Completed);
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn manager_runs_independent_downloads() {
    let body_a = test_body(300 * 1024);
    let body_b = test_body(200 * 1024);
    let server = MockServer::start().await;
    mount_file(&server, "/a.bin", &body_a).await;
    mount_file(&server, "/b.bin", &body_b).await;

    let dir = tempfile::tempdir().unwrap();
    let out_a = dir.path().join("a.bin");
    let out_b = dir.path().join("b.bin");

    let manager = DownloadManager::new();
    let a = manager
        .create(&format!("{}/a.bin", server.uri()), Some(PathBuf::from(&out_a)))
        .await
        .unwrap();
    let b = manager
        .create(&format!("{}/b.bin", server.uri()), Some(PathBuf::from(&out_b)))
        .await
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(manager.downloads().await, vec![a, b]);

    manager.start(a).await.unwrap();
    manager.start(b).await.unwrap();

    assert_eq!(manager.get(a).await.unwrap().wait().await, EngineState::Completed);
    assert_eq!(manager.get(b).await.unwrap().wait().await, EngineState::Completed);

    assert_eq!(std::fs::read(&out_a).unwrap(), body_a);
    assert_eq!(std::fs::read(&out_b).unwrap(), body_b);

    assert!(manager.remove(a).await);
    assert!(manager.remove(b).await);
    assert!(manager.downloads().await.is_empty());
}

#[tokio::test]
async fn cancel_stops_workers_and_callbacks_promptly() {
    let body = test_body(1024 * 1024);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .set_body_raw(body.clone(), "application/octet-stream"),
        )
        .mount(&server)
        .await;
    // Body delivery hangs long enough that cancel must interrupt it.
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(RangeResponder::delayed(body.clone(), Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("slow.bin");
    let engine = engine_for(&format!("{}/slow.bin", server.uri()), &out, 4);

    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callbacks);
    engine.callback(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(Duration::from_secs(2), engine.cancel())
        .await
        .expect("cancel must join monitor and workers promptly");
    assert_eq!(engine.state(), EngineState::Cancelled);
    assert!(Journal::exists(&out), "cancel keeps the journal for later");

    // No further callbacks once cancel returned.
    let after_cancel = callbacks.load(Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(callbacks.load(Ordering::Relaxed), after_cancel);
}

#[tokio::test]
async fn pause_and_resume_same_engine() {
    let body = test_body(1024 * 1024);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/file.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .set_body_raw(body.clone(), "application/octet-stream"),
        )
        .mount(&server)
        .await;
    // Slow enough that the pause always lands mid-download.
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(RangeResponder::delayed(body.clone(), Duration::from_millis(500)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("file.bin");
    let engine = engine_for(&format!("{}/file.bin", server.uri()), &out, 2);

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.pause().await.unwrap();
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(Journal::exists(&out));

    engine.resume().await.unwrap();
    assert_eq!(engine.wait().await, EngineState::Completed);
    assert_eq!(std::fs::read(&out).unwrap(), body);
}
