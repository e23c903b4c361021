//! bolt — parallel segmented download engine
//!
//! `bolt` downloads a single HTTP(S) resource faster than a naive client
//! by fetching disjoint byte ranges concurrently, writing them into a
//! pre-allocated file at their final offsets, and recovering
//! automatically from stalls and partial failures.
//!
//! # Core pieces
//!
//! - **`DownloadEngine`**: lifecycle and the monitor loop. Restarts
//!   stalled workers, steals work from slow segments, splits large
//!   in-flight segments when capacity is spare, and checkpoints a resume
//!   journal every few seconds.
//! - **`DownloadManager`**: registry of engines by numeric id, for
//!   front ends that juggle several downloads at once.
//! - **Segment workers**: one ranged GET per segment, streaming chunks
//!   straight to the positional file sink.
//! - **Resume journal**: a `.boltmeta` sidecar; an interrupted download
//!   picks up where it stopped, byte-exact.
//!
//! The library is written so the CLI reuses the same primitives; embed
//! it by creating an engine, installing a progress callback and awaiting
//! [`DownloadEngine::wait`].
//!
//! # Example
//!
//! ```no_run
//! # async {
//! let engine = bolt::DownloadEngine::new();
//! engine.set_url("https://example.com/file.zip")?;
//! engine.callback(|p| println!("{:.1}%", p.percent()));
//! engine.start().await?;
//! engine.wait().await;
//! # Ok::<(), bolt::DownloadError>(())
//! # };
//! ```

pub mod client;
pub mod coalescer;
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod manager;
pub mod planner;
pub mod progress;
pub mod segment;
pub mod sink;
pub mod url;
mod worker;

pub use client::{HttpClient, ResourceInfo};
pub use config::{DownloadConfig, Profile};
pub use engine::{DownloadEngine, EngineState, ProgressCallback};
pub use error::{DownloadError, ErrorKind, Result};
pub use journal::Journal;
pub use manager::DownloadManager;
pub use progress::{Progress, SegmentSnapshot};
pub use segment::SegmentState;
pub use url::Url;
