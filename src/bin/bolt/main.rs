//! Command-line front end.
//!
//! Thin glue over the library: parses arguments, renders engine progress
//! with `indicatif`, and maps terminal engine states to exit codes.

mod args;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use args::Args;
use clap::Parser;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tracing::debug;

use bolt::{
    DownloadConfig, DownloadEngine, EngineState, HttpClient, Progress, Url,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if args.urls.len() > 1 && args.output.is_some() {
        eprintln!("warning: --output is ignored when downloading multiple URLs");
    }

    let mut ok = true;
    for url in &args.urls {
        let result = if args.info {
            print_info(url).await
        } else {
            download(url, &args).await
        };
        if let Err(err) = result {
            eprintln!("error: {url}: {err:#}");
            ok = false;
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = if args.quiet {
        "error"
    } else if args.verbose {
        "bolt=debug,info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

/// HEAD the resource and print what the server told us.
async fn print_info(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;
    let client = HttpClient::new(&DownloadConfig::default())?;
    let info = client.head(&parsed).await?;

    println!("URL:            {parsed}");
    println!("Status:         {}", info.status);
    if info.content_length > 0 {
        println!(
            "Size:           {} ({} bytes)",
            HumanBytes(info.content_length),
            info.content_length
        );
    } else {
        println!("Size:           unknown");
    }
    let content_type = if info.content_type.is_empty() {
        "unknown"
    } else {
        info.content_type.as_str()
    };
    println!("Type:           {content_type}");
    println!("Ranges:         {}", if info.accepts_ranges { "yes" } else { "no" });
    println!(
        "Filename:       {}",
        info.filename.clone().unwrap_or_else(|| parsed.filename())
    );
    if let Some(etag) = &info.etag {
        println!("ETag:           {etag}");
    }
    if let Some(modified) = &info.last_modified {
        println!("Last-Modified:  {modified}");
    }
    Ok(())
}

/// Run one download to a terminal state.
async fn download(url: &str, args: &Args) -> Result<()> {
    let engine = DownloadEngine::new();
    engine.set_url(url)?;
    engine.config(DownloadConfig {
        segments: args.segments,
        ..DownloadConfig::default()
    });

    if let Some(path) = output_path(url, args) {
        engine.output_path(path);
    }

    let bar = if args.quiet {
        None
    } else {
        Some(progress_bar(&engine))
    };

    // Ctrl-C pauses gracefully: the journal stays next to the output so
    // rerunning the same command resumes the download.
    let pause_target = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, saving progress...");
            let _ = pause_target.pause().await;
            std::process::exit(1);
        }
    });

    engine.start().await?;
    let state = engine.wait().await;

    match state {
        EngineState::Completed => {
            let progress = engine.progress();
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            println!(
                "{} ({}, avg {}/s)",
                engine
                    .output()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "download".into()),
                HumanBytes(progress.downloaded_bytes),
                HumanBytes(progress.average_speed_bps),
            );
            Ok(())
        }
        EngineState::Cancelled => {
            if let Some(bar) = bar {
                bar.abandon();
            }
            anyhow::bail!("cancelled")
        }
        _ => {
            if let Some(bar) = bar {
                bar.abandon();
            }
            match engine.failure() {
                Some((kind, message)) => anyhow::bail!("{message} ({kind})"),
                None => anyhow::bail!("download failed"),
            }
        }
    }
}

fn output_path(url: &str, args: &Args) -> Option<PathBuf> {
    let output = if args.urls.len() == 1 { args.output.clone() } else { None };
    match (&args.directory, output) {
        (Some(dir), Some(name)) => Some(PathBuf::from(dir).join(name)),
        (Some(dir), None) => {
            let name = Url::parse(url).map(|u| u.filename()).unwrap_or_default();
            Some(PathBuf::from(dir).join(name))
        }
        (None, Some(name)) => Some(PathBuf::from(name)),
        (None, None) => None,
    }
}

/// Wire an indicatif bar into the engine's observer callback.
fn progress_bar(engine: &Arc<DownloadEngine>) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap()
        .progress_chars("=>-"),
    );

    let render = bar.clone();
    engine.callback(move |progress: &Progress| {
        if progress.total_bytes > 0 && render.length() != Some(progress.total_bytes) {
            render.set_length(progress.total_bytes);
        }
        render.set_position(progress.downloaded_bytes);
        render.set_message(format!(
            "{} up, {} done, {} failed",
            progress.active_segments, progress.completed_segments, progress.failed_segments
        ));
    });

    debug!("progress bar attached");
    bar
}
