//! Minimal library walkthrough: one engine, one progress callback.

use bolt::{DownloadConfig, DownloadEngine, EngineState, Profile};
use indicatif::HumanBytes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = "https://proof.ovh.net/files/10Mb.dat";

    println!("Downloading {url}");

    let engine = DownloadEngine::new();
    engine.set_url(url)?;
    engine.config(DownloadConfig {
        profile: Profile::Conservative,
        ..DownloadConfig::default()
    });
    engine.callback(|progress| {
        println!(
            "{:5.1}%  {}/s  ({} segments active)",
            progress.percent(),
            HumanBytes(progress.speed_bps),
            progress.active_segments,
        );
    });

    engine.start().await?;
    match engine.wait().await {
        EngineState::Completed => {
            println!(
                "done: {}",
                engine
                    .output()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            Ok(())
        }
        state => Err(format!("download ended in state {state}").into()),
    }
}
