use clap::Parser;

/// A parallel segmented download accelerator.
///
/// Splits the resource into byte ranges downloaded over concurrent
/// connections, survives stalls and crashes, and resumes interrupted
/// downloads from a `.boltmeta` journal next to the output file.
#[derive(Parser, Debug)]
#[command(name = "bolt", version, disable_version_flag = true, about, long_about = None)]
pub struct Args {
    /// URL(s) to download.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output file name (single URL only).
    #[arg(short, long)]
    pub output: Option<String>,

    /// Directory to download into.
    #[arg(short, long)]
    pub directory: Option<String>,

    /// Number of segments; 0 picks automatically from the file size.
    #[arg(short = 'n', long, default_value_t = 0)]
    pub segments: u32,

    /// Only fetch and print resource information (HEAD).
    #[arg(short, long)]
    pub info: bool,

    /// Verbose logging.
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Suppress the progress display.
    #[arg(short, long)]
    pub quiet: bool,

    /// Print version.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}
