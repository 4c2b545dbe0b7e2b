use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use tsget_engine::config::DEFAULT_USER_AGENT;

/// Download an HLS stream into a single local file.
#[derive(Debug, Parser)]
#[command(name = "tsget", version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["m3u8", "template"])))]
pub struct Args {
    /// URL of the .m3u8 playlist (master or media).
    #[arg(long = "m3u8", value_name = "URL")]
    pub m3u8: Option<String>,

    /// URL template with an {index} placeholder,
    /// e.g. https://host/segment_{index:03d}.ts
    #[arg(long, value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Start index for template mode.
    #[arg(long, default_value_t = 1)]
    pub start: usize,

    /// End index (inclusive) for template mode. If omitted, stop after a
    /// run of missing segments.
    #[arg(long)]
    pub end: Option<usize>,

    /// Output .ts path. Defaults to a name derived from the manifest URL.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Also remux the result into this MP4 (requires ffmpeg); the .ts is
    /// removed on success.
    #[arg(long, value_name = "PATH")]
    pub mp4: Option<PathBuf>,

    /// Referer header value to send.
    #[arg(long)]
    pub referer: Option<String>,

    /// User-Agent header.
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Extra header as 'Key: Value' (repeatable).
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Parallel segment downloads.
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Per-request retry count.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// HTTP timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Keep the downloaded segments directory.
    #[arg(long)]
    pub keep_temp: bool,

    /// Never use yt-dlp, even when installed.
    #[arg(long)]
    pub no_ytdlp: bool,

    /// Never use ffmpeg, even when installed.
    #[arg(long)]
    pub no_ffmpeg: bool,

    /// Verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Split one `--header "Key: Value"` argument. Arguments without a colon
/// are ignored, matching curl-style leniency.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}
