//! HLS manifest resolution and concurrent segment retrieval.
//!
//! The engine resolves a master/media playlist chain, picks the best-quality
//! variant, detects content protection, and retrieves every segment into one
//! local file with bounded concurrency, retries and a tiered fallback
//! between an external downloader (yt-dlp), a native mux tool (ffmpeg) and a
//! manual worker pool. A playlist-free template mode fetches numbered
//! segment URLs directly.

pub mod assemble;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod naming;
pub mod playlist;
pub mod progress;
pub mod retriever;
pub mod retry;
pub mod strategy;
pub mod template;
pub mod tools;

pub use assemble::assemble;
pub use config::{DEFAULT_CONCURRENCY, HttpConfig, RetrieverConfig, SUCCESS_RATIO_THRESHOLD};
pub use error::DownloadError;
pub use fetcher::{HttpFetcher, SegmentSource};
pub use playlist::{MediaPlaylist, Playlist, SegmentRef, Variant, parse, resolve_chain, select_best};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use retriever::{ConcurrentRetriever, RetrievalOutcome, RetrievalSummary};
pub use retry::RetryPolicy;
pub use strategy::{
    DownloadOutcome, DownloadRequest, RetrievalPlan, RetrievalStrategy, TemplateRequest, Tier,
};
pub use template::{MAX_CONSECUTIVE_MISSING, SegmentTemplate, TemplateRetriever};
pub use tools::ToolPaths;
