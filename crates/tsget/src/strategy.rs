// Tiered retrieval strategy: external tool -> native mux -> manual worker
// pool, modeled as an explicit state machine so the escalation order stays
// auditable and testable in isolation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::{info, warn};
use url::Url;

use crate::assemble::assemble;
use crate::config::{HttpConfig, RetrieverConfig};
use crate::error::DownloadError;
use crate::fetcher::{HttpFetcher, SegmentSource};
use crate::playlist::{MediaPlaylist, resolve_chain};
use crate::retriever::{ConcurrentRetriever, RetrievalSummary};
use crate::retry::RetryPolicy;
use crate::template::{SegmentTemplate, TemplateRetriever};
use crate::tools::{ToolPaths, ffmpeg_download, ffmpeg_remux, ytdlp_download};

/// Immutable decision record computed once per download, after manifest
/// resolution. Owned by the strategy; nothing else mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPlan {
    pub use_external_tool: bool,
    pub use_native_mux: bool,
    pub encrypted: bool,
}

impl RetrievalPlan {
    pub fn new(tools: &ToolPaths, encrypted: bool) -> Self {
        Self {
            use_external_tool: tools.ytdlp.is_some(),
            use_native_mux: tools.ffmpeg.is_some(),
            encrypted,
        }
    }

    /// First tier to try. Encrypted content can never go straight to the
    /// manual retriever, which cannot decrypt.
    pub fn entry_tier(&self) -> Tier {
        if self.use_external_tool {
            Tier::ExternalTool
        } else if self.encrypted {
            Tier::NativeMux
        } else {
            Tier::Manual
        }
    }

    /// Fallback edge out of the external tool tier.
    pub fn after_external(&self) -> Tier {
        if self.encrypted {
            Tier::NativeMux
        } else {
            Tier::Manual
        }
    }
}

/// Retrieval states between `ResolveManifest` and `Assemble`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    ExternalTool,
    NativeMux,
    Manual,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub manifest_url: Url,
    /// Destination of the assembled transport stream.
    pub output_ts: PathBuf,
    /// When set, remux the result into this MP4 and drop the `.ts`.
    pub mp4_output: Option<PathBuf>,
    /// Keep the segment work directory after assembly.
    pub keep_temp: bool,
}

/// Template-mode request: no manifest, segment URLs follow a numbered
/// pattern instead.
#[derive(Debug, Clone)]
pub struct TemplateRequest {
    pub template: SegmentTemplate,
    /// First index to fetch.
    pub start: usize,
    /// Last index (inclusive); `None` means probe until segments run out.
    pub end: Option<usize>,
    pub output_ts: PathBuf,
    pub mp4_output: Option<PathBuf>,
    pub keep_temp: bool,
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub output: PathBuf,
    /// Summary of the manual tier run, when one happened.
    pub summary: Option<RetrievalSummary>,
}

pub struct RetrievalStrategy {
    http: HttpConfig,
    retriever: RetrieverConfig,
    tools: ToolPaths,
}

impl RetrievalStrategy {
    pub fn new(http: HttpConfig, retriever: RetrieverConfig, tools: ToolPaths) -> Self {
        Self {
            http,
            retriever,
            tools,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retriever.max_retries,
            base_delay: self.retriever.backoff_base,
            max_delay: self.retriever.max_backoff,
            jitter: false,
        }
    }

    /// Run one download to completion: resolve the manifest chain, pick a
    /// tier, escalate on failure, assemble. Returns the output path or one
    /// typed terminal error.
    pub async fn run(&self, request: &DownloadRequest) -> Result<DownloadOutcome, DownloadError> {
        // ResolveManifest: failure here is terminal, nothing is known yet.
        let playlist_fetcher =
            HttpFetcher::new(&self.http, self.http.header_map(), self.retry_policy())?;
        let media = resolve_chain(&playlist_fetcher, &request.manifest_url).await?;

        let plan = RetrievalPlan::new(&self.tools, media.is_encrypted());
        info!(
            segments = media.segments.len(),
            encrypted = plan.encrypted,
            external_tool = plan.use_external_tool,
            native_mux = plan.use_native_mux,
            "retrieval plan"
        );

        let mut tier = plan.entry_tier();
        let mut tried_native = false;
        let mut tried_manual = false;
        let mut last_summary: Option<RetrievalSummary> = None;

        loop {
            match tier {
                Tier::ExternalTool => {
                    // yt-dlp muxes on its own; hand it the final target.
                    let target = request
                        .mp4_output
                        .clone()
                        .unwrap_or_else(|| request.output_ts.with_extension("mp4"));
                    match ytdlp_download(
                        &self.tools,
                        &request.manifest_url,
                        &self.http.browser_augmented(),
                        &target,
                        true,
                    )
                    .await
                    {
                        Ok(()) => {
                            return Ok(DownloadOutcome {
                                output: target,
                                summary: last_summary,
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, next = ?plan.after_external(), "external tool failed");
                            tier = plan.after_external();
                        }
                    }
                }

                Tier::NativeMux => {
                    tried_native = true;
                    match ffmpeg_download(
                        &self.tools,
                        &request.manifest_url,
                        &self.native_mux_headers(tried_manual),
                        &request.output_ts,
                    )
                    .await
                    {
                        Ok(()) => {
                            let output = self
                                .finish_ts(&request.output_ts, request.mp4_output.as_deref())
                                .await;
                            return Ok(DownloadOutcome {
                                output,
                                summary: last_summary,
                            });
                        }
                        Err(err @ DownloadError::ToolUnavailable { .. }) if plan.encrypted => {
                            return Err(err);
                        }
                        Err(err) => {
                            if plan.encrypted {
                                // Manual retrieval cannot decrypt; this was
                                // the last capable tier.
                                warn!(error = %err, "native mux failed on encrypted stream");
                                return Err(DownloadError::DecryptionUnavailable);
                            }
                            if tried_manual {
                                return Err(err);
                            }
                            warn!(error = %err, "native mux failed; falling back to manual retrieval");
                            tier = Tier::Manual;
                        }
                    }
                }

                Tier::Manual => {
                    tried_manual = true;
                    match self.run_manual(request, &media).await? {
                        ManualResult::Done(outcome) => return Ok(outcome),
                        ManualResult::Escalate { summary, err } => {
                            if summary.is_some() {
                                last_summary = summary;
                            }
                            if tried_native || !plan.use_native_mux {
                                return Err(err);
                            }
                            warn!(error = %err, "escalating to native mux");
                            tier = Tier::NativeMux;
                        }
                    }
                }
            }
        }
    }

    /// Template mode bypasses manifest resolution and the tier machine:
    /// fetch numbered segments, assemble, optionally remux.
    pub async fn run_template(
        &self,
        request: &TemplateRequest,
    ) -> Result<DownloadOutcome, DownloadError> {
        let fetcher: Arc<dyn SegmentSource> = Arc::new(HttpFetcher::new(
            &self.http,
            self.http.header_map(),
            self.retry_policy(),
        )?);

        let work_dir = segment_work_dir(&request.output_ts);
        let retriever = TemplateRetriever::new(fetcher, self.retriever.clone());
        let summary = retriever
            .retrieve(&request.template, request.start, request.end, &work_dir)
            .await?;

        assemble(&work_dir, &request.output_ts).await?;
        if !request.keep_temp {
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                warn!(error = %e, dir = %work_dir.display(), "failed to remove segment directory");
            }
        }
        let output = self
            .finish_ts(&request.output_ts, request.mp4_output.as_deref())
            .await;
        Ok(DownloadOutcome {
            output,
            summary: Some(summary),
        })
    }

    /// ffmpeg reached as a fallback out of the manual tier talks to an
    /// origin that already saw browser-like segment requests; keep sending
    /// the same set.
    fn native_mux_headers(&self, reached_from_manual: bool) -> HeaderMap {
        if reached_from_manual {
            self.http.browser_augmented()
        } else {
            self.http.header_map()
        }
    }

    async fn run_manual(
        &self,
        request: &DownloadRequest,
        media: &MediaPlaylist,
    ) -> Result<ManualResult, DownloadError> {
        let fetcher: Arc<dyn SegmentSource> = Arc::new(HttpFetcher::new(
            &self.http,
            self.http.browser_augmented(),
            self.retry_policy(),
        )?);

        // Probe one segment with browser-like headers first: if the origin
        // rejects bare requests outright, a fleet-wide retry is pointless.
        if let Some(first) = media.segments.first() {
            match fetcher.probe(&first.uri).await {
                Ok(status)
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
                {
                    warn!(status = status.as_u16(), "origin is blocking bare segment requests");
                    return Ok(ManualResult::Escalate {
                        summary: None,
                        err: DownloadError::segment_unavailable(
                            Some(status.as_u16()),
                            first.uri.as_str(),
                        ),
                    });
                }
                // Other statuses and transport errors are left to the full
                // run, where per-segment retries apply.
                _ => {}
            }
        }

        let work_dir = segment_work_dir(&request.output_ts);
        let retriever = ConcurrentRetriever::new(fetcher, self.retriever.clone());
        let summary = retriever.retrieve(&media.segments, &work_dir).await?;

        if !summary.meets_threshold(self.retriever.success_ratio) {
            let err = DownloadError::InsufficientSegments {
                succeeded: summary.succeeded,
                attempted: summary.attempted,
            };
            return Ok(ManualResult::Escalate {
                summary: Some(summary),
                err,
            });
        }

        // Assemble: only reached with a sufficient segment set.
        assemble(&work_dir, &request.output_ts).await?;
        if !request.keep_temp {
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                warn!(error = %e, dir = %work_dir.display(), "failed to remove segment directory");
            }
        }
        let output = self
            .finish_ts(&request.output_ts, request.mp4_output.as_deref())
            .await;
        Ok(ManualResult::Done(DownloadOutcome {
            output,
            summary: Some(summary),
        }))
    }

    /// Optional MP4 remux of an assembled `.ts`. Remux failure keeps the
    /// transport stream and is not a download failure.
    async fn finish_ts(&self, output_ts: &Path, mp4_output: Option<&Path>) -> PathBuf {
        let Some(mp4) = mp4_output else {
            return output_ts.to_path_buf();
        };
        match ffmpeg_remux(&self.tools, output_ts, mp4).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(output_ts).await {
                    warn!(error = %e, "failed to remove intermediate .ts");
                }
                mp4.to_path_buf()
            }
            Err(err) => {
                warn!(error = %err, "remux failed; keeping .ts");
                output_ts.to_path_buf()
            }
        }
    }
}

enum ManualResult {
    Done(DownloadOutcome),
    Escalate {
        summary: Option<RetrievalSummary>,
        err: DownloadError,
    },
}

/// Segment work directory: a `<stem>_segments` sibling of the output file.
pub fn segment_work_dir(output_ts: &Path) -> PathBuf {
    let stem = output_ts
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_ts.with_file_name(format!("{stem}_segments"))
}
