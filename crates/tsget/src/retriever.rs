// Concurrent segment retriever: a bounded worker pool pulling from the
// ordered segment list, persisting each segment to an index-named file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RetrieverConfig, SEGMENT_PAD_WIDTH, SEGMENT_SUFFIX};
use crate::error::DownloadError;
use crate::fetcher::SegmentSource;
use crate::playlist::SegmentRef;
use crate::progress::{ProgressTracker, spawn_reporter};

/// Per-segment result, reported by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOutcome {
    pub index: usize,
    pub success: bool,
    pub http_status: Option<u16>,
    pub byte_length: Option<u64>,
}

/// Aggregate of one retrieval run. `attempted` always equals the number of
/// segments submitted, including any cancelled before starting.
#[derive(Debug, Clone)]
pub struct RetrievalSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl RetrievalSummary {
    pub fn success_ratio(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.attempted as f64
    }

    pub fn meets_threshold(&self, ratio: f64) -> bool {
        self.succeeded as f64 >= ratio * self.attempted as f64
    }
}

/// File name for a segment: zero-padded so a lexicographic listing
/// reconstructs manifest order regardless of completion order.
pub fn segment_file_name(index: usize) -> String {
    format!("{index:0width$}.{SEGMENT_SUFFIX}", width = SEGMENT_PAD_WIDTH)
}

pub struct ConcurrentRetriever {
    source: Arc<dyn SegmentSource>,
    config: RetrieverConfig,
}

impl ConcurrentRetriever {
    pub fn new(source: Arc<dyn SegmentSource>, config: RetrieverConfig) -> Self {
        Self { source, config }
    }

    /// Retrieve every segment into `out_dir`. Individual failures are
    /// counted, not fatal; once enough segments have failed that the success
    /// ratio can no longer be met, pending work is cancelled (in-flight
    /// fetches finish naturally).
    pub async fn retrieve(
        &self,
        segments: &[SegmentRef],
        out_dir: &Path,
    ) -> Result<RetrievalSummary, DownloadError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let total = segments.len();
        let tracker = Arc::new(ProgressTracker::new(total as u64));
        let cancel = CancellationToken::new();
        let reporter = spawn_reporter(tracker.clone(), cancel.child_token());

        // Smallest failure count that makes the success ratio unreachable.
        let required = (self.config.success_ratio * total as f64).ceil() as u64;
        let failure_budget = (total as u64).saturating_sub(required);

        let started = std::time::Instant::now();
        let outcomes: Vec<RetrievalOutcome> = stream::iter(segments.iter().cloned())
            .map(|segment| self.fetch_one(segment, out_dir, &tracker, &cancel, failure_budget))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        cancel.cancel();
        let _ = reporter.await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let total_bytes = outcomes.iter().filter_map(|o| o.byte_length).sum();
        let summary = RetrievalSummary {
            attempted: total,
            succeeded,
            total_bytes,
            elapsed: started.elapsed(),
        };
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            total_bytes = summary.total_bytes,
            "retrieval summary"
        );
        Ok(summary)
    }

    async fn fetch_one(
        &self,
        segment: SegmentRef,
        out_dir: &Path,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
        failure_budget: u64,
    ) -> RetrievalOutcome {
        if cancel.is_cancelled() {
            tracker.record_failure();
            return RetrievalOutcome {
                index: segment.index,
                success: false,
                http_status: None,
                byte_length: None,
            };
        }

        match self.source.fetch(&segment.uri).await {
            Ok(bytes) => match write_segment(out_dir, segment.index, &bytes).await {
                Ok(()) => {
                    tracker.record_success(bytes.len() as u64);
                    debug!(index = segment.index, bytes = bytes.len(), "segment stored");
                    RetrievalOutcome {
                        index: segment.index,
                        success: true,
                        http_status: None,
                        byte_length: Some(bytes.len() as u64),
                    }
                }
                Err(e) => {
                    warn!(index = segment.index, error = %e, "failed to persist segment");
                    self.note_failure(tracker, cancel, failure_budget);
                    RetrievalOutcome {
                        index: segment.index,
                        success: false,
                        http_status: None,
                        byte_length: None,
                    }
                }
            },
            Err(err) => {
                warn!(index = segment.index, error = %err, "segment fetch failed");
                self.note_failure(tracker, cancel, failure_budget);
                RetrievalOutcome {
                    index: segment.index,
                    success: false,
                    http_status: err.http_status(),
                    byte_length: None,
                }
            }
        }
    }

    fn note_failure(
        &self,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
        failure_budget: u64,
    ) {
        let failed = tracker.record_failure();
        if failed > failure_budget && !cancel.is_cancelled() {
            warn!(
                failed,
                failure_budget, "failure budget exhausted; cancelling pending segments"
            );
            cancel.cancel();
        }
    }
}

/// Atomic segment write: a crash mid-write never leaves a corrupt final
/// file visible, and a retried fetch overwrites the same indexed file.
pub(crate) async fn write_segment(out_dir: &Path, index: usize, bytes: &Bytes) -> std::io::Result<()> {
    let final_path = segment_path(out_dir, index);
    let tmp_path = out_dir.join(format!("{}.part", segment_file_name(index)));
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, &final_path).await
}

fn segment_path(out_dir: &Path, index: usize) -> PathBuf {
    out_dir.join(segment_file_name(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Segment host stub: URLs ending in `/ok/{n}.ts` succeed with an
    /// `n+1`-byte body, everything else 404s.
    struct StubSource;

    #[async_trait]
    impl SegmentSource for StubSource {
        async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
            let path = url.path();
            if let Some(rest) = path.strip_prefix("/ok/") {
                let n: usize = rest.trim_end_matches(".ts").parse().unwrap();
                return Ok(Bytes::from(vec![0xAB; n + 1]));
            }
            Err(DownloadError::segment_unavailable(Some(404), url.as_str()))
        }

        async fn probe(&self, _url: &Url) -> Result<StatusCode, DownloadError> {
            Ok(StatusCode::OK)
        }
    }

    fn segments(layout: &[(usize, bool)]) -> Vec<SegmentRef> {
        layout.iter()
            .map(|&(index, ok)| SegmentRef {
                index,
                uri: Url::parse(&format!(
                    "https://cdn.test/{}/{index}.ts",
                    if ok { "ok" } else { "gone" }
                ))
                .unwrap(),
            })
            .collect()
    }

    fn config() -> RetrieverConfig {
        RetrieverConfig {
            concurrency: 4,
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn counts_successes_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let layout: Vec<(usize, bool)> = (0..10).map(|i| (i, i < 5)).collect();
        let retriever = ConcurrentRetriever::new(Arc::new(StubSource), config());
        let summary = retriever.retrieve(&segments(&layout), dir.path()).await.unwrap();

        assert_eq!(summary.attempted, 10);
        assert_eq!(summary.succeeded, 5);
        assert!(!summary.meets_threshold(0.8));

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["000000.ts", "000001.ts", "000002.ts", "000003.ts", "000004.ts"]
        );
    }

    #[tokio::test]
    async fn all_successes_meet_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let layout: Vec<(usize, bool)> = (0..6).map(|i| (i, true)).collect();
        let retriever = ConcurrentRetriever::new(Arc::new(StubSource), config());
        let summary = retriever.retrieve(&segments(&layout), dir.path()).await.unwrap();

        assert_eq!(summary.succeeded, 6);
        assert!(summary.meets_threshold(0.8));
        // Body of segment i is i+1 bytes.
        assert_eq!(summary.total_bytes, (1..=6).sum::<u64>());
    }

    #[tokio::test]
    async fn retrieval_is_idempotent_per_index() {
        let dir = tempfile::tempdir().unwrap();
        let layout = vec![(0, true), (1, true)];
        let retriever = ConcurrentRetriever::new(Arc::new(StubSource), config());
        retriever.retrieve(&segments(&layout), dir.path()).await.unwrap();
        let first = std::fs::read(dir.path().join("000001.ts")).unwrap();
        // Second run overwrites the same indexed files with identical bytes.
        retriever.retrieve(&segments(&layout), dir.path()).await.unwrap();
        let second = std::fs::read(dir.path().join("000001.ts")).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn no_part_files_remain() {
        let dir = tempfile::tempdir().unwrap();
        let layout = vec![(0, true), (1, false), (2, true)];
        let retriever = ConcurrentRetriever::new(Arc::new(StubSource), config());
        retriever.retrieve(&segments(&layout), dir.path()).await.unwrap();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name().into_string().unwrap();
            assert!(name.ends_with(".ts"), "unexpected leftover: {name}");
        }
    }

    /// Segments under `/slow/` succeed after a long delay, the rest 404.
    struct GatedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SegmentSource for GatedSource {
        async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.path().starts_with("/slow/") {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Bytes::from_static(b"data"))
            } else {
                Err(DownloadError::segment_unavailable(Some(404), url.as_str()))
            }
        }

        async fn probe(&self, _url: &Url) -> Result<StatusCode, DownloadError> {
            Ok(StatusCode::OK)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_failure_budget_cancels_pending_segments() {
        let dir = tempfile::tempdir().unwrap();
        // Index 0 is good but slow; 1..=3 fail fast and blow the budget
        // (10 segments at the 0.8 ratio tolerate 2 failures); 4..=9 are
        // good but must never start.
        let refs: Vec<SegmentRef> = (0..10)
            .map(|index| SegmentRef {
                index,
                uri: Url::parse(&format!(
                    "https://cdn.test/{}/{index}.ts",
                    if index == 0 || index >= 4 { "slow" } else { "gone" }
                ))
                .unwrap(),
            })
            .collect();

        let source = Arc::new(GatedSource {
            calls: AtomicUsize::new(0),
        });
        let retriever = ConcurrentRetriever::new(
            source.clone(),
            RetrieverConfig {
                concurrency: 2,
                ..Default::default()
            },
        );
        let summary = retriever.retrieve(&refs, dir.path()).await.unwrap();

        assert_eq!(summary.attempted, 10);
        // The fetch already in flight when the budget ran out still landed.
        assert_eq!(summary.succeeded, 1);
        assert!(dir.path().join("000000.ts").exists());
        // Only indices 0..=3 ever reached the source; segments cancelled
        // while pending were skipped without a fetch.
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(segment_file_name(0), "000000.ts");
        assert_eq!(segment_file_name(41), "000041.ts");
        assert_eq!(segment_file_name(123_456), "123456.ts");
    }
}
