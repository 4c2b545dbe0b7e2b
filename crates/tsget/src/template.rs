// Numbered-template retrieval: the playlist-free mode where segment URLs
// follow an `{index}` pattern and the segment list is discovered by probing.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RetrieverConfig;
use crate::error::DownloadError;
use crate::fetcher::SegmentSource;
use crate::retriever::{RetrievalSummary, write_segment};

/// Open-ended runs stop after this many missing segments in a row.
pub const MAX_CONSECUTIVE_MISSING: usize = 5;

/// A segment URL pattern with one `{index}` placeholder, optionally
/// zero-padded as `{index:03d}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTemplate {
    prefix: String,
    suffix: String,
    pad: usize,
}

impl SegmentTemplate {
    pub fn parse(raw: &str) -> Result<Self, DownloadError> {
        let start = raw
            .find("{index")
            .ok_or_else(|| DownloadError::invalid_url(raw, "missing {index} placeholder"))?;
        let rest = &raw[start..];
        let close = rest
            .find('}')
            .ok_or_else(|| DownloadError::invalid_url(raw, "unterminated {index} placeholder"))?;
        let modifier = &rest[6..close];
        let pad = match modifier {
            "" => 0,
            _ => modifier
                .strip_prefix(":0")
                .and_then(|m| m.strip_suffix('d'))
                .and_then(|width| width.parse().ok())
                .ok_or_else(|| {
                    DownloadError::invalid_url(
                        raw,
                        format!("unsupported index format `{{index{modifier}}}`"),
                    )
                })?,
        };
        Ok(Self {
            prefix: raw[..start].to_string(),
            suffix: rest[close + 1..].to_string(),
            pad,
        })
    }

    pub fn url_for(&self, index: usize) -> Result<Url, DownloadError> {
        let rendered = format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.pad
        );
        Url::parse(&rendered)
            .map_err(|e| DownloadError::invalid_url(rendered.as_str(), e.to_string()))
    }
}

pub struct TemplateRetriever {
    source: Arc<dyn SegmentSource>,
    config: RetrieverConfig,
}

impl TemplateRetriever {
    pub fn new(source: Arc<dyn SegmentSource>, config: RetrieverConfig) -> Self {
        Self { source, config }
    }

    /// Retrieve templated segments into `out_dir`.
    ///
    /// With an `end` bound every index in `start..=end` is attempted and
    /// misses are only counted. Without one, indices grow until
    /// `MAX_CONSECUTIVE_MISSING` misses arrive in a row, which is taken as
    /// the end of the stream. Fetches run `concurrency` at a time per
    /// window, and misses are judged in index order, so the stop point does
    /// not depend on completion timing.
    pub async fn retrieve(
        &self,
        template: &SegmentTemplate,
        start: usize,
        end: Option<usize>,
        out_dir: &Path,
    ) -> Result<RetrievalSummary, DownloadError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let width = self.config.concurrency.max(1);
        let started = Instant::now();
        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        let mut total_bytes = 0u64;
        let mut consecutive_missing = 0usize;
        let mut next = start;

        'windows: loop {
            let window_end = match end {
                Some(last) => {
                    if next > last {
                        break;
                    }
                    (next + width - 1).min(last)
                }
                None => next + width - 1,
            };
            let mut window = Vec::with_capacity(window_end - next + 1);
            for index in next..=window_end {
                window.push((index, template.url_for(index)?));
            }
            next = window_end + 1;

            let fetches = window
                .iter()
                .map(|(index, url)| async move { (*index, self.source.fetch(url).await) });
            for (index, result) in join_all(fetches).await {
                attempted += 1;
                match result {
                    Ok(bytes) => {
                        write_segment(out_dir, index, &bytes).await?;
                        debug!(index, bytes = bytes.len(), "template segment stored");
                        succeeded += 1;
                        total_bytes += bytes.len() as u64;
                        consecutive_missing = 0;
                    }
                    Err(err) => {
                        consecutive_missing += 1;
                        warn!(index, error = %err, "template segment missing");
                        if end.is_none() && consecutive_missing >= MAX_CONSECUTIVE_MISSING {
                            info!(index, "run of missing segments; treating as end of stream");
                            break 'windows;
                        }
                    }
                }
            }
        }

        let summary = RetrievalSummary {
            attempted,
            succeeded,
            total_bytes,
            elapsed: started.elapsed(),
        };
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            total_bytes = summary.total_bytes,
            "template retrieval summary"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;

    /// Serves `/seg/{n}.ts` for `n` inside the live range, 404 elsewhere.
    struct RangeSource {
        live: std::ops::RangeInclusive<usize>,
    }

    #[async_trait]
    impl SegmentSource for RangeSource {
        async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
            let n: usize = url
                .path()
                .trim_start_matches("/seg/")
                .trim_end_matches(".ts")
                .parse()
                .unwrap();
            if self.live.contains(&n) {
                Ok(Bytes::from(vec![b'x'; n]))
            } else {
                Err(DownloadError::segment_unavailable(Some(404), url.as_str()))
            }
        }

        async fn probe(&self, _url: &Url) -> Result<StatusCode, DownloadError> {
            Ok(StatusCode::OK)
        }
    }

    fn template() -> SegmentTemplate {
        SegmentTemplate::parse("https://cdn.test/seg/{index}.ts").unwrap()
    }

    fn config() -> RetrieverConfig {
        RetrieverConfig {
            concurrency: 4,
            ..Default::default()
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn padded_placeholder_renders_zero_filled() {
        let t = SegmentTemplate::parse("https://cdn.test/segment_{index:03d}.ts").unwrap();
        assert_eq!(t.url_for(7).unwrap().as_str(), "https://cdn.test/segment_007.ts");
        assert_eq!(
            t.url_for(1234).unwrap().as_str(),
            "https://cdn.test/segment_1234.ts"
        );
    }

    #[test]
    fn bare_placeholder_renders_unpadded() {
        assert_eq!(
            template().url_for(7).unwrap().as_str(),
            "https://cdn.test/seg/7.ts"
        );
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = SegmentTemplate::parse("https://cdn.test/seg/7.ts").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        // Only zero-padded decimal modifiers are understood.
        let err = SegmentTemplate::parse("https://cdn.test/{index:x}.ts").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn bounded_range_fetches_every_index() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = TemplateRetriever::new(Arc::new(RangeSource { live: 1..=5 }), config());
        let summary = retriever
            .retrieve(&template(), 1, Some(5), dir.path())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.total_bytes, (1..=5).sum::<u64>());
        assert_eq!(
            file_names(dir.path()),
            vec!["000001.ts", "000002.ts", "000003.ts", "000004.ts", "000005.ts"]
        );
    }

    #[tokio::test]
    async fn bounded_range_does_not_stop_on_missing_runs() {
        let dir = tempfile::tempdir().unwrap();
        // Index 10 is the only live segment; a fixed range still probes all.
        let retriever = TemplateRetriever::new(Arc::new(RangeSource { live: 10..=10 }), config());
        let summary = retriever
            .retrieve(&template(), 1, Some(12), dir.path())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 12);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(file_names(dir.path()), vec!["000010.ts"]);
    }

    #[tokio::test]
    async fn open_ended_run_stops_after_missing_run() {
        let dir = tempfile::tempdir().unwrap();
        // Live through 7; the fifth consecutive miss lands at index 12,
        // partway into the third window of four.
        let retriever = TemplateRetriever::new(Arc::new(RangeSource { live: 1..=7 }), config());
        let summary = retriever
            .retrieve(&template(), 1, None, dir.path())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 12);
        assert_eq!(summary.succeeded, 7);
        assert_eq!(
            file_names(dir.path()),
            vec![
                "000001.ts", "000002.ts", "000003.ts", "000004.ts", "000005.ts", "000006.ts",
                "000007.ts"
            ]
        );
    }
}
