use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

/// Minimum fraction of segments that must be retrieved before assembly is
/// allowed. Empirical tunable; below it the strategy escalates to the next
/// retrieval tier instead of producing a partial file.
pub const SUCCESS_RATIO_THRESHOLD: f64 = 0.8;

/// Default width of the segment worker pool.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Segment files are named `{index:06}.{SEGMENT_SUFFIX}` so a lexicographic
/// directory listing reconstructs manifest order.
pub const SEGMENT_PAD_WIDTH: usize = 6;
pub const SEGMENT_SUFFIX: &str = "ts";

/// HTTP request surface: user agent, referer and extra headers.
///
/// Merge rule: the defaults below are applied first, explicit extras override
/// them key-by-key, and unknown keys pass through verbatim.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub referer: Option<String>,
    /// Extra headers as `(name, value)` pairs, applied after the defaults.
    pub extra: Vec<(String, String)>,
    /// Per-request timeout for every playlist and segment fetch.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            referer: None,
            extra: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    /// Build the merged header set for playlist requests.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));

        if let Some(referer) = &self.referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert(reqwest::header::REFERER, value.clone());
                headers.insert(reqwest::header::ORIGIN, value);
            } else {
                warn!(referer, "ignoring referer that is not a valid header value");
            }
        }

        for (name, value) in &self.extra {
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(name, "ignoring invalid extra header"),
            }
        }

        headers
    }

    /// Header set for segment requests: the merged headers plus common fetch
    /// metadata headers, added only when not already present.
    pub fn browser_augmented(&self) -> HeaderMap {
        let mut headers = self.header_map();
        for (name, value) in [
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "cross-site"),
            ("sec-fetch-dest", "empty"),
        ] {
            let name = HeaderName::from_static(name);
            if !headers.contains_key(&name) {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }
        headers
    }
}

/// Tunables for the concurrent segment retriever.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Worker pool width.
    pub concurrency: usize,
    /// Additional attempts after the first, per segment.
    pub max_retries: u32,
    /// Base retry delay; actual delay is `backoff_base * 2^attempt`.
    pub backoff_base: Duration,
    /// Hard cap on the computed retry delay.
    pub max_backoff: Duration,
    /// Success ratio below which the retrieval is judged failed.
    pub success_ratio: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            success_ratio: SUCCESS_RATIO_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_headers_override_defaults() {
        let config = HttpConfig {
            extra: vec![("Accept".to_string(), "video/mp2t".to_string())],
            ..Default::default()
        };
        let headers = config.header_map();
        assert_eq!(headers.get(reqwest::header::ACCEPT).unwrap(), "video/mp2t");
    }

    #[test]
    fn unknown_extra_headers_pass_through() {
        let config = HttpConfig {
            extra: vec![("X-Custom-Token".to_string(), "abc123".to_string())],
            ..Default::default()
        };
        let headers = config.header_map();
        assert_eq!(headers.get("x-custom-token").unwrap(), "abc123");
    }

    #[test]
    fn referer_sets_origin() {
        let config = HttpConfig {
            referer: Some("https://example.com/".to_string()),
            ..Default::default()
        };
        let headers = config.header_map();
        assert_eq!(
            headers.get(reqwest::header::ORIGIN).unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            headers.get(reqwest::header::REFERER).unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn augmentation_does_not_clobber_explicit_values() {
        let config = HttpConfig {
            extra: vec![("Sec-Fetch-Mode".to_string(), "navigate".to_string())],
            ..Default::default()
        };
        let headers = config.browser_augmented();
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
        assert_eq!(headers.get("sec-fetch-dest").unwrap(), "empty");
    }
}
