// HTTP segment fetcher: raw downloads of playlists and media segments with
// retry classification. Persistence is the caller's concern.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::config::HttpConfig;
use crate::error::DownloadError;
use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

/// Seam between the retriever and the HTTP layer.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetch the full body at `url`, applying the source's retry policy.
    async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError>;

    /// Single-attempt request returning only the response status. Used to
    /// cheaply test whether an origin accepts bare segment requests.
    async fn probe(&self, url: &Url) -> Result<StatusCode, DownloadError>;
}

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    policy: RetryPolicy,
    token: CancellationToken,
}

impl HttpFetcher {
    /// Build a fetcher sending `headers` on every request. 403 and 404 fail
    /// immediately (the URL is permanently wrong); any other HTTP or
    /// transport error retries with exponential backoff per `policy`.
    pub fn new(
        config: &HttpConfig,
        headers: HeaderMap,
        policy: RetryPolicy,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            timeout: config.timeout,
            policy,
            token: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl SegmentSource for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
        retry_with_backoff(&self.policy, &self.token, |attempt| async move {
            trace!(%url, attempt, "fetching");
            let response = match self
                .client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if is_retryable_reqwest_error(&e) => {
                    return RetryAction::Retry(e.into());
                }
                Err(e) => return RetryAction::Fail(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                return match response.bytes().await {
                    Ok(bytes) => RetryAction::Success(bytes),
                    Err(e) if is_retryable_reqwest_error(&e) => RetryAction::Retry(e.into()),
                    Err(e) => RetryAction::Fail(e.into()),
                };
            }

            let err = DownloadError::segment_unavailable(Some(status.as_u16()), url.as_str());
            if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
                RetryAction::Fail(err)
            } else {
                RetryAction::Retry(err)
            }
        })
        .await
    }

    async fn probe(&self, url: &Url) -> Result<StatusCode, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(response.status())
    }
}
