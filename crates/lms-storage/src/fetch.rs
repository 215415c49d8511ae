use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_bytes: 16 * 1024 * 1024,
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub url: String,
    pub text: String,
    pub byte_size: usize,
    pub sha256: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading feed file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feed at {url} is not valid UTF-8")]
    Decode { url: String },
    #[error("feed at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    pub fn is_invalid_url(&self) -> bool {
        matches!(self, Self::InvalidUrl { .. })
    }
}

/// Downloads the whole feed over HTTP(S), or reads it from an absolute
/// `file://` URL.
#[derive(Debug)]
pub struct FeedFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
    max_body_bytes: usize,
}

impl FeedFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
            max_body_bytes: config.max_body_bytes.max(1),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let invalid = |reason: String| FetchError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
        let too_large = || FetchError::TooLarge {
            url: parsed.to_string(),
            limit: self.max_body_bytes,
        };

        let bytes = match parsed.scheme() {
            "http" | "https" => {
                let span = info_span!("feed_fetch", url = %parsed);
                self.fetch_http(&parsed).instrument(span).await?
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| invalid("file url must be an absolute local path".to_string()))?;
                let file_error = |source| FetchError::File {
                    path: path.display().to_string(),
                    source,
                };
                let len = tokio::fs::metadata(&path).await.map_err(file_error)?.len();
                if len > self.max_body_bytes as u64 {
                    return Err(too_large());
                }
                let bytes = tokio::fs::read(&path).await.map_err(file_error)?;
                if bytes.len() > self.max_body_bytes {
                    return Err(too_large());
                }
                bytes
            }
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        };

        let byte_size = bytes.len();
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let text = String::from_utf8(bytes).map_err(|_| FetchError::Decode {
            url: parsed.to_string(),
        })?;
        debug!(byte_size, %sha256, "feed fetched");

        Ok(FetchedFeed {
            url: parsed.to_string(),
            text,
            byte_size,
            sha256,
        })
    }

    async fn fetch_http(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            let retry = match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return self.read_capped(url, resp).await;
                    }
                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    format!("status {status}")
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    err.to_string()
                }
            };

            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(attempt, ?delay, reason = %retry, "retrying feed fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn read_capped(&self, url: &Url, mut resp: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_body_bytes,
        };
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
