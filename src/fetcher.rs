//! Loading of block-lists from local files and remote URLs.
//!
//! Sources are read one after the other. A local file that cannot be read is
//! a configuration error; an unreachable URL is logged and contributes no
//! lines, so one dead mirror does not block the others.

use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const TIMEOUT_SECS: u64 = 60;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 2000;

/// Maximum size per downloaded list (64 MB)
const MAX_LIST_SIZE: usize = 64 * 1024 * 1024;

/// Where a list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Url(String),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Url(url) => f.write_str(url),
        }
    }
}

/// Lines read from one source
#[derive(Debug)]
pub struct FetchResult {
    pub source: Source,
    pub lines: Vec<String>,
}

/// HTTP client for fetching lists
pub struct Fetcher {
    client: Client,
    max_size: usize,
    /// Base delay before the first retry, doubled on each further one
    retry_delay: Duration,
}

impl Fetcher {
    /// Create a new fetcher with default settings
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("autoblockip/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            max_size: MAX_LIST_SIZE,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Read every source in order and return all their lines.
    pub async fn load_all(&self, files: &[PathBuf], urls: &[String]) -> Result<Vec<String>> {
        let mut lines = Vec::new();

        for path in files {
            let result = read_local(path)?;
            info!("Read {} lines from {}", result.lines.len(), result.source);
            lines.extend(result.lines);
        }

        for url in urls {
            match self.fetch_remote(url).await {
                Ok(result) => {
                    info!("Fetched {} lines from {}", result.lines.len(), result.source);
                    lines.extend(result.lines);
                }
                Err(e) => warn!("Unable to fetch {}: {:#}", url, e),
            }
        }

        Ok(lines)
    }

    /// Fetch one remote list.
    pub async fn fetch_remote(&self, url: &str) -> Result<FetchResult> {
        info!("Fetching IP list from {}", url);
        let body = self.fetch_with_retry(url).await?;
        Ok(FetchResult {
            source: Source::Url(url.to_string()),
            lines: split_lines(&body),
        })
    }

    /// Fetch content with retry logic and size validation
    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_delay * (1 << (attempt - 1));
                debug!("Retry {} after {:?} for {}", attempt, delay, url);
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if let Some(content_length) = response.content_length() {
                            if content_length as usize > self.max_size {
                                anyhow::bail!(
                                    "Response too large: {} bytes (max: {} bytes)",
                                    content_length,
                                    self.max_size
                                );
                            }
                        }

                        let body = response
                            .text()
                            .await
                            .context("Failed to read response body")?;

                        if body.len() > self.max_size {
                            anyhow::bail!(
                                "Downloaded content too large: {} bytes (max: {} bytes)",
                                body.len(),
                                self.max_size
                            );
                        }

                        return Ok(body);
                    }
                    // Client errors will not go away on retry
                    if status.is_client_error() {
                        anyhow::bail!("HTTP {}", status);
                    }
                    last_error = Some(anyhow::anyhow!("HTTP {}", status));
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }
}

// Note: Default is intentionally not implemented for Fetcher
// because new() can fail and we want explicit error handling.

/// Read one local list.
pub fn read_local(path: &Path) -> Result<FetchResult> {
    info!("Reading IP list from {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read list file: {}", path.display()))?;
    Ok(FetchResult {
        source: Source::File(path.to_path_buf()),
        lines: split_lines(&content),
    })
}

/// Split raw list content into lines with carriage returns removed.
pub fn split_lines(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.replace('\r', ""))
        .collect()
}
