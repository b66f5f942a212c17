//! Resource content fetching
//!
//! Resources either carry their definition inline or point at it with a
//! locator: a path relative to the bundle directory, a `file://` URL, or an
//! `http(s)://` URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::crd::BundleResource;
use crate::Error;

/// Default timeout for fetching remote resource definitions
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for reading resource definitions from their locator
///
/// This trait abstracts file and HTTP access for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentReader: Send + Sync {
    /// Read the content behind `locator`, resolving relative paths against `base`
    async fn read(&self, locator: &str, base: &Path) -> Result<Vec<u8>, Error>;
}

/// Resolve the content of a resource.
///
/// Inline content wins. Otherwise the locator is read through `reader`. A
/// resource with neither is invalid.
pub async fn resolve_content<R: ContentReader + ?Sized>(
    reader: &R,
    resource: &BundleResource,
    base: &Path,
) -> Result<String, Error> {
    if let Some(content) = resource.inline_content() {
        return Ok(content.to_string());
    }

    let locator = resource.locator().ok_or_else(|| {
        Error::validation(format!(
            "resource {} does not specify content or path to yaml for install",
            resource.name
        ))
    })?;

    let bytes = reader.read(locator, base).await?;
    let content = String::from_utf8(bytes).map_err(|e| {
        Error::fetch(format!("content of {} is not valid UTF-8: {}", locator, e))
    })?;

    if content.trim().is_empty() {
        return Err(Error::validation(format!(
            "resource {} resolved to empty content from {}",
            resource.name, locator
        )));
    }
    Ok(content)
}

/// Content reader for local files and HTTP(S) URLs
pub struct LocatorReader {
    http: reqwest::Client,
}

impl LocatorReader {
    /// Create a reader whose HTTP requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::fetch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    async fn read_url(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("GET {} returned {}", url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(format!("reading body of {} failed: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

/// Path a non-URL locator refers to
pub fn local_path(locator: &str, base: &Path) -> PathBuf {
    let path = Path::new(locator.strip_prefix("file://").unwrap_or(locator));
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

#[async_trait]
impl ContentReader for LocatorReader {
    async fn read(&self, locator: &str, base: &Path) -> Result<Vec<u8>, Error> {
        if is_remote(locator) {
            debug!(url = %locator, "Fetching remote resource");
            return self.read_url(locator).await;
        }

        let path = local_path(locator, base);
        debug!(path = %path.display(), "Reading resource file");
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::fetch(format!("failed to read {}: {}", path.display(), e)))
    }
}
