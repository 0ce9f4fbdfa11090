use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Retrieves resources that still live on the old site.
pub trait ResourceFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>>;

    /// Cheap existence check (HTTP HEAD).
    fn exists(&mut self, url: &str) -> bool;
}

pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build resource HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetching {url} failed with HTTP {status}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }

    fn exists(&mut self, url: &str) -> bool {
        self.client
            .head(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Never touches the network; every fetch fails. Used for dry runs.
#[derive(Debug, Default)]
pub struct OfflineFetcher;

impl ResourceFetcher for OfflineFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        bail!("network access is disabled; not fetching {url}")
    }

    fn exists(&mut self, _url: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedResource {
    pub path: PathBuf,
    pub url: String,
}

/// `i-{32 hex of sha256(url)}-{decoded basename}`.
pub fn download_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut hash = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("i-{hash}-{}", decoded_basename(url))
}

/// Public URL of `file_name` inside the upload directory.
pub fn public_url(upload_url: &str, file_name: &str) -> String {
    format!(
        "{}/{}",
        upload_url.trim_end_matches('/'),
        urlencoding::encode(file_name)
    )
}

/// Last path segment of `url`, percent-decoded, without query or fragment.
pub fn decoded_basename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let decoded = urlencoding::decode(segment)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let cleaned = decoded
        .chars()
        .map(|ch| {
            if ch == '/' || ch == '\\' || ch.is_control() {
                '-'
            } else {
                ch
            }
        })
        .collect::<String>();
    if cleaned.trim().is_empty() {
        "resource".to_string()
    } else {
        cleaned
    }
}

/// Make a copy of `url` in the upload directory and return where it landed.
///
/// A file already present under the derived name is reused without fetching.
/// Failures are logged and yield `None`.
pub fn download_resource<F>(
    fetcher: &mut F,
    url: &str,
    upload_dir: &Path,
    upload_url: &str,
) -> Option<DownloadedResource>
where
    F: ResourceFetcher + ?Sized,
{
    let file_name = download_file_name(url);
    let path = upload_dir.join(&file_name);
    let public_url = public_url(upload_url, &file_name);
    if path.is_file() {
        debug!(url = %url, path = %path.display(), "resource already downloaded");
        return Some(DownloadedResource {
            path,
            url: public_url,
        });
    }

    let bytes = match fetcher.fetch(url) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(url = %url, error = %error, "could not download resource");
            return None;
        }
    };
    if let Err(error) = fs::create_dir_all(upload_dir).and_then(|_| fs::write(&path, &bytes)) {
        warn!(url = %url, path = %path.display(), error = %error, "could not store downloaded resource");
        return None;
    }
    debug!(url = %url, path = %path.display(), bytes = bytes.len(), "downloaded resource");
    Some(DownloadedResource {
        path,
        url: public_url,
    })
}
