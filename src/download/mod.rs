// Manifest downloader: fetches every listed slide with bounded concurrency.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::config::{DatasetManifest, ManifestEntry};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    pub path: PathBuf,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub downloaded: Vec<DownloadedFile>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedDownload>,
}

impl DownloadReport {
    pub fn total_bytes(&self) -> u64 {
        self.downloaded.iter().map(|f| f.bytes).sum()
    }
}

enum Outcome {
    Downloaded(DownloadedFile),
    Skipped(PathBuf),
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

pub struct Downloader {
    client: reqwest::Client,
    base_dir: PathBuf,
    concurrency: usize,
}

impl Downloader {
    pub fn new(base_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_dir: base_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Download every manifest entry into the base directory. Files already
    /// present are skipped; a failed file is recorded and does not stop the
    /// others.
    pub async fn download_all(&self, manifest: &DatasetManifest) -> Result<DownloadReport> {
        self.download_all_with(manifest, |_finished, _total| {}).await
    }

    /// Like [`Downloader::download_all`], calling `on_progress(finished, total)`
    /// as soon as each file completes, fails or is skipped.
    pub async fn download_all_with(
        &self,
        manifest: &DatasetManifest,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        info!(
            "Downloading {} files into {} ({} at a time)",
            manifest.files.len(),
            self.base_dir.display(),
            self.concurrency
        );

        let total = manifest.files.len();
        let mut pending = stream::iter(manifest.files.iter().cloned())
            .map(|entry| async move {
                let outcome = self.download_one(&entry).await;
                (entry, outcome)
            })
            .buffer_unordered(self.concurrency);

        let mut report = DownloadReport::default();
        let mut finished = 0;
        while let Some((entry, outcome)) = pending.next().await {
            finished += 1;
            match outcome {
                Ok(Outcome::Downloaded(file)) => {
                    info!(
                        "[{}/{}] {} ({} bytes)",
                        finished,
                        total,
                        file.path.display(),
                        file.bytes
                    );
                    report.downloaded.push(file);
                }
                Ok(Outcome::Skipped(path)) => {
                    info!("[{}/{}] {} already present, skipped", finished, total, path.display());
                    report.skipped.push(path);
                }
                Err(e) => {
                    error!(
                        "[{}/{}] Failed to download {} from {}: {}",
                        finished, total, entry.path, entry.url, e
                    );
                    report.failed.push(FailedDownload {
                        path: self.base_dir.join(&entry.path),
                        url: entry.url,
                        error: e.to_string(),
                    });
                }
            }
            on_progress(finished, total);
        }

        info!(
            "Download finished: {} downloaded ({} bytes), {} skipped, {} failed",
            report.downloaded.len(),
            report.total_bytes(),
            report.skipped.len(),
            report.failed.len()
        );

        Ok(report)
    }

    async fn download_one(&self, entry: &ManifestEntry) -> Result<Outcome> {
        let dest = self.base_dir.join(&entry.path);
        if tokio::fs::try_exists(&dest).await? {
            return Ok(Outcome::Skipped(dest));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = partial_path(&dest);
        match self.fetch_to(&entry.url, &part).await {
            Ok((bytes, sha256)) => {
                tokio::fs::rename(&part, &dest).await?;
                Ok(Outcome::Downloaded(DownloadedFile {
                    path: dest,
                    bytes,
                    sha256,
                }))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn fetch_to(&self, url: &str, part: &Path) -> Result<(u64, String)> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(part).await?;
        let mut hasher = Sha256::new();
        let mut bytes = 0u64;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        Ok((bytes, format!("{:x}", hasher.finalize())))
    }
}
