use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::error::{HostError, HostResult};

const PROGRESS_STEP: u64 = 1024 * 1024;

/// Payload reported while an artifact streams to disk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadProgress {
    pub url: String,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub file_name: String,
}

pub type ProgressFn = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Streams a single artifact to local storage. No checksum is applied;
/// the bytes are trusted as served.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    /// Optional progress observer.
    progress: Option<ProgressFn>,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download `url` to `dest`, replacing whatever is there.
    ///
    /// The parent directory is created before the request goes out. On any
    /// failure the partially written file is removed so a broken artifact
    /// never looks present.
    pub async fn download_file(&self, url: &str, dest: &Path) -> HostResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::io(parent, e))?;
        }

        match self.stream_to(url, dest).await {
            Ok(written) => {
                info!("Downloaded {} bytes: {} -> {:?}", written, url, dest);
                Ok(written)
            }
            Err(err) => {
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial download {:?}: {}", dest, e);
                    }
                }
                Err(err)
            }
        }
    }

    async fn stream_to(&self, url: &str, dest: &Path) -> HostResult<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HostError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;

        // Scoped so the handle closes before we report success.
        {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| HostError::io(dest, e))?;
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| HostError::io(dest, e))?;
                written += chunk.len() as u64;

                if written >= next_report {
                    next_report = written + PROGRESS_STEP;
                    self.report(url, written, total_bytes, &file_name);
                }
            }

            file.flush().await.map_err(|e| HostError::io(dest, e))?;
        }

        self.report(url, written, total_bytes, &file_name);
        debug!("Download stream closed after {} bytes", written);
        Ok(written)
    }

    fn report(&self, url: &str, bytes_downloaded: u64, total_bytes: Option<u64>, file_name: &str) {
        if let Some(progress) = &self.progress {
            progress(DownloadProgress {
                url: url.to_string(),
                bytes_downloaded,
                total_bytes,
                file_name: file_name.to_string(),
            });
        }
    }
}
