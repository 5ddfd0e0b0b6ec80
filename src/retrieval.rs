//! What happens once a task completes: fetching its artifact.

use async_trait::async_trait;
use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::client::ServiceClient;
use crate::error::TransportError;
use crate::state::TaskId;
use crate::utils::{
    fallback_filename, filename_from_disposition, get_unique_filepath, part_path,
    sanitize_filename,
};

/// Result of a retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
    /// Artifact written to this path
    Saved(PathBuf),
    /// Artifact left at this address for someone else to fetch
    Located(Url),
}

/// One-shot action run when a task reaches `completed`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, id: &TaskId, location: &Url) -> Result<Retrieved, TransportError>;
}

/// Prints the artifact address to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintLocation;

#[async_trait]
impl Retriever for PrintLocation {
    async fn retrieve(&self, _id: &TaskId, location: &Url) -> Result<Retrieved, TransportError> {
        println!("{}", location);
        Ok(Retrieved::Located(location.clone()))
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Streams the artifact into a download directory.
pub struct SaveArtifact {
    client: ServiceClient,
    download_dir: PathBuf,
    rate_limiter: Option<(Arc<DirectLimiter>, NonZeroU32)>,
    show_progress: bool,
}

impl SaveArtifact {
    pub fn new(client: ServiceClient, download_dir: PathBuf, rate_limit: Option<NonZeroU32>) -> Self {
        let rate_limiter = rate_limit.map(|limit| {
            let quota = Quota::per_second(limit);
            (Arc::new(RateLimiter::direct(quota)), limit)
        });

        Self {
            client,
            download_dir,
            rate_limiter,
            show_progress: true,
        }
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Waits until `len` bytes fit the rate limit. Requests are split so none
    /// exceeds the burst size.
    async fn throttle(&self, len: usize) {
        let Some((limiter, burst)) = &self.rate_limiter else {
            return;
        };
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(burst.get() as usize);
            if let Some(n) = NonZeroU32::new(take as u32) {
                // `n` never exceeds the burst size, so capacity is always sufficient.
                let _ = limiter.until_n_ready(n).await;
            }
            remaining -= take;
        }
    }

    fn progress_bar(&self, total_size: u64) -> ProgressBar {
        let target = if self.show_progress {
            ProgressDrawTarget::stderr_with_hz(5)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(Some(total_size), target);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb
    }

    /// Streams the body into `part_filepath`, then moves it to `filepath`.
    /// The caller cleans up the part file on error.
    async fn write_artifact(
        &self,
        response: reqwest::Response,
        part_filepath: &Path,
        filepath: &Path,
        pb: &ProgressBar,
    ) -> Result<u64, TransportError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(part_filepath)
            .await?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(item) = stream.next().await {
            let chunk = item?;
            if chunk.is_empty() {
                continue;
            }

            self.throttle(chunk.len()).await;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            pb.inc(chunk.len() as u64);
        }

        file.flush().await?;
        drop(file);
        fs::rename(part_filepath, filepath).await?;
        Ok(written)
    }
}

#[async_trait]
impl Retriever for SaveArtifact {
    async fn retrieve(&self, id: &TaskId, location: &Url) -> Result<Retrieved, TransportError> {
        let response = self.client.fetch_artifact(location).await?;

        if !self.download_dir.exists() {
            fs::create_dir_all(&self.download_dir).await?;
        }
        let filename = filename_from_disposition(response.headers())
            .unwrap_or_else(|| fallback_filename(id));
        let filepath = get_unique_filepath(&self.download_dir, &sanitize_filename(&filename));
        let part_filepath = part_path(&filepath);
        let display_name = filepath
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.clone());
        debug!(task_id = %id, path = %part_filepath.display(), "writing artifact");

        let pb = self.progress_bar(response.content_length().unwrap_or(0));
        pb.set_message(format!("Downloading {}", display_name));

        let written = match self.write_artifact(response, &part_filepath, &filepath, &pb).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&part_filepath).await;
                pb.abandon_with_message(format!("Failed      {}", display_name));
                return Err(e);
            }
        };
        pb.finish_with_message(format!("Completed   {}", display_name));
        info!(task_id = %id, path = %filepath.display(), bytes = written, "artifact saved");

        Ok(Retrieved::Saved(filepath))
    }
}
