//! Bounded download dispatch.
//!
//! Every download passes through three gates, in order:
//! 1. a counting semaphore bounding downloads in flight,
//! 2. the in-process claim for the data path,
//! 3. the on-disk lock file next to the data path.
//!
//! All three are RAII guards, so every exit path releases them. The lock
//! file's mtime is refreshed while the download runs. Download failures are
//! reported as an outcome, never raised; callers decide by looking at the
//! data file.

use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::DOWNLOAD_RUNTIME_THREADS;
use crate::constants::MAX_CONCURRENT_DOWNLOADS;
use crate::constants::MAX_LOCK_REFRESH_INTERVAL;
use crate::constants::MIN_LOCK_REFRESH_INTERVAL;
use crate::downloader::DownloadError;
use crate::downloader::DownloadReport;
use crate::downloader::DownloadRequest;
use crate::downloader::Downloader;
use crate::downloader::append_note;
use crate::layout::CacheLayout;
use crate::layout::lock_path_for;
use crate::lock::ClaimRegistry;
use crate::lock::LockAttempt;
use crate::lock::LockFile;
use crate::path::VirtualPath;

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The data file is present with `bytes` bytes.
    Downloaded { bytes: u64 },
    /// Another download of the same path is in progress.
    LockHeld,
    /// The download did not produce a data file.
    Failed { reason: String },
}

/// Runs downloads with bounded concurrency.
pub struct Dispatcher {
    runtime: Runtime,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    claims: ClaimRegistry,
    layout: CacheLayout,
    downloader: Arc<dyn Downloader>,
    stale_after: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// `max_concurrent` is clamped to `1..=MAX_CONCURRENT_DOWNLOADS`.
    /// `stale_after` of `None` disables stale lock reclamation.
    pub fn new(
        layout: CacheLayout,
        downloader: Arc<dyn Downloader>,
        max_concurrent: usize,
        stale_after: Option<Duration>,
    ) -> std::io::Result<Self> {
        let max_concurrent = max_concurrent.clamp(1, MAX_CONCURRENT_DOWNLOADS);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(DOWNLOAD_RUNTIME_THREADS)
            .thread_name("esgf-download")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            claims: ClaimRegistry::new(),
            layout,
            downloader,
            stale_after,
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    /// Number of free download slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Download `url` into the cache location of `path`, blocking until done.
    pub fn dispatch(&self, path: &VirtualPath, url: &str) -> DispatchOutcome {
        self.runtime.block_on(self.dispatch_async(path, url))
    }

    async fn dispatch_async(&self, path: &VirtualPath, url: &str) -> DispatchOutcome {
        let data_path = self.layout.data_path(path);
        let lock_path = lock_path_for(&data_path);

        let _permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => return DispatchOutcome::Failed { reason: "download slots closed".into() },
        };

        let Some(_claim) = self.claims.try_claim(&data_path) else {
            debug!(path = %path, "download already claimed in this process");
            return DispatchOutcome::LockHeld;
        };

        let lock = match LockFile::acquire(&lock_path, self.stale_after) {
            Ok(LockAttempt::Acquired(lock)) => lock,
            Ok(LockAttempt::Held) => {
                debug!(path = %path, "download lock held");
                return DispatchOutcome::LockHeld;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to create lock file");
                return DispatchOutcome::Failed { reason: format!("lock file: {e}") };
            }
        };

        // Data next to a reclaimed lock is a leftover of an interrupted download.
        if lock.reclaimed() {
            remove_partial(&data_path).await;
        }

        // A download that finished between the caller's check and our lock.
        if let Ok(metadata) = tokio::fs::metadata(&data_path).await {
            debug!(path = %path, "data arrived while waiting for a slot");
            return DispatchOutcome::Downloaded { bytes: metadata.len() };
        }

        let request = DownloadRequest {
            url: url.to_string(),
            destination: data_path.clone(),
            raw_log: self.layout.raw_log(),
            error_log: self.layout.error_log(),
        };

        let failure = match self.download_holding(&lock, &request).await {
            Ok(report) if report.success() => match tokio::fs::metadata(&data_path).await {
                Ok(metadata) => {
                    info!(path = %path, bytes = metadata.len(), "download complete");
                    return DispatchOutcome::Downloaded { bytes: metadata.len() };
                }
                Err(e) => format!("download tool succeeded but produced no file: {e}"),
            },
            Ok(report) => format!("download tool exited with code {}", report.exit_code),
            Err(e) => e.to_string(),
        };

        warn!(path = %path, url, reason = %failure, "download failed");
        if lock.is_owned() {
            remove_partial(&data_path).await;
        } else {
            warn!(path = %path, "lock was reclaimed during the download, leaving data to the new owner");
        }
        append_note(&request.error_log, &format!("Download Failed:\nURL: {url}\nReason: {failure}")).await;
        drop(lock);

        DispatchOutcome::Failed { reason: failure }
    }

    /// Run the download while refreshing the lock so it never turns stale.
    async fn download_holding(
        &self,
        lock: &LockFile,
        request: &DownloadRequest,
    ) -> Result<DownloadReport, DownloadError> {
        let mut download = pin!(self.downloader.download(request));
        let mut heartbeat = tokio::time::interval(self.refresh_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut download => return result,
                _ = heartbeat.tick() => match lock.refresh() {
                    Ok(true) => {}
                    Ok(false) => warn!(lock = %lock.path().display(), "lock replaced while downloading"),
                    Err(e) => warn!(lock = %lock.path().display(), error = %e, "failed to refresh lock"),
                },
            }
        }
    }

    /// A quarter of the stale threshold, within the refresh bounds.
    fn refresh_interval(&self) -> Duration {
        self.stale_after.map_or(MAX_LOCK_REFRESH_INTERVAL, |stale_after| {
            (stale_after / 4).clamp(MIN_LOCK_REFRESH_INTERVAL, MAX_LOCK_REFRESH_INTERVAL)
        })
    }
}

async fn remove_partial(data_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(data_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %data_path.display(), error = %e, "failed to remove partial download");
    }
}
