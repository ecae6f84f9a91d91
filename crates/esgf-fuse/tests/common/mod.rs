//! Shared fixtures: a scripted downloader and a catalogue preloaded with
//! records for given virtual paths.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use esgf_catalogue::InMemoryCatalogue;
use esgf_catalogue::SearchRecord;
use esgf_catalogue::UrlEntry;
use esgf_fuse::AliasFacetMapper;
use esgf_fuse::CacheLayout;
use esgf_fuse::Dispatcher;
use esgf_fuse::FacetMapper;
use esgf_fuse::LazyCache;
use esgf_fuse::Resolver;
use esgf_fuse::VirtualPath;
use esgf_fuse::downloader::DownloadError;
use esgf_fuse::downloader::DownloadReport;
use esgf_fuse::downloader::DownloadRequest;
use esgf_fuse::downloader::Downloader;

pub const SCENARIO_PATH: &str = "/CMIP5/output/MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc";
pub const SCENARIO_SIZE: usize = 1_048_576;

/// Deterministic file content of `size` bytes.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Writes [`payload`] after a delay and records concurrency.
pub struct FakeDownloader {
    size: usize,
    delay: Duration,
    exit_code: i32,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeDownloader {
    pub fn new(size: usize, delay: Duration) -> Self {
        Self::with_exit_code(size, delay, 0)
    }

    pub fn with_exit_code(size: usize, delay: Duration, exit_code: i32) -> Self {
        Self {
            size,
            delay,
            exit_code,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of downloads observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let written = tokio::fs::write(&request.destination, payload(self.size)).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        written.map_err(|source| DownloadError::Spawn { program: "fake".into(), source })?;
        Ok(DownloadReport { exit_code: self.exit_code, tls_errors: 0 })
    }
}

/// A catalogue record as the index returns it for a file.
pub fn file_record(url: &str, size: u64, timestamp: &str) -> SearchRecord {
    SearchRecord {
        title: url.rsplit('/').next().map(str::to_string),
        urls: vec![
            UrlEntry::parse(&format!("{url}.html|application/opendap-html|OPENDAP")).unwrap(),
            UrlEntry::parse(&format!("{url}|application/netcdf|HTTPServer")).unwrap(),
        ],
        size: Some(size),
        timestamp_raw: Some(timestamp.to_string()),
        ..Default::default()
    }
}

/// Catalogue holding one record of `size` bytes for each path.
pub fn catalogue_for(paths: &[String], size: u64) -> InMemoryCatalogue {
    let catalogue = InMemoryCatalogue::new();
    let mapper = AliasFacetMapper::new();
    for path in paths {
        let vpath = VirtualPath::parse(path).unwrap();
        let url = format!("http://esgf-data.example/thredds/fileServer{path}");
        catalogue.insert_file(mapper.map(&vpath).pairs(), file_record(&url, size, "2020-01-01T00:00:00Z"));
    }
    catalogue
}

/// A cache over `catalogue` and `downloader`, rooted in a fresh temp dir.
pub fn lazy_cache(
    catalogue: InMemoryCatalogue,
    downloader: Arc<FakeDownloader>,
    max_concurrent: usize,
) -> (tempfile::TempDir, LazyCache) {
    let dir = tempfile::tempdir().unwrap();
    let layout = CacheLayout::new(dir.path(), None);
    layout.prepare().unwrap();

    let resolver = Resolver::new(Arc::new(catalogue), Arc::new(AliasFacetMapper::new()));
    let dispatcher = Dispatcher::new(layout, downloader, max_concurrent, Some(Duration::from_secs(3600))).unwrap();
    (dir, LazyCache::new(resolver, dispatcher, Duration::ZERO))
}
