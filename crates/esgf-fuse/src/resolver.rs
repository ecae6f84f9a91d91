//! Resolution of virtual paths to download locations.
//!
//! The catalogue may hold several replicas or versions of a file. The record
//! with the latest timestamp wins; on equal timestamps the record seen last
//! in result order wins. URL and size are both taken from the winning record.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use esgf_catalogue::Catalogue;
use esgf_catalogue::CatalogueError;
use esgf_catalogue::SearchRecord;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;
use tracing::warn;

use crate::facets::FacetMapper;
use crate::path::PathError;
use crate::path::VirtualPath;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResolveError {
    #[snafu(display("{source}"))]
    UnsupportedPath { source: PathError },

    #[snafu(display("no downloadable record for {path}"))]
    NotFound { path: String },

    #[snafu(display("catalogue query for {path} failed: {source}"))]
    Catalogue { path: String, source: CatalogueError },
}

impl ResolveError {
    /// errno the filesystem reports for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ResolveError::UnsupportedPath { .. } => libc::EINVAL,
            ResolveError::NotFound { .. } => libc::ENOENT,
            ResolveError::Catalogue { .. } => libc::EIO,
        }
    }
}

/// Where to fetch a file from and how large it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub url: String,
    pub size: u64,
    /// Timestamp of the record the location was taken from.
    pub timestamp: DateTime<Utc>,
}

/// Resolves virtual paths through the catalogue.
pub struct Resolver {
    catalogue: Arc<dyn Catalogue>,
    mapper: Arc<dyn FacetMapper>,
}

impl Resolver {
    pub fn new(catalogue: Arc<dyn Catalogue>, mapper: Arc<dyn FacetMapper>) -> Self {
        Self { catalogue, mapper }
    }

    /// Parse and resolve a path string.
    pub fn resolve_str(&self, path: &str) -> Result<ResolvedLocation, ResolveError> {
        let path = VirtualPath::parse(path).context(UnsupportedPathSnafu)?;
        self.resolve(&path)
    }

    /// Query the catalogue for `path` and select the latest record.
    pub fn resolve(&self, path: &VirtualPath) -> Result<ResolvedLocation, ResolveError> {
        let shown = path.to_string();
        let query = self.mapper.map(path).file_query();
        let results = self.catalogue.search_all(&query).context(CatalogueSnafu { path: shown.clone() })?;

        debug!(path = %shown, records = results.records.len(), num_found = results.num_found, "catalogue answered");

        select_latest(&shown, &results.records).ok_or(ResolveError::NotFound { path: shown })
    }
}

/// Pick the record with the greatest timestamp; ties go to the later record.
fn select_latest(path: &str, records: &[SearchRecord]) -> Option<ResolvedLocation> {
    let mut best: Option<ResolvedLocation> = None;

    for record in records {
        let Some(timestamp) = record.timestamp() else {
            warn!(path, timestamp = ?record.timestamp_raw, "skipping record without a valid timestamp");
            continue;
        };
        let Some(entry) = record.netcdf_url() else {
            warn!(path, id = ?record.id, "skipping record without a NetCDF URL");
            continue;
        };
        let Some(size) = record.size else {
            warn!(path, id = ?record.id, "skipping record without a size");
            continue;
        };

        if best.as_ref().is_none_or(|current| timestamp >= current.timestamp) {
            best = Some(ResolvedLocation { url: entry.url.clone(), size, timestamp });
        }
    }

    best
}
