//! FUSE filesystem serving ESGF NetCDF files through a lazy local cache.
//!
//! Paths follow the ESGF directory scheme:
//!
//! ```text
//! /project/product/institute/model/experiment/frequency/realm/variable/ensemble/file.nc
//! ```
//!
//! Looking up a `.nc` path resolves it against the ESGF search catalogue for
//! its size. Opening it downloads the file into the cache with a bounded
//! number of concurrent downloads; later reads are served from the cached
//! copy.
//!
//! # Layers
//!
//! - [`path`] and [`facets`]: virtual path decomposition and facet mapping
//! - [`resolver`]: catalogue lookup of download URL and size
//! - [`dispatcher`], [`downloader`], [`lock`]: bounded downloads with lock files
//! - [`cache`]: path-level metadata/open/read semantics
//! - [`fs`]: the `fuse_backend_rs` `FileSystem` binding
//!
//! # Tiger Style
//!
//! - Explicit resource bounds (see [`constants`])
//! - Fail-fast on configuration errors

pub mod cache;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod downloader;
pub mod facets;
pub mod fs;
pub mod inode;
pub mod layout;
pub mod lock;
pub mod path;
pub mod resolver;

pub use cache::CacheError;
pub use cache::EntryKind;
pub use cache::EntryMetadata;
pub use cache::LazyCache;
pub use cache::OpenOutcome;
pub use cache::ReadOutcome;
pub use config::EsgfFsConfig;
pub use dispatcher::DispatchOutcome;
pub use dispatcher::Dispatcher;
pub use downloader::Downloader;
pub use downloader::WgetDownloader;
pub use facets::AliasFacetMapper;
pub use facets::FacetMapper;
pub use facets::FacetMapping;
pub use fs::EsgfFs;
pub use layout::CacheLayout;
pub use path::VirtualPath;
pub use resolver::ResolveError;
pub use resolver::ResolvedLocation;
pub use resolver::Resolver;
