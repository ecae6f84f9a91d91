//! Client for the ESGF (Earth System Grid Federation) search catalogue.
//!
//! Provides the read-only query side used by the `esgf-fuse` filesystem:
//! a query builder for facet-constrained searches, the record model for the
//! index's pipe-delimited URL lists, a blocking HTTP client, and an in-memory
//! catalogue for offline use.
//!
//! # Example
//!
//! ```no_run
//! use esgf_catalogue::Catalogue;
//! use esgf_catalogue::EsgfSearchClient;
//! use esgf_catalogue::SearchQuery;
//!
//! let client = EsgfSearchClient::new("https://esgf-node.llnl.gov/esg-search/search")?;
//! let query = SearchQuery::files()
//!     .constraint("project", "CMIP5")
//!     .constraint("variable", "tas")
//!     .fields(["url", "size", "timestamp"]);
//! for record in client.search(&query)?.records {
//!     println!("{:?}", record.netcdf_url());
//! }
//! # Ok::<(), esgf_catalogue::CatalogueError>(())
//! ```

pub mod client;
pub mod constants;
pub mod error;
pub mod memory;
pub mod query;
pub mod record;

pub use client::Catalogue;
pub use client::EsgfSearchClient;
pub use client::SearchResults;
pub use error::CatalogueError;
pub use memory::InMemoryCatalogue;
pub use query::SearchQuery;
pub use query::SearchType;
pub use record::SearchRecord;
pub use record::UrlEntry;
