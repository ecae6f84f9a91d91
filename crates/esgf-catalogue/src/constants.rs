//! Tiger Style resource bounds for catalogue queries.

use std::time::Duration;

/// Default ESGF search endpoint.
pub const DEFAULT_SEARCH_URL: &str = "https://esgf-node.llnl.gov/esg-search/search";

/// Response format requested from the search endpoint.
pub const SOLR_JSON_FORMAT: &str = "application/solr+json";

/// Mime type marking a NetCDF download URL.
pub const NETCDF_MIME_TYPE: &str = "application/netcdf";

/// Timeout for a single search request.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retries for a failing search request.
pub const MAX_SEARCH_RETRIES: u32 = 3;

/// Delay between search retries.
pub const SEARCH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default number of records requested per query.
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

/// Hard upper bound on records requested per query.
pub const MAX_SEARCH_LIMIT: u32 = 10_000;

/// Maximum pages fetched when collecting every match of a query.
pub const MAX_SEARCH_PAGES: u32 = 100;

/// Worker threads of the runtime backing the blocking search client.
pub const SEARCH_RUNTIME_THREADS: usize = 2;

/// Timestamp format used by catalogue records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const _: () = assert!(DEFAULT_SEARCH_LIMIT > 0);
const _: () = assert!(DEFAULT_SEARCH_LIMIT <= MAX_SEARCH_LIMIT);
const _: () = assert!(SEARCH_RUNTIME_THREADS > 0);
const _: () = assert!(MAX_SEARCH_PAGES > 0);
const _: () = assert!(SEARCH_TIMEOUT.as_secs() > 0);
