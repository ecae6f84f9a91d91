//! Blocking search client for the ESGF index.
//!
//! FUSE handlers run on plain OS threads and cannot await, so the client
//! owns a small multi-threaded tokio runtime and bridges every query through
//! `Runtime::block_on`. Calling [`Catalogue::search`] from inside another
//! tokio runtime is not supported.
//!
//! # Tiger Style
//!
//! - Explicit timeout on every request
//! - Bounded retries with a fixed delay
//! - Result size clamped by [`MAX_SEARCH_LIMIT`](crate::constants::MAX_SEARCH_LIMIT)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use snafu::ResultExt;
use tokio::runtime::Runtime;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::constants::MAX_SEARCH_PAGES;
use crate::constants::MAX_SEARCH_RETRIES;
use crate::constants::SEARCH_RETRY_DELAY;
use crate::constants::SEARCH_RUNTIME_THREADS;
use crate::constants::SEARCH_TIMEOUT;
use crate::error;
use crate::error::CatalogueError;
use crate::error::Result;
use crate::query::SearchQuery;
use crate::record::RawDoc;
use crate::record::SearchRecord;

/// Result of a catalogue search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Total number of matches reported by the index.
    pub num_found: u64,
    /// Matching records in index order.
    pub records: Vec<SearchRecord>,
    /// Facet name -> (value -> dataset count), for requested facets.
    pub facet_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Read-only catalogue of climate data records.
pub trait Catalogue: Send + Sync {
    /// Run a search and return the matching records.
    fn search(&self, query: &SearchQuery) -> Result<SearchResults>;

    /// Run a search and follow `offset` until every match is collected.
    ///
    /// Stops after [`MAX_SEARCH_PAGES`] pages or at the first empty page.
    /// Facet counts are those of the first page.
    fn search_all(&self, query: &SearchQuery) -> Result<SearchResults> {
        let mut results = self.search(query)?;
        let wanted = results.num_found.saturating_sub(u64::from(query.first_record()));
        let mut pages = 1u32;

        while (results.records.len() as u64) < wanted {
            if pages >= MAX_SEARCH_PAGES {
                warn!(
                    num_found = results.num_found,
                    collected = results.records.len(),
                    max_pages = MAX_SEARCH_PAGES,
                    "search page limit reached, result is incomplete"
                );
                break;
            }

            let collected = u32::try_from(results.records.len()).unwrap_or(u32::MAX);
            let page = self.search(&query.clone().offset(query.first_record().saturating_add(collected)))?;
            pages += 1;
            if page.records.is_empty() {
                break;
            }
            results.records.extend(page.records);
        }

        debug!(pages, collected = results.records.len(), num_found = results.num_found, "paged search completed");
        Ok(results)
    }
}

#[derive(Debug, Deserialize)]
struct SolrResponse {
    response: SolrBody,
    #[serde(default)]
    facet_counts: Option<SolrFacetCounts>,
}

#[derive(Debug, Deserialize)]
struct SolrBody {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default)]
    docs: Vec<RawDoc>,
}

#[derive(Debug, Deserialize)]
struct SolrFacetCounts {
    #[serde(default)]
    facet_fields: BTreeMap<String, Vec<serde_json::Value>>,
}

impl From<SolrResponse> for SearchResults {
    fn from(raw: SolrResponse) -> Self {
        let facet_counts = raw
            .facet_counts
            .map(|counts| {
                counts.facet_fields.into_iter().map(|(facet, flat)| (facet, pair_up_counts(&flat))).collect()
            })
            .unwrap_or_default();

        Self {
            num_found: raw.response.num_found,
            records: raw.response.docs.into_iter().map(SearchRecord::from).collect(),
            facet_counts,
        }
    }
}

/// Solr returns facet counts as a flat `[value, count, value, count, ...]` list.
fn pair_up_counts(flat: &[serde_json::Value]) -> BTreeMap<String, u64> {
    flat.chunks_exact(2)
        .filter_map(|pair| {
            let value = pair[0].as_str()?;
            let count = pair[1].as_u64()?;
            Some((value.to_string(), count))
        })
        .collect()
}

/// HTTP client for an `esg-search/search` endpoint.
pub struct EsgfSearchClient {
    /// Runtime used to drive the async HTTP client from sync callers.
    runtime: Runtime,
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl EsgfSearchClient {
    /// Create a client for the given search endpoint.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, SEARCH_TIMEOUT)
    }

    /// Create a client with an explicit per-request timeout.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context(error::InvalidEndpointSnafu { endpoint })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(SEARCH_RUNTIME_THREADS)
            .thread_name("esgf-search")
            .enable_all()
            .build()
            .context(error::RuntimeSnafu)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("esgf-fuse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(error::HttpClientSnafu)?;

        Ok(Self { runtime, http, endpoint, timeout })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn search_once(&self, query: &SearchQuery) -> Result<SearchResults> {
        let url = self.endpoint.to_string();
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&query.to_query_pairs())
            .send()
            .await
            .context(error::RequestSnafu { url: url.clone() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogueError::Status { status: status.as_u16(), url });
        }

        let raw: SolrResponse = response.json().await.context(error::DecodeSnafu { url })?;
        Ok(raw.into())
    }
}

impl Catalogue for EsgfSearchClient {
    fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.runtime.block_on(async {
            let mut retries = 0u32;

            loop {
                let err = match tokio::time::timeout(self.timeout, self.search_once(query)).await {
                    Ok(Ok(results)) => {
                        debug!(
                            endpoint = %self.endpoint,
                            num_found = results.num_found,
                            returned = results.records.len(),
                            "catalogue search completed"
                        );
                        return Ok(results);
                    }
                    Ok(Err(err)) => err,
                    Err(_) => CatalogueError::Timeout { attempts: retries + 1 },
                };

                if !err.is_retryable() || retries >= MAX_SEARCH_RETRIES {
                    return Err(err);
                }

                warn!(error = %err, retries, max_retries = MAX_SEARCH_RETRIES, "catalogue search failed, retrying");
                retries += 1;
                tokio::time::sleep(SEARCH_RETRY_DELAY).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_flat_facet_counts() {
        let flat = vec![
            serde_json::json!("MPI-ESM-LR"),
            serde_json::json!(12),
            serde_json::json!("CanCM4"),
            serde_json::json!(3),
        ];
        let counts = pair_up_counts(&flat);
        assert_eq!(counts.get("MPI-ESM-LR"), Some(&12));
        assert_eq!(counts.get("CanCM4"), Some(&3));
    }

    #[test]
    fn decodes_solr_response() {
        let raw: SolrResponse = serde_json::from_value(serde_json::json!({
            "response": {
                "numFound": 1,
                "docs": [{
                    "url": ["http://host/tas.nc|application/netcdf|HTTPServer"],
                    "size": 42,
                    "timestamp": "2020-01-01T00:00:00Z"
                }]
            },
            "facet_counts": {"facet_fields": {"model": ["MPI-ESM-LR", 7]}}
        }))
        .unwrap();

        let results = SearchResults::from(raw);
        assert_eq!(results.num_found, 1);
        assert_eq!(results.records[0].size, Some(42));
        assert_eq!(results.facet_counts["model"]["MPI-ESM-LR"], 7);
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let err = EsgfSearchClient::new("not a url").err().unwrap();
        assert!(matches!(err, CatalogueError::InvalidEndpoint { .. }));
    }
}
