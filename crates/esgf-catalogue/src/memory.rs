//! In-memory catalogue for offline use and tests.
//!
//! Records are stored with the facet values they are indexed under. A query
//! matches a record when every constraint key is present on the record with
//! one of the requested values.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;

use crate::client::Catalogue;
use crate::client::SearchResults;
use crate::error::Result;
use crate::query::SearchQuery;
use crate::query::SearchType;
use crate::record::SearchRecord;

#[derive(Debug, Clone)]
struct IndexedRecord {
    search_type: SearchType,
    facets: BTreeMap<String, String>,
    record: SearchRecord,
}

/// Catalogue backed by a `Vec` of indexed records.
#[derive(Debug, Default)]
pub struct InMemoryCatalogue {
    records: RwLock<Vec<IndexedRecord>>,
    searches: AtomicU64,
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a file record under the given facet values.
    pub fn insert_file<I, K, V>(&self, facets: I, record: SearchRecord)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(SearchType::File, facets, record);
    }

    /// Index a dataset record under the given facet values.
    pub fn insert_dataset<I, K, V>(&self, facets: I, record: SearchRecord)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(SearchType::Dataset, facets, record);
    }

    fn insert<I, K, V>(&self, search_type: SearchType, facets: I, record: SearchRecord)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let facets = facets.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.records.write().push(IndexedRecord { search_type, facets, record });
    }

    /// Number of searches served so far.
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }
}

impl Catalogue for InMemoryCatalogue {
    fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.searches.fetch_add(1, Ordering::Relaxed);

        let records = self.records.read();

        let matching: Vec<&IndexedRecord> = records
            .iter()
            .filter(|indexed| indexed.search_type == query.search_type())
            .filter(|indexed| {
                query.constraints().iter().all(|(key, wanted)| {
                    indexed.facets.get(key).is_some_and(|have| wanted.iter().any(|w| w == have))
                })
            })
            .collect();

        let mut facet_counts: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for facet in query.requested_facets() {
            let counts = facet_counts.entry(facet.clone()).or_default();
            for indexed in &matching {
                if let Some(value) = indexed.facets.get(facet) {
                    *counts.entry(value.clone()).or_default() += 1;
                }
            }
        }

        let num_found = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(query.first_record() as usize)
            .take(query.max_records() as usize)
            .map(|indexed| indexed.record.clone())
            .collect();

        Ok(SearchResults { num_found, records, facet_counts })
    }
}
