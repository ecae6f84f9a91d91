//! Search query construction.

use std::collections::BTreeMap;

use crate::constants::DEFAULT_SEARCH_LIMIT;
use crate::constants::MAX_SEARCH_LIMIT;
use crate::constants::SOLR_JSON_FORMAT;

/// Kind of index entry a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Individual files.
    File,
    /// Whole datasets.
    Dataset,
}

impl SearchType {
    /// Value of the `type` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::File => "File",
            SearchType::Dataset => "Dataset",
        }
    }
}

/// A catalogue query: facet constraints plus the fields to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    search_type: SearchType,
    constraints: BTreeMap<String, Vec<String>>,
    fields: Vec<String>,
    facets: Vec<String>,
    limit: u32,
    offset: u32,
    distrib: bool,
}

impl SearchQuery {
    /// Start a query for file records.
    pub fn files() -> Self {
        Self::new(SearchType::File)
    }

    /// Start a query for dataset records.
    pub fn datasets() -> Self {
        Self::new(SearchType::Dataset)
    }

    fn new(search_type: SearchType) -> Self {
        Self {
            search_type,
            constraints: BTreeMap::new(),
            fields: Vec::new(),
            facets: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
            distrib: true,
        }
    }

    /// Add a facet constraint. Repeated keys are OR-ed by the index.
    pub fn constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Restrict the returned fields.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Request value counts for a facet.
    pub fn facet(mut self, facet: impl Into<String>) -> Self {
        self.facets.push(facet.into());
        self
    }

    /// Maximum number of records to return (clamped to [`MAX_SEARCH_LIMIT`]).
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit.min(MAX_SEARCH_LIMIT);
        self
    }

    /// Offset of the first record.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Whether the query fans out to all federated nodes.
    pub fn distrib(mut self, distrib: bool) -> Self {
        self.distrib = distrib;
        self
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn constraints(&self) -> &BTreeMap<String, Vec<String>> {
        &self.constraints
    }

    pub fn requested_facets(&self) -> &[String] {
        &self.facets
    }

    pub fn max_records(&self) -> u32 {
        self.limit
    }

    pub fn first_record(&self) -> u32 {
        self.offset
    }

    /// Render the query as URL query pairs.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("type".to_string(), self.search_type.as_str().to_string()),
            ("format".to_string(), SOLR_JSON_FORMAT.to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
            ("distrib".to_string(), self.distrib.to_string()),
        ];
        if !self.fields.is_empty() {
            pairs.push(("fields".to_string(), self.fields.join(",")));
        }
        if !self.facets.is_empty() {
            pairs.push(("facets".to_string(), self.facets.join(",")));
        }
        for (key, values) in &self.constraints {
            for value in values {
                pairs.push((key.clone(), value.clone()));
            }
        }
        pairs
    }
}
