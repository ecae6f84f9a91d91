//! Mapping from virtual path components to catalogue facets.

use std::collections::BTreeMap;
use std::collections::HashMap;

use esgf_catalogue::SearchQuery;

use crate::path::Facet;
use crate::path::VirtualPath;

/// Catalogue facet constraints derived from a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetMapping {
    pub project: String,
    pub product: String,
    pub institute: String,
    pub model: String,
    pub experiment: String,
    pub time_frequency: String,
    pub realm: String,
    pub variable: String,
    pub ensemble: String,
    /// File title, matched against the record title.
    pub title: String,
}

impl FacetMapping {
    /// Facet key/value pairs in path order, title last.
    pub fn pairs(&self) -> [(&'static str, &str); 10] {
        [
            (Facet::Project.key(), &self.project),
            (Facet::Product.key(), &self.product),
            (Facet::Institute.key(), &self.institute),
            (Facet::Model.key(), &self.model),
            (Facet::Experiment.key(), &self.experiment),
            (Facet::TimeFrequency.key(), &self.time_frequency),
            (Facet::Realm.key(), &self.realm),
            (Facet::Variable.key(), &self.variable),
            (Facet::Ensemble.key(), &self.ensemble),
            ("title", &self.title),
        ]
    }

    /// File query constrained by every facet and the title.
    pub fn file_query(&self) -> SearchQuery {
        self.pairs()
            .into_iter()
            .fold(SearchQuery::files(), |query, (key, value)| query.constraint(key, value))
            .fields(["url", "size", "timestamp", "title"])
    }
}

/// Pure function from a virtual path to catalogue facets.
pub trait FacetMapper: Send + Sync {
    fn map(&self, path: &VirtualPath) -> FacetMapping;
}

/// Default mapper: per-facet value aliases, everything else passes through.
///
/// Aliases are keyed by catalogue facet name (`project`, `model`, ...). A
/// local directory name such as `cmip5` can so be queried as `CMIP5`.
#[derive(Debug, Clone, Default)]
pub struct AliasFacetMapper {
    aliases: HashMap<String, HashMap<String, String>>,
}

impl AliasFacetMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[mapping]` configuration table.
    pub fn from_table(table: &BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let aliases = table
            .iter()
            .map(|(facet, values)| {
                let values = values.iter().map(|(from, to)| (from.clone(), to.clone())).collect();
                (facet.clone(), values)
            })
            .collect();
        Self { aliases }
    }

    /// Add one alias for a facet.
    pub fn alias(mut self, facet: &str, from: &str, to: &str) -> Self {
        self.aliases.entry(facet.to_string()).or_default().insert(from.to_string(), to.to_string());
        self
    }

    fn apply(&self, facet: Facet, value: &str) -> String {
        self.aliases
            .get(facet.key())
            .and_then(|values| values.get(value))
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }
}

impl FacetMapper for AliasFacetMapper {
    fn map(&self, path: &VirtualPath) -> FacetMapping {
        let value = |facet: Facet| self.apply(facet, path.facet(facet));
        FacetMapping {
            project: value(Facet::Project),
            product: value(Facet::Product),
            institute: value(Facet::Institute),
            model: value(Facet::Model),
            experiment: value(Facet::Experiment),
            time_frequency: value(Facet::TimeFrequency),
            realm: value(Facet::Realm),
            variable: value(Facet::Variable),
            ensemble: value(Facet::Ensemble),
            title: path.filename().to_string(),
        }
    }
}
