//! Virtual path model.
//!
//! A served file lives at
//! `/project/product/institute/model/experiment/frequency/realm/variable/ensemble/filename.nc`.
//! Every path component before the filename is a facet value; the position
//! determines which facet.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use snafu::Snafu;
use snafu::ensure;

use crate::constants::DATA_FILE_EXTENSION;
use crate::constants::FACET_SEGMENTS;

/// Errors produced while decomposing a virtual path.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum PathError {
    /// The path does not have exactly nine facet segments before the filename.
    #[snafu(display("unsupported path structure '{path}': {facets} facet segments, expected {FACET_SEGMENTS}"))]
    WrongDepth { path: String, facets: usize },

    /// A component is empty or a relative reference.
    #[snafu(display("unsupported path '{path}': invalid component '{component}'"))]
    InvalidComponent { path: String, component: String },
}

/// Facet positions in a virtual path, in path order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Project,
    Product,
    Institute,
    Model,
    Experiment,
    TimeFrequency,
    Realm,
    Variable,
    Ensemble,
}

impl Facet {
    /// All facets in path order.
    pub const ALL: [Facet; FACET_SEGMENTS] = [
        Facet::Project,
        Facet::Product,
        Facet::Institute,
        Facet::Model,
        Facet::Experiment,
        Facet::TimeFrequency,
        Facet::Realm,
        Facet::Variable,
        Facet::Ensemble,
    ];

    /// Catalogue facet key for this position.
    pub fn key(&self) -> &'static str {
        match self {
            Facet::Project => "project",
            Facet::Product => "product",
            Facet::Institute => "institute",
            Facet::Model => "model",
            Facet::Experiment => "experiment",
            Facet::TimeFrequency => "time_frequency",
            Facet::Realm => "realm",
            Facet::Variable => "variable",
            Facet::Ensemble => "ensemble",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// A decomposed virtual path: nine facet values and a filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    facets: [String; FACET_SEGMENTS],
    filename: String,
}

impl VirtualPath {
    /// Decompose a slash-separated virtual path.
    ///
    /// A leading slash is optional. Empty components (`a//b`, trailing `/`)
    /// and `.`/`..` are rejected.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let components: Vec<&str> = trimmed.split('/').collect();

        for component in &components {
            ensure!(
                !component.is_empty() && *component != "." && *component != "..",
                InvalidComponentSnafu { path, component: *component }
            );
        }

        let facet_count = components.len().saturating_sub(1);
        ensure!(facet_count == FACET_SEGMENTS, WrongDepthSnafu { path, facets: facet_count });

        let (filename, facet_values) = components.split_last().ok_or_else(|| PathError::WrongDepth {
            path: path.to_string(),
            facets: 0,
        })?;

        let facets: [String; FACET_SEGMENTS] = std::array::from_fn(|i| facet_values[i].to_string());

        Ok(Self { facets, filename: (*filename).to_string() })
    }

    /// Value of a facet.
    pub fn facet(&self, facet: Facet) -> &str {
        &self.facets[facet.index()]
    }

    /// All facet values in path order.
    pub fn facets(&self) -> &[String; FACET_SEGMENTS] {
        &self.facets
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Directory part relative to the tree root, e.g. `CMIP5/output/.../r1i1p1`.
    pub fn directory(&self) -> PathBuf {
        self.facets.iter().collect()
    }

    /// Full path relative to the tree root.
    pub fn relative(&self) -> PathBuf {
        self.directory().join(&self.filename)
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for facet in &self.facets {
            write!(f, "/{facet}")?;
        }
        write!(f, "/{}", self.filename)
    }
}

/// Whether a path names a data file (by extension).
pub fn is_data_file(path: &str) -> bool {
    Path::new(path).extension().is_some_and(|ext| ext == DATA_FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "/CMIP5/output/MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc";

    #[test]
    fn parses_scenario_path() {
        let path = VirtualPath::parse(SCENARIO).unwrap();
        assert_eq!(path.facet(Facet::Project), "CMIP5");
        assert_eq!(path.facet(Facet::Institute), "MPI-M");
        assert_eq!(path.facet(Facet::Model), "MPI-ESM-LR");
        assert_eq!(path.facet(Facet::TimeFrequency), "mon");
        assert_eq!(path.facet(Facet::Ensemble), "r1i1p1");
        assert_eq!(path.filename(), "tas_Amon.nc");
        assert_eq!(path.to_string(), SCENARIO);
    }

    #[test]
    fn leading_slash_is_optional() {
        let with = VirtualPath::parse(SCENARIO).unwrap();
        let without = VirtualPath::parse(&SCENARIO[1..]).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn relative_path_keeps_layout() {
        let path = VirtualPath::parse(SCENARIO).unwrap();
        assert_eq!(path.relative(), PathBuf::from(&SCENARIO[1..]));
        assert_eq!(path.directory(), PathBuf::from("CMIP5/output/MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1"));
    }

    #[test]
    fn rejects_short_path() {
        let err = VirtualPath::parse("/CMIP5/output/tas_Amon.nc").unwrap_err();
        assert_eq!(err, PathError::WrongDepth { path: "/CMIP5/output/tas_Amon.nc".into(), facets: 2 });
    }

    #[test]
    fn rejects_traversal_and_empty_components() {
        assert!(matches!(
            VirtualPath::parse("/CMIP5/../MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc"),
            Err(PathError::InvalidComponent { .. })
        ));
        assert!(matches!(
            VirtualPath::parse("/CMIP5//MPI-M/MPI-ESM-LR/decadal2001/mon/atmos/tas/r1i1p1/tas_Amon.nc"),
            Err(PathError::InvalidComponent { .. })
        ));
        assert!(matches!(VirtualPath::parse("/"), Err(PathError::InvalidComponent { .. })));
    }

    #[test]
    fn data_file_detection() {
        assert!(is_data_file(SCENARIO));
        assert!(!is_data_file("/CMIP5/output"));
        assert!(!is_data_file("/CMIP5/output/readme.txt"));
    }
}
