//! Catalogue records and their encoded URL lists.
//!
//! The search index encodes every access endpoint of a record as a single
//! pipe-delimited string: `url|mime-type|access-type`, for example
//! `https://host/file.nc|application/netcdf|HTTPServer`.

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;

use crate::constants::NETCDF_MIME_TYPE;
use crate::constants::TIMESTAMP_FORMAT;

/// One access endpoint of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    /// Download or service URL.
    pub url: String,
    /// Declared content type (may be empty).
    pub mime_type: String,
    /// Access protocol name, e.g. `HTTPServer`, `OPENDAP`, `GridFTP`.
    pub access_type: String,
}

impl UrlEntry {
    /// Parse a pipe-delimited `url|mime-type|access-type` entry.
    ///
    /// Returns `None` for an entry without a URL part.
    pub fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split('|');
        let url = parts.next()?.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            mime_type: parts.next().unwrap_or_default().trim().to_string(),
            access_type: parts.next().unwrap_or_default().trim().to_string(),
        })
    }

    /// Whether the declared content type is NetCDF.
    pub fn is_netcdf(&self) -> bool {
        self.mime_type.contains(NETCDF_MIME_TYPE)
    }

    /// Whether the access type starts with `kind` (case-insensitive).
    ///
    /// `http` matches `HTTPServer`, `opendap` matches `OPENDAP`.
    pub fn has_access(&self, kind: &str) -> bool {
        self.access_type.to_ascii_lowercase().starts_with(&kind.to_ascii_lowercase())
    }
}

/// A record returned by a catalogue search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRecord {
    /// Record identifier (`<instance>|<data node>` for ESGF).
    pub id: Option<String>,
    /// File or dataset title.
    pub title: Option<String>,
    /// Identifier of the owning dataset (file records only).
    pub dataset_id: Option<String>,
    /// Access endpoints in index order.
    pub urls: Vec<UrlEntry>,
    /// File size in bytes.
    pub size: Option<u64>,
    /// Raw timestamp as returned by the index.
    pub timestamp_raw: Option<String>,
}

impl SearchRecord {
    /// Parsed record timestamp, if present and well formed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_raw.as_deref().and_then(parse_timestamp)
    }

    /// The first NetCDF endpoint of this record.
    pub fn netcdf_url(&self) -> Option<&UrlEntry> {
        self.urls.iter().find(|entry| entry.is_netcdf())
    }

    /// Identifier without the trailing `|data-node` part.
    pub fn instance_id(&self) -> Option<&str> {
        self.id.as_deref().map(|id| id.split('|').next().unwrap_or(id))
    }
}

/// Parse a catalogue timestamp.
///
/// Accepts the index format `%Y-%m-%dT%H:%M:%SZ` and falls back to RFC 3339
/// for timestamps carrying fractional seconds or an offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Wire shape of a search document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawDoc {
    #[serde(default, deserialize_with = "one_or_first")]
    id: Option<String>,
    #[serde(default, deserialize_with = "one_or_first")]
    title: Option<String>,
    #[serde(default, deserialize_with = "one_or_first")]
    dataset_id: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    url: Vec<String>,
    #[serde(default, deserialize_with = "size_value")]
    size: Option<u64>,
    #[serde(default, deserialize_with = "one_or_first")]
    timestamp: Option<String>,
}

impl From<RawDoc> for SearchRecord {
    fn from(doc: RawDoc) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            dataset_id: doc.dataset_id,
            urls: doc.url.iter().filter_map(|encoded| UrlEntry::parse(encoded)).collect(),
            size: doc.size,
            timestamp_raw: doc.timestamp,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

fn one_or_first<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(one_or_many(deserializer)?.into_iter().next())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(u64),
    Text(String),
    Many(Vec<u64>),
}

fn size_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<SizeValue>::deserialize(deserializer)? {
        Some(SizeValue::Number(n)) => Some(n),
        Some(SizeValue::Text(s)) => s.trim().parse().ok(),
        Some(SizeValue::Many(values)) => values.into_iter().next(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_full_url_entry() {
        let entry = UrlEntry::parse("https://host/data/tas.nc|application/netcdf|HTTPServer").unwrap();
        assert_eq!(entry.url, "https://host/data/tas.nc");
        assert!(entry.is_netcdf());
        assert!(entry.has_access("http"));
        assert!(!entry.has_access("opendap"));
    }

    #[test]
    fn url_entry_without_mime_is_not_netcdf() {
        let entry = UrlEntry::parse("https://host/data/tas.nc").unwrap();
        assert!(!entry.is_netcdf());
        assert!(UrlEntry::parse("|application/netcdf|HTTPServer").is_none());
    }

    #[test]
    fn parses_index_timestamp() {
        let ts = parse_timestamp("2020-01-01T00:00:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parses_fractional_timestamp() {
        let ts = parse_timestamp("2016-05-12T10:33:45.250Z").unwrap();
        assert_eq!(ts.timestamp(), Utc.with_ymd_and_hms(2016, 5, 12, 10, 33, 45).unwrap().timestamp());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn decodes_document_variants() {
        let doc: RawDoc = serde_json::from_value(serde_json::json!({
            "id": "cmip5.output1.tas_Amon.nc|esgf-data.dkrz.de",
            "title": ["tas_Amon.nc"],
            "url": [
                "http://host/thredds/dodsC/tas_Amon.nc.html|application/opendap-html|OPENDAP",
                "http://host/thredds/fileServer/tas_Amon.nc|application/netcdf|HTTPServer"
            ],
            "size": "1048576",
            "timestamp": "2020-01-01T00:00:00Z"
        }))
        .unwrap();
        let record = SearchRecord::from(doc);
        assert_eq!(record.title.as_deref(), Some("tas_Amon.nc"));
        assert_eq!(record.size, Some(1_048_576));
        assert_eq!(record.urls.len(), 2);
        assert_eq!(record.netcdf_url().unwrap().url, "http://host/thredds/fileServer/tas_Amon.nc");
        assert_eq!(record.instance_id(), Some("cmip5.output1.tas_Amon.nc"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let doc: RawDoc = serde_json::from_value(serde_json::json!({})).unwrap();
        let record = SearchRecord::from(doc);
        assert!(record.urls.is_empty());
        assert!(record.size.is_none());
        assert!(record.timestamp().is_none());
    }
}
