//! Granule descriptor records and the working-directory catalog reader.
//!
//! Each granule in the working directory is described by a `*.meta.json`
//! descriptor holding its identity, validity interval, and a reference to
//! its payload blob. The catalog reader skims these descriptors into
//! immutable [`GranuleRecord`]s; all downstream components share the records
//! by reference and never mutate them.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Suffix of granule descriptor files in the working directory.
pub const DESCRIPTOR_SUFFIX: &str = ".meta.json";

/// Metadata record for one granule instance.
#[derive(Debug, Clone)]
pub struct GranuleRecord {
    /// Granule identity, unique per collection within a working directory
    pub granule_id: String,

    /// Collection short name
    pub collection: String,

    /// Unique identifier of this unpacked instance
    pub instance_id: String,

    /// Start of the validity interval
    pub start_time: DateTime<Utc>,

    /// End of the validity interval
    pub end_time: DateTime<Utc>,

    /// Observed start of the data, used for product file naming
    pub observed_start: Option<DateTime<Utc>>,

    /// Path of the descriptor this record was read from
    pub descriptor_path: PathBuf,

    /// Path of the payload blob, if the descriptor references one.
    /// Night passes produce descriptors without payloads for some records.
    pub blob_path: Option<PathBuf>,
}

impl GranuleRecord {
    /// Observed start time, falling back to the validity start.
    pub fn observed_or_start(&self) -> DateTime<Utc> {
        self.observed_start.unwrap_or(self.start_time)
    }
}

/// On-disk descriptor shape.
#[derive(Debug, Deserialize)]
struct Descriptor {
    granule_id: String,
    collection: String,
    instance_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(default)]
    observed_start: Option<DateTime<Utc>>,
    #[serde(default)]
    blob_path: Option<PathBuf>,
}

/// Filter for a catalog skim.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    /// Only yield records of this collection
    pub collection: Option<String>,

    /// Only yield records with this granule identity
    pub granule_id: Option<String>,
}

impl CatalogQuery {
    /// Query for every record of one collection.
    pub fn collection(name: &str) -> Self {
        Self {
            collection: Some(name.to_string()),
            granule_id: None,
        }
    }

    /// Query for one granule of one collection.
    pub fn granule(collection: &str, granule_id: &str) -> Self {
        Self {
            collection: Some(collection.to_string()),
            granule_id: Some(granule_id.to_string()),
        }
    }

    fn matches(&self, record: &GranuleRecord) -> bool {
        if let Some(c) = &self.collection {
            if record.collection != *c {
                return false;
            }
        }
        if let Some(g) = &self.granule_id {
            if record.granule_id != *g {
                return false;
            }
        }
        true
    }
}

/// Reader of granule metadata from a working directory.
///
/// Every call re-reads the directory, so the sequence is restartable and a
/// later skim observes records produced since the previous one.
pub trait Catalog: Send + Sync {
    /// Read all records matching the query.
    fn skim(&self, query: &CatalogQuery) -> Result<Vec<GranuleRecord>>;
}

/// Filesystem-backed catalog over one working directory.
pub struct FsCatalog {
    root: PathBuf,
}

impl FsCatalog {
    /// Create a catalog over the given working directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The working directory this catalog reads.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_descriptor(&self, path: &Path) -> Result<GranuleRecord> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
        let desc: Descriptor = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed descriptor {}", path.display()))?;

        // Relative blob paths are resolved against the descriptor's directory.
        let blob_path = desc.blob_path.map(|p| {
            if p.is_absolute() {
                p
            } else {
                path.parent().unwrap_or(Path::new(".")).join(p)
            }
        });

        Ok(GranuleRecord {
            granule_id: desc.granule_id,
            collection: desc.collection,
            instance_id: desc.instance_id,
            start_time: desc.start_time,
            end_time: desc.end_time,
            observed_start: desc.observed_start,
            descriptor_path: path.to_path_buf(),
            blob_path,
        })
    }
}

impl Catalog for FsCatalog {
    fn skim(&self, query: &CatalogQuery) -> Result<Vec<GranuleRecord>> {
        let mut records = Vec::new();

        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read working directory {}", self.root.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(DESCRIPTOR_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            match self.read_descriptor(&path) {
                Ok(record) => {
                    if query.matches(&record) {
                        records.push(record);
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable descriptor {}: {:#}", path.display(), e);
                }
            }
        }

        Ok(records)
    }
}

/// Check that no granule identity appears twice within a record set.
///
/// Called on the science skim before any invocation; a duplicate means the
/// provenance of an unpacked granule is ambiguous and the batch must abort.
pub fn ensure_unique_granules(records: &[GranuleRecord]) -> Result<(), PipelineError> {
    let mut seen: HashMap<(&str, &str), &GranuleRecord> = HashMap::new();

    for record in records {
        let key = (record.collection.as_str(), record.granule_id.as_str());
        if let Some(first) = seen.insert(key, record) {
            return Err(PipelineError::DuplicateGranule {
                granule_id: record.granule_id.clone(),
                collection: record.collection.clone(),
                first: first.descriptor_path.clone(),
                second: record.descriptor_path.clone(),
            });
        }
    }
    Ok(())
}

/// Index of catalog records keyed by (collection, granule id), built once
/// per pass instead of re-scanning the directory for every lookup.
pub struct GranuleIndex {
    by_key: HashMap<(String, String), Vec<GranuleRecord>>,
}

impl GranuleIndex {
    /// Build the index from a full skim of the catalog.
    pub fn build(catalog: &dyn Catalog) -> Result<Self> {
        let records = catalog.skim(&CatalogQuery::default())?;
        let mut by_key: HashMap<(String, String), Vec<GranuleRecord>> = HashMap::new();
        for record in records {
            by_key
                .entry((record.collection.clone(), record.granule_id.clone()))
                .or_default()
                .push(record);
        }
        Ok(Self { by_key })
    }

    /// Records of one granule in one collection.
    pub fn lookup(&self, collection: &str, granule_id: &str) -> &[GranuleRecord] {
        self.by_key
            .get(&(collection.to_string(), granule_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of indexed records.
    pub fn len(&self) -> usize {
        self.by_key.values().map(|v| v.len()).sum()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn write_descriptor(
        dir: &Path,
        name: &str,
        granule_id: &str,
        collection: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        blob: Option<&str>,
    ) -> PathBuf {
        let path = dir.join(format!("{}{}", name, DESCRIPTOR_SUFFIX));
        let blob_field = blob
            .map(|b| format!(", \"blob_path\": \"{}\"", b))
            .unwrap_or_default();
        let body = format!(
            r#"{{"granule_id": "{}", "collection": "{}", "instance_id": "urid-{}",
                "start_time": "{}", "end_time": "{}"{}}}"#,
            granule_id,
            collection,
            name,
            start.to_rfc3339(),
            end.to_rfc3339(),
            blob_field
        );
        std::fs::write(&path, body).unwrap();
        path
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_skim_filters_by_collection() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "g1", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);
        write_descriptor(dir.path(), "d1", "D001", "PLATFORM-DIARY-RDR", t(0), t(1200), None);

        let catalog = FsCatalog::new(dir.path());
        let science = catalog
            .skim(&CatalogQuery::collection("SENSOR-SCIENCE-RDR"))
            .unwrap();
        assert_eq!(science.len(), 1);
        assert_eq!(science[0].granule_id, "G001");

        let all = catalog.skim(&CatalogQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_skim_resolves_relative_blob() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(
            dir.path(),
            "g1",
            "G001",
            "SENSOR-SCIENCE-RDR",
            t(0),
            t(85),
            Some("g1.blob"),
        );

        let catalog = FsCatalog::new(dir.path());
        let records = catalog.skim(&CatalogQuery::default()).unwrap();
        assert_eq!(
            records[0].blob_path.as_deref(),
            Some(dir.path().join("g1.blob").as_path())
        );
    }

    #[test]
    fn test_skim_skips_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "g1", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);
        std::fs::write(dir.path().join(format!("bad{}", DESCRIPTOR_SUFFIX)), "not json").unwrap();

        let catalog = FsCatalog::new(dir.path());
        let records = catalog.skim(&CatalogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_duplicate_granule_detected() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "a", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);
        write_descriptor(dir.path(), "b", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);

        let catalog = FsCatalog::new(dir.path());
        let records = catalog
            .skim(&CatalogQuery::collection("SENSOR-SCIENCE-RDR"))
            .unwrap();

        let err = ensure_unique_granules(&records).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateGranule { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_same_granule_in_two_collections_is_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "a", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);
        write_descriptor(dir.path(), "b", "G001", "SENSOR-B01-SDR", t(0), t(85), None);

        let catalog = FsCatalog::new(dir.path());
        let records = catalog.skim(&CatalogQuery::default()).unwrap();
        assert!(ensure_unique_granules(&records).is_ok());
    }

    #[test]
    fn test_granule_index_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "a", "G001", "SENSOR-SCIENCE-RDR", t(0), t(85), None);
        write_descriptor(dir.path(), "b", "G001", "SENSOR-B01-SDR", t(0), t(85), None);
        write_descriptor(dir.path(), "c", "G002", "SENSOR-SCIENCE-RDR", t(86), t(170), None);

        let catalog = FsCatalog::new(dir.path());
        let index = GranuleIndex::build(&catalog).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup("SENSOR-SCIENCE-RDR", "G001").len(), 1);
        assert_eq!(index.lookup("SENSOR-B01-SDR", "G001").len(), 1);
        assert!(index.lookup("SENSOR-B01-SDR", "G999").is_empty());
    }
}
