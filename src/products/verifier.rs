//! Output verification for completed granules.
//!
//! After an engine run, every expected product must exist on disk under
//! the documented naming convention. A verified product's catalog files
//! are marked removable; a missing product retains the granule. More than
//! one file matching a template is treated as an ambiguity error rather
//! than silently picking one.

use crate::catalog::{GranuleIndex, GranuleRecord};
use crate::error::PipelineError;
use crate::products::table::ProductTable;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Outcome of verifying one granule's products.
#[derive(Debug, Default)]
pub struct ProductVerification {
    /// True when every expected product was found exactly once
    pub clean: bool,

    /// Observed start timestamps of the found products, deduplicated and
    /// sorted; handed to the notification collaborator
    pub product_times: Vec<DateTime<Utc>>,

    /// Number of product files confirmed on disk
    pub found: usize,

    /// Per-product failures (missing or ambiguous)
    pub problems: Vec<PipelineError>,

    /// Catalog files whose value is exhausted by successful verification
    pub removable: Vec<PathBuf>,
}

/// Files in `work_dir` whose names match the glob pattern, sorted.
pub(crate) fn matching_files(work_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob::Pattern::new(pattern)
        .with_context(|| format!("Invalid product pattern '{}'", pattern))?;

    let mut files: Vec<PathBuf> = std::fs::read_dir(work_dir)
        .with_context(|| format!("Failed to read working directory {}", work_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| matcher.matches(n))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Queue a record's descriptor and payload for removal.
fn mark_record_removable(record: &GranuleRecord, removable: &mut Vec<PathBuf>) {
    removable.push(record.descriptor_path.clone());
    if let Some(blob) = &record.blob_path {
        removable.push(blob.clone());
    }
}

/// Verify that every expected product of a completed granule exists.
pub fn verify_products(
    work_dir: &Path,
    index: &GranuleIndex,
    table: &ProductTable,
    site_tag: &str,
    granule: &GranuleRecord,
) -> Result<ProductVerification> {
    tracing::info!(
        "Granule {} complete; checking that all products were produced",
        granule.granule_id
    );

    let mut verification = ProductVerification {
        clean: true,
        ..ProductVerification::default()
    };
    let mut times: BTreeSet<DateTime<Utc>> = BTreeSet::new();

    for entry in table.expected() {
        let records = index.lookup(&entry.short_name, &granule.granule_id);

        if records.is_empty() {
            tracing::error!(
                "Granule {}: no catalog record for product {}",
                granule.granule_id,
                entry.short_name
            );
            verification.clean = false;
            verification.problems.push(PipelineError::MissingProduct {
                granule_id: granule.granule_id.clone(),
                short_name: entry.short_name.clone(),
            });
            continue;
        }

        for record in records {
            let observed = record.observed_or_start();
            let pattern = entry.file_pattern(site_tag, observed);
            let files = matching_files(work_dir, &pattern)?;

            match files.len() {
                1 => {
                    tracing::info!("Product {} produced", files[0].display());
                    verification.found += 1;
                    times.insert(observed);
                    mark_record_removable(record, &mut verification.removable);
                }
                0 => {
                    tracing::error!(
                        "Granule {}: output {} is missing",
                        granule.granule_id,
                        pattern
                    );
                    verification.clean = false;
                    verification.problems.push(PipelineError::MissingProduct {
                        granule_id: granule.granule_id.clone(),
                        short_name: entry.short_name.clone(),
                    });
                }
                n => {
                    tracing::error!(
                        "Granule {}: {} files match {}; refusing to pick one",
                        granule.granule_id,
                        n,
                        pattern
                    );
                    verification.clean = false;
                    verification.problems.push(PipelineError::AmbiguousProduct {
                        granule_id: granule.granule_id.clone(),
                        short_name: entry.short_name.clone(),
                        count: n,
                    });
                }
            }
        }
    }

    verification.product_times = times.into_iter().collect();
    Ok(verification)
}

/// Collect the catalog files of a clean granule's intermediate products
/// for deferred removal.
pub fn sweep_intermediates(
    index: &GranuleIndex,
    table: &ProductTable,
    granule: &GranuleRecord,
) -> Vec<PathBuf> {
    tracing::info!("Granule {}: queueing intermediate products", granule.granule_id);

    let mut removable = Vec::new();
    for entry in table.intermediates() {
        for record in index.lookup(&entry.short_name, &granule.granule_id) {
            mark_record_removable(record, &mut removable);
        }
    }
    removable
}
