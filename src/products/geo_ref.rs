//! Geolocation reference patching of produced files.
//!
//! Deliverable products carry a derived geolocation reference property
//! that the engine does not write itself. Patching is delegated to an
//! external writer collaborator and is idempotent on its side; re-applying
//! to an already patched file is safe.

use crate::catalog::{GranuleIndex, GranuleRecord};
use crate::products::table::ProductTable;
use crate::products::verifier::matching_files;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// External collaborator that writes the geolocation reference property
/// into one produced file.
#[async_trait]
pub trait GeoRefWriter: Send + Sync {
    /// Patch one file.
    async fn write_geo_ref(&self, file: &Path) -> Result<()>;
}

/// Writer that shells out to a configured patch command.
pub struct CommandGeoRef {
    command: String,
}

impl CommandGeoRef {
    /// Create a writer around the given command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl GeoRefWriter for CommandGeoRef {
    async fn write_geo_ref(&self, file: &Path) -> Result<()> {
        let shell_line = format!("{} {}", self.command, file.display());
        let output = tokio::process::Command::new("sh")
            .args(["-c", &shell_line])
            .output()
            .await
            .with_context(|| format!("Failed to spawn geo-ref writer for {}", file.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Geo-ref writer failed on {} ({}): {}",
                file.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// Writer used when no patch command is configured.
pub struct NoopGeoRef;

#[async_trait]
impl GeoRefWriter for NoopGeoRef {
    async fn write_geo_ref(&self, _file: &Path) -> Result<()> {
        Ok(())
    }
}

/// Patch every produced geo-requiring file of one granule.
///
/// Files are visited in discovery order. Best-effort: a failed patch is
/// logged and does not gate the granule's lifecycle.
pub async fn patch_products(
    work_dir: &Path,
    index: &GranuleIndex,
    table: &ProductTable,
    site_tag: &str,
    granule: &GranuleRecord,
    writer: &dyn GeoRefWriter,
) -> usize {
    let mut patched = 0;

    for entry in table.geo_ref_targets() {
        for record in index.lookup(&entry.short_name, &granule.granule_id) {
            let pattern = entry.file_pattern(site_tag, record.observed_or_start());
            let files = match matching_files(work_dir, &pattern) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!("Geo-ref discovery failed for {}: {:#}", pattern, e);
                    continue;
                }
            };

            for file in files {
                tracing::info!("Adding geolocation reference to {}", file.display());
                match writer.write_geo_ref(&file).await {
                    Ok(()) => patched += 1,
                    Err(e) => {
                        tracing::warn!("Failed to patch {}: {:#}", file.display(), e);
                    }
                }
            }
        }
    }

    patched
}
