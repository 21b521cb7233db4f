//! Static product expectation table.
//!
//! Maps each logical product short name to the external product-code
//! prefix used in produced file names, and classifies it as a final
//! deliverable, a geolocation product, or an intermediate that exists only
//! to be cleaned up. Built once per run and read-only thereafter.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Classification of an expected product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCategory {
    /// Deliverable product; verified and geo-reference patched
    Final,

    /// Geolocation product; verified but not patched
    Geo,

    /// Intermediate artifact; never verified, swept after a clean granule
    Intermediate,
}

/// One product expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductEntry {
    /// Collection short name the engine registers the product under
    pub short_name: String,

    /// Product-code prefix of the produced file name. Required for final
    /// and geolocation products; intermediates have none.
    #[serde(default)]
    pub product_code: Option<String>,

    /// Category of the product
    pub category: ProductCategory,
}

/// Immutable table of product expectations for one run.
#[derive(Debug, Clone)]
pub struct ProductTable {
    entries: Vec<ProductEntry>,
}

impl ProductTable {
    /// The built-in expectation table.
    pub fn builtin() -> Self {
        let mut entries = Vec::new();

        for band in 1..=6u8 {
            entries.push(ProductEntry {
                short_name: format!("SENSOR-B{:02}-SDR", band),
                product_code: Some(format!("SB{:02}", band)),
                category: ProductCategory::Final,
            });
        }

        for (short_name, code) in [
            ("SENSOR-IMG-GEO", "GIMGO"),
            ("SENSOR-MOD-GEO", "GMODO"),
            ("SENSOR-CAL-IP", "ICALO"),
        ] {
            entries.push(ProductEntry {
                short_name: short_name.to_string(),
                product_code: Some(code.to_string()),
                category: ProductCategory::Geo,
            });
        }

        for band in 1..=6u8 {
            entries.push(ProductEntry {
                short_name: format!("SENSOR-B{:02}-FSDR", band),
                product_code: None,
                category: ProductCategory::Intermediate,
            });
        }
        for short_name in ["SENSOR-IMG-RGEO", "SENSOR-MOD-RGEO"] {
            entries.push(ProductEntry {
                short_name: short_name.to_string(),
                product_code: None,
                category: ProductCategory::Intermediate,
            });
        }

        Self::from_entries(entries).expect("builtin table is valid")
    }

    /// Load an expectation table from a JSON descriptor file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read product table {}", path.display()))?;
        let entries: Vec<ProductEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed product table {}", path.display()))?;
        Self::from_entries(entries)
    }

    /// Build a table from explicit entries, validating internal consistency.
    pub fn from_entries(entries: Vec<ProductEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.short_name.clone()) {
                anyhow::bail!("Duplicate product short name '{}'", entry.short_name);
            }
            if entry.category != ProductCategory::Intermediate && entry.product_code.is_none() {
                anyhow::bail!(
                    "Product '{}' requires a product code for file-name matching",
                    entry.short_name
                );
            }
        }
        Ok(Self { entries })
    }

    /// Expected products, verified after every completed granule: final
    /// deliverables and geolocation products, in short-name order.
    pub fn expected(&self) -> impl Iterator<Item = &ProductEntry> {
        self.entries
            .iter()
            .filter(|e| e.category != ProductCategory::Intermediate)
    }

    /// Intermediate products, swept after a clean granule.
    pub fn intermediates(&self) -> impl Iterator<Item = &ProductEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == ProductCategory::Intermediate)
    }

    /// Products that receive the derived geolocation reference property.
    pub fn geo_ref_targets(&self) -> impl Iterator<Item = &ProductEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == ProductCategory::Final)
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ProductEntry {
    /// Instantiate the naming template for this product at the given
    /// observed start time: `<prefix>_<site>_d<date>_t<time>*.h5`.
    pub fn file_pattern(&self, site_tag: &str, observed_start: DateTime<Utc>) -> String {
        let code = self
            .product_code
            .as_deref()
            .expect("file_pattern is only called for coded products");
        format!(
            "{}_{}_{}*.h5",
            code,
            site_tag,
            observed_start.format("d%Y%m%d_t%H%M%S")
        )
    }
}
