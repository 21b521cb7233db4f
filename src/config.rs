//! Configuration for the granule batch pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the batch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External engine configuration
    pub engine: EngineConfig,

    /// Input collection names and grouping policy
    #[serde(default)]
    pub collections: CollectionConfig,

    /// Ancillary resolution configuration
    #[serde(default)]
    pub ancillary: AncillaryConfig,

    /// Product expectation configuration
    #[serde(default)]
    pub products: ProductConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Notification configuration
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// External engine and companion tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine executable. Invoked once per eligible granule
    /// with the task descriptor path as its sole argument.
    pub executable: PathBuf,

    /// Path to the archive unpacker executable. If unset, inputs are
    /// assumed to be unpacked in the working directory already.
    #[serde(default)]
    pub unpacker: Option<PathBuf>,

    /// Scan count written into the fixed timing template of each task
    /// descriptor.
    #[serde(default = "default_scans_per_granule")]
    pub scans_per_granule: u32,

    /// Processing domain tag written into the task descriptor.
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// Input collection names and contiguity policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection short name of the science granules to process
    #[serde(default = "default_science_collection")]
    pub science: String,

    /// Collection short name of the low-rate reference-track records used
    /// for coverage checking
    #[serde(default = "default_reference_track_collection")]
    pub reference_track: String,

    /// Maximum gap in seconds between one granule's end and the next
    /// granule's start for the two to be considered contiguous
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            science: default_science_collection(),
            reference_track: default_reference_track_collection(),
            max_gap_secs: default_max_gap_secs(),
        }
    }
}

/// Ancillary search and staging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncillaryConfig {
    /// Local cache root, searched before the repository roots
    #[serde(default)]
    pub cache_root: Option<PathBuf>,

    /// Shared repository roots, searched in order after the cache root
    #[serde(default)]
    pub repository_roots: Vec<PathBuf>,

    /// Name of the per-run subdirectory the resolved files are linked into
    #[serde(default = "default_ancillary_subdir")]
    pub subdir: String,

    /// Static reference-file patterns. Every pattern is required; a pattern
    /// with no match in any root aborts the batch.
    #[serde(default = "default_static_patterns")]
    pub static_patterns: Vec<String>,

    /// Dynamic ancillary categories fetched through the external retrieval
    /// collaborator per batch
    #[serde(default = "default_dynamic_categories")]
    pub dynamic_categories: Vec<String>,

    /// Command used to fetch one dynamic category. Receives the category
    /// name as its argument and prints staged file paths, one per line.
    /// If unset, no dynamic retrieval is performed.
    #[serde(default)]
    pub fetch_command: Option<String>,
}

impl Default for AncillaryConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            repository_roots: Vec::new(),
            subdir: default_ancillary_subdir(),
            static_patterns: default_static_patterns(),
            dynamic_categories: default_dynamic_categories(),
            fetch_command: None,
        }
    }
}

/// Product expectation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    /// Site tag embedded in produced file names
    /// (`<prefix>_<site>_d<date>_t<time>*.h5`)
    #[serde(default = "default_site_tag")]
    pub site_tag: String,

    /// Optional path to a JSON product table overriding the built-in
    /// expectations
    #[serde(default)]
    pub table_path: Option<PathBuf>,

    /// Command invoked on each produced geo-requiring file to write the
    /// derived geolocation reference property. If unset, patching is
    /// skipped.
    #[serde(default)]
    pub geo_ref_command: Option<String>,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            site_tag: default_site_tag(),
            table_path: None,
            geo_ref_command: None,
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum concurrent dynamic ancillary fetches
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Print a metrics summary after the batch completes
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save the metrics snapshot JSON after a run
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            worker_threads: None,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Command run once per granule after its lifecycle ends. The working
    /// directory, output directory, signal token, and produced product
    /// timestamps are supplied through the environment. Fire-and-forget.
    #[serde(default)]
    pub hook_command: Option<String>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.executable.as_os_str().is_empty() {
            anyhow::bail!("Engine executable path must be set");
        }
        if self.collections.max_gap_secs <= 0 {
            anyhow::bail!("Contiguity gap must be > 0 seconds");
        }
        if self.ancillary.subdir.is_empty() || self.ancillary.subdir.contains('/') {
            anyhow::bail!("Ancillary subdir must be a plain directory name");
        }
        if self.ancillary.cache_root.is_none() && self.ancillary.repository_roots.is_empty() {
            anyhow::bail!("At least one ancillary search root must be configured");
        }
        if self.processing.fetch_concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be > 0");
        }
        if self.products.site_tag.is_empty() {
            anyhow::bail!("Site tag must not be empty");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_scans_per_granule() -> u32 {
    48
}
fn default_domain() -> String {
    "OPS".to_string()
}
fn default_science_collection() -> String {
    "SENSOR-SCIENCE-RDR".to_string()
}
fn default_reference_track_collection() -> String {
    "PLATFORM-DIARY-RDR".to_string()
}
fn default_max_gap_secs() -> i64 {
    600
}
fn default_ancillary_subdir() -> String {
    "linked_data".to_string()
}
fn default_static_patterns() -> Vec<String> {
    [
        "*CMNGEO-PARAM-LUT*",
        "*Planet-Eph-ANC*",
        "*USNO-PolarWander*",
        "*Terrain-Eco-ANC-Tile*",
        "*SDR-GEO-IMG-PARAM-LUT*",
        "*SDR-GEO-MOD-PARAM-LUT*",
        "*SDR-QA-LUT*",
        "*SDR-F-LUT*",
        "*SDR-GAIN-LUT*",
        "*SDR-EMISSIVE-LUT*",
        "*SDR-REFLECTIVE-LUT*",
        "*SDR-RADIOMETRIC-PARAM-LUT*",
        "*SDR-TELE-COEFFS-LUT*",
        "*SDR-SOLAR-IRAD-LUT*",
        "*SDR-OBS-TO-PIXELS-LUT*",
        "*SDR-COEFF-A-LUT*",
        "*SDR-COEFF-B-LUT*",
        "*SDR-DELTA-C-LUT*",
        "*TLE-AUX*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_dynamic_categories() -> Vec<String> {
    vec!["polar-wander".to_string(), "platform-ephemeris".to_string()]
}
fn default_site_tag() -> String {
    "ops".to_string()
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}
