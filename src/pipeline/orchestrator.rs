//! Batch orchestration: the per-granule state machine and the sliding
//! cleanup window across granules.
//!
//! The orchestrator owns all mutable run state. Nothing is persisted
//! between process restarts; a restarted batch re-derives eligibility
//! entirely from the catalog.

use crate::ancillary::{AncillaryResolver, Retriever};
use crate::catalog::{
    contiguous_groups, ensure_unique_granules, groups_contain, Catalog, CatalogQuery, GranuleIndex,
    GranuleRecord,
};
use crate::config::Config;
use crate::engine::{check_engine_logs, generate_task_descriptor, Executor, TaskTemplate};
use crate::error::PipelineError;
use crate::notify::{Notifier, NotifyContext};
use crate::pipeline::cleanup::{remove_idempotent, CleanupManager};
use crate::pipeline::metrics::Metrics;
use crate::products::{
    patch_products, sweep_intermediates, verify_products, GeoRefWriter, ProductTable,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle state of one granule within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranuleState {
    /// Discovered and eligible
    Queued,

    /// Task descriptor written
    ConfigGenerated,

    /// Engine ran and its logs were classified
    Executed,

    /// Every expected product confirmed on disk
    Verified,

    /// Geolocation references written
    Patched,

    /// Intermediates and sources queued for deferred removal
    CleanedUp,

    /// Terminal failure state; files left untouched for inspection
    Retained,
}

impl std::fmt::Display for GranuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::ConfigGenerated => "config-generated",
            Self::Executed => "executed",
            Self::Verified => "verified",
            Self::Patched => "patched",
            Self::CleanedUp => "cleaned-up",
            Self::Retained => "retained",
        };
        f.write_str(name)
    }
}

/// Inputs of one batch run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Working directory all activity happens in
    pub work_dir: PathBuf,

    /// Directory final products are published from
    pub out_dir: PathBuf,

    /// Opaque signal token forwarded to the notification collaborator
    pub signal: String,

    /// Input archive files to unpack into the working directory
    pub inputs: Vec<PathBuf>,
}

/// Aggregated outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchStats {
    /// Granules found eligible for processing
    pub granules_total: usize,

    /// Granules that completed their full lifecycle
    pub granules_clean: usize,

    /// Granules retained for manual inspection
    pub granules_retained: usize,

    /// Granules processed without reference-track coverage
    pub coverage_gaps: usize,

    /// Input archives that failed to unpack
    pub unpack_failures: usize,

    /// Per-granule problems accumulated over the batch
    pub problems: usize,
}

impl BatchStats {
    /// True when nothing went wrong anywhere in the batch.
    pub fn is_clean(&self) -> bool {
        self.granules_total > 0
            && self.granules_retained == 0
            && self.problems == 0
            && self.unpack_failures == 0
    }

    /// Process exit code for this outcome: `0` fully clean, `5` completed
    /// with problems.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            5
        }
    }
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Granules: {}, clean: {}, retained: {}, coverage gaps: {}, unpack failures: {}, problems: {}",
            self.granules_total,
            self.granules_clean,
            self.granules_retained,
            self.coverage_gaps,
            self.unpack_failures,
            self.problems
        )
    }
}

/// One processing opportunity found by sifting the catalog.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// The eligible granule
    pub granule: GranuleRecord,

    /// Whether the reference-track groups fully cover its interval
    pub covered: bool,

    /// Index of the contiguous group the granule belongs to
    pub group: usize,
}

/// Outcome of one granule's lifecycle.
struct GranuleOutcome {
    state: GranuleState,
    product_times: Vec<DateTime<Utc>>,
    errors: Vec<PipelineError>,
}

/// Sequencer for one batch of granules.
pub struct Orchestrator {
    config: Arc<Config>,
    catalog: Arc<dyn Catalog>,
    retriever: Arc<dyn Retriever>,
    geo_ref: Arc<dyn GeoRefWriter>,
    notifier: Arc<dyn Notifier>,
    product_table: ProductTable,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<dyn Catalog>,
        retriever: Arc<dyn Retriever>,
        geo_ref: Arc<dyn GeoRefWriter>,
        notifier: Arc<dyn Notifier>,
        product_table: ProductTable,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            catalog,
            retriever,
            geo_ref,
            notifier,
            product_table,
            metrics,
        }
    }

    /// The batch metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Sift the catalog for processing opportunities.
    ///
    /// Science granules are grouped into contiguous chains and annotated
    /// with reference-track coverage. Coverage is advisory: an uncovered
    /// granule is reported and still yielded. Duplicate granule identities
    /// abort here, before any invocation.
    pub fn plan(&self) -> Result<Vec<PlanEntry>> {
        let max_gap = Duration::seconds(self.config.collections.max_gap_secs);

        tracing::info!("Collecting reference-track records");
        let diary_records = self
            .catalog
            .skim(&CatalogQuery::collection(&self.config.collections.reference_track))?;
        let diaries = contiguous_groups(diary_records, max_gap);

        tracing::debug!("Sifting science records for processing opportunities");
        let science = self
            .catalog
            .skim(&CatalogQuery::collection(&self.config.collections.science))?;
        tracing::info!("Total science granules: {}", science.len());

        ensure_unique_granules(&science)?;

        let mut plan = Vec::new();
        for (group_idx, group) in contiguous_groups(science, max_gap).into_iter().enumerate() {
            tracing::debug!("Contiguous group {} has {} granules", group_idx, group.len());
            for granule in group.records() {
                let covered = groups_contain(&diaries, granule);
                if covered {
                    tracing::info!(
                        "Processing opportunity: {} at {} ({})",
                        granule.granule_id,
                        granule.start_time,
                        granule.instance_id
                    );
                } else {
                    tracing::warn!(
                        "Insufficient reference-track coverage to process {} at {} ({})",
                        granule.granule_id,
                        granule.start_time,
                        granule.instance_id
                    );
                }
                plan.push(PlanEntry {
                    granule: granule.clone(),
                    covered,
                    group: group_idx,
                });
            }
        }
        Ok(plan)
    }

    /// Run one batch to completion.
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchStats> {
        let work_dir = &request.work_dir;
        let anc_dir = work_dir.join(&self.config.ancillary.subdir);
        setup_directories(work_dir, &anc_dir)?;

        let mut stats = BatchStats::default();

        tracing::info!("Unpacking {} supplied inputs", request.inputs.len());
        stats.unpack_failures = self.unpack_inputs(work_dir, &request.inputs).await;
        self.metrics.add_unpack_failures(stats.unpack_failures as u64);

        let plan = self.plan()?;
        if plan.is_empty() {
            tracing::error!("Found no granules to process");
            stats.problems += 1;
            return Ok(stats);
        }
        stats.granules_total = plan.len();
        stats.coverage_gaps = plan.iter().filter(|p| !p.covered).count();
        tracing::info!("Found {} granules to process", plan.len());

        let granules: Vec<GranuleRecord> = plan.into_iter().map(|p| p.granule).collect();

        tracing::info!("Linking required ancillary data into the workspace");
        let resolver = AncillaryResolver::new(
            self.config.ancillary.clone(),
            self.config.processing.fetch_concurrency,
        );
        let linked = resolver
            .resolve_and_link(self.retriever.as_ref(), work_dir, &anc_dir, &granules)
            .await?;
        self.metrics.add_ancillary_linked(linked as u64);

        let executor = Executor::new(&self.config.engine.executable);
        let template = TaskTemplate {
            scans: self.config.engine.scans_per_granule,
            domain: self.config.engine.domain.clone(),
        };
        let mut cleanup = CleanupManager::new();

        for granule in &granules {
            // Files marked by the previous granule become due now; the
            // one-granule lag lets an adjacent granule reuse shared
            // intermediates.
            cleanup.rotate();
            let removed = cleanup.sweep_now();
            self.metrics.add_files_removed(removed as u64);

            let outcome = self
                .process_granule(work_dir, &executor, &template, granule, &mut cleanup)
                .await?;

            match outcome.state {
                GranuleState::CleanedUp => {
                    stats.granules_clean += 1;
                    self.metrics.add_granule_clean();
                }
                GranuleState::Retained => {
                    tracing::warn!("Run problem with {}; files kept for inspection", granule.granule_id);
                    stats.granules_retained += 1;
                    stats.problems += outcome.errors.len().max(1);
                    cleanup.discard_pending();
                    self.metrics.add_granule_retained();
                }
                other => {
                    // Terminal states are CleanedUp and Retained only.
                    tracing::error!("Granule {} ended in non-terminal state {}", granule.granule_id, other);
                    stats.problems += 1;
                }
            }

            for error in &outcome.errors {
                tracing::error!("{}", error);
            }

            self.notifier
                .notify(&NotifyContext {
                    work_dir: work_dir.clone(),
                    out_dir: request.out_dir.clone(),
                    signal: request.signal.clone(),
                    granule_id: granule.granule_id.clone(),
                    product_times: outcome.product_times,
                })
                .await;
        }

        let removed = cleanup.flush();
        self.metrics.add_files_removed(removed as u64);

        if stats.is_clean() {
            let purged = self.purge_raw_inputs()?;
            tracing::info!("Batch clean; purged {} raw input files", purged);
        } else {
            tracing::warn!("Done, but problems occurred; raw inputs kept. Review logs.");
        }

        Ok(stats)
    }

    /// Drive one granule through its lifecycle.
    async fn process_granule(
        &self,
        work_dir: &Path,
        executor: &Executor,
        template: &TaskTemplate,
        granule: &GranuleRecord,
        cleanup: &mut CleanupManager,
    ) -> Result<GranuleOutcome> {
        let mut state = GranuleState::Queued;
        tracing::debug!("Granule {} is {}", granule.granule_id, state);

        // Generation is a pure local write with no failure path of its
        // own; an I/O error here is an environment problem for the batch.
        let invocation = generate_task_descriptor(work_dir, granule, template)?;
        state = GranuleState::ConfigGenerated;
        tracing::debug!("Granule {} is {}", granule.granule_id, state);

        self.metrics.add_engine_invocation();
        let pid = match executor
            .run(work_dir, &self.config.ancillary.subdir, &invocation)
            .await
        {
            Ok(pid) => pid,
            Err(e) => {
                self.metrics.add_engine_failure();
                return Ok(GranuleOutcome {
                    state: GranuleState::Retained,
                    product_times: Vec::new(),
                    errors: vec![e],
                });
            }
        };

        let log_check = check_engine_logs(work_dir, pid)?;
        state = GranuleState::Executed;
        tracing::debug!("Granule {} is {}", granule.granule_id, state);

        // Clean logs are exhausted either way; a retained granule's queue
        // is discarded before anything is deleted.
        cleanup.defer_all(log_check.clean_logs);

        if !log_check.success {
            for (file, m) in &log_check.matches {
                tracing::error!("{}: {} ({})", file.display(), m.line, m.hint);
            }
            self.metrics.add_engine_failure();
            return Ok(GranuleOutcome {
                state: GranuleState::Retained,
                product_times: Vec::new(),
                errors: vec![PipelineError::ProcessExecution {
                    granule_id: granule.granule_id.clone(),
                    reason: "error signatures found in engine log".to_string(),
                }],
            });
        }
        tracing::info!(
            "Processing of {} completed successfully",
            invocation.descriptor_path.display()
        );

        // One index per verification pass instead of a directory scan per
        // product.
        let index = GranuleIndex::build(self.catalog.as_ref())?;
        let verification = verify_products(
            work_dir,
            &index,
            &self.product_table,
            &self.config.products.site_tag,
            granule,
        )?;
        self.metrics.add_products_verified(verification.found as u64);
        self.metrics.add_products_missing(verification.problems.len() as u64);

        if !verification.clean {
            return Ok(GranuleOutcome {
                state: GranuleState::Retained,
                product_times: verification.product_times,
                errors: verification.problems,
            });
        }
        state = GranuleState::Verified;
        tracing::debug!("Granule {} is {}", granule.granule_id, state);

        let patched = patch_products(
            work_dir,
            &index,
            &self.product_table,
            &self.config.products.site_tag,
            granule,
            self.geo_ref.as_ref(),
        )
        .await;
        state = GranuleState::Patched;
        tracing::debug!("Granule {} is {} ({} files patched)", granule.granule_id, state, patched);

        cleanup.defer_all(verification.removable);
        cleanup.defer_all(sweep_intermediates(&index, &self.product_table, granule));
        remove_idempotent(&invocation.descriptor_path);

        state = GranuleState::CleanedUp;
        tracing::debug!("Granule {} is {}", granule.granule_id, state);

        Ok(GranuleOutcome {
            state,
            product_times: verification.product_times,
            errors: Vec::new(),
        })
    }

    /// Unpack the supplied input archives into the working directory.
    /// Returns the number of archives that failed to unpack.
    async fn unpack_inputs(&self, work_dir: &Path, inputs: &[PathBuf]) -> usize {
        let Some(unpacker) = &self.config.engine.unpacker else {
            tracing::debug!("No unpacker configured; assuming inputs are already unpacked");
            return 0;
        };

        let mut failures = 0;
        for input in inputs {
            let result = tokio::process::Command::new(unpacker)
                .arg(input)
                .env("WORK_DIR", work_dir)
                .current_dir(work_dir)
                .output()
                .await;

            match result {
                Ok(output) if output.status.success() => {}
                Ok(output) => {
                    tracing::error!(
                        "Unpacker failed on {} ({}); continuing",
                        input.display(),
                        output.status
                    );
                    failures += 1;
                }
                Err(e) => {
                    tracing::error!("Unpacker failed on {}: {}; continuing", input.display(), e);
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Remove raw input descriptor and payload files after a fully clean
    /// batch.
    fn purge_raw_inputs(&self) -> Result<usize> {
        let mut purged = 0;
        for collection in [
            &self.config.collections.science,
            &self.config.collections.reference_track,
        ] {
            for record in self.catalog.skim(&CatalogQuery::collection(collection))? {
                if remove_idempotent(&record.descriptor_path) {
                    purged += 1;
                }
                if let Some(blob) = &record.blob_path {
                    if remove_idempotent(blob) {
                        purged += 1;
                    }
                }
            }
        }
        Ok(purged)
    }
}

/// Create the working directory, its log subdirectory, and the ancillary
/// subdirectory.
pub fn setup_directories(work_dir: &Path, anc_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create working directory {}", work_dir.display()))?;
    let log_dir = work_dir.join("log");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    std::fs::create_dir_all(anc_dir)
        .with_context(|| format!("Failed to create ancillary directory {}", anc_dir.display()))?;
    Ok(())
}
