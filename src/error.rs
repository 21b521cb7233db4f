//! Pipeline error taxonomy.
//!
//! Only two kinds abort a batch: duplicate granule identity and a missing
//! required ancillary pattern. Everything else is accumulated per granule
//! and reflected in the batch exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Typed failures raised by the granule pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Two descriptors in the working directory claim the same granule
    /// identity. Provenance is ambiguous, so the batch aborts before any
    /// engine invocation.
    #[error("duplicate granule '{granule_id}' in collection '{collection}' ({first:?} and {second:?})")]
    DuplicateGranule {
        granule_id: String,
        collection: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A required ancillary pattern matched nothing in any search root.
    /// The engine cannot be invoked safely without it, so the batch aborts.
    #[error("required ancillary pattern '{pattern}' not found in any search root")]
    AncillaryResolution { pattern: String },

    /// The engine child process failed to spawn or terminated abnormally.
    /// Scoped to one granule; the batch continues.
    #[error("engine invocation failed for granule '{granule_id}': {reason}")]
    ProcessExecution { granule_id: String, reason: String },

    /// An expected product was not found for a completed granule.
    #[error("granule '{granule_id}': expected product '{short_name}' was not produced")]
    MissingProduct {
        granule_id: String,
        short_name: String,
    },

    /// More than one file matched a product naming template. Ambiguity is
    /// an explicit error rather than an arbitrary pick.
    #[error("granule '{granule_id}': {count} files match product '{short_name}', expected exactly one")]
    AmbiguousProduct {
        granule_id: String,
        short_name: String,
        count: usize,
    },
}

impl PipelineError {
    /// Fatal errors unwind the whole batch; per-granule errors only mark
    /// the granule as retained.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateGranule { .. } | Self::AncillaryResolution { .. }
        )
    }
}
