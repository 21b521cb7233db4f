//! Per-granule completion notification.
//!
//! The downstream messaging mechanism is an external collaborator; the
//! orchestrator only hands it the working directory, the produced product
//! timestamps, the output directory, and an opaque signal token, once per
//! granule. Fire-and-forget: no return value is consumed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Payload of one granule notification.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    /// Batch working directory
    pub work_dir: PathBuf,

    /// Directory the final products are published from
    pub out_dir: PathBuf,

    /// Opaque signal token passed through from the invocation
    pub signal: String,

    /// Granule the notification concerns
    pub granule_id: String,

    /// Observed start timestamps of the produced products
    pub product_times: Vec<DateTime<Utc>>,
}

/// Downstream notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce one granule's outcome. Never fails the pipeline.
    async fn notify(&self, ctx: &NotifyContext);
}

/// Notifier that runs a configured hook command.
///
/// The payload is supplied through the environment: `WORK_DIR`, `OUT_DIR`,
/// `SIGNAL`, `GRANULE_ID`, and `PRODUCT_TIMES` (comma-separated RFC 3339).
pub struct HookNotifier {
    command: String,
}

impl HookNotifier {
    /// Create a notifier around the given hook command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    async fn notify(&self, ctx: &NotifyContext) {
        let times = ctx
            .product_times
            .iter()
            .map(|t| t.to_rfc3339())
            .collect::<Vec<_>>()
            .join(",");

        let result = tokio::process::Command::new("sh")
            .args(["-c", &self.command])
            .env("WORK_DIR", &ctx.work_dir)
            .env("OUT_DIR", &ctx.out_dir)
            .env("SIGNAL", &ctx.signal)
            .env("GRANULE_ID", &ctx.granule_id)
            .env("PRODUCT_TIMES", times)
            .output()
            .await;

        match result {
            Ok(output) if !output.status.success() => {
                tracing::debug!(
                    "Notification hook exited with {} for granule {}",
                    output.status,
                    ctx.granule_id
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Failed to run notification hook: {}", e);
            }
        }
    }
}

/// Notifier used when no hook command is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, ctx: &NotifyContext) {
        tracing::debug!(
            "Granule {} finished with {} product times (no notifier configured)",
            ctx.granule_id,
            ctx.product_times.len()
        );
    }
}
