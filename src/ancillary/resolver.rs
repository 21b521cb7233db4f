//! Resolution and staging of ancillary reference files.
//!
//! A batch needs two kinds of reference data before any engine invocation:
//! dynamic categories fetched through an external retrieval collaborator
//! (orbital ephemeris, platform identity tables) and static files resolved
//! from an ordered list of search roots. The union is linked into a
//! batch-local subdirectory so invocations see a stable namespace.

use crate::catalog::GranuleRecord;
use crate::config::AncillaryConfig;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};

/// External retrieval collaborator for dynamic ancillary categories.
///
/// Implementations may pull files from a remote service; returned paths
/// must already be staged on the local filesystem.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch all files of one category for the granule batch.
    async fn retrieve(
        &self,
        category: &str,
        work_dir: &Path,
        granules: &[GranuleRecord],
    ) -> Result<Vec<PathBuf>>;
}

/// Retriever that shells out to a configured fetch command.
///
/// The command receives the category name as its argument and the working
/// directory through `WORK_DIR`; it prints staged file paths one per line.
pub struct CommandRetriever {
    command: String,
}

impl CommandRetriever {
    /// Create a retriever around the given fetch command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Retriever for CommandRetriever {
    async fn retrieve(
        &self,
        category: &str,
        work_dir: &Path,
        _granules: &[GranuleRecord],
    ) -> Result<Vec<PathBuf>> {
        let shell_line = format!("{} {}", self.command, category);
        tracing::info!("Fetching dynamic ancillary category '{}'", category);

        let output = tokio::process::Command::new("sh")
            .args(["-c", &shell_line])
            .env("WORK_DIR", work_dir)
            .output()
            .await
            .with_context(|| format!("Failed to spawn ancillary fetch for '{}'", category))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Ancillary fetch for '{}' failed ({}): {}",
                category,
                output.status,
                stderr.trim()
            );
        }

        let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();

        tracing::debug!("Category '{}' staged {} files", category, paths.len());
        Ok(paths)
    }
}

/// Retriever used when no fetch command is configured.
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn retrieve(
        &self,
        category: &str,
        _work_dir: &Path,
        _granules: &[GranuleRecord],
    ) -> Result<Vec<PathBuf>> {
        tracing::debug!("No fetch command configured; skipping category '{}'", category);
        Ok(Vec::new())
    }
}

/// Resolver for the full ancillary file set of one batch.
pub struct AncillaryResolver {
    config: AncillaryConfig,
    fetch_concurrency: usize,
}

impl AncillaryResolver {
    /// Create a resolver from the ancillary configuration.
    pub fn new(config: AncillaryConfig, fetch_concurrency: usize) -> Self {
        Self {
            config,
            fetch_concurrency,
        }
    }

    /// The ordered search roots: local cache first, then the shared
    /// repository roots.
    fn search_roots(&self) -> Vec<&Path> {
        let mut roots: Vec<&Path> = Vec::new();
        if let Some(cache) = &self.config.cache_root {
            roots.push(cache);
        }
        roots.extend(self.config.repository_roots.iter().map(PathBuf::as_path));
        roots
    }

    /// Resolve every static pattern to its first match across the roots.
    ///
    /// Within one root, the lexicographically last match wins so that
    /// version-stamped reference files resolve to the newest issue.
    pub fn resolve_static(&self) -> Result<Vec<PathBuf>> {
        let roots = self.search_roots();
        let mut resolved = Vec::with_capacity(self.config.static_patterns.len());

        for pattern in &self.config.static_patterns {
            let matcher = glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid ancillary pattern '{}'", pattern))?;

            let found = roots.iter().find_map(|&root| {
                match newest_match(root, &matcher) {
                    Ok(hit) => hit,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable search root {}: {:#}", root.display(), e);
                        None
                    }
                }
            });

            match found {
                Some(path) => {
                    tracing::debug!("Pattern '{}' resolved to {}", pattern, path.display());
                    resolved.push(path);
                }
                None => {
                    return Err(PipelineError::AncillaryResolution {
                        pattern: pattern.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(resolved)
    }

    /// Fetch all dynamic categories through the retrieval collaborator.
    /// Independent categories are fetched concurrently.
    pub async fn resolve_dynamic(
        &self,
        retriever: &dyn Retriever,
        work_dir: &Path,
        granules: &[GranuleRecord],
    ) -> Result<Vec<PathBuf>> {
        let results: Vec<Result<Vec<PathBuf>>> =
            stream::iter(self.config.dynamic_categories.iter())
                .map(|category| retriever.retrieve(category, work_dir, granules))
                .buffer_unordered(self.fetch_concurrency)
                .collect()
                .await;

        let mut paths = Vec::new();
        for result in results {
            paths.extend(result?);
        }
        Ok(paths)
    }

    /// Resolve everything and link the union into the ancillary
    /// subdirectory. Returns the number of files linked.
    pub async fn resolve_and_link(
        &self,
        retriever: &dyn Retriever,
        work_dir: &Path,
        anc_dir: &Path,
        granules: &[GranuleRecord],
    ) -> Result<usize> {
        let mut files = self.resolve_dynamic(retriever, work_dir, granules).await?;
        files.extend(self.resolve_static()?);
        link_into(anc_dir, &files)
    }
}

/// The lexicographically last file name in `root` matching the pattern.
fn newest_match(root: &Path, matcher: &glob::Pattern) -> Result<Option<PathBuf>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let mut best: Option<PathBuf> = None;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !matcher.matches(name) {
            continue;
        }
        match &best {
            Some(current) if current.file_name() >= path.file_name() => {}
            _ => best = Some(path),
        }
    }
    Ok(best)
}

/// Link resolved files into the ancillary subdirectory.
///
/// Existing links are left in place so re-resolving after a crash is safe.
pub fn link_into(anc_dir: &Path, files: &[PathBuf]) -> Result<usize> {
    std::fs::create_dir_all(anc_dir)
        .with_context(|| format!("Failed to create ancillary directory {}", anc_dir.display()))?;

    let mut linked = 0;
    for src in files {
        let Some(name) = src.file_name() else {
            tracing::warn!("Ancillary path {} has no file name; skipping", src.display());
            continue;
        };
        let dest = anc_dir.join(name);
        if dest.exists() {
            tracing::debug!("Ancillary link {} already present", dest.display());
            continue;
        }
        place_link(src, &dest)
            .with_context(|| format!("Failed to link {} into {}", src.display(), anc_dir.display()))?;
        linked += 1;
    }

    tracing::info!("Linked {} ancillary files into {}", linked, anc_dir.display());
    Ok(linked)
}

#[cfg(unix)]
fn place_link(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

#[cfg(not(unix))]
fn place_link(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dest).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AncillaryConfig;

    fn resolver_with(cache: &Path, repos: Vec<PathBuf>, patterns: &[&str]) -> AncillaryResolver {
        AncillaryResolver::new(
            AncillaryConfig {
                cache_root: Some(cache.to_path_buf()),
                repository_roots: repos,
                static_patterns: patterns.iter().map(|s| s.to_string()).collect(),
                dynamic_categories: Vec::new(),
                ..AncillaryConfig::default()
            },
            2,
        )
    }

    #[test]
    fn test_static_resolution_prefers_cache_root() {
        let cache = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(cache.path().join("GEO-PARAM-LUT_v2"), b"cache").unwrap();
        std::fs::write(repo.path().join("GEO-PARAM-LUT_v9"), b"repo").unwrap();

        let resolver = resolver_with(
            cache.path(),
            vec![repo.path().to_path_buf()],
            &["*GEO-PARAM-LUT*"],
        );
        let resolved = resolver.resolve_static().unwrap();
        assert_eq!(resolved, vec![cache.path().join("GEO-PARAM-LUT_v2")]);
    }

    #[test]
    fn test_static_resolution_falls_through_to_repository() {
        let cache = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("TLE-AUX_20260101"), b"x").unwrap();

        let resolver = resolver_with(cache.path(), vec![repo.path().to_path_buf()], &["*TLE-AUX*"]);
        let resolved = resolver.resolve_static().unwrap();
        assert_eq!(resolved, vec![repo.path().join("TLE-AUX_20260101")]);
    }

    #[test]
    fn test_newest_issue_wins_within_a_root() {
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(cache.path().join("SDR-F-LUT_20250101"), b"old").unwrap();
        std::fs::write(cache.path().join("SDR-F-LUT_20260101"), b"new").unwrap();

        let resolver = resolver_with(cache.path(), Vec::new(), &["*SDR-F-LUT*"]);
        let resolved = resolver.resolve_static().unwrap();
        assert_eq!(resolved, vec![cache.path().join("SDR-F-LUT_20260101")]);
    }

    #[test]
    fn test_missing_required_pattern_is_fatal() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver_with(cache.path(), Vec::new(), &["*NOT-THERE*"]);

        let err = resolver.resolve_static().unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(pipeline_err.is_fatal());
        assert!(err.to_string().contains("*NOT-THERE*"));
    }

    #[test]
    fn test_link_into_is_idempotent() {
        let src_dir = tempfile::tempdir().unwrap();
        let anc_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("SDR-QA-LUT_1");
        std::fs::write(&src, b"x").unwrap();

        let files = vec![src];
        let anc = anc_dir.path().join("linked_data");
        assert_eq!(link_into(&anc, &files).unwrap(), 1);
        // Second pass finds the link already present
        assert_eq!(link_into(&anc, &files).unwrap(), 0);
        assert!(anc.join("SDR-QA-LUT_1").exists());
    }

    #[tokio::test]
    async fn test_noop_retriever_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = NoopRetriever
            .retrieve("polar-wander", dir.path(), &[])
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_retriever_parses_stdout_paths() {
        let dir = tempfile::tempdir().unwrap();
        // The fetch command receives the category as its argument; echoing
        // it back exercises the stdout-per-line contract.
        let retriever = CommandRetriever::new("echo");
        let files = retriever
            .retrieve("platform-ephemeris", dir.path(), &[])
            .await
            .unwrap();
        assert_eq!(files, vec![PathBuf::from("platform-ephemeris")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_retriever_surfaces_failure() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = CommandRetriever::new("false");
        assert!(retriever.retrieve("polar-wander", dir.path(), &[]).await.is_err());
    }
}
