//! Log-based success classification for engine invocations.
//!
//! The engine's exit code is not trustworthy: a run can exit zero and
//! still have failed. Success is therefore decided by scanning the log
//! files correlated to the invocation's process id against an ordered
//! table of known error signatures. A log file with no signature hits has
//! exhausted its value and is marked removable.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// One known error signature and the operator hint attached to it.
#[derive(Debug, Clone, Copy)]
pub struct LogSignature {
    /// Substring that identifies the failure in a log line
    pub pattern: &'static str,

    /// Human-readable hint for correcting the problem
    pub hint: &'static str,
}

/// Known engine failure signatures, checked in order; the first matching
/// signature per line wins.
pub const ENGINE_LOG_SIGNATURES: &[LogSignature] = &[
    LogSignature {
        pattern: "PRO_FAIL Required input not available",
        hint: "Missing or out of date ancillary input",
    },
    LogSignature {
        pattern: "PRO_FAIL runAlgorithm()",
        hint: "Algorithm failed",
    },
    LogSignature {
        pattern: "Completed unsuccessfully",
        hint: "Algorithm failed",
    },
    LogSignature {
        pattern: "The DMS directory is not valid",
        hint: "Check engine configuration",
    },
    LogSignature {
        pattern: "arbitrary time is invalid",
        hint: "Problem with input granule, check the launch time reference",
    },
    LogSignature {
        pattern: "Error retrieving data for USNO-POLARWANDER",
        hint: "Polar wander reference needs update",
    },
    LogSignature {
        pattern: "ERROR - CMN GEO satellite position and attitude failure",
        hint: "Problem with reference-track records",
    },
    LogSignature {
        pattern: "PRO_CROSSGRAN_FAIL Required input not available for Shortname",
        hint: "Prerequisite product missing",
    },
];

/// A log line that matched an error signature.
#[derive(Debug, Clone)]
pub struct SignatureMatch {
    /// The offending log line
    pub line: String,

    /// Hint from the signature table
    pub hint: &'static str,
}

/// Result of classifying one log stream.
#[derive(Debug, Default)]
pub struct Classification {
    /// Signature hits, in line order
    pub matches: Vec<SignatureMatch>,

    /// Number of lines examined
    pub lines_scanned: usize,
}

impl Classification {
    /// A stream with zero signature hits indicates success.
    pub fn is_success(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Classify a stream of log lines against the signature table.
pub fn classify<'a, I>(lines: I) -> Classification
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = Classification::default();

    for line in lines {
        result.lines_scanned += 1;
        if let Some(sig) = ENGINE_LOG_SIGNATURES
            .iter()
            .find(|sig| line.contains(sig.pattern))
        {
            result.matches.push(SignatureMatch {
                line: line.to_string(),
                hint: sig.hint,
            });
        }
    }

    result
}

/// Outcome of checking all logs correlated to one invocation.
#[derive(Debug, Default)]
pub struct LogCheck {
    /// True when no examined log carried an error signature
    pub success: bool,

    /// Logs with zero signature hits, eligible for removal
    pub clean_logs: Vec<PathBuf>,

    /// Signature hits per offending log file
    pub matches: Vec<(PathBuf, SignatureMatch)>,
}

/// Locate and classify the log files of one engine invocation.
///
/// Logs live under `log/` in the working directory and carry the child's
/// process id in their names.
pub fn check_engine_logs(work_dir: &Path, pid: u32) -> Result<LogCheck> {
    let log_dir = work_dir.join("log");
    let matcher = glob::Pattern::new(&format!("*{}*.lo*", pid))?;

    let mut check = LogCheck {
        success: true,
        ..LogCheck::default()
    };

    if !log_dir.is_dir() {
        // No correlated logs means no signature hits; vacuous success.
        tracing::warn!("No log directory under {}", work_dir.display());
        return Ok(check);
    }

    let mut log_files: Vec<PathBuf> = std::fs::read_dir(&log_dir)
        .with_context(|| format!("Failed to read log directory {}", log_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| matcher.matches(n))
                .unwrap_or(false)
        })
        .collect();
    log_files.sort();

    for log_file in log_files {
        tracing::info!("Checking log file {} for errors", log_file.display());
        let bytes = std::fs::read(&log_file)
            .with_context(|| format!("Failed to read log file {}", log_file.display()))?;
        let contents = String::from_utf8_lossy(&bytes);

        let classification = classify(contents.lines());
        if classification.is_success() {
            check.clean_logs.push(log_file);
        } else {
            check.success = false;
            for m in classification.matches {
                check.matches.push((log_file.clone(), m));
            }
        }
    }

    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_clean_stream() {
        let lines = ["starting controller", "granule processed", "shutdown complete"];
        let result = classify(lines);
        assert!(result.is_success());
        assert_eq!(result.lines_scanned, 3);
    }

    #[test]
    fn test_classify_surfaces_hint() {
        let lines = [
            "starting controller",
            "PRO_FAIL Required input not available for granule G002",
        ];
        let result = classify(lines);
        assert!(!result.is_success());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].hint, "Missing or out of date ancillary input");
        assert!(result.matches[0].line.contains("G002"));
    }

    #[test]
    fn test_first_signature_per_line_wins() {
        // The line carries two signatures; only the earlier table entry
        // is reported.
        let line = "PRO_FAIL Required input not available: Completed unsuccessfully";
        let result = classify([line]);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].hint, "Missing or out of date ancillary input");
    }

    #[test]
    fn test_exit_zero_semantics_not_assumed() {
        // A single signature anywhere fails the classification, no matter
        // how much benign output surrounds it.
        let mut lines = vec!["ok"; 100];
        lines.push("ERROR - CMN GEO satellite position and attitude failure");
        lines.extend(["ok"; 100]);
        assert!(!classify(lines).is_success());
    }

    #[test]
    fn test_check_logs_marks_clean_files_removable() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("log");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(log_dir.join("engine_4242_a.log"), "all nominal\n").unwrap();
        std::fs::write(log_dir.join("engine_4242_b.log"), "still nominal\n").unwrap();
        // A different invocation's log is not correlated
        std::fs::write(log_dir.join("engine_9999.log"), "PRO_FAIL runAlgorithm()\n").unwrap();

        let check = check_engine_logs(dir.path(), 4242).unwrap();
        assert!(check.success);
        assert_eq!(check.clean_logs.len(), 2);
        assert!(check.matches.is_empty());
    }

    #[test]
    fn test_check_logs_detects_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("log");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(
            log_dir.join("engine_777.log"),
            "starting\nPRO_CROSSGRAN_FAIL Required input not available for Shortname: SENSOR-B01-SDR\n",
        )
        .unwrap();

        let check = check_engine_logs(dir.path(), 777).unwrap();
        assert!(!check.success);
        assert!(check.clean_logs.is_empty());
        assert_eq!(check.matches.len(), 1);
        assert_eq!(check.matches[0].1.hint, "Prerequisite product missing");
    }

    #[test]
    fn test_zero_correlated_logs_is_vacuous_success() {
        let dir = tempfile::tempdir().unwrap();
        let check = check_engine_logs(dir.path(), 1).unwrap();
        assert!(check.success);
        assert!(check.clean_logs.is_empty());
    }
}
