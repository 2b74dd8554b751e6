//! Fold artifact discovery.
//!
//! A candidate fold is an immediate subdirectory of the base path whose
//! name starts with the configured prefix. It is structurally complete
//! only when it carries both the artifact metadata file and the
//! weight-store subdirectory.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Artifact metadata file expected inside every fold directory.
pub const ARTIFACT_CONFIG: &str = "config.json";
/// Weight-store subdirectory expected inside every fold directory.
pub const WEIGHTS_DIR: &str = "weights";
/// Serialized model graph expected inside the weight store.
pub const MODEL_GRAPH: &str = "model.onnx";

/// Startup diagnostic record for one excluded candidate.
#[derive(Debug, Clone, Serialize)]
pub struct FoldFailure {
    pub path: String,
    pub error: String,
}

/// Result of scanning the base path.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Structurally complete fold directories, lexically ordered
    pub candidates: Vec<PathBuf>,
    /// Incomplete candidates, with the missing piece recorded
    pub rejected: Vec<FoldFailure>,
}

/// Enumerate fold candidates under `base`.
///
/// Candidates are returned in lexical name order so downstream tie-breaks
/// stay deterministic across filesystems. An unreachable base path is a
/// configuration error: it is logged and yields an empty outcome rather
/// than aborting startup.
pub fn scan_artifacts(base: &Path, fold_prefix: &str) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    if !base.is_dir() {
        error!(
            path = %base.display(),
            "Model base path does not exist or is not a directory; check configuration"
        );
        return outcome;
    }

    info!(path = %base.display(), prefix = %fold_prefix, "Scanning for fold artifacts");

    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            error!(path = %base.display(), error = %e, "Failed to read model base path");
            return outcome;
        }
    };

    let mut folds: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name.starts_with(fold_prefix))
        })
        .collect();
    folds.sort();

    for path in folds {
        let has_config = path.join(ARTIFACT_CONFIG).is_file();
        let has_weights = path.join(WEIGHTS_DIR).is_dir();

        if has_config && has_weights {
            info!(fold = %path.display(), "Found valid fold artifact");
            outcome.candidates.push(path);
        } else {
            let missing = if !has_config {
                ARTIFACT_CONFIG
            } else {
                WEIGHTS_DIR
            };
            warn!(fold = %path.display(), missing = %missing, "Incomplete fold artifact; skipping");
            outcome.rejected.push(FoldFailure {
                path: path.display().to_string(),
                error: format!("incomplete artifact: missing {}", missing),
            });
        }
    }

    info!(
        valid = outcome.candidates.len(),
        rejected = outcome.rejected.len(),
        "Artifact scan complete"
    );

    outcome
}
