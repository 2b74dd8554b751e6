//! Fold Artifact Checker
//!
//! Scans a checkpoint directory and reports the structural state of every
//! fold candidate, sniffing container signatures to diagnose mis-exported
//! model files (zip-based keras archives, HDF5 checkpoints, HTML error
//! pages saved as downloads) that will never load as ONNX graphs.
//!
//! Usage: `check_artifacts [base_path]`, defaulting to the configured
//! `models.base_path`.

use anyhow::Result;
use lesion_detection_service::config::AppConfig;
use lesion_detection_service::models::scanner::{ARTIFACT_CONFIG, MODEL_GRAPH, WEIGHTS_DIR};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct GraphReport {
    present: bool,
    size_mb: Option<f64>,
    signature: Option<String>,
}

#[derive(Debug, Serialize)]
struct FoldReport {
    path: String,
    has_config: bool,
    has_weights_dir: bool,
    graph: GraphReport,
    usable: bool,
}

fn main() -> Result<()> {
    let base = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let config = AppConfig::load().unwrap_or_default();
            PathBuf::from(config.models.base_path)
        }
    };

    let reports = check_base_path(&base);
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn check_base_path(base: &Path) -> Vec<FoldReport> {
    let mut folds: Vec<PathBuf> = fs::read_dir(base)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    folds.sort();

    folds.iter().map(|fold| check_fold(fold)).collect()
}

fn check_fold(fold: &Path) -> FoldReport {
    let has_config = fold.join(ARTIFACT_CONFIG).is_file();
    let has_weights_dir = fold.join(WEIGHTS_DIR).is_dir();

    let graph_path = fold.join(WEIGHTS_DIR).join(MODEL_GRAPH);
    let graph = if graph_path.is_file() {
        let size_mb = fs::metadata(&graph_path)
            .ok()
            .map(|m| (m.len() as f64) / 1024.0 / 1024.0);
        GraphReport {
            present: true,
            size_mb,
            signature: Some(sniff_signature(&graph_path)),
        }
    } else {
        GraphReport {
            present: false,
            size_mb: None,
            signature: None,
        }
    };

    let usable = has_config
        && has_weights_dir
        && graph.present
        && graph
            .signature
            .as_deref()
            .is_some_and(|s| s.starts_with("binary"));

    FoldReport {
        path: fold.display().to_string(),
        has_config,
        has_weights_dir,
        graph,
        usable,
    }
}

/// Classify a file by its leading bytes.
///
/// ONNX graphs are bare protobuf with no magic number, so anything that
/// is not a recognizable wrong container is reported as plain binary.
fn sniff_signature(path: &Path) -> String {
    let mut head = [0u8; 64];
    let n = match fs::File::open(path).and_then(|mut f| f.read(&mut head)) {
        Ok(n) => n,
        Err(_) => return "unreadable".to_string(),
    };
    let head = &head[..n];

    if head.starts_with(b"PK\x03\x04") {
        return "zip (keras archive, not an ONNX graph)".to_string();
    }
    if head.starts_with(b"\x89HDF\r\n\x1a\n") {
        return "hdf5 (keras checkpoint, not an ONNX graph)".to_string();
    }
    if head.starts_with(b"%PDF") {
        return "pdf".to_string();
    }
    let trimmed: Vec<u8> = head
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .copied()
        .collect();
    if trimmed.starts_with(b"<!DOCTYPE") || trimmed.starts_with(b"<html") {
        return "html".to_string();
    }
    if head
        .iter()
        .all(|&b| (32..=126).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r')
    {
        return "text".to_string();
    }

    "binary (protobuf expected for ONNX)".to_string()
}
