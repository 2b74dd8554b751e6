//! Class metadata loaded at startup.
//!
//! Three optional JSON files live in the metadata directory: the ordered
//! class-name list, a label-to-index map, and per-label decision
//! thresholds. All of them are read-only inputs; a missing or malformed
//! file is logged and skipped, never fatal.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const CLASS_INFO_FILE: &str = "class_info.json";
const LABEL_MAP_FILE: &str = "disease_label_map.json";
const THRESHOLDS_FILE: &str = "label_thresholds.json";

#[derive(Debug, Deserialize)]
struct ClassInfoEntry {
    name: String,
}

/// Metadata bundle describing the label space of the trained folds.
#[derive(Debug, Clone, Default)]
pub struct ClassMetadata {
    /// Human-readable class names, index-aligned with model outputs
    pub class_names: Vec<String>,
    /// Disease label to index map
    pub label_map: HashMap<String, Value>,
    /// Per-label decision thresholds
    pub thresholds: HashMap<String, f64>,
}

impl ClassMetadata {
    /// Load all metadata files found under `dir`.
    pub fn load(dir: &Path) -> Self {
        let mut metadata = Self::default();

        match read_json::<Vec<ClassInfoEntry>>(&dir.join(CLASS_INFO_FILE)) {
            Some(entries) => {
                metadata.class_names = entries.into_iter().map(|e| e.name).collect();
                info!(
                    count = metadata.class_names.len(),
                    "Loaded class names from {}", CLASS_INFO_FILE
                );
            }
            None => warn!(
                path = %dir.join(CLASS_INFO_FILE).display(),
                "{} not available; using placeholder names", CLASS_INFO_FILE
            ),
        }

        match read_json::<HashMap<String, Value>>(&dir.join(LABEL_MAP_FILE)) {
            Some(map) => {
                info!(count = map.len(), "Loaded disease label map");
                metadata.label_map = map;
            }
            None => warn!(
                path = %dir.join(LABEL_MAP_FILE).display(),
                "{} not available", LABEL_MAP_FILE
            ),
        }

        match read_json::<HashMap<String, f64>>(&dir.join(THRESHOLDS_FILE)) {
            Some(map) => {
                info!(count = map.len(), "Loaded label thresholds");
                metadata.thresholds = map;
            }
            None => warn!(
                path = %dir.join(THRESHOLDS_FILE).display(),
                "{} not available", THRESHOLDS_FILE
            ),
        }

        metadata
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read metadata file");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse metadata file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_full_metadata() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(
            dir.path().join(CLASS_INFO_FILE),
            r#"[{"name": "Melanoma"}, {"name": "Nevus"}]"#,
        )
        .expect("write class info");
        fs::write(
            dir.path().join(LABEL_MAP_FILE),
            r#"{"Melanoma": 0, "Nevus": 1}"#,
        )
        .expect("write label map");
        fs::write(
            dir.path().join(THRESHOLDS_FILE),
            r#"{"Melanoma": 0.3, "Nevus": 0.5}"#,
        )
        .expect("write thresholds");

        let metadata = ClassMetadata::load(dir.path());
        assert_eq!(metadata.class_names, vec!["Melanoma", "Nevus"]);
        assert_eq!(metadata.label_map.len(), 2);
        assert_eq!(metadata.thresholds.get("Melanoma"), Some(&0.3));
    }

    #[test]
    fn test_missing_directory_is_empty_metadata() {
        let metadata = ClassMetadata::load(Path::new("/nonexistent/metadata"));
        assert!(metadata.class_names.is_empty());
        assert!(metadata.label_map.is_empty());
        assert!(metadata.thresholds.is_empty());
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(dir.path().join(CLASS_INFO_FILE), "not json at all").expect("write file");

        let metadata = ClassMetadata::load(dir.path());
        assert!(metadata.class_names.is_empty());
    }
}
