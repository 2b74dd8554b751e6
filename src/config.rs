//! Configuration management for the lesion detection service

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub risk: RiskConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Origins allowed by CORS; "*" allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Model ensemble configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing fold artifact subdirectories
    pub base_path: String,
    /// Directory containing class metadata files
    pub metadata_path: String,
    /// Fold directory name prefix used during discovery
    #[serde(default = "default_fold_prefix")]
    pub fold_prefix: String,
    /// Square input resolution expected by the models
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// Whether test-time augmentation (horizontal flip) is applied
    #[serde(default = "default_tta")]
    pub tta: bool,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Version string reported in prediction responses
    #[serde(default = "default_model_version")]
    pub version: String,
    /// Upper bound on a single request's preprocessing + inference, in ms
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

/// Malignancy risk scoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Class indices whose mass counts toward the malignancy probability
    #[serde(default = "default_malignant_indices")]
    pub malignant_indices: Vec<usize>,
    /// Probability threshold for raising the malignant flag
    #[serde(default = "default_risk_threshold")]
    pub threshold: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://localhost:5174".to_string(),
        "http://localhost:5175".to_string(),
    ]
}

fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_fold_prefix() -> String {
    "effnetv2s_fold".to_string()
}

fn default_input_size() -> u32 {
    224
}

fn default_tta() -> bool {
    true
}

fn default_onnx_threads() -> usize {
    1
}

fn default_model_version() -> String {
    "effnetv2s-fold-ensemble".to_string()
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

fn default_malignant_indices() -> Vec<usize> {
    vec![0, 1, 2, 3, 4]
}

fn default_risk_threshold() -> f64 {
    0.5
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                allowed_origins: default_allowed_origins(),
                max_upload_bytes: default_max_upload_bytes(),
            },
            models: ModelsConfig {
                base_path: "models/checkpoints".to_string(),
                metadata_path: "metadata".to_string(),
                fold_prefix: default_fold_prefix(),
                input_size: default_input_size(),
                tta: default_tta(),
                onnx_threads: default_onnx_threads(),
                version: default_model_version(),
                inference_timeout_ms: default_inference_timeout_ms(),
            },
            risk: RiskConfig {
                malignant_indices: default_malignant_indices(),
                threshold: default_risk_threshold(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.input_size, 224);
        assert_eq!(config.models.fold_prefix, "effnetv2s_fold");
        assert!(config.models.tta);
        assert_eq!(config.risk.malignant_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(config.risk.threshold, 0.5);
    }

    #[test]
    fn test_load_from_toml() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).expect("create config file");
        writeln!(
            f,
            r#"
[server]
host = "127.0.0.1"
port = 9000

[models]
base_path = "/srv/folds"
metadata_path = "/srv/metadata"
tta = false

[risk]
malignant_indices = [0, 1]
threshold = 0.3

[logging]
level = "debug"
format = "pretty"
"#
        )
        .expect("write config");

        let config = AppConfig::load_from_path(&path).expect("load config");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.models.base_path, "/srv/folds");
        assert!(!config.models.tta);
        // Unspecified fields fall back to defaults
        assert_eq!(config.models.input_size, 224);
        assert_eq!(config.risk.malignant_indices, vec![0, 1]);
        assert_eq!(config.risk.threshold, 0.3);
    }
}
