//! HTTP response payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::models::scanner::FoldFailure;

/// One ranked class prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopPrediction {
    /// 1-based rank
    pub rank: usize,
    /// Class index in the model output
    pub label_id: usize,
    /// Human-readable class name
    pub label_name: String,
    /// Probability assigned to the class
    pub confidence: f64,
}

/// Successful prediction payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub model_version: String,
    /// Indices of the retained folds that contributed to this request
    pub folds_used: Vec<usize>,
    pub tta_enabled: bool,
    pub top_predictions: Vec<TopPrediction>,
    pub top1_label: Option<String>,
    pub top1_confidence: Option<f64>,
    pub malignant_probability: f64,
    pub malignant_flag: bool,
}

/// Detailed health payload; always served with status 200.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: usize,
    pub loaded_folds: Vec<String>,
    pub failed_folds: Vec<FoldFailure>,
    pub classes: usize,
    pub class_names_count: usize,
    pub model_base_path: String,
    pub metadata_path: String,
    pub models_available: bool,
    pub metrics: MetricsSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Aligned label list payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassesResponse {
    pub classes: Vec<String>,
    pub total: usize,
    pub num_classes: usize,
}

/// Root banner payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub models_loaded: usize,
    pub num_classes: usize,
    pub message: String,
}

/// Uniform error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Rank the distribution into the top `k` predictions.
///
/// Confidence descending; equal confidences break toward the lower class
/// index so ordering stays deterministic.
pub fn rank_predictions(
    probabilities: &[f64],
    class_names: &[String],
    k: usize,
) -> Vec<TopPrediction> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| {
        probabilities[b]
            .partial_cmp(&probabilities[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    indices
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(rank, label_id)| TopPrediction {
            rank: rank + 1,
            label_id,
            label_name: class_names
                .get(label_id)
                .cloned()
                .unwrap_or_else(|| format!("Class_{}", label_id)),
            confidence: probabilities[label_id],
        })
        .collect()
}
