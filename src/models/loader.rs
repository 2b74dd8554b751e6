//! ONNX fold loader and the per-fold inference adapter.
//!
//! Every loaded fold is wrapped behind [`FoldPredictor`], the single seam
//! between the ensemble and the inference runtime: one capability,
//! `predict(tensor) -> fixed-length vector`. The ONNX-backed
//! implementation normalizes the artifact's native output convention,
//! (1, C) or (C,), and rejects anything else instead of guessing.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ArtifactError, InferenceError};
use crate::models::scanner::{self, FoldFailure, MODEL_GRAPH, WEIGHTS_DIR};
use crate::preprocess::ImageTensor;

/// Uniform inference capability over one loaded fold.
pub trait FoldPredictor: Send + Sync {
    /// Run the model on a (1, H, W, 3) tensor, returning exactly one
    /// probability/logit value per output class.
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}

/// A fold retained for ensemble inference.
pub struct LoadedFold {
    /// Fold directory name
    pub name: String,
    /// Fold directory path
    pub path: PathBuf,
    /// Output vector length probed at load time
    pub output_dim: usize,
    /// Inference handle
    pub predictor: Box<dyn FoldPredictor>,
}

/// ONNX Runtime implementation of [`FoldPredictor`].
///
/// The session lives behind an `RwLock` because `Session::run` needs
/// exclusive access; the lock is per fold, so folds never contend with
/// each other.
struct OnnxFold {
    name: String,
    session: RwLock<Session>,
    input_name: String,
    output_name: String,
    output_dim: usize,
}

impl FoldPredictor for OnnxFold {
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let mut session = self.session.write().map_err(|_| InferenceError::Poisoned)?;
        let vector = run_session(&mut session, &self.input_name, &self.output_name, input)?;
        if vector.len() != self.output_dim {
            return Err(InferenceError::Length {
                got: vector.len(),
                expected: self.output_dim,
            });
        }
        Ok(vector)
    }
}

/// Loader for fold artifacts
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
    /// Square input resolution used for the output-dimension probe
    input_size: u32,
}

impl ModelLoader {
    /// Create a loader, initializing the ONNX Runtime once per process.
    pub fn new(onnx_threads: usize, input_size: u32) -> Result<Self> {
        ort::init().commit().context("Failed to initialize ONNX Runtime")?;
        info!(onnx_threads, input_size, "ONNX Runtime initialized");
        Ok(Self {
            onnx_threads,
            input_size,
        })
    }

    /// Load one fold artifact and probe its output dimension.
    pub fn load_fold(&self, path: &Path) -> Result<LoadedFold, ArtifactError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("fold")
            .to_string();
        let graph_path = path.join(WEIGHTS_DIR).join(MODEL_GRAPH);
        if !graph_path.is_file() {
            return Err(ArtifactError::MissingGraph);
        }

        info!(fold = %name, path = %graph_path.display(), "Loading fold model");

        let mut session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(self.onnx_threads))
            .and_then(|b| b.commit_from_file(&graph_path))
            .map_err(|e| ArtifactError::Load(e.to_string()))?;

        // First input feeds the image; prefer an output whose name looks
        // like a probability tensor, falling back to the last one.
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        // Deterministic all-zero probe determines the output vector length.
        let side = self.input_size as usize;
        let probe = ImageTensor::zeros((1, side, side, 3));
        let vector = run_session(&mut session, &input_name, &output_name, &probe)?;
        let output_dim = vector.len();

        info!(
            fold = %name,
            input = %input_name,
            output = %output_name,
            output_dim,
            "Fold loaded and probed"
        );

        Ok(LoadedFold {
            name: name.clone(),
            path: path.to_path_buf(),
            output_dim,
            predictor: Box::new(OnnxFold {
                name,
                session: RwLock::new(session),
                input_name,
                output_name,
                output_dim,
            }),
        })
    }

    /// Scan the base path and load every structurally complete candidate.
    ///
    /// Each candidate is attempted independently: a failure is recorded
    /// with its reason and loading continues. An empty result is a
    /// degraded start, not an error.
    pub fn load_all(&self, base: &Path, fold_prefix: &str) -> (Vec<LoadedFold>, Vec<FoldFailure>) {
        let scan = scanner::scan_artifacts(base, fold_prefix);
        let mut folds = Vec::new();
        let mut failures = scan.rejected;

        let total = scan.candidates.len();
        for (i, path) in scan.candidates.iter().enumerate() {
            info!(
                progress = format!("{}/{}", i + 1, total),
                fold = %path.display(),
                "Loading candidate"
            );
            match self.load_fold(path) {
                Ok(fold) => folds.push(fold),
                Err(e) => {
                    warn!(fold = %path.display(), error = %e, "Failed to load fold, skipping");
                    failures.push(FoldFailure {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            loaded = folds.len(),
            failed = failures.len(),
            "Fold loading complete"
        );

        (folds, failures)
    }
}

/// Execute one session run and normalize the output to a flat vector.
fn run_session(
    session: &mut Session,
    input_name: &str,
    output_name: &str,
    input: &ImageTensor,
) -> Result<Vec<f32>, InferenceError> {
    let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let data: Vec<f32> = input.iter().copied().collect();
    let tensor =
        Tensor::from_array((shape, data)).map_err(|e| InferenceError::Run(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input_name => tensor])
        .map_err(|e| InferenceError::Run(e.to_string()))?;

    if let Some(value) = outputs.get(output_name) {
        if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return ensure_vector(&dims, data);
        }
    }

    // Fallback: first float tensor among all outputs, skipping class-label
    // tensors some exporters emit alongside the probabilities.
    for (name, value) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return ensure_vector(&dims, data);
        }
    }

    Err(InferenceError::MissingOutput)
}

/// Coerce a raw model output to a flat vector.
///
/// Accepts rank-1 `(C,)` and rank-2 `(1, C)`; every other shape is a
/// validation error.
fn ensure_vector(dims: &[i64], data: &[f32]) -> Result<Vec<f32>, InferenceError> {
    match dims {
        [_c] => Ok(data.to_vec()),
        [1, c] => Ok(data[..*c as usize].to_vec()),
        _ => Err(InferenceError::Shape {
            dims: dims.to_vec(),
        }),
    }
}

impl std::fmt::Debug for OnnxFold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxFold")
            .field("name", &self.name)
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("output_dim", &self.output_dim)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_vector_rank1() {
        let v = ensure_vector(&[3], &[0.1, 0.2, 0.7]).expect("rank-1 is valid");
        assert_eq!(v, vec![0.1, 0.2, 0.7]);
    }

    #[test]
    fn test_ensure_vector_rank2_batch1() {
        let v = ensure_vector(&[1, 3], &[0.1, 0.2, 0.7]).expect("(1, C) is valid");
        assert_eq!(v, vec![0.1, 0.2, 0.7]);
    }

    #[test]
    fn test_ensure_vector_rejects_batched_output() {
        let err = ensure_vector(&[2, 3], &[0.0; 6]).expect_err("(2, C) is ambiguous");
        assert!(matches!(err, InferenceError::Shape { .. }));
    }

    #[test]
    fn test_ensure_vector_rejects_higher_rank() {
        let err = ensure_vector(&[1, 2, 2], &[0.0; 4]).expect_err("rank-3 is invalid");
        assert!(matches!(err, InferenceError::Shape { .. }));
    }
}
