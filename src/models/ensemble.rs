//! Ensemble state and prediction.
//!
//! At startup the loaded folds are reconciled to a single output
//! dimension and frozen into an [`EnsembleContext`] shared read-only by
//! every request. Per request, each retained fold contributes one vector
//! (averaged with its horizontally mirrored variant when TTA is on); the
//! surviving vectors are averaged elementwise and pushed through a
//! numerically stable softmax.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::error::{ArtifactError, PredictError};
use crate::models::loader::LoadedFold;
use crate::models::scanner::FoldFailure;
use crate::preprocess::{horizontal_flip, ImageTensor};
use crate::schema::align_class_names;

/// Immutable process-wide ensemble state.
///
/// Invariant: every retained fold reports an output dimension equal to
/// `num_classes`, and `class_names.len() == num_classes`. A context with
/// zero folds is degraded: it still serves diagnostics but rejects
/// predictions.
pub struct EnsembleContext {
    folds: Vec<LoadedFold>,
    num_classes: usize,
    class_names: Vec<String>,
    failures: Vec<FoldFailure>,
}

/// One successful ensemble prediction.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    /// Probability distribution over the resolved classes
    pub probabilities: Vec<f64>,
    /// Indices (into the retained fold list) that contributed
    pub folds_used: Vec<usize>,
}

impl EnsembleContext {
    /// Reconcile loaded folds against the class metadata and freeze the
    /// ensemble state.
    ///
    /// Dimension resolution, in priority order: a positive metadata
    /// length wins when at least one fold matches it; otherwise the most
    /// frequent probed dimension among all loaded folds, ties broken by
    /// first occurrence in load order. Folds disagreeing with the
    /// resolved dimension are dropped and recorded.
    pub fn assemble(
        folds: Vec<LoadedFold>,
        mut failures: Vec<FoldFailure>,
        metadata_names: Vec<String>,
    ) -> Self {
        let metadata_len = metadata_names.len();

        if folds.is_empty() {
            error!("No fold models loaded; service will start degraded");
            return Self {
                folds: Vec::new(),
                num_classes: metadata_len,
                class_names: align_class_names(metadata_names, metadata_len),
                failures,
            };
        }

        let dims: Vec<usize> = folds.iter().map(|f| f.output_dim).collect();
        let num_classes = if metadata_len > 0 {
            if dims.contains(&metadata_len) {
                metadata_len
            } else {
                let majority = majority_dimension(&dims);
                warn!(
                    metadata = metadata_len,
                    majority,
                    "No fold matches the metadata class count; falling back to majority output dim"
                );
                majority
            }
        } else {
            let majority = majority_dimension(&dims);
            info!(majority, "No class metadata; resolved output dim by majority vote");
            majority
        };

        let mut kept = Vec::new();
        for fold in folds {
            if fold.output_dim == num_classes {
                kept.push(fold);
            } else {
                let reason = ArtifactError::DimensionMismatch {
                    probed: fold.output_dim,
                    resolved: num_classes,
                };
                error!(fold = %fold.name, error = %reason, "Dropping fold");
                failures.push(FoldFailure {
                    path: fold.path.display().to_string(),
                    error: reason.to_string(),
                });
            }
        }

        let class_names = align_class_names(metadata_names, num_classes);

        info!(
            retained = kept.len(),
            failed = failures.len(),
            num_classes,
            "Ensemble state assembled"
        );

        Self {
            folds: kept,
            num_classes,
            class_names,
            failures,
        }
    }

    /// True when no fold survived startup.
    pub fn is_degraded(&self) -> bool {
        self.folds.is_empty()
    }

    /// Number of retained folds.
    pub fn fold_count(&self) -> usize {
        self.folds.len()
    }

    /// Resolved output dimension `C`.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Aligned class names, length `C`.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Directory names of the retained folds, in load order.
    pub fn fold_names(&self) -> Vec<String> {
        self.folds.iter().map(|f| f.name.clone()).collect()
    }

    /// Paths of the retained folds, in load order.
    pub fn fold_paths(&self) -> Vec<PathBuf> {
        self.folds.iter().map(|f| f.path.clone()).collect()
    }

    /// Startup failure records (scan, load, probe and dimension drops).
    pub fn failures(&self) -> &[FoldFailure] {
        &self.failures
    }

    /// Run the ensemble on one preprocessed image.
    ///
    /// Folds are evaluated in load order. A fold that errors on this
    /// input is excluded from this request only; the request fails only
    /// when every fold errored.
    pub fn predict(
        &self,
        tensor: &ImageTensor,
        use_tta: bool,
    ) -> Result<EnsembleOutcome, PredictError> {
        if self.folds.is_empty() {
            return Err(PredictError::NoModels);
        }

        info!(
            folds = self.folds.len(),
            tta = use_tta,
            "Running ensemble prediction"
        );

        let flipped = if use_tta {
            Some(horizontal_flip(tensor))
        } else {
            None
        };

        let mut survivors: Vec<(usize, Vec<f32>)> = Vec::with_capacity(self.folds.len());
        for (idx, fold) in self.folds.iter().enumerate() {
            let result = match &flipped {
                Some(mirrored) => fold.predictor.predict(tensor).and_then(|base| {
                    let tta = fold.predictor.predict(mirrored)?;
                    Ok(base
                        .iter()
                        .zip(tta.iter())
                        .map(|(a, b)| (a + b) / 2.0)
                        .collect())
                }),
                None => fold.predictor.predict(tensor),
            };

            match result {
                Ok(vector) => survivors.push((idx, vector)),
                Err(e) => {
                    error!(
                        fold = %fold.name,
                        error = %e,
                        "Fold failed on this input; excluding from this request"
                    );
                }
            }
        }

        if survivors.is_empty() {
            return Err(PredictError::Exhausted);
        }

        // Equal-weight elementwise mean of the surviving vectors.
        let mut mean = vec![0f64; self.num_classes];
        for (_, vector) in &survivors {
            for (acc, &v) in mean.iter_mut().zip(vector.iter()) {
                *acc += f64::from(v);
            }
        }
        let count = survivors.len() as f64;
        for acc in &mut mean {
            *acc /= count;
        }

        Ok(EnsembleOutcome {
            probabilities: stable_softmax(&mean),
            folds_used: survivors.into_iter().map(|(idx, _)| idx).collect(),
        })
    }
}

/// Most frequent dimension; ties broken by earliest first occurrence.
fn majority_dimension(dims: &[usize]) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for &d in dims {
        let entry = counts.entry(d).or_insert(0);
        if *entry == 0 {
            order.push(d);
        }
        *entry += 1;
    }

    let mut best = order[0];
    for &d in &order[1..] {
        if counts[&d] > counts[&best] {
            best = d;
        }
    }
    best
}

/// Softmax with max-subtraction and an epsilon in the denominator, so the
/// result is a valid distribution even for unnormalized inputs.
fn stable_softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let denom: f64 = exp.iter().sum::<f64>() + 1e-12;
    exp.iter().map(|e| e / denom).collect()
}
