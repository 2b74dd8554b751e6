//! Error taxonomy for artifact loading and request handling.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single fold inference call.
///
/// Covers session execution errors and output-shape violations. The wrapped
/// predict never silently reshapes an ambiguous output: anything other than
/// rank-1 or rank-2 with a leading batch of 1 is rejected.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("session run failed: {0}")]
    Run(String),

    #[error("invalid output shape {dims:?}; expected (C,) or (1, C)")]
    Shape { dims: Vec<i64> },

    #[error("output length {got} != expected {expected}")]
    Length { got: usize, expected: usize },

    #[error("no float tensor found among model outputs")]
    MissingOutput,

    #[error("model session lock poisoned")]
    Poisoned,
}

/// Failure while scanning, loading or validating one model artifact.
///
/// These are recorded per candidate and never abort startup; a candidate
/// that fails is simply excluded from the ensemble.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("incomplete artifact: missing {0}")]
    Structure(&'static str),

    #[error("failed to load model graph: {0}")]
    Load(String),

    #[error("model graph not found under weights/")]
    MissingGraph,

    #[error("output-dimension probe failed: {0}")]
    Probe(#[from] InferenceError),

    #[error("output dim {probed} != resolved dim {resolved}")]
    DimensionMismatch { probed: usize, resolved: usize },
}

/// Request-time failure surfaced to the HTTP caller.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("no image file found in request")]
    MissingImage,

    #[error("file must be an image")]
    NotAnImage,

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("no models loaded; service is unavailable")]
    NoModels,

    #[error("all models failed to produce predictions")]
    Exhausted,

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = InferenceError::Shape { dims: vec![2, 3, 4] };
        assert!(e.to_string().contains("[2, 3, 4]"));

        let e = ArtifactError::DimensionMismatch {
            probed: 40,
            resolved: 43,
        };
        assert!(e.to_string().contains("40"));
        assert!(e.to_string().contains("43"));

        let e = PredictError::Decode("truncated file".into());
        assert!(e.to_string().contains("truncated file"));
    }
}
