//! Model ensemble components

pub mod ensemble;
pub mod loader;
pub mod risk;
pub mod scanner;

pub use ensemble::{EnsembleContext, EnsembleOutcome};
pub use loader::{FoldPredictor, LoadedFold, ModelLoader};
pub use risk::{RiskAssessment, RiskScorer};
pub use scanner::{FoldFailure, ScanOutcome};
