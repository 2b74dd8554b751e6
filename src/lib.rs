//! Lesion Detection Service Library
//!
//! Serves skin-lesion classification requests over an ensemble of
//! independently trained k-fold models exported to ONNX. Artifacts are
//! discovered and validated once at startup; requests read the frozen
//! ensemble state only.

pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod schema;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use metadata::ClassMetadata;
pub use models::ensemble::EnsembleContext;
pub use models::loader::ModelLoader;
pub use models::risk::RiskScorer;
pub use preprocess::Preprocessor;
pub use server::ServiceContext;
